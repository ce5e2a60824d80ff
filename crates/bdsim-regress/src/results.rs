//! Result aggregation, common-factor analysis and persistence.
//!
//! Results arrive from the pool in completion order and are only ever
//! touched by the collecting thread. The collection is saved as a versioned
//! JSON document so a report can be regenerated without rerunning.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::component::{ComponentKind, Param, ParamValue};
use crate::executor::{RunResult, RunStatus};
use crate::log_parser::Diagnostic;

/// Bumped whenever the persisted layout changes.
pub const RESULTS_SCHEMA_VERSION: u32 = 1;

/// Placeholder for an attribute a result does not carry.
const ABSENT: &str = "none";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentResults {
    /// Arrival order.
    pub results: Vec<RunResult>,
}

/// Attribute values seen across a set of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Every distinct value per attribute.
    pub unique: BTreeMap<String, BTreeSet<String>>,
    /// Attributes holding a single value across all results.
    pub common: BTreeMap<String, String>,
}

/// A value shared by a bucket of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommonFactor {
    Single(String),
    Pair(String, String),
}

impl std::fmt::Display for CommonFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(value) => f.write_str(value),
            Self::Pair(first, second) => write!(f, "{first} or {second}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub soft_failures: usize,
    pub hard_failures: usize,
    pub by_status: BTreeMap<RunStatus, usize>,
    pub by_diagnostic: BTreeMap<Diagnostic, usize>,
}

impl StatusCounts {
    #[must_use]
    pub const fn failures(&self) -> usize {
        self.total - self.passed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub tests: usize,
    pub total_simulation_ms: u64,
    pub total_comparison_ms: u64,
    pub mean_simulation_ms: f64,
    pub mean_comparison_ms: f64,
}

/// Grouping key for dipole results: pole-face variants fold together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipoleKey {
    pub energy: f64,
    pub length: String,
    /// `angle_<v>` or `field_<v>`.
    pub bending: String,
}

impl DipoleKey {
    fn of(result: &RunResult) -> Self {
        let spec = &result.case.spec;
        let fragment = |param: Param| spec.get(param).map(ParamValue::to_name_fragment);
        let bending = fragment(Param::Angle)
            .map(|value| format!("angle_{value}"))
            .or_else(|| fragment(Param::Field).map(|value| format!("field_{value}")))
            .unwrap_or_else(|| ABSENT.to_owned());
        Self {
            energy: result.case.energy,
            length: fragment(Param::Length).unwrap_or_else(|| ABSENT.to_owned()),
            bending,
        }
    }
}

impl PartialEq for DipoleKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DipoleKey {}

impl PartialOrd for DipoleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DipoleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.energy
            .total_cmp(&other.energy)
            .then_with(|| self.length.cmp(&other.length))
            .then_with(|| self.bending.cmp(&other.bending))
    }
}

impl std::fmt::Display for DipoleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "energy={} length={} {}",
            crate::component::format_scalar(self.energy),
            self.length,
            self.bending
        )
    }
}

/// Attributes shared by every result in `results`.
///
/// One distinct value gives [`CommonFactor::Single`], two give
/// [`CommonFactor::Pair`]; three or more are not a common factor.
#[must_use]
pub fn common_factors(results: &[&RunResult]) -> BTreeMap<String, CommonFactor> {
    let summary = summarize(results.iter().copied());
    summary
        .unique
        .into_iter()
        .filter_map(|(name, values)| {
            let mut values = values.into_iter();
            let factor = match (values.next(), values.next(), values.next()) {
                (Some(only), None, None) => CommonFactor::Single(only),
                (Some(first), Some(second), None) => CommonFactor::Pair(first, second),
                _ => return None,
            };
            Some((name, factor))
        })
        .collect()
}

/// Dipole results keyed by `(energy, length, angle-or-field)`.
#[must_use]
pub fn group_dipole_results<'a>(
    results: impl IntoIterator<Item = &'a RunResult>,
) -> BTreeMap<DipoleKey, Vec<&'a RunResult>> {
    let mut groups: BTreeMap<DipoleKey, Vec<&RunResult>> = BTreeMap::new();
    for result in results {
        groups.entry(DipoleKey::of(result)).or_default().push(result);
    }
    groups
}

fn summarize<'a>(results: impl Iterator<Item = &'a RunResult>) -> ParameterSummary {
    let attributes: Vec<BTreeMap<String, String>> =
        results.map(|result| result.case.attributes()).collect();
    let names: BTreeSet<&String> = attributes.iter().flat_map(BTreeMap::keys).collect();

    let mut unique: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in names {
        let values = attributes
            .iter()
            .map(|map| map.get(name).cloned().unwrap_or_else(|| ABSENT.to_owned()))
            .collect();
        unique.insert(name.clone(), values);
    }
    let common = unique
        .iter()
        .filter(|(_, values)| values.len() == 1)
        .filter_map(|(name, values)| values.first().map(|value| (name.clone(), value.clone())))
        .collect();
    ParameterSummary { unique, common }
}

/// Every result of a suite run, grouped by component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsCollection {
    pub schema_version: u32,
    /// Fingerprint of the parameter tables the results were produced from.
    pub parameter_fingerprint: Option<String>,
    pub components: BTreeMap<ComponentKind, ComponentResults>,
}

impl Default for ResultsCollection {
    fn default() -> Self {
        Self {
            schema_version: RESULTS_SCHEMA_VERSION,
            parameter_fingerprint: None,
            components: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

impl ResultsCollection {
    #[must_use]
    pub fn new(parameter_fingerprint: Option<String>) -> Self {
        Self {
            parameter_fingerprint,
            ..Self::default()
        }
    }

    pub fn add_result(&mut self, result: RunResult) {
        self.components
            .entry(result.kind())
            .or_default()
            .results
            .push(result);
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.components.keys().copied().collect()
    }

    #[must_use]
    pub fn results(&self, kind: ComponentKind) -> &[RunResult] {
        self.components
            .get(&kind)
            .map(|entry| entry.results.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.values().map(|entry| entry.results.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct and shared attribute values across a component's results.
    #[must_use]
    pub fn process_results(&self, kind: ComponentKind) -> ParameterSummary {
        summarize(self.results(kind).iter())
    }

    #[must_use]
    pub fn counts(&self, kind: ComponentKind) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in self.results(kind) {
            counts.total += 1;
            if result.passed() {
                counts.passed += 1;
            } else if result.is_hard_failure() {
                counts.hard_failures += 1;
            } else {
                counts.soft_failures += 1;
            }
            *counts.by_status.entry(result.status).or_default() += 1;
            for diagnostic in &result.diagnostics {
                *counts.by_diagnostic.entry(*diagnostic).or_default() += 1;
            }
        }
        counts
    }

    /// Counts summed over every component.
    #[must_use]
    pub fn totals(&self) -> StatusCounts {
        let mut totals = StatusCounts::default();
        for kind in self.components.keys() {
            let counts = self.counts(*kind);
            totals.total += counts.total;
            totals.passed += counts.passed;
            totals.soft_failures += counts.soft_failures;
            totals.hard_failures += counts.hard_failures;
            for (status, count) in counts.by_status {
                *totals.by_status.entry(status).or_default() += count;
            }
            for (diagnostic, count) in counts.by_diagnostic {
                *totals.by_diagnostic.entry(diagnostic).or_default() += count;
            }
        }
        totals
    }

    /// Non-successful results bucketed by status.
    #[must_use]
    pub fn status_buckets(&self, kind: ComponentKind) -> BTreeMap<RunStatus, Vec<&RunResult>> {
        let mut buckets: BTreeMap<RunStatus, Vec<&RunResult>> = BTreeMap::new();
        for result in self.results(kind) {
            if result.status != RunStatus::Success {
                buckets.entry(result.status).or_default().push(result);
            }
        }
        buckets
    }

    /// Results bucketed by each diagnostic they raised.
    #[must_use]
    pub fn diagnostic_buckets(
        &self,
        kind: ComponentKind,
    ) -> BTreeMap<Diagnostic, Vec<&RunResult>> {
        let mut buckets: BTreeMap<Diagnostic, Vec<&RunResult>> = BTreeMap::new();
        for result in self.results(kind) {
            for diagnostic in &result.diagnostics {
                buckets.entry(*diagnostic).or_default().push(result);
            }
        }
        buckets
    }

    #[must_use]
    pub fn timing(&self, kind: ComponentKind) -> TimingSummary {
        let results = self.results(kind);
        let mut summary = TimingSummary {
            tests: results.len(),
            ..TimingSummary::default()
        };
        for result in results {
            summary.total_simulation_ms += result.timing.simulation_ms;
            summary.total_comparison_ms += result.timing.comparison_ms;
        }
        if summary.tests > 0 {
            let tests = summary.tests as f64;
            summary.mean_simulation_ms = summary.total_simulation_ms as f64 / tests;
            summary.mean_comparison_ms = summary.total_comparison_ms as f64 / tests;
        }
        summary
    }

    /// Results with no hard failure anywhere.
    #[must_use]
    pub fn all_passed_hard_checks(&self) -> bool {
        self.components
            .values()
            .flat_map(|entry| &entry.results)
            .all(|result| !result.is_hard_failure())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), results = self.len(), "results saved");
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let header: SchemaHeader = serde_json::from_str(text)?;
        if header.schema_version != RESULTS_SCHEMA_VERSION {
            return Err(RegressError::SchemaMismatch {
                expected: RESULTS_SCHEMA_VERSION,
                found: header.schema_version,
            });
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RegressError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let collection = Self::from_json(&fs::read_to_string(path)?)?;
        debug!(path = %path.display(), results = collection.len(), "results loaded");
        Ok(collection)
    }
}

/// Append one result as a JSON line.
pub fn append_jsonl(path: &Path, result: &RunResult) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    let line = serde_json::to_string(result)?;
    writeln!(file, "{line}")?;
    Ok(())
}
