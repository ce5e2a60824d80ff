//! Suite configuration.
//!
//! One [`SuiteConfig`] is built at suite start (defaults, optionally
//! overlaid by a JSON file and CLI flags) and passed by reference into the
//! writer, executor and aggregator.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{ComponentKind, format_scalar};

/// Seed handed to every simulator invocation.
pub const DEFAULT_SEED: u64 = 2_017;
/// Per-test wall-clock budget for the simulator.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Primaries generated per test.
pub const DEFAULT_NGENERATE: u32 = 100;

/// Shared options file included by every generated lattice.
pub const GLOBAL_OPTIONS_FILE: &str = "trackingTestOptions.gmad";
/// Subdirectory (per component) receiving artifacts of failed tests.
pub const FAILED_DIR_NAME: &str = "failed";
/// Persisted results document.
pub const RESULTS_FILE: &str = "results.json";
/// Per-result stream written while the suite runs.
pub const RESULTS_JSONL_FILE: &str = "results.jsonl";
/// Human-readable report.
pub const REPORT_FILE: &str = "report.txt";
/// Machine-readable report summary.
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Root of every generated file, log, artifact and report.
    pub output_dir: PathBuf,
    /// Simulator program plus leading arguments.
    pub simulator: Vec<String>,
    /// Comparator program plus leading arguments.
    pub comparator: Vec<String>,
    /// Value for the simulator's `--output=` flag.
    pub output_format: String,
    /// Extension of the artifact the simulator writes next to `--outfile`.
    pub artifact_extension: String,
    pub seed: u64,
    pub timeout_secs: u64,
    /// Worker count requested; 0 means "one per CPU".
    pub requested_threads: usize,
    /// Host name prefixes of shared machines where the pool is reduced.
    pub shared_hosts: Vec<String>,
    pub particles: Vec<String>,
    /// Beam energies in GeV.
    pub energies: Vec<f64>,
    /// Component subset; empty means every kind in the parameter set.
    pub components: Vec<ComponentKind>,
    /// Directory of reference artifacts; defaults to `<output_dir>/reference`.
    pub reference_dir: Option<PathBuf>,
    /// Produce a fresh reference set before comparing against it.
    pub generate_reference: bool,
    /// Keep artifacts of passing tests instead of deleting them.
    pub keep_passed_artifacts: bool,
    /// Optional JSON parameter tables replacing the built-in sweep.
    pub parameter_set: Option<PathBuf>,
    pub ngenerate: u32,
    pub physics_list: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("bdsim-regress-out"),
            simulator: vec!["bdsim".to_owned()],
            comparator: vec!["comparator".to_owned()],
            output_format: "rootevent".to_owned(),
            artifact_extension: "root".to_owned(),
            seed: DEFAULT_SEED,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            requested_threads: 0,
            shared_hosts: vec!["pplxint".to_owned(), "lxplus".to_owned()],
            particles: vec!["e-".to_owned(), "proton".to_owned()],
            energies: vec![1.0, 10.0],
            components: Vec::new(),
            reference_dir: None,
            generate_reference: false,
            keep_passed_artifacts: false,
            parameter_set: None,
            ngenerate: DEFAULT_NGENERATE,
            physics_list: "em".to_owned(),
        }
    }
}

impl SuiteConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RegressError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| RegressError::config(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "suite config loaded");
        Ok(config)
    }

    /// Returns every configuration problem found.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<String> {
        let mut diagnostics = Vec::new();
        if self.simulator.first().is_none_or(|program| program.trim().is_empty()) {
            diagnostics.push("simulator_command_empty".to_owned());
        }
        if self.comparator.first().is_none_or(|program| program.trim().is_empty()) {
            diagnostics.push("comparator_command_empty".to_owned());
        }
        if self.particles.is_empty() {
            diagnostics.push("particle_list_empty".to_owned());
        }
        if self.particles.iter().any(|particle| particle.contains("__")) {
            diagnostics.push("particle_name_contains_separator".to_owned());
        }
        let mut particles = BTreeSet::new();
        for particle in &self.particles {
            if !particles.insert(particle.as_str()) {
                diagnostics.push(format!("particle_duplicate particle={particle}"));
            }
        }
        if self.energies.is_empty() {
            diagnostics.push("energy_list_empty".to_owned());
        }
        if self
            .energies
            .iter()
            .any(|energy| !energy.is_finite() || *energy <= 0.0)
        {
            diagnostics.push("energy_not_positive".to_owned());
        }
        let mut energies = BTreeSet::new();
        for energy in &self.energies {
            let name = format_scalar(*energy);
            if !energies.insert(name.clone()) {
                diagnostics.push(format!("energy_duplicate energy={name}"));
            }
        }
        if self.timeout_secs == 0 {
            diagnostics.push("timeout_zero".to_owned());
        }
        if self.output_format.trim().is_empty() {
            diagnostics.push("output_format_empty".to_owned());
        }
        diagnostics
    }

    pub fn validate(&self) -> Result<()> {
        let diagnostics = self.diagnostics();
        if diagnostics.is_empty() {
            return Ok(());
        }
        Err(RegressError::config(diagnostics.join("; ")))
    }

    #[must_use]
    pub fn component_dir(&self, kind: ComponentKind) -> PathBuf {
        self.output_dir.join(kind.name())
    }

    #[must_use]
    pub fn failed_dir(&self, kind: ComponentKind) -> PathBuf {
        self.component_dir(kind).join(FAILED_DIR_NAME)
    }

    #[must_use]
    pub fn reference_root(&self) -> PathBuf {
        self.reference_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("reference"))
    }

    /// Reference artifact expected for a given test stem.
    #[must_use]
    pub fn reference_artifact(&self, kind: ComponentKind, stem: &str) -> PathBuf {
        self.reference_root()
            .join(kind.name())
            .join(format!("{stem}.{}", self.artifact_extension))
    }

    #[must_use]
    pub fn global_options_path(&self) -> PathBuf {
        self.output_dir.join(GLOBAL_OPTIONS_FILE)
    }

    /// Options file as written into each lattice. The simulator runs inside
    /// the component directory, so the path is relative to it.
    #[must_use]
    pub fn options_include_path(&self) -> PathBuf {
        Path::new("..").join(GLOBAL_OPTIONS_FILE)
    }

    #[must_use]
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_FILE)
    }

    #[must_use]
    pub fn results_jsonl_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_JSONL_FILE)
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }
}
