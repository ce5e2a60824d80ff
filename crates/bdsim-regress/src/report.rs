//! Human-readable and JSON reports over a [`ResultsCollection`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use bdsim_regress_error::Result;
use serde::Serialize;
use tracing::info;

use crate::component::ComponentKind;
use crate::executor::RunResult;
use crate::results::{
    ResultsCollection, StatusCounts, TimingSummary, common_factors, group_dipole_results,
};

/// Render the full text report.
#[must_use]
pub fn produce_report(collection: &ResultsCollection) -> String {
    let mut text = String::new();
    let totals = collection.totals();

    text.push_str("BDSIM regression results\n");
    text.push_str("========================\n");
    let _ = writeln!(
        text,
        "Total tests: {} | Passed: {} | Soft failures: {} | Hard failures: {}",
        totals.total, totals.passed, totals.soft_failures, totals.hard_failures
    );
    if let Some(fingerprint) = &collection.parameter_fingerprint {
        let _ = writeln!(text, "Parameter set: {fingerprint}");
    }
    text.push('\n');

    for kind in collection.kinds() {
        render_component(&mut text, collection, kind);
    }

    text.push_str("Timing\n------\n");
    for kind in collection.kinds() {
        let timing = collection.timing(kind);
        let _ = writeln!(
            text,
            "{kind}: {} tests, simulation {} ms total ({:.1} ms mean), \
             comparison {} ms total ({:.1} ms mean)",
            timing.tests,
            timing.total_simulation_ms,
            timing.mean_simulation_ms,
            timing.total_comparison_ms,
            timing.mean_comparison_ms
        );
    }
    text
}

fn render_component(text: &mut String, collection: &ResultsCollection, kind: ComponentKind) {
    let counts = collection.counts(kind);
    let _ = writeln!(
        text,
        "{kind}: {}/{} passed, {} failures",
        counts.passed,
        counts.total,
        counts.failures()
    );

    for (status, bucket) in collection.status_buckets(kind) {
        let _ = writeln!(text, "  {status}: {}", bucket.len());
        render_factors(text, &bucket);
    }
    for (diagnostic, bucket) in collection.diagnostic_buckets(kind) {
        let _ = writeln!(
            text,
            "  {diagnostic} (code {}): {}",
            diagnostic.code(),
            bucket.len()
        );
        render_factors(text, &bucket);
    }

    if kind.is_dipole() {
        let failing: Vec<&RunResult> = collection
            .results(kind)
            .iter()
            .filter(|result| !result.passed())
            .collect();
        let groups = group_dipole_results(failing);
        if !groups.is_empty() {
            text.push_str("  failing dipole groups:\n");
            for (key, members) in groups {
                let _ = writeln!(text, "    {key}: {} tests", members.len());
            }
        }
    }
    text.push('\n');
}

fn render_factors(text: &mut String, bucket: &[&RunResult]) {
    let factors = common_factors(bucket);
    if factors.is_empty() {
        return;
    }
    let rendered: Vec<String> = factors
        .iter()
        .map(|(name, factor)| format!("{name}={factor}"))
        .collect();
    let _ = writeln!(text, "    common: {}", rendered.join(", "));
}

#[derive(Debug, Serialize)]
struct ComponentSummary {
    counts: StatusCounts,
    timing: TimingSummary,
}

#[derive(Debug, Serialize)]
struct ReportSummary<'a> {
    schema_version: u32,
    parameter_fingerprint: Option<&'a str>,
    all_passed_hard_checks: bool,
    totals: StatusCounts,
    components: BTreeMap<ComponentKind, ComponentSummary>,
}

/// Machine-readable companion to [`produce_report`].
pub fn render_summary_json(collection: &ResultsCollection) -> Result<String> {
    let components = collection
        .kinds()
        .into_iter()
        .map(|kind| {
            (
                kind,
                ComponentSummary {
                    counts: collection.counts(kind),
                    timing: collection.timing(kind),
                },
            )
        })
        .collect();
    let summary = ReportSummary {
        schema_version: collection.schema_version,
        parameter_fingerprint: collection.parameter_fingerprint.as_deref(),
        all_passed_hard_checks: collection.all_passed_hard_checks(),
        totals: collection.totals(),
        components,
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

/// Write the text report and its JSON summary.
pub fn write_report(
    collection: &ResultsCollection,
    report_path: &Path,
    summary_path: &Path,
) -> Result<()> {
    fs::write(report_path, produce_report(collection))?;
    fs::write(summary_path, render_summary_json(collection)?)?;
    info!(
        report = %report_path.display(),
        summary = %summary_path.display(),
        "report written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentSpec, Param};
    use crate::executor::{RunMode, RunStatus};
    use crate::log_parser::Diagnostic;
    use crate::test_case::TestCase;

    fn drift(length: f64, status: RunStatus) -> RunResult {
        let spec = ComponentSpec::builder(ComponentKind::Drift)
            .scalar(Param::Length, length)
            .build()
            .expect("valid drift");
        RunResult::new(TestCase::new("e-", 1.0, spec), RunMode::Compare, status)
    }

    #[test]
    fn component_line_counts_passes_and_failures() {
        let mut collection = ResultsCollection::default();
        collection.add_result(drift(0.1, RunStatus::Success));
        collection.add_result(drift(1.0, RunStatus::Failed));
        let report = produce_report(&collection);
        assert!(
            report.contains("drift: 1/2 passed, 1 failures"),
            "actual={report}"
        );
        assert!(report.contains("  failed: 1"));
        assert!(report.contains("common: energy=1.0, length=1.0, particle=e-"));
    }

    #[test]
    fn diagnostics_get_their_own_bucket() {
        let mut collection = ResultsCollection::default();
        let mut soft = drift(0.1, RunStatus::Success);
        soft.diagnostics = vec![Diagnostic::StuckParticle];
        collection.add_result(soft);
        let report = produce_report(&collection);
        assert!(report.contains("drift: 0/1 passed, 1 failures"));
        assert!(report.contains("stuck_particle (code 5): 1"), "actual={report}");
    }

    #[test]
    fn summary_json_carries_totals() {
        let mut collection = ResultsCollection::default();
        collection.add_result(drift(0.1, RunStatus::Success));
        let json = render_summary_json(&collection).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["totals"]["passed"], 1);
        assert_eq!(value["all_passed_hard_checks"], true);
        assert_eq!(value["components"]["drift"]["counts"]["total"], 1);
    }

    #[test]
    fn write_report_creates_both_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collection = ResultsCollection::default();
        let report = dir.path().join("report.txt");
        let summary = dir.path().join("summary.json");
        write_report(&collection, &report, &summary).expect("write");
        assert!(report.is_file());
        assert!(summary.is_file());
    }
}
