//! Suite driver: write the tests, run them, aggregate and report.

use std::fs;
use std::path::{Path, PathBuf};

use bdsim_regress_error::{RegressError, Result};
use tracing::{info, warn};

use crate::component::ComponentKind;
use crate::config::{REPORT_FILE, SUMMARY_FILE, SuiteConfig};
use crate::executor::{ProcessExecutor, RunMode, RunStatus, TestExecutor, TestJob};
use crate::params::ParameterSet;
use crate::pool::{available_cpus, current_hostname, pool_size, run_jobs};
use crate::report::write_report;
use crate::results::{ResultsCollection, append_jsonl};
use crate::test_case::{TestCase, sort_canonical};
use crate::writer::{GmadMachineBuilder, MachineBuilder, TestWriter, WriteSummary};

/// What a completed suite run produced.
#[derive(Debug, Clone)]
pub struct SuiteOutcome {
    pub collection: ResultsCollection,
    pub results_path: PathBuf,
    pub report_path: PathBuf,
    pub summary_path: PathBuf,
    /// Reference generations that did not produce an artifact.
    pub generation_failures: usize,
}

impl SuiteOutcome {
    #[must_use]
    pub fn all_passed_hard_checks(&self) -> bool {
        self.generation_failures == 0 && self.collection.all_passed_hard_checks()
    }
}

pub struct TestSuite {
    config: SuiteConfig,
    params: ParameterSet,
    executor: Box<dyn TestExecutor>,
    builder: Box<dyn MachineBuilder>,
}

impl TestSuite {
    /// Suite backed by the real simulator and the gmad writer.
    #[must_use]
    pub fn new(config: SuiteConfig, params: ParameterSet) -> Self {
        let executor = Box::new(ProcessExecutor::new(&config));
        let builder = Box::new(GmadMachineBuilder::from_config(&config));
        Self {
            config,
            params,
            executor,
            builder,
        }
    }

    /// Load the parameter tables named by the config, or the built-in sweep.
    pub fn from_config(config: SuiteConfig) -> Result<Self> {
        let params = match &config.parameter_set {
            Some(path) => ParameterSet::load(path)?,
            None => ParameterSet::default_tables(),
        };
        Ok(Self::new(config, params))
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Box<dyn TestExecutor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn with_machine_builder(mut self, builder: Box<dyn MachineBuilder>) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Parameter tables limited to the configured component subset.
    pub fn active_parameters(&self) -> Result<ParameterSet> {
        if self.config.components.is_empty() {
            return Ok(self.params.clone());
        }
        if let Some(missing) = self
            .config
            .components
            .iter()
            .find(|kind| self.params.axes(**kind).is_none())
        {
            return Err(RegressError::parameter_set(format!(
                "component={missing} requested but has no parameter table"
            )));
        }
        Ok(self.params.restricted_to(&self.config.components))
    }

    /// Files each active component will produce, without touching disk.
    pub fn planned_counts(&self) -> Result<Vec<(ComponentKind, u64)>> {
        let active = self.active_parameters()?;
        let beams =
            (self.config.particles.len() as u64).saturating_mul(self.config.energies.len() as u64);
        Ok(active
            .kinds()
            .map(|kind| (kind, active.combination_count(kind).saturating_mul(beams)))
            .collect())
    }

    /// Validate inputs, then write the options file and every test file.
    pub fn prepare(&self) -> Result<Vec<(ComponentKind, WriteSummary)>> {
        self.config.validate()?;
        let active = self.active_parameters()?;
        active.validate()?;
        let writer = TestWriter::new(&self.config, &active, self.builder.as_ref());
        writer.write_global_options()?;
        writer.write_all()
    }

    /// Run the whole pipeline and persist the results and report.
    pub fn run(&self) -> Result<SuiteOutcome> {
        let written = self.prepare()?;
        let active = self.active_parameters()?;
        let jobs = self.build_jobs(&active, &written)?;
        let threads = pool_size(
            self.config.requested_threads,
            available_cpus(),
            &current_hostname(),
            &self.config.shared_hosts,
        );
        let expected = jobs.len();
        info!(tests = expected, threads, "suite starting");

        let mut generation_failures = 0;
        if self.config.generate_reference {
            let generate = jobs
                .iter()
                .cloned()
                .map(|job| TestJob {
                    mode: RunMode::Generate,
                    ..job
                })
                .collect();
            run_jobs(generate, threads, self.executor.as_ref(), |result| {
                if result.status != RunStatus::Success {
                    generation_failures += 1;
                    warn!(
                        file = %result.file_name,
                        status = %result.status,
                        "reference generation failed"
                    );
                }
            })?;
        }

        let fingerprint = active.fingerprint()?;
        let mut collection = ResultsCollection::new(Some(fingerprint));
        let jsonl_path = self.config.results_jsonl_path();
        if jsonl_path.exists() {
            fs::remove_file(&jsonl_path)?;
        }
        run_jobs(jobs, threads, self.executor.as_ref(), |result| {
            if let Err(err) = append_jsonl(&jsonl_path, &result) {
                warn!(path = %jsonl_path.display(), error = %err, "result stream write failed");
            }
            collection.add_result(result);
        })?;
        if collection.len() != expected {
            return Err(RegressError::internal(format!(
                "expected {expected} results, collected {}",
                collection.len()
            )));
        }

        let results_path = self.config.results_path();
        let report_path = self.config.report_path();
        let summary_path = self.config.summary_path();
        collection.save(&results_path)?;
        write_report(&collection, &report_path, &summary_path)?;

        let totals = collection.totals();
        info!(
            total = totals.total,
            passed = totals.passed,
            soft_failures = totals.soft_failures,
            hard_failures = totals.hard_failures,
            generation_failures,
            "suite finished"
        );
        Ok(SuiteOutcome {
            collection,
            results_path,
            report_path,
            summary_path,
            generation_failures,
        })
    }

    fn build_jobs(
        &self,
        active: &ParameterSet,
        written: &[(ComponentKind, WriteSummary)],
    ) -> Result<Vec<TestJob>> {
        let mut jobs = Vec::new();
        for (kind, summary) in written {
            let mut cases = summary
                .files
                .iter()
                .map(|path| {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    TestCase::parse_file_name(&name)
                })
                .collect::<Result<Vec<_>>>()?;
            sort_canonical(
                &mut cases,
                active,
                &self.config.particles,
                &self.config.energies,
            );
            let dir = self.config.component_dir(*kind);
            jobs.extend(cases.into_iter().map(|case| {
                let path = dir.join(case.file_name());
                TestJob::new(path, case, RunMode::Compare)
            }));
        }
        Ok(jobs)
    }
}

/// Reload saved results and rewrite the report into `output_dir`.
pub fn report_from_saved(results_path: &Path, output_dir: &Path) -> Result<ResultsCollection> {
    let collection = ResultsCollection::load(results_path)?;
    fs::create_dir_all(output_dir).map_err(|source| RegressError::DirectoryCreate {
        path: output_dir.to_path_buf(),
        source,
    })?;
    write_report(
        &collection,
        &output_dir.join(REPORT_FILE),
        &output_dir.join(SUMMARY_FILE),
    )?;
    Ok(collection)
}
