//! Run executor: one simulator invocation plus comparison per test file.
//!
//! The simulator and comparator are opaque external programs. The executor
//! only spawns them, enforces the per-test timeout, maps exit codes onto
//! [`RunStatus`], classifies the simulator log and then applies the
//! artifact cleanup policy. Failures are never retried; their artifacts are
//! moved under `<component>/failed/` for manual inspection.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::ComponentKind;
use crate::config::SuiteConfig;
use crate::log_parser::{Diagnostic, Geant4ExceptionClassifier, LogClassifier};
use crate::test_case::TestCase;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Comparator exit code for a passing comparison.
pub const COMPARATOR_PASS: i32 = 0;
/// Comparator exit code for a content mismatch.
pub const COMPARATOR_FAILED: i32 = 1;
/// Comparator exit code for bad arguments.
pub const COMPARATOR_INCORRECT_ARGS: i32 = 2;
/// Comparator exit code for a missing input file.
pub const COMPARATOR_FILE_NOT_FOUND: i32 = 3;

// ---------------------------------------------------------------------------
// Jobs and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Produce reference output; no comparison.
    Generate,
    /// Compare fresh output against a reference.
    Compare,
}

/// Primary outcome of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Comparator found a mismatch.
    Failed,
    /// Comparator rejected its arguments.
    IncorrectArgs,
    /// An expected artifact was never produced.
    FileNotFound,
    /// The simulator was killed at the timeout.
    Timeout,
}

impl RunStatus {
    pub const ALL: &[Self] = &[
        Self::Success,
        Self::Failed,
        Self::IncorrectArgs,
        Self::FileNotFound,
        Self::Timeout,
    ];

    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::IncorrectArgs => 2,
            Self::FileNotFound => 3,
            Self::Timeout => 7,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::IncorrectArgs => "incorrect_args",
            Self::FileNotFound => "file_not_found",
            Self::Timeout => "timeout",
        }
    }

    /// Map a comparator exit code; unknown codes count as a mismatch.
    #[must_use]
    pub const fn from_comparator_code(code: i32) -> Self {
        match code {
            COMPARATOR_PASS => Self::Success,
            COMPARATOR_INCORRECT_ARGS => Self::IncorrectArgs,
            COMPARATOR_FILE_NOT_FOUND => Self::FileNotFound,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Wall time spent in each external step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub simulation_ms: u64,
    pub comparison_ms: u64,
}

/// Outcome of one test; never mutated after the executor returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub case: TestCase,
    pub file_name: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub comparator_code: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
    pub timing: Timing,
    /// Short machine-readable reason for non-success outcomes.
    pub detail: Option<String>,
}

impl RunResult {
    #[must_use]
    pub fn new(case: TestCase, mode: RunMode, status: RunStatus) -> Self {
        let file_name = case.file_name();
        Self {
            case,
            file_name,
            mode,
            status,
            comparator_code: None,
            diagnostics: Vec::new(),
            timing: Timing::default(),
            detail: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        self.case.kind()
    }

    /// Comparison passed and the log was clean.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Success && self.diagnostics.is_empty()
    }

    /// Comparison passed but the log shows a non-fatal diagnostic.
    #[must_use]
    pub fn is_soft_failure(&self) -> bool {
        self.status == RunStatus::Success
            && !self.diagnostics.is_empty()
            && !self.diagnostics.iter().any(|diagnostic| diagnostic.is_hard())
    }

    /// Generation or comparison failed, or a fatal exception was logged.
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        self.status != RunStatus::Success
            || self.diagnostics.iter().any(|diagnostic| diagnostic.is_hard())
    }
}

/// One unit of work for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct TestJob {
    /// Path of the generated lattice file.
    pub case_file: PathBuf,
    pub case: TestCase,
    /// Explicit reference artifact; when absent the reference set (or a
    /// self-comparison copy) is used.
    pub reference: Option<PathBuf>,
    pub mode: RunMode,
}

impl TestJob {
    #[must_use]
    pub fn new(case_file: PathBuf, case: TestCase, mode: RunMode) -> Self {
        Self {
            case_file,
            case,
            reference: None,
            mode,
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: PathBuf) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Executes one job to completion.
pub trait TestExecutor: Send + Sync {
    fn run(&self, job: &TestJob) -> RunResult;
}

// ---------------------------------------------------------------------------
// Artifact layout and cleanup policy
// ---------------------------------------------------------------------------

/// Files a single test may leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub artifact: PathBuf,
    pub self_copy: PathBuf,
    pub simulator_log: PathBuf,
    pub comparator_log: PathBuf,
}

impl ArtifactPaths {
    #[must_use]
    pub fn new(dir: &Path, stem: &str, extension: &str) -> Self {
        Self {
            artifact: dir.join(format!("{stem}.{extension}")),
            self_copy: dir.join(format!("{stem}_copy.{extension}")),
            simulator_log: dir.join(format!("{stem}_bdsim.log")),
            comparator_log: dir.join(format!("{stem}_comparator.log")),
        }
    }
}

/// What to delete and what to preserve after a test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    pub delete: Vec<PathBuf>,
    pub move_to_failed: Vec<PathBuf>,
}

/// Decide the fate of each artifact for a finished test.
///
/// - clean pass: delete everything (unless `keep_passed`);
/// - timeout: delete the partial artifact, keep the simulator log;
/// - comparator code 2/3 with the reference absent: delete the simulator
///   log and artifact, keep only the comparator log;
/// - anything else (mismatch, missing output, diagnostics): keep the
///   artifact and both logs.
#[must_use]
pub fn cleanup_plan(
    result: &RunResult,
    paths: &ArtifactPaths,
    reference_present: bool,
    keep_passed: bool,
) -> CleanupPlan {
    let ArtifactPaths {
        artifact,
        self_copy,
        simulator_log,
        comparator_log,
    } = paths.clone();

    if result.passed() {
        if keep_passed {
            return CleanupPlan::default();
        }
        return CleanupPlan {
            delete: vec![artifact, self_copy, simulator_log, comparator_log],
            move_to_failed: Vec::new(),
        };
    }
    if result.status == RunStatus::Timeout {
        return CleanupPlan {
            delete: vec![artifact, self_copy, comparator_log],
            move_to_failed: vec![simulator_log],
        };
    }
    let reference_missing_code = matches!(
        result.comparator_code,
        Some(COMPARATOR_INCORRECT_ARGS | COMPARATOR_FILE_NOT_FOUND)
    );
    if reference_missing_code && !reference_present {
        return CleanupPlan {
            delete: vec![artifact, self_copy, simulator_log],
            move_to_failed: vec![comparator_log],
        };
    }
    CleanupPlan {
        delete: vec![self_copy],
        move_to_failed: vec![artifact, simulator_log, comparator_log],
    }
}

/// Carry out a plan; files that do not exist are skipped.
pub fn apply_cleanup(plan: &CleanupPlan, failed_dir: &Path) -> Result<()> {
    for path in &plan.delete {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    let existing: Vec<&PathBuf> = plan
        .move_to_failed
        .iter()
        .filter(|path| path.exists())
        .collect();
    if existing.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(failed_dir).map_err(|source| RegressError::DirectoryCreate {
        path: failed_dir.to_path_buf(),
        source,
    })?;
    for path in existing {
        let Some(name) = path.file_name() else {
            continue;
        };
        move_file(path, &failed_dir.join(name))?;
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Cross-device moves fall back to copy + delete.
    fs::copy(from, to)?;
    fs::remove_file(from)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subprocess handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// Spawn `command` + `extra_args` in `cwd`, stdout and stderr into
/// `log_path`, killing it once `timeout` elapses.
pub fn run_with_timeout(
    command: &[String],
    extra_args: &[String],
    cwd: &Path,
    log_path: &Path,
    timeout: Duration,
) -> Result<ProcessStatus> {
    let Some((program, leading)) = command.split_first() else {
        return Err(RegressError::config("empty command"));
    };
    let stdout_file = File::create(log_path)?;
    let stderr_file = stdout_file.try_clone()?;
    let mut child = Command::new(program)
        .args(leading)
        .args(extra_args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|err| RegressError::Spawn {
            program: program.clone(),
            detail: err.to_string(),
        })?;

    let started_at = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ProcessStatus {
                exit_code: status.code(),
                timed_out: false,
                elapsed_ms: elapsed_ms(started_at),
            });
        }
        if started_at.elapsed() >= timeout {
            let _ = child.kill();
            let status = child.wait()?;
            return Ok(ProcessStatus {
                exit_code: status.code(),
                timed_out: true,
                elapsed_ms: elapsed_ms(started_at),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Process-backed executor
// ---------------------------------------------------------------------------

/// Default executor: runs the real simulator and comparator.
pub struct ProcessExecutor {
    config: SuiteConfig,
    classifier: Box<dyn LogClassifier>,
    timeout: Duration,
}

impl ProcessExecutor {
    #[must_use]
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            config: config.clone(),
            classifier: Box::new(Geant4ExceptionClassifier::default()),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn LogClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Override the per-test timeout (applies to simulator and comparator).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn simulator_args(&self, case_file: &Path, stem: &str) -> Vec<String> {
        let file_name = case_file
            .file_name()
            .map_or_else(|| case_file.display().to_string(), |name| {
                name.to_string_lossy().into_owned()
            });
        vec![
            format!("--file={file_name}"),
            format!("--output={}", self.config.output_format),
            format!("--outfile={stem}"),
            "--batch".to_owned(),
            format!("--seed={}", self.config.seed),
        ]
    }

    fn execute(&self, job: &TestJob, paths: &ArtifactPaths, dir: &Path) -> (RunResult, bool) {
        let kind = job.case.kind();
        let stem = job.case.file_stem();
        let mut result = RunResult::new(job.case.clone(), job.mode, RunStatus::Success);

        // A stale artifact would mask a simulator that produced nothing.
        if paths.artifact.exists() {
            if let Err(err) = fs::remove_file(&paths.artifact) {
                warn!(component = %kind, file = %result.file_name, error = %err, "stale artifact not removed");
                result.status = RunStatus::Failed;
                result.detail = Some(format!(
                    "stale_artifact_remove_failed path={} error={err}",
                    paths.artifact.display()
                ));
                return (result, true);
            }
        }

        let simulation = run_with_timeout(
            &self.config.simulator,
            &self.simulator_args(&job.case_file, &stem),
            dir,
            &paths.simulator_log,
            self.timeout,
        );
        let simulation = match simulation {
            Ok(status) => status,
            Err(err) => {
                warn!(component = %kind, file = %result.file_name, error = %err, "simulator spawn failed");
                result.status = RunStatus::FileNotFound;
                result.detail = Some(format!("simulator_spawn_failed error={err}"));
                return (result, true);
            }
        };
        result.timing.simulation_ms = simulation.elapsed_ms;

        if let Ok(log_text) = fs::read_to_string(&paths.simulator_log) {
            result.diagnostics = self.classifier.classify(&log_text);
        }
        if simulation.timed_out {
            result.status = RunStatus::Timeout;
            result.detail = Some(format!("timeout_exceeded after_ms={}", simulation.elapsed_ms));
            return (result, true);
        }
        if !paths.artifact.exists() {
            result.status = RunStatus::FileNotFound;
            result.detail = Some(format!(
                "artifact_missing simulator_exit={:?}",
                simulation.exit_code
            ));
            return (result, true);
        }

        match job.mode {
            RunMode::Generate => {
                let target = self.config.reference_artifact(kind, &stem);
                let stored = target
                    .parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .map_err(RegressError::from)
                    .and_then(|()| move_file(&paths.artifact, &target));
                if let Err(err) = stored {
                    result.status = RunStatus::Failed;
                    result.detail = Some(format!("reference_store_failed error={err}"));
                }
                (result, true)
            }
            RunMode::Compare => self.compare(job, paths, dir, result),
        }
    }

    fn compare(
        &self,
        job: &TestJob,
        paths: &ArtifactPaths,
        dir: &Path,
        mut result: RunResult,
    ) -> (RunResult, bool) {
        let reference = match &job.reference {
            Some(path) => path.clone(),
            None => {
                let from_set = self
                    .config
                    .reference_artifact(job.case.kind(), &job.case.file_stem());
                if from_set.exists() {
                    from_set
                } else {
                    if let Err(err) = fs::copy(&paths.artifact, &paths.self_copy) {
                        result.status = RunStatus::Failed;
                        result.detail = Some(format!("self_copy_failed error={err}"));
                        return (result, true);
                    }
                    paths.self_copy.clone()
                }
            }
        };
        let reference_present = reference.exists();

        let args = [absolute_display(&reference), absolute_display(&paths.artifact)];
        let comparison = run_with_timeout(
            &self.config.comparator,
            &args,
            dir,
            &paths.comparator_log,
            self.timeout,
        );
        match comparison {
            Ok(status) => {
                result.timing.comparison_ms = status.elapsed_ms;
                if status.timed_out {
                    result.status = RunStatus::Timeout;
                    result.detail = Some("comparator_timeout".to_owned());
                    return (result, reference_present);
                }
                let code = status.exit_code.unwrap_or(-1);
                result.comparator_code = Some(code);
                result.status = RunStatus::from_comparator_code(code);
                let missing_reference = matches!(
                    code,
                    COMPARATOR_INCORRECT_ARGS | COMPARATOR_FILE_NOT_FOUND
                ) && !reference_present;
                if missing_reference {
                    result.status = RunStatus::FileNotFound;
                    result.detail = Some(format!(
                        "reference_missing path={}",
                        reference.display()
                    ));
                } else if result.status != RunStatus::Success {
                    result.detail = Some(format!("comparator_exit code={code}"));
                }
            }
            Err(err) => {
                result.status = RunStatus::Failed;
                result.detail = Some(format!("comparator_spawn_failed error={err}"));
            }
        }
        (result, reference_present)
    }
}

impl TestExecutor for ProcessExecutor {
    fn run(&self, job: &TestJob) -> RunResult {
        let kind = job.case.kind();
        let dir = job
            .case_file
            .parent()
            .map_or_else(|| self.config.component_dir(kind), Path::to_path_buf);
        let paths = ArtifactPaths::new(
            &dir,
            &job.case.file_stem(),
            &self.config.artifact_extension,
        );

        let (mut result, reference_present) = self.execute(job, &paths, &dir);

        let plan = cleanup_plan(
            &result,
            &paths,
            reference_present,
            self.config.keep_passed_artifacts,
        );
        if let Err(err) = apply_cleanup(&plan, &dir.join(crate::config::FAILED_DIR_NAME)) {
            warn!(file = %result.file_name, error = %err, "artifact cleanup failed");
            result
                .detail
                .get_or_insert_with(String::new)
                .push_str(&format!(" cleanup_failed error={err}"));
        }

        if result.passed() {
            debug!(component = %kind, file = %result.file_name, "test passed");
        } else {
            info!(
                component = %kind,
                file = %result.file_name,
                status = %result.status,
                diagnostics = ?result.diagnostics,
                "test did not pass cleanly"
            );
        }
        result
    }
}

fn absolute_display(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
