//! Fixed-size worker pool.
//!
//! Workers pull [`TestJob`]s from a shared queue and send [`RunResult`]s back
//! over a channel; only the calling thread ever sees the results, so the
//! aggregator needs no locking.

use std::collections::VecDeque;
use std::fs;
use std::sync::mpsc;
use std::thread;

use bdsim_regress_error::{RegressError, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::executor::{RunResult, TestExecutor, TestJob};

/// Worker count for this host.
///
/// `requested == 0` means one worker per CPU. The result never exceeds the
/// CPU count and is at least 1; on a shared host (name starts with one of
/// `shared_hosts`) a third of the workers are given back.
#[must_use]
pub fn pool_size(
    requested: usize,
    cpu_count: usize,
    hostname: &str,
    shared_hosts: &[String],
) -> usize {
    let cpu_count = cpu_count.max(1);
    let mut size = if requested == 0 {
        cpu_count
    } else {
        requested.min(cpu_count)
    };
    if shared_hosts
        .iter()
        .any(|prefix| !prefix.is_empty() && hostname.starts_with(prefix.as_str()))
    {
        size -= size / 3;
    }
    size.max(1)
}

#[must_use]
pub fn available_cpus() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Best-effort host name: `$HOSTNAME`, then `/etc/hostname`.
#[must_use]
pub fn current_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_owned();
        }
    }
    fs::read_to_string("/etc/hostname")
        .map(|text| text.trim().to_owned())
        .unwrap_or_default()
}

/// Run every job on `threads` workers and hand each result to `on_result`
/// in arrival order. Returns once all jobs have finished.
///
/// A worker that panics is reported as [`RegressError::WorkerPool`] once the
/// surviving workers have finished.
pub fn run_jobs<F>(
    jobs: Vec<TestJob>,
    threads: usize,
    executor: &dyn TestExecutor,
    mut on_result: F,
) -> Result<()>
where
    F: FnMut(RunResult),
{
    let total = jobs.len();
    if total == 0 {
        return Ok(());
    }
    let workers = threads.clamp(1, total);
    let queue = Mutex::new(VecDeque::from(jobs));
    let (sender, receiver) = mpsc::channel::<RunResult>();
    info!(jobs = total, workers, "dispatching tests");

    let panicked = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let sender = sender.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let Some(job) = queue.lock().pop_front() else {
                            break;
                        };
                        let result = executor.run(&job);
                        if sender.send(result).is_err() {
                            break;
                        }
                    }
                    debug!(worker, "worker finished");
                })
            })
            .collect();
        // Workers hold the remaining senders; the loop ends once all exit.
        drop(sender);
        for (index, result) in receiver.iter().enumerate() {
            debug!(
                done = index + 1,
                total,
                file = %result.file_name,
                status = %result.status,
                "test finished"
            );
            on_result(result);
        }
        handles
            .into_iter()
            .filter_map(|handle| handle.join().err())
            .count()
    });

    if panicked > 0 {
        return Err(RegressError::WorkerPool(format!(
            "{panicked} of {workers} workers panicked"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::component::{ComponentKind, ComponentSpec, Param};
    use crate::executor::{RunMode, RunStatus};
    use crate::test_case::TestCase;

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    impl TestExecutor for CountingExecutor {
        fn run(&self, job: &TestJob) -> RunResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RunResult::new(job.case.clone(), job.mode, RunStatus::Success)
        }
    }

    fn jobs(count: usize) -> Vec<TestJob> {
        (0..count)
            .map(|index| {
                let length = 0.1 * (index as f64 + 1.0);
                let spec = ComponentSpec::builder(ComponentKind::Drift)
                    .scalar(Param::Length, length)
                    .build()
                    .expect("valid drift");
                let case = TestCase::new("e-", 1.0, spec);
                TestJob::new(PathBuf::from(case.file_name()), case, RunMode::Compare)
            })
            .collect()
    }

    #[test]
    fn pool_size_is_bounded_by_cpus() {
        let shared: Vec<String> = vec!["lxplus".to_owned()];
        assert_eq!(pool_size(0, 8, "laptop", &shared), 8);
        assert_eq!(pool_size(4, 8, "laptop", &shared), 4);
        assert_eq!(pool_size(32, 8, "laptop", &shared), 8);
        assert_eq!(pool_size(3, 0, "laptop", &shared), 1);
    }

    #[test]
    fn shared_host_gives_back_a_third() {
        let shared: Vec<String> = vec!["pplxint".to_owned(), "lxplus".to_owned()];
        assert_eq!(pool_size(0, 9, "lxplus042.cern.ch", &shared), 6);
        assert_eq!(pool_size(0, 1, "pplxint8", &shared), 1);
        assert_eq!(pool_size(0, 9, "mylxplus", &shared), 9);
    }

    #[test]
    fn every_job_runs_exactly_once() {
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };
        let input = jobs(17);
        let expected: BTreeSet<String> = input.iter().map(|job| job.case.file_name()).collect();
        let mut seen = BTreeSet::new();
        run_jobs(input, 4, &executor, |result| {
            assert!(seen.insert(result.file_name.clone()), "duplicate result");
        })
        .expect("run");
        assert_eq!(seen, expected);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 17);
    }

    struct PanickingExecutor;

    impl TestExecutor for PanickingExecutor {
        fn run(&self, job: &TestJob) -> RunResult {
            assert!(job.case.energy < 0.0, "executor blew up");
            RunResult::new(job.case.clone(), job.mode, RunStatus::Success)
        }
    }

    #[test]
    fn worker_panic_is_reported() {
        let err = run_jobs(jobs(3), 2, &PanickingExecutor, |_| {}).expect_err("panic surfaces");
        assert!(matches!(err, RegressError::WorkerPool(_)));
    }

    #[test]
    fn empty_job_list_is_a_no_op() {
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };
        let mut count = 0;
        run_jobs(Vec::new(), 4, &executor, |_| count += 1).expect("run");
        assert_eq!(count, 0);
    }
}
