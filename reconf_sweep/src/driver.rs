//! Worker pool and sweep driver.
//!
//! The driver validates the catalog, merges the configured sweep into the
//! persistent queue and drains it with `W` named worker threads. Each
//! worker claims items one at a time and hands them to the trial executor,
//! which resolves every claimed item exactly once. Other driver processes
//! may drain the same queue directory concurrently.

use crate::config::SweepConfig;
use crate::queue::FileQueue;
use crate::trial::TrialExecutor;

use reconf_core::catalog;
use reconf_env::{QueueStats, SweepError, TrialOutcome, TrialStatus, WorkQueue};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of one driver run.
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Outcomes of the trials this run executed, in key order
    pub outcomes: Vec<TrialOutcome>,

    /// Trials marked done by this run
    pub done: usize,

    /// Trials skipped by this run
    pub skipped: usize,

    /// Done trials whose verification reported mismatches
    pub failed_verifications: usize,

    /// Done trials the queue failed to record (still in progress there)
    pub unrecorded: usize,

    /// Queue state after the workers exited
    pub stats: QueueStats,

    /// Workers stopped by a queue failure
    pub worker_errors: Vec<String>,

    /// Number of workers spawned
    pub workers: usize,

    /// Wall time of the run in seconds
    pub elapsed_secs: f64,
}

impl SweepReport {
    /// True when nothing was skipped or mismatched, every done trial was
    /// recorded and every worker exited cleanly.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0
            && self.failed_verifications == 0
            && self.unrecorded == 0
            && self.worker_errors.is_empty()
    }
}

/// What one worker brings back.
struct WorkerResult {
    outcomes: Vec<TrialOutcome>,
    error: Option<SweepError>,
}

/// Drains a work queue with a pool of worker threads.
pub struct Driver {
    executor: TrialExecutor,
    reset_in_progress: bool,
}

impl Driver {
    /// Creates a driver with the default trial executor.
    pub fn new(config: SweepConfig) -> Self {
        Self::with_executor(TrialExecutor::new(config))
    }

    /// Creates a driver around a preconfigured executor.
    pub fn with_executor(executor: TrialExecutor) -> Self {
        Self {
            executor,
            reset_in_progress: false,
        }
    }

    /// Returns abandoned in-progress items to the pool before draining.
    ///
    /// Only safe when no other driver is using the queue directory.
    pub fn with_reset_in_progress(mut self, reset: bool) -> Self {
        self.reset_in_progress = reset;
        self
    }

    /// The sweep configuration.
    pub fn config(&self) -> &SweepConfig {
        self.executor.config()
    }

    /// Runs the sweep until the queue has nothing left to hand out.
    pub fn run(&self) -> Result<SweepReport, SweepError> {
        let started = Instant::now();
        let config = self.executor.config();
        let dimensions = config.dimensions();

        catalog::validate(&dimensions.topologies, &dimensions.node_counts, config.bandwidth)?;

        let sweeps = dimensions.cross_product();
        let queue = FileQueue::open(&config.queue_dir, &sweeps)?;
        if self.reset_in_progress {
            queue.reset_in_progress()?;
        }

        let workers = config.worker_count();
        info!(
            "Sweeping {} parameter sets ({:?} mode) with {} workers",
            sweeps.len(),
            config.mode,
            workers
        );

        let (mut outcomes, worker_errors) = self.spawn_workers(&queue, workers)?;
        outcomes.sort_by_key(|o| o.params);

        let stats = queue.stats()?;
        if stats.in_progress > 0 {
            warn!(
                "{} items remain in progress; rerun with --reset-in-progress once no other driver is active",
                stats.in_progress
            );
        }

        let done = outcomes.iter().filter(|o| o.status == TrialStatus::Done).count();
        let failed_verifications = outcomes
            .iter()
            .filter(|o| o.mismatches.as_ref().is_some_and(|m| !m.is_empty()))
            .count();
        let unrecorded = outcomes
            .iter()
            .filter(|o| o.status == TrialStatus::Done && o.fault.is_some())
            .count();

        Ok(SweepReport {
            done,
            skipped: outcomes.len() - done,
            failed_verifications,
            unrecorded,
            outcomes,
            stats,
            worker_errors,
            workers,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn spawn_workers(
        &self,
        queue: &FileQueue,
        workers: usize,
    ) -> Result<(Vec<TrialOutcome>, Vec<String>), SweepError> {
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for i in 0..workers {
                let executor = &self.executor;
                let handle = std::thread::Builder::new()
                    .name(format!("worker-{}", i))
                    .spawn_scoped(scope, move || drain(queue, executor))
                    .map_err(|e| SweepError::engine(format!("failed to spawn worker-{}: {}", i, e)))?;
                handles.push(handle);
            }

            let mut outcomes = Vec::new();
            let mut errors = Vec::new();
            for (i, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(result) => {
                        outcomes.extend(result.outcomes);
                        if let Some(e) = result.error {
                            errors.push(format!("worker-{}: {}", i, e));
                        }
                    }
                    Err(_) => errors.push(format!("worker-{} panicked", i)),
                }
            }
            Ok((outcomes, errors))
        })
    }
}

/// Claims and executes items until the queue runs dry or fails.
fn drain(queue: &dyn WorkQueue, executor: &TrialExecutor) -> WorkerResult {
    let mut outcomes = Vec::new();
    loop {
        match queue.get_next() {
            Ok(Some(params)) => outcomes.push(executor.execute(&params, queue)),
            Ok(None) => {
                debug!("queue drained after {} trials", outcomes.len());
                return WorkerResult {
                    outcomes,
                    error: None,
                };
            }
            Err(e) => {
                error!("Queue failure, worker stopping: {}", e);
                return WorkerResult {
                    outcomes,
                    error: Some(e),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconf_env::{Mode, ParameterSet, TopologyId};
    use std::path::{Path, PathBuf};

    struct Sandbox {
        root: tempfile::TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(root.path().join("shm")).unwrap();
            Self { root }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.root.path().join(name)
        }

        fn driver(&self, workers: usize) -> Driver {
            let config = SweepConfig::for_mode(Mode::Test)
                .with_results_root(self.path("results"))
                .with_scratch_root(self.path("scratch"))
                .with_queue_dir(self.path("queue"))
                .with_fixtures_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join("expes-tests"))
                .with_workers(workers);
            Driver::with_executor(TrialExecutor::new(config).with_segment_dir(self.path("shm")))
        }
    }

    fn summary(report: &SweepReport) -> Vec<(ParameterSet, TrialStatus, bool)> {
        report
            .outcomes
            .iter()
            .map(|o| (o.params, o.status, o.passed()))
            .collect()
    }

    #[test]
    fn test_mode_sweep_passes_every_fixture() {
        let sandbox = Sandbox::new();
        let report = sandbox.driver(2).run().unwrap();

        assert_eq!(report.outcomes.len(), TopologyId::all().len());
        assert!(report.is_clean(), "{:?}", report.outcomes);
        assert_eq!(report.done, 8);
        assert!(report.stats.is_drained());
        assert_eq!(std::fs::read_dir(sandbox.path("shm")).unwrap().count(), 0);
    }

    #[test]
    fn test_worker_count_does_not_change_outcomes() {
        let single = Sandbox::new();
        let pool = Sandbox::new();

        let one = single.driver(1).run().unwrap();
        let four = pool.driver(4).run().unwrap();

        assert_eq!(one.workers, 1);
        assert_eq!(four.workers, 4);
        assert_eq!(summary(&one), summary(&four));
    }

    #[test]
    fn test_rerun_resumes_finished_queue() {
        let sandbox = Sandbox::new();
        sandbox.driver(2).run().unwrap();

        let again = sandbox.driver(2).run().unwrap();
        assert!(again.outcomes.is_empty());
        assert_eq!(again.stats.done, 8);
    }

    #[test]
    fn test_abandoned_item_needs_manual_reset() {
        let sandbox = Sandbox::new();
        let sweeps = sandbox.driver(1).config().dimensions().cross_product();
        let queue = FileQueue::open(sandbox.path("queue"), &sweeps).unwrap();
        let abandoned = queue.get_next().unwrap().unwrap();

        let report = sandbox.driver(2).run().unwrap();
        assert_eq!(report.outcomes.len(), 7);
        assert_eq!(report.stats.in_progress, 1);
        assert!(report.outcomes.iter().all(|o| o.params != abandoned));

        let report = sandbox.driver(2).with_reset_in_progress(true).run().unwrap();
        assert_eq!(summary(&report), vec![(abandoned, TrialStatus::Done, true)]);
        assert!(report.stats.is_drained());
    }

    #[test]
    fn test_missing_fixtures_are_skipped_not_fatal() {
        let sandbox = Sandbox::new();
        let config = sandbox
            .driver(3)
            .config()
            .clone()
            .with_fixtures_dir(sandbox.path("empty"));
        let driver = Driver::with_executor(TrialExecutor::new(config).with_segment_dir(sandbox.path("shm")));

        let report = driver.run().unwrap();
        assert_eq!(report.skipped, 8);
        assert!(!report.is_clean());
        assert!(report.stats.is_drained());
    }

    struct PanickingVerifier;

    impl reconf_core::ResultVerifier for PanickingVerifier {
        fn verify(
            &self,
            _: &reconf_core::ExpectedResult,
            _: &Path,
        ) -> Result<Vec<String>, SweepError> {
            panic!("verifier blew up");
        }
    }

    #[test]
    fn test_panicking_trials_do_not_stall_the_sweep() {
        let sandbox = Sandbox::new();
        let config = sandbox.driver(1).config().clone();
        let executor = TrialExecutor::new(config)
            .with_segment_dir(sandbox.path("shm"))
            .with_verifier(PanickingVerifier);

        let report = Driver::with_executor(executor).run().unwrap();

        assert!(report.worker_errors.is_empty());
        assert_eq!(report.outcomes.len(), 8);
        assert_eq!(report.skipped, 8);
        assert!(report.stats.is_drained());
        assert_eq!(std::fs::read_dir(sandbox.path("shm")).unwrap().count(), 0);
        for outcome in &report.outcomes {
            let results_dir = sandbox.path("results").join(outcome.params.results_key());
            assert!(results_dir.join(crate::debug_log::DEBUG_FILE).is_file());
        }
    }
}
