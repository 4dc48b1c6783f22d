//! Trial executor - runs one parameter set end to end.
//!
//! A trial owns three ephemeral resources: its results directory, its
//! debug log and its shared sync segment. Whatever happens, the segment is
//! released, the debug log ends up in the results directory and the item
//! is resolved in the work queue. Faults never leave `execute`: they are
//! logged and turned into a `skip`.

use crate::config::SweepConfig;
use crate::debug_log::DebugLog;
use crate::shm::{self, SharedSegment};

use reconf_core::catalog;
use reconf_core::schedule;
use reconf_core::{
    EngineSummary, Fixture, FixtureVerifier, InterfaceSpec, NodeArguments, ResultVerifier,
    SimulationEngine, Simulator,
};
use reconf_env::{Mode, ParameterSet, SweepError, TrialOutcome, TrialStatus, WorkQueue};
use std::any::Any;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Name of the single network interface every node uses.
pub const INTERFACE: &str = "eth0";

/// Entry behaviour of every node.
pub const BEHAVIOR: &str = "on_pull";

/// Where a trial writes.
#[derive(Debug, Clone)]
pub struct TrialLayout {
    /// Permanent results directory
    pub results_dir: PathBuf,

    /// Ephemeral directory holding the debug log while the trial runs
    pub scratch_dir: PathBuf,

    /// The trial's debug log
    pub debug_log: DebugLog,
}

impl TrialLayout {
    /// Derives the layout from the parameter set key.
    pub fn new(config: &SweepConfig, params: &ParameterSet) -> Self {
        let key = params.results_key();
        let scratch_dir = config.scratch_root.join(&key);
        Self {
            results_dir: config.results_root.join(&key),
            debug_log: DebugLog::in_dir(&scratch_dir),
            scratch_dir,
        }
    }
}

/// What a successful trial produced.
#[derive(Debug, Clone)]
pub struct TrialReport {
    /// Simulation wall time
    pub sim_time: Duration,

    /// Engine counters
    pub summary: EngineSummary,

    /// Verification mismatches (test mode only)
    pub mismatches: Option<Vec<String>>,
}

/// Runs trials for one sweep configuration.
pub struct TrialExecutor {
    config: SweepConfig,
    verifier: Box<dyn ResultVerifier>,
    segment_dir: PathBuf,
}

impl TrialExecutor {
    /// Creates an executor using the fixture verifier and the default
    /// shared memory location.
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            verifier: Box::new(FixtureVerifier),
            segment_dir: shm::default_dir(),
        }
    }

    /// Replaces the result verifier.
    pub fn with_verifier(mut self, verifier: impl ResultVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    /// Places shared segments in `dir`.
    pub fn with_segment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segment_dir = dir.into();
        self
    }

    /// The configuration trials run under.
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Layout of a trial.
    pub fn layout(&self, params: &ParameterSet) -> TrialLayout {
        TrialLayout::new(&self.config, params)
    }

    /// Runs one claimed item and resolves it in `queue`.
    ///
    /// Never fails: faults are logged, recorded in the outcome and the
    /// item is skipped.
    pub fn execute(&self, params: &ParameterSet, queue: &dyn WorkQueue) -> TrialOutcome {
        let key = params.results_key();
        let span = info_span!(
            "trial",
            key = %key,
            shape = params.topology.shape().name(),
            favorability = ?params.topology.favorability()
        );
        let _enter = span.enter();

        let started = Instant::now();
        let layout = self.layout(params);
        let mut sink: Option<BufWriter<File>> = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_trial(params, &layout, &mut sink)
        }))
        .unwrap_or_else(|payload| {
            Err(SweepError::engine(format!(
                "trial panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        let outcome = match result {
            Ok(report) => {
                match &report.mismatches {
                    Some(m) if m.is_empty() => info!("✓ {}: ok", key),
                    Some(m) => warn!("✗ {}: errors: \n{}", key, m.join("\n")),
                    None => info!("✓ {}: done in {:.2}s", key, report.sim_time.as_secs_f64()),
                }
                let summary = &report.summary;
                debug!(
                    "{} events, {}/{} nodes finished, {} dropped, end at {:.4}s",
                    summary.events, summary.finished, summary.nodes, summary.dropped, summary.end_time
                );
                let fault = queue.done(params).err().map(|e| {
                    error!("Failed to mark {} done: {}", key, e);
                    format!("not recorded as done: {}", fault_detail(&e))
                });
                TrialOutcome {
                    params: *params,
                    status: TrialStatus::Done,
                    elapsed: started.elapsed(),
                    mismatches: report.mismatches,
                    fault,
                }
            }
            Err(fault) => {
                let detail = fault_detail(&fault);
                match &fault {
                    SweepError::MissingFixture(path) => {
                        warn!("No test found for {} ({})", params.topology, path.display())
                    }
                    _ => error!("✗ {}: trial fault: {}", key, detail),
                }
                if let Some(log) = sink.as_mut() {
                    if let Err(e) = writeln!(log, "trial fault: {}", detail) {
                        warn!("Could not record fault in debug log: {}", e);
                    }
                }
                if let Err(e) = queue.skip(params) {
                    error!("Failed to mark {} skipped: {}", key, e);
                }
                TrialOutcome {
                    params: *params,
                    status: TrialStatus::Skip,
                    elapsed: started.elapsed(),
                    mismatches: None,
                    fault: Some(detail),
                }
            }
        };

        if let Some(mut log) = sink.take() {
            if let Err(e) = log.flush() {
                warn!("Could not flush debug log: {}", e);
            }
        }
        match layout.debug_log.relocate(&layout.results_dir) {
            Ok(_) => remove_empty_dirs(&layout.scratch_dir, &self.config.scratch_root),
            Err(e) => error!("Failed to relocate debug log for {}: {}", key, e),
        }

        outcome
    }

    fn run_trial(
        &self,
        params: &ParameterSet,
        layout: &TrialLayout,
        sink: &mut Option<BufWriter<File>>,
    ) -> Result<TrialReport, SweepError> {
        let n = params.node_count;

        std::fs::create_dir_all(&layout.results_dir)
            .map_err(|e| SweepError::io(&layout.results_dir, e))?;
        ensure_dir(&layout.scratch_dir)?;
        let log = sink.insert(layout.debug_log.create()?);

        let uptime_schedule = self.resolve_schedule(params)?;

        let entry = catalog::entry(params.topology);
        let topology = (entry.topology)(n, self.config.bandwidth)?;
        let task_list = (entry.tasks)(n);

        let segment = Arc::new(SharedSegment::create_in(&self.segment_dir, n)?);

        let mut simulator = Simulator::with_interface(INTERFACE, InterfaceSpec::wireless(&topology));
        let args = Arc::new(NodeArguments {
            results_dir: layout.results_dir.clone(),
            node_count: n,
            uptime_schedule,
            task_list,
            topology,
            sync: segment.clone(),
        });

        info!("Starting {}", params);
        let sim_start = Instant::now();
        for _ in 0..n {
            simulator.create_node(BEHAVIOR, &[INTERFACE], Arc::clone(&args))?;
        }
        let run = simulator.run(self.config.interferences, log);
        let sim_time = sim_start.elapsed();

        // Release before looking at the run result, so faults release too
        let released = segment.release();
        let summary = run?;
        released?;

        let mismatches = match self.config.mode {
            Mode::Test => {
                let fixture = Fixture::load(&Fixture::path_for(
                    &self.config.fixtures_dir,
                    params.topology,
                ))?;
                Some(
                    self.verifier
                        .verify(&fixture.expected_result, &layout.results_dir)?,
                )
            }
            Mode::Production => None,
        };

        Ok(TrialReport {
            sim_time,
            summary,
            mismatches,
        })
    }

    /// Production: `<schedules>/<run_id>-<duration>.json`.
    /// Test: `<fixtures>/<topology>.json`, which must exist.
    fn resolve_schedule(&self, params: &ParameterSet) -> Result<PathBuf, SweepError> {
        match self.config.mode {
            Mode::Production => Ok(schedule::production_path(
                &self.config.schedules_dir,
                params.run_id,
                self.config.uptime_duration,
            )),
            Mode::Test => {
                let path = schedule::test_path(&self.config.fixtures_dir, params.topology);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(SweepError::MissingFixture(path))
                }
            }
        }
    }
}

/// Error message followed by its source chain.
pub fn fault_detail(fault: &SweepError) -> String {
    let mut detail = fault.to_string();
    let mut source = std::error::Error::source(fault);
    while let Some(cause) = source {
        detail.push_str(&format!(": caused by: {}", cause));
        source = cause.source();
    }
    detail
}

/// Text carried by a caught panic.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// `create_dir_all` that tolerates a sibling trial pruning a shared empty
/// parent in between.
fn ensure_dir(dir: &Path) -> Result<(), SweepError> {
    let mut attempts = 0;
    loop {
        match std::fs::create_dir_all(dir) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempts < 3 => attempts += 1,
            Err(e) => return Err(SweepError::io(dir, e)),
        }
    }
}

/// Removes `dir` and its empty ancestors, stopping at `root`.
fn remove_empty_dirs(dir: &Path, root: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        // Stops at the first directory still holding something
        if dir == root || !dir.starts_with(root) || std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
