//! Sweep configuration and mode-specific defaults.

use crate::sweep::Dimensions;
use reconf_env::{Mode, TopologyId};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Base link bandwidth in bytes per second.
pub const DEFAULT_BANDWIDTH: f64 = 1_000.0;

/// Duration parameter naming the production uptime schedules.
pub const UPTIME_DURATION: u32 = 180;

/// Node counts of the production sweep.
pub const PRODUCTION_NODE_COUNTS: [usize; 3] = [9, 16, 25];

/// Repetitions per (topology, node count) in production.
pub const PRODUCTION_RUNS: u32 = 30;

/// Node count of every test-mode trial.
pub const TEST_NODE_COUNT: usize = 6;

/// Share of available cores given to workers; the rest is left to the engine.
pub const WORKER_SHARE: f64 = 0.5;

/// Everything the driver needs to run one sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Production or test sweep
    pub mode: Mode,

    /// Permanent results go under `<results_root>/<topology>-<n>/<run_id>/`
    pub results_root: PathBuf,

    /// Ephemeral per-trial debug logs
    pub scratch_root: PathBuf,

    /// Work queue persistence directory
    pub queue_dir: PathBuf,

    /// Test fixtures and their uptime schedules
    pub fixtures_dir: PathBuf,

    /// Production uptime schedules
    pub schedules_dir: PathBuf,

    /// Base link bandwidth handed to the topology providers
    pub bandwidth: f64,

    /// Duration parameter of production schedule names
    pub uptime_duration: u32,

    /// Worker count override (None = derived from available cores)
    pub workers: Option<usize>,

    /// Whether the engine models radio interference
    pub interferences: bool,
}

impl SweepConfig {
    /// Creates the default configuration for a mode.
    pub fn for_mode(mode: Mode) -> Self {
        let home = home_dir();
        let scratch_root = std::env::temp_dir().join("reconf-sweep");
        let queue_dir = match mode {
            Mode::Production => home.join("reconf-sweeper"),
            Mode::Test => scratch_root.join(format!("test-{}", unix_secs())),
        };
        Self {
            mode,
            results_root: home
                .join("results-reconfiguration")
                .join("topologies")
                .join(mode.dir_name()),
            scratch_root,
            queue_dir,
            fixtures_dir: PathBuf::from("expes-tests"),
            schedules_dir: PathBuf::from("uptimes_schedules"),
            bandwidth: DEFAULT_BANDWIDTH,
            uptime_duration: UPTIME_DURATION,
            workers: None,
            interferences: false,
        }
    }

    /// Sets the results root.
    pub fn with_results_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_root = dir.into();
        self
    }

    /// Sets the scratch root.
    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = dir.into();
        self
    }

    /// Sets the work queue directory.
    pub fn with_queue_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.queue_dir = dir.into();
        self
    }

    /// Sets the fixtures directory.
    pub fn with_fixtures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = dir.into();
        self
    }

    /// Sets the production schedules directory.
    pub fn with_schedules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schedules_dir = dir.into();
        self
    }

    /// Forces a worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Number of workers to spawn.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1);
            worker_count_for(cores)
        })
    }

    /// The cross-product swept in this mode.
    pub fn dimensions(&self) -> Dimensions {
        match self.mode {
            Mode::Production => Dimensions {
                topologies: TopologyId::all(),
                node_counts: PRODUCTION_NODE_COUNTS.to_vec(),
                run_ids: (0..PRODUCTION_RUNS).collect(),
            },
            Mode::Test => Dimensions {
                topologies: TopologyId::all(),
                node_counts: vec![TEST_NODE_COUNT],
                run_ids: vec![0],
            },
        }
    }
}

/// `ceil(cores * WORKER_SHARE)`, at least one.
pub fn worker_count_for(cores: usize) -> usize {
    ((cores as f64) * WORKER_SHARE).ceil().max(1.0) as usize
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_under_subscribes() {
        assert_eq!(worker_count_for(1), 1);
        assert_eq!(worker_count_for(2), 1);
        assert_eq!(worker_count_for(7), 4);
        assert_eq!(worker_count_for(16), 8);
        assert_eq!(worker_count_for(0), 1);
    }

    #[test]
    fn test_worker_override() {
        let config = SweepConfig::for_mode(Mode::Test).with_workers(0);
        assert_eq!(config.worker_count(), 1);
        assert!(SweepConfig::for_mode(Mode::Test).worker_count() >= 1);
    }

    #[test]
    fn test_mode_dimensions() {
        let test = SweepConfig::for_mode(Mode::Test).dimensions();
        assert_eq!(test.cross_product().len(), 8);

        let production = SweepConfig::for_mode(Mode::Production).dimensions();
        assert_eq!(production.cross_product().len(), 8 * 3 * 30);
    }

    #[test]
    fn test_mode_paths() {
        let test = SweepConfig::for_mode(Mode::Test);
        assert!(test.results_root.ends_with("topologies/tests"));
        assert!(test.queue_dir.starts_with(&test.scratch_root));

        let production = SweepConfig::for_mode(Mode::Production);
        assert!(production.results_root.ends_with("topologies/paper"));
        assert!(production.queue_dir.ends_with("reconf-sweeper"));
    }
}
