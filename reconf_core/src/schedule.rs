//! Uptime schedules - when each node is available.
//!
//! A schedule document is a JSON array with one entry per node; each entry
//! is a list of `[start, end]` up windows in seconds:
//!
//! ```json
//! [[[0.0, 100.0]], [[5.0, 20.0], [40.0, 100.0]]]
//! ```
//!
//! Production sweeps share one document per run id across node counts, so
//! a document may describe more nodes than a trial uses.

use reconf_env::{SweepError, TopologyId};
use std::path::{Path, PathBuf};

/// Up windows for every node of a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct UptimeSchedule {
    windows: Vec<Vec<(f64, f64)>>,
}

impl UptimeSchedule {
    /// Builds a schedule from per-node windows, sorting each node's windows.
    pub fn new(mut windows: Vec<Vec<(f64, f64)>>) -> Result<Self, SweepError> {
        for (node, node_windows) in windows.iter_mut().enumerate() {
            if let Some(bad) = node_windows
                .iter()
                .find(|(start, end)| !(start.is_finite() && end.is_finite()) || end < start)
            {
                return Err(SweepError::invalid(format!(
                    "node {} has malformed up window [{}, {}]",
                    node, bad.0, bad.1
                )));
            }
            node_windows.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Ok(Self { windows })
    }

    /// Loads a schedule document and checks it covers `node_count` nodes.
    pub fn load(path: &Path, node_count: usize) -> Result<Self, SweepError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        let windows: Vec<Vec<(f64, f64)>> =
            serde_json::from_str(&raw).map_err(SweepError::serialization)?;
        if windows.len() < node_count {
            return Err(SweepError::invalid(format!(
                "{} describes {} nodes, trial needs {}",
                path.display(),
                windows.len(),
                node_count
            )));
        }
        Self::new(windows)
    }

    /// Number of nodes described.
    pub fn node_count(&self) -> usize {
        self.windows.len()
    }

    /// True if `node` is up at time `t`.
    pub fn is_up(&self, node: usize, t: f64) -> bool {
        self.windows
            .get(node)
            .map_or(false, |ws| ws.iter().any(|&(s, e)| s <= t && t <= e))
    }

    /// Earliest start `>= t` at which both `a` and `b` stay up for
    /// `duration` seconds.
    pub fn earliest_joint_window(&self, a: usize, b: usize, t: f64, duration: f64) -> Option<f64> {
        let (wa, wb) = (self.windows.get(a)?, self.windows.get(b)?);
        let mut best: Option<f64> = None;
        for &(sa, ea) in wa {
            for &(sb, eb) in wb {
                let start = sa.max(sb).max(t);
                let end = ea.min(eb);
                if start + duration <= end && best.map_or(true, |b| start < b) {
                    best = Some(start);
                }
            }
        }
        best
    }
}

/// Production schedule path: `<dir>/<run_id>-<duration>.json`.
pub fn production_path(dir: &Path, run_id: u32, duration: u32) -> PathBuf {
    dir.join(format!("{}-{}.json", run_id, duration))
}

/// Test schedule path: `<dir>/<topology>.json`.
pub fn test_path(dir: &Path, topology: TopologyId) -> PathBuf {
    dir.join(format!("{}.json", topology))
}
