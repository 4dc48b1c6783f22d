//! Common types for reconfiguration sweeps.

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logical network shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Clique,
    Chain,
    Ring,
    Star,
    Grid,
}

impl Shape {
    /// Returns the shape name.
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Clique => "clique",
            Shape::Chain => "chain",
            Shape::Ring => "ring",
            Shape::Star => "star",
            Shape::Grid => "grid",
        }
    }
}

/// Whether the aggregator placement suits the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Favorability {
    /// Aggregator sits where the shape naturally converges
    Fav,

    /// Aggregator sits somewhere awkward for the shape
    NonFav,
}

/// Topology identifiers swept by the driver.
///
/// This is a closed set: every identifier maps to exactly one task list
/// provider and one topology provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TopologyId {
    #[serde(rename = "star-fav")]
    StarFav,

    #[serde(rename = "star-nonfav")]
    StarNonFav,

    #[serde(rename = "ring-fav")]
    RingFav,

    #[serde(rename = "chain-fav")]
    ChainFav,

    #[serde(rename = "chain-nonfav")]
    ChainNonFav,

    #[serde(rename = "clique-fav")]
    CliqueFav,

    #[serde(rename = "grid-fav")]
    GridFav,

    #[serde(rename = "grid-nonfav")]
    GridNonFav,
}

impl TopologyId {
    /// Returns every topology identifier.
    pub fn all() -> Vec<TopologyId> {
        vec![
            TopologyId::StarFav,
            TopologyId::StarNonFav,
            TopologyId::RingFav,
            TopologyId::ChainFav,
            TopologyId::ChainNonFav,
            TopologyId::CliqueFav,
            TopologyId::GridNonFav,
            TopologyId::GridFav,
        ]
    }

    /// Returns the identifier as used in paths and fixtures.
    pub fn name(&self) -> &'static str {
        match self {
            TopologyId::StarFav => "star-fav",
            TopologyId::StarNonFav => "star-nonfav",
            TopologyId::RingFav => "ring-fav",
            TopologyId::ChainFav => "chain-fav",
            TopologyId::ChainNonFav => "chain-nonfav",
            TopologyId::CliqueFav => "clique-fav",
            TopologyId::GridFav => "grid-fav",
            TopologyId::GridNonFav => "grid-nonfav",
        }
    }

    /// Returns the network shape.
    pub fn shape(&self) -> Shape {
        match self {
            TopologyId::StarFav | TopologyId::StarNonFav => Shape::Star,
            TopologyId::RingFav => Shape::Ring,
            TopologyId::ChainFav | TopologyId::ChainNonFav => Shape::Chain,
            TopologyId::CliqueFav => Shape::Clique,
            TopologyId::GridFav | TopologyId::GridNonFav => Shape::Grid,
        }
    }

    /// Returns the favorability mode implied by the name.
    pub fn favorability(&self) -> Favorability {
        match self {
            TopologyId::StarNonFav | TopologyId::ChainNonFav | TopologyId::GridNonFav => {
                Favorability::NonFav
            }
            _ => Favorability::Fav,
        }
    }
}

impl std::fmt::Display for TopologyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TopologyId {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopologyId::all()
            .into_iter()
            .find(|id| id.name() == s.to_lowercase())
            .ok_or_else(|| SweepError::UnknownTopology(s.to_string()))
    }
}

/// Key of one trial.
///
/// Ordering is lexicographic over (topology, node count, run id), which
/// is also the order in which the work queue hands items out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Topology and favorability
    pub topology: TopologyId,

    /// Number of simulated nodes
    pub node_count: usize,

    /// Repetition index (selects the uptime schedule in production)
    pub run_id: u32,
}

impl ParameterSet {
    /// Creates a parameter set.
    pub fn new(topology: TopologyId, node_count: usize, run_id: u32) -> Self {
        Self {
            topology,
            node_count,
            run_id,
        }
    }

    /// Relative results path, `<topology>-<node_count>/<run_id>`.
    ///
    /// Distinct keys always give distinct paths, so concurrent trials
    /// never share a directory.
    pub fn results_key(&self) -> String {
        format!("{}-{}/{}", self.topology, self.node_count, self.run_id)
    }
}

impl std::fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{topology: {}, node_count: {}, run_id: {}}}",
            self.topology, self.node_count, self.run_id
        )
    }
}

/// Sweep mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Full parameter sweep, reports wall time per trial
    Production,

    /// Small sweep verified against golden fixtures
    Test,
}

impl Mode {
    /// Directory name under the results root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Mode::Production => "paper",
            Mode::Test => "tests",
        }
    }
}

/// Final queue status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Done,
    Skip,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialStatus::Done => write!(f, "done"),
            TrialStatus::Skip => write!(f, "skip"),
        }
    }
}

/// Result of one attempted trial.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    /// Trial key
    pub params: ParameterSet,

    /// Queue status the trial was recorded with
    pub status: TrialStatus,

    /// Wall time from setup to completion
    pub elapsed: Duration,

    /// Verification mismatches (test mode only, empty = pass)
    pub mismatches: Option<Vec<String>>,

    /// Fault detail when the trial was skipped, or when a done trial could
    /// not be recorded in the queue
    pub fault: Option<String>,
}

impl TrialOutcome {
    /// True if the trial was done, recorded, and every verification passed.
    pub fn passed(&self) -> bool {
        self.status == TrialStatus::Done
            && self.fault.is_none()
            && self.mismatches.as_ref().map_or(true, |m| m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_name_round_trip() {
        for id in TopologyId::all() {
            let parsed: TopologyId = id.name().parse().unwrap();
            assert_eq!(parsed, id);
        }
        assert!("hypercube-fav".parse::<TopologyId>().is_err());
    }

    #[test]
    fn test_topology_serde_uses_kebab_name() {
        let json = serde_json::to_string(&TopologyId::ChainNonFav).unwrap();
        assert_eq!(json, "\"chain-nonfav\"");
    }

    #[test]
    fn test_favorability_from_name() {
        assert_eq!(TopologyId::StarFav.favorability(), Favorability::Fav);
        assert_eq!(TopologyId::GridNonFav.favorability(), Favorability::NonFav);
        assert_eq!(TopologyId::GridNonFav.shape(), Shape::Grid);
    }

    #[test]
    fn test_results_key_partitions_by_parameters() {
        let a = ParameterSet::new(TopologyId::StarFav, 6, 0);
        let b = ParameterSet::new(TopologyId::StarFav, 6, 1);
        assert_eq!(a.results_key(), "star-fav-6/0");
        assert_ne!(a.results_key(), b.results_key());
    }

    #[test]
    fn test_outcome_passed() {
        let mut outcome = TrialOutcome {
            params: ParameterSet::new(TopologyId::RingFav, 9, 3),
            status: TrialStatus::Done,
            elapsed: Duration::from_millis(5),
            mismatches: Some(vec![]),
            fault: None,
        };
        assert!(outcome.passed());

        outcome.mismatches = Some(vec!["node 0: sent expected 1, got 0".into()]);
        assert!(!outcome.passed());

        outcome.mismatches = None;
        outcome.fault = Some("not recorded as done: queue error".into());
        assert!(!outcome.passed());

        outcome.fault = None;
        outcome.status = TrialStatus::Skip;
        assert!(!outcome.passed());
    }
}
