//! Task List Provider - per-node task sequences for aggregation runs.

use crate::topology::grid_width;
use serde::{Deserialize, Serialize};

/// Bytes each contributor pushes to the aggregator.
pub const PAYLOAD_SIZE: u64 = 100;

/// Signature shared by every task list provider.
pub type TaskListFn = fn(usize) -> TaskList;

/// One step in a node's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Push `size` bytes towards node `to`
    Send { to: usize, size: u64 },

    /// Block until a message from every node in `from` has arrived
    Aggregate { from: Vec<usize> },
}

/// Task sequences indexed by node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    per_node: Vec<Vec<Task>>,
}

impl TaskList {
    /// Builds a list where every node sends to `aggregator`, which
    /// aggregates from everyone else.
    pub fn aggregate_at(node_count: usize, aggregator: usize) -> Self {
        let contributors: Vec<usize> = (0..node_count).filter(|&n| n != aggregator).collect();
        let per_node = (0..node_count)
            .map(|node| {
                if node == aggregator {
                    vec![Task::Aggregate {
                        from: contributors.clone(),
                    }]
                } else {
                    vec![Task::Send {
                        to: aggregator,
                        size: PAYLOAD_SIZE,
                    }]
                }
            })
            .collect();
        Self { per_node }
    }

    /// Number of nodes covered.
    pub fn node_count(&self) -> usize {
        self.per_node.len()
    }

    /// Tasks of `node` (empty when out of range).
    pub fn tasks(&self, node: usize) -> &[Task] {
        self.per_node.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The node aggregating everybody else's payload, if any.
    pub fn aggregator(&self) -> Option<usize> {
        self.per_node.iter().position(|tasks| {
            tasks
                .iter()
                .any(|t| matches!(t, Task::Aggregate { .. }))
        })
    }

    /// Checks every referenced node index is in range.
    pub fn references_valid_nodes(&self) -> bool {
        let n = self.node_count();
        self.per_node.iter().flatten().all(|task| match task {
            Task::Send { to, .. } => *to < n,
            Task::Aggregate { from } => from.iter().all(|f| *f < n),
        })
    }
}

/// Aggregation at node 0.
pub fn aggregate_at_first(node_count: usize) -> TaskList {
    TaskList::aggregate_at(node_count, 0)
}

/// Aggregation at the middle node.
pub fn aggregate_at_middle(node_count: usize) -> TaskList {
    TaskList::aggregate_at(node_count, node_count / 2)
}

/// Aggregation at the centre cell of the grid layout.
pub fn aggregate_at_grid_centre(node_count: usize) -> TaskList {
    let width = grid_width(node_count);
    let rows = node_count.div_ceil(width);
    let centre = (rows / 2) * width + width / 2;
    TaskList::aggregate_at(node_count, centre.min(node_count.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_at_first() {
        let list = aggregate_at_first(4);
        assert_eq!(list.node_count(), 4);
        assert_eq!(list.aggregator(), Some(0));
        assert_eq!(list.tasks(0), &[Task::Aggregate { from: vec![1, 2, 3] }]);
        assert_eq!(list.tasks(2), &[Task::Send { to: 0, size: PAYLOAD_SIZE }]);
        assert!(list.references_valid_nodes());
    }

    #[test]
    fn test_aggregate_at_middle() {
        assert_eq!(aggregate_at_middle(9).aggregator(), Some(4));
        assert_eq!(aggregate_at_middle(6).aggregator(), Some(3));
    }

    #[test]
    fn test_grid_centre() {
        assert_eq!(aggregate_at_grid_centre(9).aggregator(), Some(4));
        assert_eq!(aggregate_at_grid_centre(16).aggregator(), Some(10));
        assert_eq!(aggregate_at_grid_centre(25).aggregator(), Some(12));
        assert_eq!(aggregate_at_grid_centre(6).aggregator(), Some(4));
    }

    #[test]
    fn test_single_node_aggregates_nothing() {
        let list = aggregate_at_first(1);
        assert_eq!(list.tasks(0), &[Task::Aggregate { from: vec![] }]);
    }
}
