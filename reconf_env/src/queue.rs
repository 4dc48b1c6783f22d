//! Work queue abstraction.

use crate::error::SweepError;
use crate::types::ParameterSet;
use serde::{Deserialize, Serialize};

/// A persistent pool of pending, completed and skipped parameter sets.
///
/// Implementations must be linearizable across every consumer, including
/// consumers living in other processes: each item is handed to exactly one
/// in-flight consumer and no item is lost or duplicated.
///
/// Items whose consumer dies without calling `done`/`skip` stay in progress.
/// Reclaiming them is an operator decision, never automatic.
pub trait WorkQueue: Send + Sync {
    /// Claims the next remaining item, or `None` once the pool is drained.
    fn get_next(&self) -> Result<Option<ParameterSet>, SweepError>;

    /// Marks a claimed item as permanently completed.
    fn done(&self, params: &ParameterSet) -> Result<(), SweepError>;

    /// Marks a claimed item as consumed but not completed. It is not retried.
    fn skip(&self, params: &ParameterSet) -> Result<(), SweepError>;

    /// Returns a snapshot of the pool counters.
    fn stats(&self) -> Result<QueueStats, SweepError>;
}

/// Snapshot of a work queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Every item the queue was ever configured with
    pub total: usize,

    /// Items still available to `get_next`
    pub remaining: usize,

    /// Items claimed but not yet resolved
    pub in_progress: usize,

    /// Items marked done
    pub done: usize,

    /// Items marked skipped
    pub skipped: usize,
}

impl QueueStats {
    /// True once nothing remains and nothing is in flight.
    pub fn is_drained(&self) -> bool {
        self.remaining == 0 && self.in_progress == 0
    }
}
