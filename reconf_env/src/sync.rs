//! Shared synchronization region abstraction.

use crate::error::SweepError;

/// A byte-per-node region shared by every simulated node of one trial.
///
/// The trial driver backs this with an OS-level shared segment; the
/// simulation engine only reads and writes slots through this trait.
pub trait SyncRegion: Send + Sync {
    /// Name of the region, unique among concurrently active trials.
    fn name(&self) -> &str;

    /// Number of slots (one per node).
    fn len(&self) -> usize;

    /// True if the region has no slots.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads slot `index`.
    fn get(&self, index: usize) -> Result<u8, SweepError>;

    /// Writes slot `index`.
    fn set(&self, index: usize, value: u8) -> Result<(), SweepError>;
}
