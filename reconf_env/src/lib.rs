//! Reconfiguration Sweep Environment Layer
//!
//! This crate provides the shared vocabulary used by the topology/engine
//! crate and the parallel trial driver:
//! - **Parameters**: `ParameterSet` keys and the closed `TopologyId` enumeration
//! - **Outcomes**: the explicit per-trial `TrialOutcome` value
//! - **Seams**: the `WorkQueue` and `SyncRegion` traits
//!
//! Nothing here touches the filesystem. Concrete queue and shared-memory
//! implementations live in `reconf_sweep`, so the simulation engine only ever
//! sees the traits.
//!
//! # Example
//!
//! ```ignore
//! use reconf_env::{WorkQueue, TrialStatus};
//!
//! fn drain<Q: WorkQueue>(queue: &Q) -> Result<(), reconf_env::SweepError> {
//!     while let Some(params) = queue.get_next()? {
//!         // run the trial ...
//!         queue.done(&params)?;
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod queue;
mod sync;
mod types;

pub use error::SweepError;
pub use queue::{QueueStats, WorkQueue};
pub use sync::SyncRegion;
pub use types::{
    Favorability, Mode, ParameterSet, Shape, TopologyId, TrialOutcome, TrialStatus,
};
