//! Reconfiguration Sweep - parallel trial driver.
//!
//! Runs every parameter set of a sweep (topology × node count × run id)
//! through the simulation engine, in parallel, resumably, and with each
//! trial's shared resources released no matter how it ends.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐   claim / done / skip   ┌──────────────┐
//!  Driver ──►│  worker-0..W │◄───────────────────────►│  FileQueue   │
//!            └──────┬───────┘                         │ (flock+JSON) │
//!                   │ execute                         └──────────────┘
//!            ┌──────▼───────┐
//!            │ TrialExecutor│── SharedSegment (/dev/shm)
//!            │              │── DebugLog (scratch → results)
//!            └──────┬───────┘
//!                   │ create_node × n, run
//!            ┌──────▼───────┐
//!            │  Simulator   │── node_<i>.yaml ──► FixtureVerifier (test mode)
//!            └──────────────┘
//! ```

pub mod config;
pub mod debug_log;
pub mod driver;
pub mod queue;
pub mod shm;
pub mod sweep;
pub mod trial;

pub use config::SweepConfig;
pub use debug_log::DebugLog;
pub use driver::{Driver, SweepReport};
pub use queue::FileQueue;
pub use shm::SharedSegment;
pub use sweep::Dimensions;
pub use trial::{TrialExecutor, TrialLayout, TrialReport};
