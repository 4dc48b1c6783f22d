//! Reconfiguration Sweep Core - the collaborators a trial is built from.
//!
//! 1. **Topology Provider**: bandwidth/latency matrices per network shape
//! 2. **Task List Provider**: who aggregates, who contributes
//! 3. **Simulation Engine**: deterministic discrete-event runs over uptime schedules
//! 4. **Result Verifier**: golden-fixture comparison for test sweeps

pub mod catalog;
pub mod engine;
pub mod schedule;
pub mod tasks;
pub mod topology;
pub mod verify;

// Re-export key types for convenience
pub use catalog::CatalogEntry;
pub use engine::{EngineSummary, InterfaceSpec, NodeArguments, NodeReport, SimulationEngine, Simulator};
pub use schedule::UptimeSchedule;
pub use tasks::{Task, TaskList};
pub use topology::TopologyMatrices;
pub use verify::{ExpectedResult, Fixture, FixtureVerifier, ResultVerifier};
