//! In-memory integration environment for the lab orchestrator.
//!
//! - Fleet simulation: miner/node clients over one shared simulated chain,
//!   behind the production capability traits
//! - Failure injection: failing starts, unreachable nodes, funding conflicts
//! - Activity log for asserting call ordering across the fleet
//! - Recording event sink for asserting stage transitions and task outcomes

pub mod fleet_simulator;

pub use fleet_simulator::{ActivityLog, FleetSimulator, SimChain, SimRuntime};
pub use test_harness::{fast_config, is_canonical_subsequence, LabHarness, RecordingSink};
