//! Streamslab orchestration core.
//!
//! Brings up an ephemeral fleet of blockchain and payment-node instances,
//! assembles the payment-channel network described by a
//! [`streamslab_lib::Topology`], and drives synthetic payment traffic against
//! it. Container mechanics and wire-level RPC live behind the capability
//! traits in [`clients`]; this crate owns the lifecycle state machine, the
//! bounded-concurrency task groups and the funding/sync protocols.

pub mod channel;
pub mod clients;
pub mod error;
pub mod lab;
pub mod miner;
pub mod node;
pub mod observability;
pub mod task_group;
pub mod traffic;

pub use channel::Channel;
pub use clients::{ContainerRuntime, FleetProvider, MinerClient, NodeClient};
pub use error::LabError;
pub use lab::{Lab, Status};
pub use miner::Miner;
pub use node::Node;
pub use observability::{EventSink, LogSink};
pub use task_group::{CompletedTask, TaskGroup, TaskOutcome};
pub use traffic::{generate_traffic, PaymentRequest, TrafficPlan};

use std::time::Duration;

/// Tuning knobs for a [`Lab`].
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Topology nodes served per miner; miner count is `ceil(nodes / this)`.
    pub nodes_per_miner: usize,
    /// Concurrency cap shared by every task group the lab opens.
    pub task_limit: usize,
    /// Fixed delay between channel-open retries on a funding conflict.
    pub funding_retry_delay: Duration,
    /// Interval between block-height polls in the sync barrier.
    pub sync_poll_interval: Duration,
    /// Blocks mined after funding outputs are created, so they become
    /// spendable.
    pub coinbase_maturity: u64,
    /// Blocks mined by the final sync stage, confirming funding transactions.
    pub ready_confirmations: u64,
    /// Abort bring-up when every task of a stage failed. Off by default:
    /// a partially failed stage still advances.
    pub abort_on_total_stage_failure: bool,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            nodes_per_miner: 100,
            task_limit: 200,
            funding_retry_delay: Duration::from_secs(10),
            sync_poll_interval: Duration::from_secs(10),
            coinbase_maturity: 100,
            ready_confirmations: 6,
            abort_on_total_stage_failure: false,
        }
    }
}
