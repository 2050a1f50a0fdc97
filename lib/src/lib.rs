//! Shared types for the streamslab payment-channel lab.
//!
//! This crate holds the data model exchanged between the orchestration core,
//! topology providers and test harnesses: the edge-pair topology and the typed
//! payloads of the node/miner RPC capability surface.

pub mod rpc;
pub mod topology;

pub use rpc::{FundingOutput, FundsSummary, Invoice, NodeInfo, PaymentResult, RouteHop, Utxo};
pub use topology::{DirectedEdge, EdgeKey, EdgeSpec, Topology, TopologyError};
