use crate::error::LabError;
use async_trait::async_trait;
use std::sync::Arc;
use streamslab_lib::rpc::{FundsSummary, Invoice, NodeInfo, PaymentResult, RouteHop, Utxo};

/// RPC capability surface of one payment-node daemon.
///
/// `start` covers the whole bring-up of the instance (container start, log
/// wait, credential exchange); the remaining methods are one remote call
/// each. Implementations live outside this crate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn start(&self) -> Result<(), LabError>;
    async fn stop(&self) -> Result<(), LabError>;
    async fn get_info(&self) -> Result<NodeInfo, LabError>;
    async fn get_block_height(&self) -> Result<u64, LabError>;
    /// Peer-connect to another payment node by public key and address.
    async fn connect(&self, peer_key: &str, peer_address: &str) -> Result<(), LabError>;
    async fn new_address(&self) -> Result<String, LabError>;
    async fn list_funds(&self) -> Result<FundsSummary, LabError>;
    /// Open a channel funded from `utxo`. `push_msat` is transferred to the
    /// remote side at open time. Returns the on-chain channel id.
    async fn fund_channel(
        &self,
        destination_key: &str,
        capacity_msat: u64,
        push_msat: u64,
        utxo: &Utxo,
    ) -> Result<String, LabError>;
    async fn set_channel_fee(
        &self,
        channel_id: &str,
        base_fee: Option<u64>,
        ppm_fee: Option<u64>,
    ) -> Result<(), LabError>;
    async fn new_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, LabError>;
    async fn get_route(
        &self,
        destination_key: &str,
        amount_msat: u64,
    ) -> Result<Vec<RouteHop>, LabError>;
    async fn pay_invoice(&self, invoice: &Invoice) -> Result<PaymentResult, LabError>;
}

/// RPC capability surface of one blockchain-daemon instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MinerClient: Send + Sync + 'static {
    async fn start(&self) -> Result<(), LabError>;
    async fn stop(&self) -> Result<(), LabError>;
    async fn get_block_height(&self) -> Result<u64, LabError>;
    /// Add another miner to this daemon's peer set.
    async fn connect(&self, peer_address: &str) -> Result<(), LabError>;
    async fn new_address(&self) -> Result<String, LabError>;
    /// Generate `block_count` blocks paying `recipient_address`, returning
    /// the block hashes. Callers are expected to hold the fleet-wide mining
    /// mutex; see [`crate::Miner::mine`].
    async fn mine(&self, block_count: u64, recipient_address: &str)
        -> Result<Vec<String>, LabError>;
    /// Txid of the coinbase transaction of `block_hash`.
    async fn coinbase_txid(&self, block_hash: &str) -> Result<String, LabError>;
    async fn send(
        &self,
        recipient_address: &str,
        amount_msat: u64,
        fee_rate: u64,
    ) -> Result<String, LabError>;
}

/// Container lifecycle operations concrete client implementations are built
/// on. The orchestrator never drives this directly; it is part of the
/// external contract so providers and harnesses agree on the seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn create(
        &self,
        image: &str,
        args: &[String],
        env: &[(String, String)],
        exposed_port: Option<u16>,
    ) -> Result<String, LabError>;
    async fn start(&self, handle: &str) -> Result<(), LabError>;
    async fn stop(&self, handle: &str) -> Result<(), LabError>;
    async fn read_file(&self, handle: &str, path: &str) -> Result<Vec<u8>, LabError>;
    /// Block until a log line containing `needle` appears.
    async fn wait_for_log_line(&self, handle: &str, needle: &str) -> Result<(), LabError>;
    async fn resolve_host_port(&self, handle: &str, container_port: u16) -> Result<u16, LabError>;
}

/// Hands the lab a client per fleet-member name. Provisioning is cheap and
/// synchronous; the heavy lifting happens in the clients' `start`.
#[cfg_attr(test, mockall::automock)]
pub trait FleetProvider: Send + Sync + 'static {
    fn miner(&self, name: &str) -> Arc<dyn MinerClient>;
    /// `miner_name` is the miner whose chain the node connects to.
    fn node(&self, name: &str, miner_name: &str) -> Arc<dyn NodeClient>;
}
