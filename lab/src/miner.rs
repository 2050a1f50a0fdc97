use crate::clients::MinerClient;
use crate::error::LabError;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handle to one blockchain-daemon instance.
///
/// `mine_lock` is the fleet-wide mining mutex: one lock owned by the lab and
/// cloned into every miner, so at most one block-generation call executes
/// across the whole fleet. Concurrent generation against peered daemons can
/// fork the shared regtest chain.
pub struct Miner {
    name: String,
    client: Arc<dyn MinerClient>,
    mine_lock: Arc<Mutex<()>>,
}

impl Miner {
    pub fn new(name: impl Into<String>, client: Arc<dyn MinerClient>, mine_lock: Arc<Mutex<()>>) -> Self {
        Self {
            name: name.into(),
            client,
            mine_lock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn start(&self) -> Result<(), LabError> {
        self.client.start().await
    }

    pub async fn stop(&self) -> Result<(), LabError> {
        self.client.stop().await
    }

    pub async fn connect(&self, peer: &Miner) -> Result<(), LabError> {
        self.client.connect(peer.name()).await
    }

    pub async fn get_block_height(&self) -> Result<u64, LabError> {
        self.client.get_block_height().await
    }

    pub async fn new_address(&self) -> Result<String, LabError> {
        self.client.new_address().await
    }

    /// Generate `block_count` blocks, paying `recipient` or a fresh address
    /// of this miner. Address derivation happens outside the fleet lock;
    /// only the generation call itself is serialized.
    pub async fn mine(
        &self,
        block_count: u64,
        recipient: Option<&str>,
    ) -> Result<Vec<String>, LabError> {
        let address = match recipient {
            Some(address) => address.to_string(),
            None => self.client.new_address().await?,
        };
        let _lock = self.mine_lock.lock().await;
        self.client.mine(block_count, &address).await
    }

    pub async fn coinbase_txid(&self, block_hash: &str) -> Result<String, LabError> {
        self.client.coinbase_txid(block_hash).await
    }

    pub async fn send(
        &self,
        recipient_address: &str,
        amount_msat: u64,
        fee_rate: u64,
    ) -> Result<String, LabError> {
        self.client.send(recipient_address, amount_msat, fee_rate).await
    }
}
