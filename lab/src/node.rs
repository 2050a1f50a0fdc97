use crate::clients::NodeClient;
use crate::error::LabError;
use log::warn;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamslab_lib::rpc::{Invoice, NodeInfo, PaymentResult, Utxo};
use tokio::sync::Mutex as AsyncMutex;

const INVOICE_EXPIRY_SECS: u64 = 604_800;

/// Handle to one payment-node instance.
///
/// The public key is captured on first RPC contact during `start`. The
/// funding mutex serializes this node's channel-open calls; the underlying
/// wallet's coin selection is not safe under concurrent use from the same
/// node.
pub struct Node {
    name: String,
    client: Arc<dyn NodeClient>,
    public_key: Mutex<Option<String>>,
    fund_lock: AsyncMutex<()>,
}

impl Node {
    pub fn new(name: impl Into<String>, client: Arc<dyn NodeClient>) -> Self {
        Self {
            name: name.into(),
            client,
            public_key: Mutex::new(None),
            fund_lock: AsyncMutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> Option<String> {
        self.public_key.lock().ok().and_then(|guard| guard.clone())
    }

    fn require_public_key(&self) -> Result<String, LabError> {
        self.public_key()
            .ok_or_else(|| LabError::NoPublicKey(self.name.clone()))
    }

    /// Start the instance and capture its identity.
    pub async fn start(&self) -> Result<(), LabError> {
        self.client.start().await?;
        let info: NodeInfo = self.client.get_info().await?;
        if let Ok(mut guard) = self.public_key.lock() {
            *guard = Some(info.public_key);
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), LabError> {
        self.client.stop().await
    }

    pub async fn get_block_height(&self) -> Result<u64, LabError> {
        self.client.get_block_height().await
    }

    /// Poll until this node reports `block_height` or better. A hard client
    /// error fails the wait, so barriers never hang on an unreachable node.
    pub async fn wait_for_block_height(
        &self,
        block_height: u64,
        poll_interval: Duration,
    ) -> Result<(), LabError> {
        while self.client.get_block_height().await? < block_height {
            tokio::time::sleep(poll_interval).await;
        }
        Ok(())
    }

    pub async fn connect(&self, peer: &Node) -> Result<(), LabError> {
        let peer_key = peer.require_public_key()?;
        self.client.connect(&peer_key, peer.name()).await
    }

    pub async fn new_address(&self) -> Result<String, LabError> {
        self.client.new_address().await
    }

    /// Open a channel to `destination` using the dedicated funding output.
    ///
    /// `capacity - balance` is pushed to the remote side so our local balance
    /// starts at `balance`. A funding conflict ("channel open already in
    /// progress with this peer") is retried forever with a fixed delay; any
    /// other error surfaces after one attempt.
    pub async fn open_channel(
        &self,
        destination: &Node,
        capacity_msat: u64,
        balance_msat: u64,
        utxo: &Utxo,
        retry_delay: Duration,
    ) -> Result<String, LabError> {
        let destination_key = destination.require_public_key()?;
        let push_msat = capacity_msat - balance_msat;
        let _lock = self.fund_lock.lock().await;
        loop {
            match self
                .client
                .fund_channel(&destination_key, capacity_msat, push_msat, utxo)
                .await
            {
                Ok(channel_id) => return Ok(channel_id),
                Err(error) if error.is_transient_conflict() => {
                    warn!(
                        "[{}] channel open to {} already in progress, retrying in {:?}",
                        self.name,
                        destination.name(),
                        retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn set_channel_fee(
        &self,
        channel_id: &str,
        base_fee: Option<u64>,
        ppm_fee: Option<u64>,
    ) -> Result<(), LabError> {
        self.client.set_channel_fee(channel_id, base_fee, ppm_fee).await
    }

    pub async fn new_invoice(
        &self,
        amount_msat: u64,
        description: &str,
    ) -> Result<Invoice, LabError> {
        self.client
            .new_invoice(amount_msat, description, INVOICE_EXPIRY_SECS)
            .await
    }

    pub async fn pay_invoice(&self, invoice: &Invoice) -> Result<PaymentResult, LabError> {
        self.client.pay_invoice(invoice).await
    }
}
