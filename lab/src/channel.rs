use crate::error::LabError;
use crate::node::Node;
use std::sync::Arc;

/// One direction of a funded payment channel.
///
/// A physically funded channel yields two of these, one per direction,
/// sharing the on-chain channel id; fee policy is configured per direction
/// through the source side.
pub struct Channel {
    pub id: String,
    pub source: Arc<Node>,
    pub destination: Arc<Node>,
    pub base_fee: u64,
    pub ppm_fee: u64,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        source: Arc<Node>,
        destination: Arc<Node>,
        base_fee: u64,
        ppm_fee: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            destination,
            base_fee,
            ppm_fee,
        }
    }

    /// Push this entity's fee policy to the source node.
    pub async fn apply_fee(&self) -> Result<(), LabError> {
        self.source
            .set_channel_fee(&self.id, Some(self.base_fee), Some(self.ppm_fee))
            .await
    }

    /// Update and push a new fee policy.
    pub async fn set_fee(
        &mut self,
        base_fee: Option<u64>,
        ppm_fee: Option<u64>,
    ) -> Result<(), LabError> {
        if let Some(base_fee) = base_fee {
            self.base_fee = base_fee;
        }
        if let Some(ppm_fee) = ppm_fee {
            self.ppm_fee = ppm_fee;
        }
        self.source
            .set_channel_fee(&self.id, base_fee, ppm_fee)
            .await
    }
}
