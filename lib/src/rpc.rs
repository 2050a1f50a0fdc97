use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity summary reported by a payment node on first contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node's public key, used to address it in channel and peer calls.
    pub public_key: String,
    pub alias: Option<String>,
    pub block_height: u64,
}

/// A dedicated on-chain output consumed to open exactly one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for Utxo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A spendable output reported by `list_funds`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundingOutput {
    pub utxo: Utxo,
    pub amount_msat: u64,
    pub reserved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundsSummary {
    pub outputs: Vec<FundingOutput>,
    pub channel_count: usize,
}

/// An invoice issued by a recipient node, awaiting payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub bolt11: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentResult {
    pub payment_preimage: String,
    pub amount_sent_msat: u64,
}

/// One hop of a route computed by `get_route`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteHop {
    pub public_key: String,
    pub channel_id: String,
    pub amount_msat: u64,
    pub delay: u32,
}
