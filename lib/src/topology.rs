use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Key of one directed edge in the topology.
///
/// Edges come in pairs: the outbound edge takes the even index and its inbound
/// companion the odd index right after it. Both describe the same physical
/// channel, one per direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EdgeKey(pub u64);

impl EdgeKey {
    pub fn is_outbound(self) -> bool {
        self.0 % 2 == 0
    }

    /// The outbound key of the pair this key belongs to.
    pub fn outbound(self) -> EdgeKey {
        EdgeKey(self.0 / 2 * 2)
    }

    /// The inbound companion key of the pair this key belongs to.
    pub fn inbound_companion(self) -> EdgeKey {
        EdgeKey(self.0 / 2 * 2 + 1)
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Capacity, starting balance and fee policy of one directed edge, in msat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub capacity: u64,
    pub balance: u64,
    pub base_fee: u64,
    pub ppm_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectedEdge {
    pub key: EdgeKey,
    pub source: String,
    pub target: String,
    pub spec: EdgeSpec,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("balance {balance} exceeds capacity {capacity}")]
    BalanceExceedsCapacity { capacity: u64, balance: u64 },
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("an edge cannot connect {0} to itself")]
    SelfEdge(String),
}

/// The logical payment-channel graph an experiment is built from.
///
/// Nodes are added explicitly; channels are added as directed pairs and the
/// inbound balance is derived as `capacity - outbound balance`, so
/// `balance(out) + balance(in) == capacity` holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    name: String,
    nodes: Vec<String>,
    edges: BTreeMap<EdgeKey, DirectedEdge>,
    next_pair: u64,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: BTreeMap::new(),
            next_pair: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.nodes.contains(&id) {
            self.nodes.push(id);
        }
    }

    /// Add one physical channel between `source` and `target` as a pair of
    /// directed edges and return `(outbound, inbound)` keys.
    ///
    /// `outbound` carries the fee policy charged by `source`, `inbound` the
    /// policy charged by `target`.
    pub fn add_channel(
        &mut self,
        source: &str,
        target: &str,
        capacity: u64,
        source_balance: u64,
        source_fees: (u64, u64),
        target_fees: (u64, u64),
    ) -> Result<(EdgeKey, EdgeKey), TopologyError> {
        if source == target {
            return Err(TopologyError::SelfEdge(source.to_string()));
        }
        for id in [source, target] {
            if !self.nodes.iter().any(|n| n == id) {
                return Err(TopologyError::UnknownNode(id.to_string()));
            }
        }
        if source_balance > capacity {
            return Err(TopologyError::BalanceExceedsCapacity {
                capacity,
                balance: source_balance,
            });
        }

        let out_key = EdgeKey(self.next_pair * 2);
        let in_key = out_key.inbound_companion();
        self.next_pair += 1;

        self.edges.insert(
            out_key,
            DirectedEdge {
                key: out_key,
                source: source.to_string(),
                target: target.to_string(),
                spec: EdgeSpec {
                    capacity,
                    balance: source_balance,
                    base_fee: source_fees.0,
                    ppm_fee: source_fees.1,
                },
            },
        );
        self.edges.insert(
            in_key,
            DirectedEdge {
                key: in_key,
                source: target.to_string(),
                target: source.to_string(),
                spec: EdgeSpec {
                    capacity,
                    balance: capacity - source_balance,
                    base_fee: target_fees.0,
                    ppm_fee: target_fees.1,
                },
            },
        );

        Ok((out_key, in_key))
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, key: EdgeKey) -> Option<&DirectedEdge> {
        self.edges.get(&key)
    }

    /// All outbound edges, in key order.
    pub fn outbound_edges(&self) -> impl Iterator<Item = &DirectedEdge> {
        self.edges.values().filter(|e| e.key.is_outbound())
    }

    /// Outbound edges owned by one node, in key order.
    pub fn outbound_edges_of<'a>(
        &'a self,
        node: &'a str,
    ) -> impl Iterator<Item = &'a DirectedEdge> {
        self.outbound_edges().filter(move |e| e.source == node)
    }
}
