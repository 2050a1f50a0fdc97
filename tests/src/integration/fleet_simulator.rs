//! Simulated fleet: miner and node clients over one shared in-memory chain.
//!
//! The simulator implements the same capability traits a container-backed
//! provider would, so the orchestrator under test runs its real code paths.
//! Failure injection is per-member: starts can be made to fail, nodes can be
//! made unreachable for height polls, and channel funding can be made to
//! report a conflict a configured number of times before succeeding.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamslab_lab::{
    ContainerRuntime, FleetProvider, LabError, MinerClient, NodeClient,
};
use streamslab_lib::rpc::{
    FundsSummary, Invoice, NodeInfo, PaymentResult, RouteHop, Utxo,
};

const MINER_IMAGE: &str = "streamslab/chaind";
const NODE_IMAGE: &str = "streamslab/payd";
const MINER_READY_LINE: &str = "init message: Done loading";
const NODE_READY_LINE: &str = "Server started with public key";

/// The one chain every simulated fleet member observes.
///
/// Also tracks how many `mine` calls are in flight at once, so tests can
/// assert the fleet-wide mining mutex actually serializes block generation.
#[derive(Default)]
pub struct SimChain {
    height: Mutex<u64>,
    active_mines: AtomicUsize,
    peak_mines: AtomicUsize,
    next_channel: AtomicU64,
}

impl SimChain {
    pub fn height(&self) -> u64 {
        *self.height.lock().unwrap()
    }

    fn enter_mine(&self) {
        let active = self.active_mines.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_mines.fetch_max(active, Ordering::SeqCst);
    }

    fn exit_mine(&self, block_count: u64) -> Vec<String> {
        let mut height = self.height.lock().unwrap();
        let start = *height;
        *height += block_count;
        self.active_mines.fetch_sub(1, Ordering::SeqCst);
        (start + 1..=start + block_count)
            .map(|i| format!("blk{}", i))
            .collect()
    }

    pub fn peak_concurrent_mines(&self) -> usize {
        self.peak_mines.load(Ordering::SeqCst)
    }

    fn next_channel_id(&self) -> String {
        format!("chan{}", self.next_channel.fetch_add(1, Ordering::SeqCst))
    }
}

/// Ordered record of every fleet-facing call, for cross-member ordering
/// assertions.
#[derive(Default)]
pub struct ActivityLog {
    events: Mutex<Vec<String>>,
}

impl ActivityLog {
    fn record(&self, event: String) {
        log::debug!("fleet: {}", event);
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with(prefix))
            .collect()
    }

    pub fn first_index_of(&self, prefix: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|event| event.starts_with(prefix))
    }

    pub fn last_index_of(&self, prefix: &str) -> Option<usize> {
        self.events()
            .iter()
            .rposition(|event| event.starts_with(prefix))
    }
}

#[derive(Default)]
struct Behavior {
    failing_miner_starts: Mutex<HashSet<String>>,
    failing_node_starts: Mutex<HashSet<String>>,
    unreachable_nodes: Mutex<HashSet<String>>,
    /// Remaining funding conflicts per node name; decremented on each
    /// `fund_channel` until exhausted.
    funding_conflicts: Mutex<HashMap<String, usize>>,
}

/// In-memory stand-in for the container runtime. Instances exist as entries
/// in a handle map; log waits resolve immediately for running instances.
#[derive(Default)]
pub struct SimRuntime {
    running: Mutex<HashMap<String, bool>>,
    next_handle: AtomicU64,
}

#[async_trait]
impl ContainerRuntime for SimRuntime {
    async fn create(
        &self,
        image: &str,
        _args: &[String],
        _env: &[(String, String)],
        _exposed_port: Option<u16>,
    ) -> Result<String, LabError> {
        let handle = format!("ctr{}-{}", self.next_handle.fetch_add(1, Ordering::SeqCst), image);
        self.running.lock().unwrap().insert(handle.clone(), false);
        Ok(handle)
    }

    async fn start(&self, handle: &str) -> Result<(), LabError> {
        match self.running.lock().unwrap().get_mut(handle) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(LabError::Runtime(format!("no such container {}", handle))),
        }
    }

    async fn stop(&self, handle: &str) -> Result<(), LabError> {
        match self.running.lock().unwrap().get_mut(handle) {
            Some(running) => {
                *running = false;
                Ok(())
            }
            None => Err(LabError::Runtime(format!("no such container {}", handle))),
        }
    }

    async fn read_file(&self, handle: &str, path: &str) -> Result<Vec<u8>, LabError> {
        if self.running.lock().unwrap().get(handle).copied() != Some(true) {
            return Err(LabError::Runtime(format!("container {} not running", handle)));
        }
        Ok(format!("{}:{}", handle, path).into_bytes())
    }

    async fn wait_for_log_line(&self, handle: &str, _needle: &str) -> Result<(), LabError> {
        if self.running.lock().unwrap().get(handle).copied() != Some(true) {
            return Err(LabError::Runtime(format!("container {} not running", handle)));
        }
        Ok(())
    }

    async fn resolve_host_port(&self, _handle: &str, container_port: u16) -> Result<u16, LabError> {
        Ok(10_000 + container_port % 1_000)
    }
}

struct SimMinerClient {
    name: String,
    chain: Arc<SimChain>,
    runtime: Arc<SimRuntime>,
    behavior: Arc<Behavior>,
    log: Arc<ActivityLog>,
    handle: Mutex<Option<String>>,
}

impl SimMinerClient {
    fn require_started(&self) -> Result<(), LabError> {
        if self.handle.lock().unwrap().is_none() {
            return Err(LabError::Runtime(format!("{} is not running", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl MinerClient for SimMinerClient {
    async fn start(&self) -> Result<(), LabError> {
        if self.behavior.failing_miner_starts.lock().unwrap().contains(&self.name) {
            return Err(LabError::Runtime(format!("{} refused to start", self.name)));
        }
        let handle = self
            .runtime
            .create(MINER_IMAGE, &[], &[], Some(18_443))
            .await?;
        self.runtime.start(&handle).await?;
        self.runtime.wait_for_log_line(&handle, MINER_READY_LINE).await?;
        // RPC credentials come out of the instance's cookie file.
        self.runtime.read_file(&handle, "/data/.cookie").await?;
        *self.handle.lock().unwrap() = Some(handle);
        self.log.record(format!("START_MINER {}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), LabError> {
        let handle = self.handle.lock().unwrap().clone();
        if let Some(handle) = handle {
            self.runtime.stop(&handle).await?;
        }
        self.log.record(format!("STOP_MINER {}", self.name));
        Ok(())
    }

    async fn get_block_height(&self) -> Result<u64, LabError> {
        Ok(self.chain.height())
    }

    async fn connect(&self, peer_address: &str) -> Result<(), LabError> {
        self.log
            .record(format!("CONNECT_MINER {} {}", self.name, peer_address));
        Ok(())
    }

    async fn new_address(&self) -> Result<String, LabError> {
        Ok(format!("addr-{}", self.name))
    }

    async fn mine(
        &self,
        block_count: u64,
        recipient_address: &str,
    ) -> Result<Vec<String>, LabError> {
        self.require_started()?;
        self.chain.enter_mine();
        // Suspension point so overlapping mines would be observed.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let hashes = self.chain.exit_mine(block_count);
        self.log.record(format!(
            "MINE {} {} {}",
            self.name, block_count, recipient_address
        ));
        Ok(hashes)
    }

    async fn coinbase_txid(&self, block_hash: &str) -> Result<String, LabError> {
        self.require_started()?;
        Ok(format!("cb-{}", block_hash))
    }

    async fn send(
        &self,
        recipient_address: &str,
        amount_msat: u64,
        _fee_rate: u64,
    ) -> Result<String, LabError> {
        self.log.record(format!(
            "SEND {} {} {}",
            self.name, recipient_address, amount_msat
        ));
        Ok(format!("tx-{}-{}", self.name, recipient_address))
    }
}

struct SimNodeClient {
    name: String,
    miner_name: String,
    chain: Arc<SimChain>,
    runtime: Arc<SimRuntime>,
    behavior: Arc<Behavior>,
    log: Arc<ActivityLog>,
    handle: Mutex<Option<String>>,
    next_address: AtomicU64,
}

impl SimNodeClient {
    fn public_key(&self) -> String {
        format!("02{}", self.name)
    }
}

#[async_trait]
impl NodeClient for SimNodeClient {
    async fn start(&self) -> Result<(), LabError> {
        if self.behavior.failing_node_starts.lock().unwrap().contains(&self.name) {
            return Err(LabError::Runtime(format!("{} refused to start", self.name)));
        }
        let args = vec![format!("--chain-host={}", self.miner_name)];
        let handle = self
            .runtime
            .create(NODE_IMAGE, &args, &[], Some(9_735))
            .await?;
        self.runtime.start(&handle).await?;
        self.runtime.wait_for_log_line(&handle, NODE_READY_LINE).await?;
        *self.handle.lock().unwrap() = Some(handle);
        self.log.record(format!("START_NODE {}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), LabError> {
        let handle = self.handle.lock().unwrap().clone();
        if let Some(handle) = handle {
            self.runtime.stop(&handle).await?;
        }
        self.log.record(format!("STOP_NODE {}", self.name));
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, LabError> {
        Ok(NodeInfo {
            public_key: self.public_key(),
            alias: Some(self.name.clone()),
            block_height: self.chain.height(),
        })
    }

    async fn get_block_height(&self) -> Result<u64, LabError> {
        if self.behavior.unreachable_nodes.lock().unwrap().contains(&self.name) {
            return Err(LabError::rpc(-28, format!("{} unreachable", self.name)));
        }
        Ok(self.chain.height())
    }

    async fn connect(&self, peer_key: &str, peer_address: &str) -> Result<(), LabError> {
        self.log.record(format!(
            "CONNECT_NODE {} {} {}",
            self.name, peer_key, peer_address
        ));
        Ok(())
    }

    async fn new_address(&self) -> Result<String, LabError> {
        let n = self.next_address.fetch_add(1, Ordering::SeqCst);
        Ok(format!("addr-{}-{}", self.name, n))
    }

    async fn list_funds(&self) -> Result<FundsSummary, LabError> {
        Ok(FundsSummary::default())
    }

    async fn fund_channel(
        &self,
        destination_key: &str,
        capacity_msat: u64,
        push_msat: u64,
        utxo: &Utxo,
    ) -> Result<String, LabError> {
        let mut conflicts = self.behavior.funding_conflicts.lock().unwrap();
        if let Some(remaining) = conflicts.get_mut(&self.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LabError::ChannelOpenInProgress {
                    peer: destination_key.to_string(),
                });
            }
        }
        drop(conflicts);
        let channel_id = self.chain.next_channel_id();
        self.log.record(format!(
            "FUND_CHANNEL {} {} {} {} {} {}",
            self.name, destination_key, capacity_msat, push_msat, utxo, channel_id
        ));
        Ok(channel_id)
    }

    async fn set_channel_fee(
        &self,
        channel_id: &str,
        base_fee: Option<u64>,
        ppm_fee: Option<u64>,
    ) -> Result<(), LabError> {
        self.log.record(format!(
            "SET_FEE {} {} {} {}",
            self.name,
            channel_id,
            base_fee.map_or_else(|| "-".to_string(), |fee| fee.to_string()),
            ppm_fee.map_or_else(|| "-".to_string(), |fee| fee.to_string()),
        ));
        Ok(())
    }

    async fn new_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, LabError> {
        Ok(Invoice {
            bolt11: format!("ln-{}-{}", self.name, amount_msat),
            payment_hash: format!("hash-{}-{}", self.name, description.len()),
            amount_msat,
            expires_at: expiry_secs,
        })
    }

    async fn get_route(
        &self,
        destination_key: &str,
        amount_msat: u64,
    ) -> Result<Vec<RouteHop>, LabError> {
        Ok(vec![RouteHop {
            public_key: destination_key.to_string(),
            channel_id: "direct".to_string(),
            amount_msat,
            delay: 9,
        }])
    }

    async fn pay_invoice(&self, invoice: &Invoice) -> Result<PaymentResult, LabError> {
        self.log
            .record(format!("PAY {} {}", self.name, invoice.bolt11));
        Ok(PaymentResult {
            payment_preimage: format!("preimage-{}", invoice.payment_hash),
            amount_sent_msat: invoice.amount_msat,
        })
    }
}

/// Fleet provider backed by the simulated chain and runtime.
#[derive(Clone, Default)]
pub struct FleetSimulator {
    chain: Arc<SimChain>,
    runtime: Arc<SimRuntime>,
    behavior: Arc<Behavior>,
    log: Arc<ActivityLog>,
}

impl FleetSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(&self) -> &SimChain {
        &self.chain
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.log
    }

    pub fn fail_miner_start(&self, name: &str) {
        self.behavior
            .failing_miner_starts
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn fail_node_start(&self, name: &str) {
        self.behavior
            .failing_node_starts
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn mark_unreachable(&self, name: &str) {
        self.behavior
            .unreachable_nodes
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Make `name` report a funding conflict for its next `count` channel
    /// opens, then succeed.
    pub fn inject_funding_conflicts(&self, name: &str, count: usize) {
        self.behavior
            .funding_conflicts
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }
}

impl FleetProvider for FleetSimulator {
    fn miner(&self, name: &str) -> Arc<dyn MinerClient> {
        self.log.record(format!("PROVISION_MINER {}", name));
        Arc::new(SimMinerClient {
            name: name.to_string(),
            chain: Arc::clone(&self.chain),
            runtime: Arc::clone(&self.runtime),
            behavior: Arc::clone(&self.behavior),
            log: Arc::clone(&self.log),
            handle: Mutex::new(None),
        })
    }

    fn node(&self, name: &str, miner_name: &str) -> Arc<dyn NodeClient> {
        self.log
            .record(format!("PROVISION_NODE {} {}", name, miner_name));
        Arc::new(SimNodeClient {
            name: name.to_string(),
            miner_name: miner_name.to_string(),
            chain: Arc::clone(&self.chain),
            runtime: Arc::clone(&self.runtime),
            behavior: Arc::clone(&self.behavior),
            log: Arc::clone(&self.log),
            handle: Mutex::new(None),
            next_address: AtomicU64::new(0),
        })
    }
}
