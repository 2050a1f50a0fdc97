use crate::channel::Channel;
use crate::clients::FleetProvider;
use crate::error::LabError;
use crate::miner::Miner;
use crate::node::Node;
use crate::observability::EventSink;
use crate::task_group::{CompletedTask, TaskGroup};
use crate::LabConfig;
use log::warn;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use streamslab_lib::rpc::Utxo;
use streamslab_lib::topology::{EdgeKey, Topology};
use tokio::sync::{watch, Mutex as AsyncMutex};

/// Lifecycle state of the fleet. Bring-up walks the first seven states in
/// order; teardown appends Stopping and returns to Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Stopped,
    CreateMiners,
    ConnectMiners,
    CreateNodesFundChannels,
    CreateChannels,
    SyncNodes,
    Ready,
    Stopping,
}

/// Which fleet member mines for a height barrier.
#[derive(Debug, Clone, Copy)]
enum MinerSelection {
    /// The fixed designated miner (`m0`), used mid-bring-up so funding
    /// blocks land on one chain tip.
    Designated,
    /// Any fleet member, used for periodic sync while Ready.
    Any,
}

/// Snapshot of one directional channel entity, for display and assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub base_fee: u64,
    pub ppm_fee: u64,
}

/// Owner of the fleet lifecycle.
///
/// Sequences miner bring-up, node bring-up plus channel funding, channel
/// creation and height sync through bounded task groups, and exposes the
/// advisory progress counters the consumer displays. A stage that loses some
/// or all of its operations to error still advances unless
/// [`LabConfig::abort_on_total_stage_failure`] is set.
pub struct Lab<P: FleetProvider> {
    topology: Topology,
    provider: Arc<P>,
    config: LabConfig,
    sink: Arc<dyn EventSink>,
    status: Mutex<Status>,
    /// Fleet-wide mining mutex; cloned into every miner.
    mine_lock: Arc<AsyncMutex<()>>,
    miners: Mutex<Vec<Arc<Miner>>>,
    connected_miners: Arc<Mutex<Vec<(String, String)>>>,
    nodes: Arc<Mutex<HashMap<String, Arc<Node>>>>,
    synced_nodes: Arc<Mutex<Vec<String>>>,
    channel_utxos: Arc<Mutex<HashMap<EdgeKey, Utxo>>>,
    channels: Arc<Mutex<HashMap<EdgeKey, Channel>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: FleetProvider> Lab<P> {
    pub fn new(
        topology: Topology,
        provider: Arc<P>,
        config: LabConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            topology,
            provider,
            config,
            sink,
            status: Mutex::new(Status::Stopped),
            mine_lock: Arc::new(AsyncMutex::new(())),
            miners: Mutex::new(Vec::new()),
            connected_miners: Arc::new(Mutex::new(Vec::new())),
            nodes: Arc::new(Mutex::new(HashMap::new())),
            synced_nodes: Arc::new(Mutex::new(Vec::new())),
            channel_utxos: Arc::new(Mutex::new(HashMap::new())),
            channels: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn name(&self) -> &str {
        self.topology.name()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.status.lock().map(|guard| *guard).unwrap_or(Status::Stopped)
    }

    pub fn total_miner_count(&self) -> usize {
        self.topology.node_count().div_ceil(self.config.nodes_per_miner)
    }

    pub fn created_miner_count(&self) -> usize {
        self.miners.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn connected_miner_count(&self) -> usize {
        self.connected_miners.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn total_node_count(&self) -> usize {
        self.topology.node_count()
    }

    pub fn created_node_count(&self) -> usize {
        self.nodes.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn synced_node_count(&self) -> usize {
        self.synced_nodes.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn total_channel_count(&self) -> usize {
        self.topology.edge_count()
    }

    pub fn funded_channel_count(&self) -> usize {
        self.channel_utxos.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn created_channel_count(&self) -> usize {
        self.channels.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().ok().and_then(|guard| guard.get(name).cloned())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes
            .lock()
            .map(|guard| {
                let mut names: Vec<String> = guard.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    pub fn channel_info(&self, key: EdgeKey) -> Option<ChannelInfo> {
        self.channels.lock().ok().and_then(|guard| {
            guard.get(&key).map(|channel| ChannelInfo {
                id: channel.id.clone(),
                source: channel.source.name().to_string(),
                destination: channel.destination.name().to_string(),
                base_fee: channel.base_fee,
                ppm_fee: channel.ppm_fee,
            })
        })
    }

    /// Ask every in-flight operation to stop. In-flight tasks are recorded
    /// cancelled; loops exit at their next suspension point.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub(crate) fn event_sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn set_status(&self, status: Status) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
        self.sink.stage_changed(status);
    }

    fn group<T: Send + 'static>(&self) -> TaskGroup<T> {
        TaskGroup::new(
            self.config.task_limit,
            Arc::clone(&self.sink),
            self.shutdown_rx.clone(),
        )
    }

    fn check_stage(
        &self,
        stage: &'static str,
        completed: &[CompletedTask<()>],
    ) -> Result<(), LabError> {
        let failed = completed.iter().filter(|task| task.failed()).count();
        if failed > 0 {
            warn!("{} {}/{} tasks failed", stage, failed, completed.len());
        }
        if self.config.abort_on_total_stage_failure
            && !completed.is_empty()
            && failed == completed.len()
        {
            return Err(LabError::StageFailed(stage));
        }
        Ok(())
    }

    fn designated_miner(&self) -> Result<Arc<Miner>, LabError> {
        self.miners
            .lock()
            .ok()
            .and_then(|guard| guard.first().cloned())
            .ok_or_else(|| LabError::Unavailable("miner fleet".to_string()))
    }

    fn select_miner(&self, selection: MinerSelection) -> Result<Arc<Miner>, LabError> {
        match selection {
            MinerSelection::Designated => self.designated_miner(),
            MinerSelection::Any => self
                .miners
                .lock()
                .ok()
                .and_then(|guard| guard.choose(&mut rand::thread_rng()).cloned())
                .ok_or_else(|| LabError::Unavailable("miner fleet".to_string())),
        }
    }

    fn miner_fleet(&self) -> Vec<Arc<Miner>> {
        self.miners.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    fn node_fleet(&self) -> Vec<(String, Arc<Node>)> {
        self.nodes
            .lock()
            .map(|guard| {
                let mut nodes: Vec<(String, Arc<Node>)> = guard
                    .iter()
                    .map(|(name, node)| (name.clone(), Arc::clone(node)))
                    .collect();
                nodes.sort_by(|a, b| a.0.cmp(&b.0));
                nodes
            })
            .unwrap_or_default()
    }

    /// Bring the fleet up. No-op unless currently Stopped.
    pub async fn start(&self) -> Result<(), LabError> {
        if self.status() != Status::Stopped {
            return Ok(());
        }

        self.create_miners().await?;
        if self.shutting_down() {
            return Ok(());
        }
        self.create_nodes().await?;
        if self.shutting_down() {
            return Ok(());
        }
        self.create_channels().await?;
        if self.shutting_down() {
            return Ok(());
        }
        self.sync_nodes().await?;
        if self.shutting_down() {
            return Ok(());
        }

        self.set_status(Status::Ready);
        Ok(())
    }

    /// Tear the fleet down: nodes first, then miners, since nodes depend on
    /// the miners' chain data during shutdown cleanup. No-op unless Ready.
    pub async fn stop(&self) -> Result<(), LabError> {
        if self.status() != Status::Ready {
            return Ok(());
        }
        self.set_status(Status::Stopping);
        self.stop_nodes().await;
        self.stop_miners().await;
        self.set_status(Status::Stopped);
        Ok(())
    }

    /// Periodic fleet sync while Ready: mine `block_count` blocks on any
    /// fleet member and wait for every node to observe the new height.
    pub async fn sync_mine(&self, block_count: u64) -> Result<(), LabError> {
        if self.status() != Status::Ready {
            return Ok(());
        }
        self.height_barrier(block_count, MinerSelection::Any, "SYNC_MINE")
            .await
    }

    async fn create_miners(&self) -> Result<(), LabError> {
        self.set_status(Status::CreateMiners);
        let mut group = self.group::<()>();
        for i in 0..self.total_miner_count() {
            let name = format!("m{}", i);
            let client = self.provider.miner(&name);
            let miner = Arc::new(Miner::new(&name, client, Arc::clone(&self.mine_lock)));
            if let Ok(mut guard) = self.miners.lock() {
                guard.push(Arc::clone(&miner));
            }
            group.spawn(format!("CREATE_MINER {}", name), async move {
                miner.start().await
            });
        }
        self.check_stage("CREATE_MINERS", &group.join_all().await)?;

        self.set_status(Status::ConnectMiners);
        let miners = self.miner_fleet();
        let mut group = self.group::<()>();
        for (i, left) in miners.iter().enumerate() {
            for right in miners.iter().skip(i + 1) {
                let left = Arc::clone(left);
                let right = Arc::clone(right);
                let connected = Arc::clone(&self.connected_miners);
                let task_name = format!("CONNECT_MINER {} {}", left.name(), right.name());
                group.spawn(task_name, async move {
                    left.connect(&right).await?;
                    if let Ok(mut guard) = connected.lock() {
                        guard.push((left.name().to_string(), right.name().to_string()));
                    }
                    Ok(())
                });
            }
        }
        self.check_stage("CONNECT_MINERS", &group.join_all().await)
    }

    async fn create_nodes(&self) -> Result<(), LabError> {
        self.set_status(Status::CreateNodesFundChannels);
        let designated = self.designated_miner()?;
        let miners = self.miner_fleet();
        let mut group = self.group::<()>();

        for (i, node_name) in self.topology.nodes().iter().enumerate() {
            let Some(assigned) = miners.get(i % miners.len()) else {
                break;
            };
            let client = self.provider.node(node_name, assigned.name());
            let node = Arc::new(Node::new(node_name, client));
            if let Ok(mut guard) = self.nodes.lock() {
                guard.insert(node_name.clone(), Arc::clone(&node));
            }

            let (started_tx, started_rx) = watch::channel(false);
            {
                let node = Arc::clone(&node);
                group.spawn(format!("CREATE_NODE {}", node_name), async move {
                    node.start().await?;
                    let _ = started_tx.send(true);
                    Ok(())
                });
            }

            // One funding output per outbound edge, mined once the node is up.
            for edge in self.topology.outbound_edges_of(node_name) {
                let key = edge.key;
                let node = Arc::clone(&node);
                let miner = Arc::clone(&designated);
                let utxos = Arc::clone(&self.channel_utxos);
                let mut started = started_rx.clone();
                group.spawn(format!("FUND_CHANNEL {}", key), async move {
                    started
                        .wait_for(|up| *up)
                        .await
                        .map_err(|_| LabError::Unavailable(node.name().to_string()))?;
                    let address = node.new_address().await?;
                    let hashes = miner.mine(1, Some(&address)).await?;
                    let hash = hashes
                        .first()
                        .ok_or_else(|| LabError::Runtime("miner returned no block hashes".to_string()))?;
                    let txid = miner.coinbase_txid(hash).await?;
                    if let Ok(mut guard) = utxos.lock() {
                        guard.insert(key, Utxo::new(txid, 0));
                    }
                    Ok(())
                });
            }
        }
        self.check_stage("CREATE_NODES_FUND_CHANNELS", &group.join_all().await)?;

        // The funding outputs are coinbases; advance past maturity so they
        // become spendable.
        self.height_barrier(
            self.config.coinbase_maturity,
            MinerSelection::Designated,
            "CREATE_NODES_FUND_CHANNELS",
        )
        .await
    }

    async fn create_channels(&self) -> Result<(), LabError> {
        self.set_status(Status::CreateChannels);
        let mut group = self.group::<()>();

        for edge in self.topology.outbound_edges() {
            let out_key = edge.key;
            let in_key = out_key.inbound_companion();
            let Some(in_edge) = self.topology.edge(in_key) else {
                continue;
            };
            let (Some(source), Some(target)) = (self.node(&edge.source), self.node(&edge.target))
            else {
                continue;
            };
            let out_spec = edge.spec;
            let in_spec = in_edge.spec;
            let utxos = Arc::clone(&self.channel_utxos);
            let channels = Arc::clone(&self.channels);
            let retry_delay = self.config.funding_retry_delay;
            group.spawn(format!("CREATE_CHANNEL {}", out_key), async move {
                let utxo = utxos
                    .lock()
                    .ok()
                    .and_then(|guard| guard.get(&out_key).cloned())
                    .ok_or_else(|| {
                        LabError::Unavailable(format!("funding output for {}", out_key))
                    })?;
                source.connect(&target).await?;
                let channel_id = source
                    .open_channel(&target, out_spec.capacity, out_spec.balance, &utxo, retry_delay)
                    .await?;

                let outbound = Channel::new(
                    &channel_id,
                    Arc::clone(&source),
                    Arc::clone(&target),
                    out_spec.base_fee,
                    out_spec.ppm_fee,
                );
                outbound.apply_fee().await?;
                if let Ok(mut guard) = channels.lock() {
                    guard.insert(out_key, outbound);
                }

                let inbound = Channel::new(
                    &channel_id,
                    Arc::clone(&target),
                    Arc::clone(&source),
                    in_spec.base_fee,
                    in_spec.ppm_fee,
                );
                inbound.apply_fee().await?;
                if let Ok(mut guard) = channels.lock() {
                    guard.insert(in_key, inbound);
                }
                Ok(())
            });
        }
        self.check_stage("CREATE_CHANNELS", &group.join_all().await)
    }

    async fn sync_nodes(&self) -> Result<(), LabError> {
        self.set_status(Status::SyncNodes);
        self.height_barrier(
            self.config.ready_confirmations,
            MinerSelection::Designated,
            "SYNC_NODES",
        )
        .await
    }

    /// Mine `block_count` blocks under the fleet mining mutex, then wait for
    /// every node to report the resulting height. Mining failure downgrades
    /// the barrier to a no-op: bring-up is best-effort and the gap shows up
    /// in the synced counter and logs.
    async fn height_barrier(
        &self,
        block_count: u64,
        selection: MinerSelection,
        stage: &'static str,
    ) -> Result<(), LabError> {
        let miner = match self.select_miner(selection) {
            Ok(miner) => miner,
            Err(error) => {
                warn!("{} height barrier skipped: {}", stage, error);
                return Ok(());
            }
        };
        let target = match miner.mine(block_count, None).await {
            Ok(_) => match miner.get_block_height().await {
                Ok(height) => height,
                Err(error) => {
                    warn!("{} height barrier skipped: {}", stage, error);
                    return Ok(());
                }
            },
            Err(error) => {
                warn!("{} height barrier skipped: {}", stage, error);
                return Ok(());
            }
        };

        if let Ok(mut guard) = self.synced_nodes.lock() {
            guard.clear();
        }

        let mut group = self.group::<()>();
        for (name, node) in self.node_fleet() {
            let synced = Arc::clone(&self.synced_nodes);
            let poll_interval = self.config.sync_poll_interval;
            let task_name = format!("WAIT_SYNC {}", name);
            group.spawn(task_name, async move {
                node.wait_for_block_height(target, poll_interval).await?;
                if let Ok(mut guard) = synced.lock() {
                    guard.push(name);
                }
                Ok(())
            });
        }
        self.check_stage(stage, &group.join_all().await)
    }

    async fn stop_nodes(&self) {
        let mut group = self.group::<()>();
        for (name, node) in self.node_fleet() {
            let map = Arc::clone(&self.nodes);
            group.spawn(format!("STOP_NODE {}", name), async move {
                node.stop().await?;
                if let Ok(mut guard) = map.lock() {
                    guard.remove(node.name());
                }
                Ok(())
            });
        }
        group.join_all().await;
    }

    async fn stop_miners(&self) {
        let mut group = self.group::<()>();
        for miner in self.miner_fleet() {
            let task_name = format!("STOP_MINER {}", miner.name());
            group.spawn(task_name, async move { miner.stop().await });
        }
        group.join_all().await;
        if let Ok(mut guard) = self.miners.lock() {
            guard.clear();
        }
    }
}
