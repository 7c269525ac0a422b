//! Node facade
//!
//! [`Node`] owns a [`NodeRecord`] behind a mutex and answers every
//! [`RingPeer`] call. The lock is only held for local reads and writes,
//! never across a remote call.

use crate::common::{hash_key, node_name, Config, Error, NodeId, Result};
use crate::node::heartbeat::HeartbeatMonitor;
use crate::node::state::{membership_of, route, NodePhase, NodeRecord};
use crate::transport::{
    Connector, LocalStorage, MembershipTable, PeerHandle, PeerInfo, RingPeer,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    info: PeerInfo,
    config: Config,
    record: Mutex<NodeRecord>,
    monitors: Mutex<HashMap<NodeId, HeartbeatMonitor>>,
    connector: Arc<dyn Connector>,
}

impl Node {
    pub fn new(info: PeerInfo, config: Config, connector: Arc<dyn Connector>) -> Self {
        tracing::info!("Starting node {} ({})", info, info.addr);
        Self {
            inner: Arc::new(NodeInner {
                record: Mutex::new(NodeRecord::new(info.clone())),
                monitors: Mutex::new(HashMap::new()),
                info,
                config,
                connector,
            }),
        }
    }

    /// Build a node from its bootstrap id under the shared naming scheme.
    pub fn from_bootstrap_id(
        bootstrap_id: u16,
        addr: impl Into<String>,
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let name = node_name(&config.name_prefix, bootstrap_id);
        let id = hash_key(&name, config.space());
        Self::new(PeerInfo::new(name, id, addr), config, connector)
    }

    pub fn info(&self) -> &PeerInfo {
        &self.inner.info
    }

    pub fn id(&self) -> NodeId {
        self.inner.info.id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn record(&self) -> MutexGuard<'_, NodeRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn monitors(&self) -> MutexGuard<'_, HashMap<NodeId, HeartbeatMonitor>> {
        self.inner
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callable handle for `peer`; calls to this node stay in-process.
    pub fn peer(&self, peer: &PeerInfo) -> Result<PeerHandle> {
        if peer.name == self.inner.info.name {
            return Ok(Arc::new(self.clone()));
        }
        self.inner.connector.connect(peer)
    }

    pub fn phase(&self) -> NodePhase {
        self.record().phase
    }

    pub(crate) fn set_phase(&self, phase: NodePhase) {
        let mut record = self.record();
        if record.phase != phase {
            tracing::debug!("{}: {} -> {}", self.info(), record.phase, phase);
            record.phase = phase;
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.record().recovering
    }

    /// (predecessor, successor)
    pub fn neighbors(&self) -> (PeerInfo, PeerInfo) {
        let record = self.record();
        (record.predecessor.clone(), record.successor.clone())
    }

    pub fn membership(&self) -> MembershipTable {
        self.record().membership.clone()
    }

    pub fn storage_snapshot(&self) -> LocalStorage {
        self.record().storage.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.record().is_leader()
    }

    /// Route `target` with the local membership table.
    pub fn locate(&self, target: NodeId) -> Result<PeerInfo> {
        let record = self.record();
        route(&record.membership, target).cloned().ok_or_else(|| {
            Error::ProtocolInconsistency(format!(
                "{}: membership table is empty, cannot route {}",
                self.info(),
                target
            ))
        })
    }

    pub fn hash(&self, key: &str) -> NodeId {
        hash_key(key, self.inner.config.space())
    }
}

#[async_trait]
impl RingPeer for Node {
    async fn name(&self) -> Result<String> {
        Ok(self.inner.info.name.clone())
    }

    async fn hashed_id(&self) -> Result<NodeId> {
        Ok(self.inner.info.id)
    }

    async fn successor(&self) -> Result<PeerInfo> {
        Ok(self.record().successor.clone())
    }

    async fn predecessor(&self) -> Result<PeerInfo> {
        Ok(self.record().predecessor.clone())
    }

    async fn set_successor(&self, successor: PeerInfo) -> Result<()> {
        tracing::debug!("{}: successor -> {}", self.info(), successor);
        self.record().successor = successor;
        Ok(())
    }

    async fn set_predecessor(&self, predecessor: PeerInfo) -> Result<()> {
        tracing::debug!("{}: predecessor -> {}", self.info(), predecessor);
        self.record().predecessor = predecessor;
        Ok(())
    }

    async fn membership_table(&self) -> Result<MembershipTable> {
        Ok(self.membership())
    }

    async fn build_membership_table(&self, nodes: Vec<PeerInfo>) -> Result<()> {
        let table = membership_of(nodes);
        tracing::debug!("{}: membership rebuilt with {} members", self.info(), table.len());
        self.record().membership = table;
        Ok(())
    }

    async fn update_membership_table(&self) -> Result<()> {
        let nodes = self.all_nodes().await?;
        let added = self.record().merge_membership(nodes);
        tracing::debug!("{}: membership updated, {} new members", self.info(), added);
        Ok(())
    }

    async fn remove_membership(&self, id: NodeId) -> Result<()> {
        if self.record().membership.remove(&id).is_some() {
            tracing::debug!("{}: removed member {}", self.info(), id);
        }
        Ok(())
    }

    async fn recover_status(&self) -> Result<bool> {
        Ok(self.is_recovering())
    }

    async fn set_recover_status(&self, recovering: bool) -> Result<()> {
        self.record().recovering = recovering;
        Ok(())
    }

    async fn put_local(&self, key: String, value: String) -> Result<()> {
        self.record().storage.insert(key, value);
        Ok(())
    }

    async fn get_local(&self, key: String) -> Result<Option<String>> {
        Ok(self.record().storage.get(&key).cloned())
    }

    async fn remove_local(&self, key: String) -> Result<()> {
        self.record().storage.remove(&key);
        Ok(())
    }

    async fn local_storage(&self) -> Result<LocalStorage> {
        Ok(self.storage_snapshot())
    }

    async fn find_node_by_hashed_id(&self, id: NodeId) -> Result<PeerInfo> {
        self.locate(id)
    }

    async fn rebalance(&self) -> Result<()> {
        self.rebalance_cluster().await.map(|_| ())
    }

    async fn setup_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.start_heartbeat(peer)
    }

    async fn remove_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.stop_heartbeat(peer);
        Ok(())
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        Node::put(self, &key, &value).await.map(|_| ())
    }

    async fn get(&self, key: String) -> Result<Option<String>> {
        Node::get(self, &key).await
    }

    async fn find_owners(&self, key: String) -> Result<Vec<PeerInfo>> {
        Node::find_owners(self, &key).await
    }

    async fn leave(&self) -> Result<()> {
        Node::leave(self).await
    }
}
