//! In-process transport
//!
//! Every registered node is reachable by name. A crashed node keeps its
//! state but every call to it fails with a communication error, which is
//! what the failure detector watches for.

use super::{Connector, LocalStorage, MembershipTable, PeerHandle, PeerInfo, RingPeer};
use crate::common::{Error, NodeId, Result};
use crate::node::Node;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, Node>,
    down: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, node: Node) {
        let mut registry = self.registry();
        registry.down.remove(&node.info().name);
        registry.nodes.insert(node.info().name.clone(), node);
    }

    /// Make `name` unreachable and stop its own probes.
    pub fn crash(&self, name: &str) {
        let node = {
            let mut registry = self.registry();
            registry.down.insert(name.to_string());
            registry.nodes.get(name).cloned()
        };
        if let Some(node) = node {
            tracing::info!("memory network: {} crashed", node.info());
            node.shutdown();
        }
    }

    pub fn restore(&self, name: &str) {
        self.registry().down.remove(name);
    }

    pub fn is_down(&self, name: &str) -> bool {
        self.registry().down.contains(name)
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.registry().nodes.get(name).cloned()
    }
}

impl Connector for MemoryNetwork {
    fn connect(&self, peer: &PeerInfo) -> Result<PeerHandle> {
        Ok(Arc::new(MemoryPeer {
            network: self.clone(),
            name: peer.name.clone(),
        }))
    }
}

/// Handle resolved on every call, so a crash takes effect immediately.
struct MemoryPeer {
    network: MemoryNetwork,
    name: String,
}

impl MemoryPeer {
    fn target(&self) -> Result<Node> {
        let registry = self.network.registry();
        if registry.down.contains(&self.name) {
            return Err(Error::communication(&self.name, "peer is down"));
        }
        registry
            .nodes
            .get(&self.name)
            .cloned()
            .ok_or_else(|| Error::communication(&self.name, "no such peer"))
    }
}

#[async_trait]
impl RingPeer for MemoryPeer {
    async fn name(&self) -> Result<String> {
        RingPeer::name(&self.target()?).await
    }

    async fn hashed_id(&self) -> Result<NodeId> {
        self.target()?.hashed_id().await
    }

    async fn successor(&self) -> Result<PeerInfo> {
        RingPeer::successor(&self.target()?).await
    }

    async fn predecessor(&self) -> Result<PeerInfo> {
        RingPeer::predecessor(&self.target()?).await
    }

    async fn set_successor(&self, successor: PeerInfo) -> Result<()> {
        self.target()?.set_successor(successor).await
    }

    async fn set_predecessor(&self, predecessor: PeerInfo) -> Result<()> {
        self.target()?.set_predecessor(predecessor).await
    }

    async fn membership_table(&self) -> Result<MembershipTable> {
        self.target()?.membership_table().await
    }

    async fn build_membership_table(&self, nodes: Vec<PeerInfo>) -> Result<()> {
        self.target()?.build_membership_table(nodes).await
    }

    async fn update_membership_table(&self) -> Result<()> {
        self.target()?.update_membership_table().await
    }

    async fn remove_membership(&self, id: NodeId) -> Result<()> {
        self.target()?.remove_membership(id).await
    }

    async fn recover_status(&self) -> Result<bool> {
        self.target()?.recover_status().await
    }

    async fn set_recover_status(&self, recovering: bool) -> Result<()> {
        self.target()?.set_recover_status(recovering).await
    }

    async fn put_local(&self, key: String, value: String) -> Result<()> {
        self.target()?.put_local(key, value).await
    }

    async fn get_local(&self, key: String) -> Result<Option<String>> {
        self.target()?.get_local(key).await
    }

    async fn remove_local(&self, key: String) -> Result<()> {
        self.target()?.remove_local(key).await
    }

    async fn local_storage(&self) -> Result<LocalStorage> {
        self.target()?.local_storage().await
    }

    async fn find_node_by_hashed_id(&self, id: NodeId) -> Result<PeerInfo> {
        self.target()?.find_node_by_hashed_id(id).await
    }

    async fn rebalance(&self) -> Result<()> {
        RingPeer::rebalance(&self.target()?).await
    }

    async fn setup_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.target()?.setup_heartbeat(peer).await
    }

    async fn remove_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.target()?.remove_heartbeat(peer).await
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        RingPeer::put(&self.target()?, key, value).await
    }

    async fn get(&self, key: String) -> Result<Option<String>> {
        RingPeer::get(&self.target()?, key).await
    }

    async fn find_owners(&self, key: String) -> Result<Vec<PeerInfo>> {
        RingPeer::find_owners(&self.target()?, key).await
    }

    async fn leave(&self) -> Result<()> {
        RingPeer::leave(&self.target()?).await
    }
}
