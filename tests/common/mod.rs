//! Shared helpers for in-process ring tests

#![allow(dead_code)]

use ringkv::common::{Config, NodeId};
use ringkv::transport::memory::MemoryNetwork;
use ringkv::{Node, PeerInfo};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Cluster {
    pub network: MemoryNetwork,
    pub config: Config,
    pub nodes: Vec<Node>,
}

impl Cluster {
    pub fn new(config: Config) -> Self {
        Self {
            network: MemoryNetwork::new(),
            config,
            nodes: Vec::new(),
        }
    }

    /// Start nodes with the given ring ids, joining them one after another.
    pub async fn start(config: Config, ids: &[NodeId]) -> Self {
        let mut cluster = Self::new(config);
        for id in ids {
            cluster.join(*id).await;
        }
        cluster
    }

    pub fn spawn(&self, id: NodeId) -> Node {
        let node = Node::new(
            PeerInfo::new(format!("vm-{}", id), id, "mem"),
            self.config.clone(),
            Arc::new(self.network.clone()),
        );
        self.network.register(node.clone());
        node
    }

    pub async fn join(&mut self, id: NodeId) -> Node {
        let node = self.spawn(id);
        let candidates = self.nodes.iter().map(|n| n.info().clone()).collect();
        node.join_peers(candidates).await.unwrap();
        self.nodes.push(node.clone());
        node
    }

    pub fn node(&self, id: NodeId) -> Node {
        self.nodes
            .iter()
            .find(|node| node.id() == id)
            .cloned()
            .unwrap()
    }

    /// Take `id` out of the cluster after a leave or crash.
    pub fn remove(&mut self, id: NodeId) -> Node {
        let index = self.nodes.iter().position(|node| node.id() == id).unwrap();
        self.nodes.remove(index)
    }

    /// How many live nodes hold `key` locally.
    pub fn holders(&self, key: &str) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.storage_snapshot().contains_key(key))
            .count()
    }

    /// Ids seen by walking successors from the first node.
    pub async fn ring_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes[0]
            .all_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|peer| peer.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
