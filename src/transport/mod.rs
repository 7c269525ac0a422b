//! Peer-to-peer call surface
//!
//! Every node exposes the same [`RingPeer`] interface to its peers. Nodes
//! refer to each other by [`PeerInfo`] (name, id, address) and resolve a
//! live [`PeerHandle`] through a [`Connector`] only when they need to call.
//!
//! Two transports are provided:
//! - [`http`]: JSON over HTTP (`axum` server, `reqwest` client)
//! - [`memory`]: in-process registry with simulated crashes

pub mod http;
pub mod memory;

use crate::common::{NodeId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Serialisable reference to a ring member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub id: NodeId,
    /// Where the peer's RPC server listens (`host:port`)
    pub addr: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>, id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            addr: addr.into(),
        }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// A node's view of the ring members, keyed by id.
pub type MembershipTable = BTreeMap<NodeId, PeerInfo>;

/// A node's local key/value storage.
pub type LocalStorage = BTreeMap<String, String>;

/// Network-facing operations every node answers.
#[async_trait]
pub trait RingPeer: Send + Sync {
    // Identity
    async fn name(&self) -> Result<String>;
    async fn hashed_id(&self) -> Result<NodeId>;

    // Topology
    async fn successor(&self) -> Result<PeerInfo>;
    async fn predecessor(&self) -> Result<PeerInfo>;
    async fn set_successor(&self, successor: PeerInfo) -> Result<()>;
    async fn set_predecessor(&self, predecessor: PeerInfo) -> Result<()>;

    // Membership
    async fn membership_table(&self) -> Result<MembershipTable>;
    async fn build_membership_table(&self, nodes: Vec<PeerInfo>) -> Result<()>;
    async fn update_membership_table(&self) -> Result<()>;
    async fn remove_membership(&self, id: NodeId) -> Result<()>;

    // Recovery flag
    async fn recover_status(&self) -> Result<bool>;
    async fn set_recover_status(&self, recovering: bool) -> Result<()>;

    // Local storage
    async fn put_local(&self, key: String, value: String) -> Result<()>;
    async fn get_local(&self, key: String) -> Result<Option<String>>;
    async fn remove_local(&self, key: String) -> Result<()>;
    async fn local_storage(&self) -> Result<LocalStorage>;

    // Routing and rebalancing
    async fn find_node_by_hashed_id(&self, id: NodeId) -> Result<PeerInfo>;
    async fn rebalance(&self) -> Result<()>;

    // Heartbeat registration
    async fn setup_heartbeat(&self, peer: NodeId) -> Result<()>;
    async fn remove_heartbeat(&self, peer: NodeId) -> Result<()>;

    // Client-facing
    async fn put(&self, key: String, value: String) -> Result<()>;
    async fn get(&self, key: String) -> Result<Option<String>>;
    async fn find_owners(&self, key: String) -> Result<Vec<PeerInfo>>;
    async fn leave(&self) -> Result<()>;
}

pub type PeerHandle = Arc<dyn RingPeer>;

/// Resolves a peer reference into something callable.
pub trait Connector: Send + Sync {
    fn connect(&self, peer: &PeerInfo) -> Result<PeerHandle>;
}
