//! Per-node ring state
//!
//! [`NodeRecord`] is plain data: identity, neighbour references, membership
//! table, local storage and the recovery flag. It never talks to the network.
//! The [`Node`](super::Node) facade owns one record behind a mutex and does
//! all remote calls outside the lock.

use crate::common::{is_between, NodeId};
use crate::transport::{LocalStorage, MembershipTable, PeerInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

/// Lifecycle of a ring member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePhase {
    /// Self-loop, no peers
    Unlinked,
    /// Contacting the bootstrap list
    Joining,
    /// Linked into the ring and serving calls
    Active,
    /// Handing off storage; terminal
    Leaving,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePhase::Unlinked => write!(f, "unlinked"),
            NodePhase::Joining => write!(f, "joining"),
            NodePhase::Active => write!(f, "active"),
            NodePhase::Leaving => write!(f, "leaving"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub me: PeerInfo,
    pub successor: PeerInfo,
    pub predecessor: PeerInfo,
    pub membership: MembershipTable,
    pub storage: LocalStorage,
    pub recovering: bool,
    pub phase: NodePhase,
}

impl NodeRecord {
    /// A fresh, unlinked node: both neighbours point at itself and the
    /// membership table holds only itself.
    pub fn new(me: PeerInfo) -> Self {
        let mut record = Self {
            successor: me.clone(),
            predecessor: me.clone(),
            membership: MembershipTable::new(),
            storage: LocalStorage::new(),
            recovering: false,
            phase: NodePhase::Unlinked,
            me,
        };
        record.reset_to_singleton();
        record
    }

    pub fn reset_to_singleton(&mut self) {
        self.successor = self.me.clone();
        self.predecessor = self.me.clone();
        self.membership = membership_of(std::iter::once(self.me.clone()));
    }

    pub fn is_self(&self, peer: &PeerInfo) -> bool {
        peer.name == self.me.name
    }

    /// Add every node not yet known; existing entries are kept.
    pub fn merge_membership(&mut self, nodes: impl IntoIterator<Item = PeerInfo>) -> usize {
        let mut added = 0;
        for node in nodes {
            if !self.membership.contains_key(&node.id) {
                self.membership.insert(node.id, node);
                added += 1;
            }
        }
        added
    }

    pub fn leader(&self) -> Option<&PeerInfo> {
        leader(&self.membership)
    }

    pub fn is_leader(&self) -> bool {
        self.leader().is_some_and(|leader| self.is_self(leader))
    }
}

/// Build a membership table from a node list. Later duplicates of an id win.
pub fn membership_of(nodes: impl IntoIterator<Item = PeerInfo>) -> MembershipTable {
    nodes.into_iter().map(|node| (node.id, node)).collect()
}

/// Owner of `target`: the member with the smallest id >= `target`,
/// wrapping to the smallest id.
pub fn route(table: &MembershipTable, target: NodeId) -> Option<&PeerInfo> {
    table
        .range(target..)
        .next()
        .or_else(|| table.iter().next())
        .map(|(_, peer)| peer)
}

/// Member with the largest id.
pub fn leader(table: &MembershipTable) -> Option<&PeerInfo> {
    table.values().next_back()
}

/// The adjacent pair of members whose arc `(pred, succ]` contains `id`.
///
/// The wrapping arc from the largest id to the smallest is checked first.
/// With one member the pair is that member twice.
pub fn bracket(table: &MembershipTable, id: NodeId) -> Option<(PeerInfo, PeerInfo)> {
    let first = table.values().next()?;
    let last = table.values().next_back()?;
    if is_between(id, last.id, first.id) {
        return Some((last.clone(), first.clone()));
    }

    table
        .values()
        .zip(table.values().skip(1))
        .find(|(from, to)| is_between(id, from.id, to.id))
        .map(|(from, to)| (from.clone(), to.clone()))
}

/// Members just before and just after `id` in ring order, wrapping.
///
/// `id` itself need not be a member.
pub fn table_neighbors(table: &MembershipTable, id: NodeId) -> Option<(PeerInfo, PeerInfo)> {
    let predecessor = table
        .range(..id)
        .next_back()
        .or_else(|| table.iter().next_back())?;
    let successor = table
        .range((Bound::Excluded(id), Bound::Unbounded))
        .next()
        .or_else(|| table.iter().next())?;
    Some((predecessor.1.clone(), successor.1.clone()))
}

/// Drop repeated peers (same name) while keeping first-seen order.
pub fn dedup_peers(peers: impl IntoIterator<Item = PeerInfo>) -> Vec<PeerInfo> {
    let mut unique: Vec<PeerInfo> = Vec::new();
    for peer in peers {
        if !unique.iter().any(|seen| seen.name == peer.name) {
            unique.push(peer);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: NodeId) -> PeerInfo {
        PeerInfo::new(format!("vm-{}", id), id, format!("127.0.0.1:{}", 10000 + id))
    }

    fn table(ids: &[NodeId]) -> MembershipTable {
        membership_of(ids.iter().map(|id| peer(*id)))
    }

    #[test]
    fn test_new_record_is_self_loop() {
        let record = NodeRecord::new(peer(42));
        assert_eq!(record.successor, peer(42));
        assert_eq!(record.predecessor, peer(42));
        assert_eq!(record.membership.len(), 1);
        assert_eq!(record.phase, NodePhase::Unlinked);
        assert!(!record.recovering);
        assert!(record.is_leader());
    }

    #[test]
    fn test_route_smallest_id_at_or_above_target() {
        let members = table(&[10, 50, 90]);
        assert_eq!(route(&members, 30).unwrap().id, 50);
        assert_eq!(route(&members, 50).unwrap().id, 50);
        assert_eq!(route(&members, 10).unwrap().id, 10);
        assert_eq!(route(&members, 0).unwrap().id, 10);
    }

    #[test]
    fn test_route_wraps_past_largest_id() {
        let members = table(&[10, 50, 90]);
        assert_eq!(route(&members, 91).unwrap().id, 10);
        assert_eq!(route(&members, 127).unwrap().id, 10);
    }

    #[test]
    fn test_route_empty_table() {
        assert!(route(&MembershipTable::new(), 5).is_none());
    }

    #[test]
    fn test_leader_is_max_id() {
        assert_eq!(leader(&table(&[10, 90, 50])).unwrap().id, 90);
        assert!(leader(&MembershipTable::new()).is_none());
    }

    #[test]
    fn test_bracket_interior_gap() {
        let members = table(&[10, 50, 90]);
        let (pred, succ) = bracket(&members, 30).unwrap();
        assert_eq!((pred.id, succ.id), (10, 50));
    }

    #[test]
    fn test_bracket_wrapping_gap() {
        let members = table(&[10, 50, 90]);
        let (pred, succ) = bracket(&members, 100).unwrap();
        assert_eq!((pred.id, succ.id), (90, 10));
        let (pred, succ) = bracket(&members, 5).unwrap();
        assert_eq!((pred.id, succ.id), (90, 10));
    }

    #[test]
    fn test_bracket_of_removed_member() {
        // 50 failed and was removed: its neighbours are 10 and 90
        let members = table(&[10, 90]);
        let (pred, succ) = bracket(&members, 50).unwrap();
        assert_eq!((pred.id, succ.id), (10, 90));
    }

    #[test]
    fn test_bracket_single_member() {
        let members = table(&[42]);
        let (pred, succ) = bracket(&members, 7).unwrap();
        assert_eq!((pred.id, succ.id), (42, 42));
    }

    #[test]
    fn test_merge_membership_keeps_existing() {
        let mut record = NodeRecord::new(peer(10));
        let added = record.merge_membership(vec![peer(10), peer(50), peer(90)]);
        assert_eq!(added, 2);
        assert_eq!(record.membership.keys().copied().collect::<Vec<_>>(), vec![10, 50, 90]);
        assert!(!record.is_leader());
    }

    #[test]
    fn test_table_neighbors_wrap() {
        let members = table(&[10, 50, 90]);
        let (pred, succ) = table_neighbors(&members, 50).unwrap();
        assert_eq!((pred.id, succ.id), (10, 90));
        let (pred, succ) = table_neighbors(&members, 10).unwrap();
        assert_eq!((pred.id, succ.id), (90, 50));
        let (pred, succ) = table_neighbors(&members, 90).unwrap();
        assert_eq!((pred.id, succ.id), (50, 10));
        let (pred, succ) = table_neighbors(&table(&[42]), 42).unwrap();
        assert_eq!((pred.id, succ.id), (42, 42));
        assert!(table_neighbors(&MembershipTable::new(), 1).is_none());
    }

    #[test]
    fn test_dedup_peers() {
        let unique = dedup_peers(vec![peer(10), peer(50), peer(10)]);
        assert_eq!(unique, vec![peer(10), peer(50)]);
    }
}
