//! Client-facing storage operations: put, get, find_owners
//!
//! Every key lives on its replica set: the owner (first member whose id is
//! >= the key's hash, wrapping) plus the owner's predecessor and successor.

use crate::common::{Error, Result};
use crate::node::state::{dedup_peers, table_neighbors};
use crate::node::Node;
use crate::transport::{PeerInfo, RingPeer};

/// Where one write of a key landed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// The key's replica set
    pub replicas: Vec<PeerInfo>,
    /// Replicas that accepted the write, in replica-set order
    pub written: Vec<PeerInfo>,
}

impl Placement {
    pub fn is_complete(&self) -> bool {
        self.written.len() == self.replicas.len()
    }
}

impl Node {
    /// Owner, predecessor and successor of `key`, each listed once.
    ///
    /// The owner is asked for its neighbours. If it cannot be reached, they
    /// are taken from the membership table instead.
    pub async fn replica_set(&self, key: &str) -> Result<Vec<PeerInfo>> {
        let owner = self.locate(self.hash(key))?;
        let (predecessor, successor) = match self.ring_neighbors_of(&owner).await {
            Ok(neighbors) => neighbors,
            Err(e) if e.is_communication_failure() => {
                tracing::warn!("{}: owner {} of {} unreachable: {}", self.info(), owner, key, e);
                table_neighbors(&self.membership(), owner.id).ok_or_else(|| {
                    Error::ProtocolInconsistency(format!(
                        "{}: no neighbours of {} in the membership table",
                        self.info(),
                        owner
                    ))
                })?
            }
            Err(e) => return Err(e),
        };
        Ok(dedup_peers([owner, predecessor, successor]))
    }

    async fn ring_neighbors_of(&self, peer: &PeerInfo) -> Result<(PeerInfo, PeerInfo)> {
        let handle = self.peer(peer)?;
        let predecessor = handle.predecessor().await?;
        let successor = handle.successor().await?;
        Ok((predecessor, successor))
    }

    /// Write `key` to every member of its replica set.
    ///
    /// Each replica is written on its own; a failed copy is logged and the
    /// rest still go out. Fails only when no replica accepted the value.
    pub(crate) async fn replicate(&self, key: &str, value: &str) -> Result<Placement> {
        let replicas = self.replica_set(key).await?;
        let mut written = Vec::with_capacity(replicas.len());
        let mut last_error = None;

        for replica in &replicas {
            let stored = match self.peer(replica) {
                Ok(handle) => handle.put_local(key.to_string(), value.to_string()).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => written.push(replica.clone()),
                Err(e) => {
                    tracing::warn!("{}: copy of {} on {} failed: {}", self.info(), key, replica, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if written.is_empty() => Err(e),
            _ => Ok(Placement { replicas, written }),
        }
    }

    /// Block while any of `peers` reports an in-progress repair.
    ///
    /// Unreachable peers are skipped; the flag is advisory.
    pub(crate) async fn wait_for_recovery(&self, peers: &[PeerInfo]) {
        loop {
            let mut recovering = None;
            for peer in peers {
                let status = match self.peer(peer) {
                    Ok(handle) => handle.recover_status().await,
                    Err(e) => Err(e),
                };
                match status {
                    Ok(true) => {
                        recovering = Some(peer);
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::debug!("{}: recovery poll of {} failed: {}", self.info(), peer, e)
                    }
                }
            }

            match recovering {
                Some(peer) => {
                    tracing::info!("{}: waiting, {} is recovering", self.info(), peer);
                    tokio::time::sleep(self.config().join_poll_interval()).await;
                }
                None => return,
            }
        }
    }

    /// Store `key` on its owner and the owner's neighbours, returning the
    /// replicas that took the write.
    ///
    /// Waits first while any member is repairing the ring.
    pub async fn put(&self, key: &str, value: &str) -> Result<Vec<PeerInfo>> {
        let members: Vec<PeerInfo> = self.membership().into_values().collect();
        self.wait_for_recovery(&members).await;

        let placement = self.replicate(key, value).await.inspect_err(|e| {
            tracing::error!("{}: SET {} failed: {}", self.info(), key, e);
        })?;
        if !placement.is_complete() {
            tracing::warn!(
                "{}: SET {} reached {} of {} replicas",
                self.info(),
                key,
                placement.written.len(),
                placement.replicas.len()
            );
        }
        tracing::debug!(
            "{}: SET {} on {}",
            self.info(),
            key,
            placement
                .written
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(placement.written)
    }

    /// Value held by the key's owner. Replicas are not consulted on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let owner = self.locate(self.hash(key))?;
        self.peer(&owner)?
            .get_local(key.to_string())
            .await
            .inspect_err(|e| tracing::error!("{}: GET {} failed: {}", self.info(), key, e))
    }

    /// Members of the key's replica set that currently hold it.
    pub async fn find_owners(&self, key: &str) -> Result<Vec<PeerInfo>> {
        let replicas = self.replica_set(key).await?;
        let mut owners = Vec::with_capacity(replicas.len());
        for replica in replicas {
            let held = match self.peer(&replica) {
                Ok(handle) => handle.get_local(key.to_string()).await,
                Err(e) => Err(e),
            };
            match held {
                Ok(Some(_)) => owners.push(replica),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{}: {} skipped for {}: {}", self.info(), replica, key, e)
                }
            }
        }
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::transport::memory::MemoryNetwork;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_singleton_put_get() {
        let node = Node::new(
            PeerInfo::new("vm-1", 42, "mem"),
            Config::test_config(),
            Arc::new(MemoryNetwork::new()),
        );

        let replicas = node.put("a", "1").await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(node.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(node.get("missing").await.unwrap(), None);

        let owners = node.find_owners("a").await.unwrap();
        assert_eq!(owners, vec![node.info().clone()]);
        assert!(node.find_owners("missing").await.unwrap().is_empty());
    }
}
