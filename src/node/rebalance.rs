//! Restoring the replication invariant
//!
//! - [`Node::rebalance_cluster`]: leader-only collect and redistribute of
//!   every key in the ring, run after each join and after a repair.
//! - [`Node::reconcile_local`]: iterative alternative where a repairing
//!   node re-pushes its own keys until a pass makes no writes.
//!
//! Neither coordinates with puts that arrive while it runs.

use crate::common::{Error, Result};
use crate::node::Node;
use crate::transport::{LocalStorage, PeerInfo, RingPeer};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub members: usize,
    pub unreachable: usize,
    pub keys_collected: usize,
    pub keys_placed: usize,
    /// Placed keys that missed at least one replica
    pub under_replicated: usize,
    /// Copies removed from members outside a key's replica set
    pub copies_pruned: usize,
    /// Keys no replica accepted; their existing copies stay where they were
    pub failures: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub passes: usize,
    pub keys_checked: usize,
    pub copies_written: usize,
    pub converged: bool,
}

impl Node {
    /// Collect every member's storage, write each key to its current
    /// replica set, then drop the copies held outside that set.
    ///
    /// Members that cannot be read are left untouched. A copy is only
    /// removed once at least one replica has accepted the key.
    pub async fn rebalance_cluster(&self) -> Result<RebalanceReport> {
        let members: Vec<PeerInfo> = self.membership().into_values().collect();
        if members.is_empty() {
            return Err(Error::ProtocolInconsistency(format!(
                "{}: membership table is empty, nothing to rebalance",
                self.info()
            )));
        }

        let mut report = RebalanceReport {
            members: members.len(),
            ..Default::default()
        };
        tracing::info!("{}: rebalancing across {} members", self.info(), members.len());

        let mut all_keys = LocalStorage::new();
        let mut holders: BTreeMap<String, Vec<PeerInfo>> = BTreeMap::new();
        for member in members {
            let storage = match self.peer(&member) {
                Ok(handle) => handle.local_storage().await,
                Err(e) => Err(e),
            };
            match storage {
                Ok(storage) => {
                    for (key, value) in storage {
                        holders.entry(key.clone()).or_default().push(member.clone());
                        all_keys.insert(key, value);
                    }
                }
                Err(e) => {
                    tracing::warn!("{}: cannot collect keys from {}: {}", self.info(), member, e);
                    report.unreachable += 1;
                }
            }
        }
        report.keys_collected = all_keys.len();

        for (key, value) in &all_keys {
            let placement = match self.replicate(key, value).await {
                Ok(placement) => placement,
                Err(e) => {
                    tracing::error!("{}: cannot place {}, copies kept: {}", self.info(), key, e);
                    report.failures += 1;
                    continue;
                }
            };
            report.keys_placed += 1;
            if !placement.is_complete() {
                report.under_replicated += 1;
            }

            let stale = holders
                .get(key)
                .into_iter()
                .flatten()
                .filter(|holder| placement.replicas.iter().all(|r| r.name != holder.name));
            for holder in stale {
                let removed = match self.peer(holder) {
                    Ok(handle) => handle.remove_local(key.clone()).await,
                    Err(e) => Err(e),
                };
                match removed {
                    Ok(()) => report.copies_pruned += 1,
                    Err(e) => {
                        tracing::warn!("{}: cannot remove {} from {}: {}", self.info(), key, holder, e)
                    }
                }
            }
        }

        tracing::info!("{}: rebalance done: {:?}", self.info(), report);
        Ok(report)
    }

    /// Push every locally held key to any replica lacking it, repeating
    /// until a full pass writes nothing or the pass budget runs out.
    pub async fn reconcile_local(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        while report.passes < self.config().max_reconcile_passes {
            report.passes += 1;
            let storage = self.storage_snapshot();
            let mut written = 0;
            let mut failed = 0;

            for (key, value) in &storage {
                report.keys_checked += 1;
                match self.fill_missing_replicas(key, value).await {
                    Ok(copies) => written += copies,
                    Err(e) => {
                        tracing::warn!("{}: reconcile of {} failed: {}", self.info(), key, e);
                        failed += 1;
                    }
                }
            }

            report.copies_written += written;
            if written == 0 && failed == 0 {
                report.converged = true;
                break;
            }
            tokio::time::sleep(self.config().recovery_delay()).await;
        }

        tracing::info!("{}: reconcile done: {:?}", self.info(), report);
        report
    }

    /// Copy `key` to each replica that lacks it. Replicas that fail are
    /// logged and skipped; the error is returned after the others are done.
    async fn fill_missing_replicas(&self, key: &str, value: &str) -> Result<usize> {
        let mut written = 0;
        let mut last_error = None;
        for replica in self.replica_set(key).await? {
            match self.fill_replica(&replica, key, value).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{}: {} not filled on {}: {}", self.info(), key, replica, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if written == 0 => Err(e),
            _ => Ok(written),
        }
    }

    async fn fill_replica(&self, replica: &PeerInfo, key: &str, value: &str) -> Result<bool> {
        let handle = self.peer(replica)?;
        if handle.get_local(key.to_string()).await?.is_some() {
            return Ok(false);
        }
        handle.put_local(key.to_string(), value.to_string()).await?;
        Ok(true)
    }
}
