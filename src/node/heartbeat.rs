//! Failure detection and ring repair
//!
//! Each monitored peer gets its own task probing `hashed_id` on a fixed
//! period. A probe that cannot reach the peer is the only failure signal.
//! On failure the detecting node:
//!
//! 1. drops this peer's monitor
//! 2. raises its recovery flag (concurrent joins and puts wait on it)
//! 3. removes the peer from its membership table
//! 4. waits for in-flight membership changes to settle
//! 5. re-links the failed peer's predecessor and successor
//! 6. restores replication (leader rebalance, or local reconcile)
//! 7. clears its recovery flag
//!
//! Monitors are independent tasks: one peer's repair never blocks another
//! peer's probes or the command path.

use crate::common::{Error, NodeId, RepairStrategy, Result};
use crate::node::state::bracket;
use crate::node::Node;
use crate::transport::{PeerHandle, PeerInfo, RingPeer};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub(crate) struct HeartbeatMonitor {
    peer: PeerInfo,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    fn stop(self) {
        let _ = self.shutdown.send(true);
    }

    fn abort(self) {
        self.task.abort();
    }
}

impl Node {
    /// Start probing `peer_id`. A no-op if a monitor already exists.
    pub fn start_heartbeat(&self, peer_id: NodeId) -> Result<()> {
        if peer_id == self.id() || self.monitors().contains_key(&peer_id) {
            return Ok(());
        }

        let peer = self
            .record()
            .membership
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| {
                Error::ProtocolInconsistency(format!(
                    "{}: cannot monitor {}, not a member",
                    self.info(),
                    peer_id
                ))
            })?;
        let handle = self.peer(&peer)?;

        let mut monitors = self.monitors();
        if monitors.contains_key(&peer_id) {
            return Ok(());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let node = self.clone();
        let probed = peer.clone();
        let task = tokio::spawn(async move {
            node.run_heartbeat(probed, handle, shutdown_rx).await;
        });

        tracing::debug!("{}: heartbeat started for {}", self.info(), peer);
        monitors.insert(
            peer_id,
            HeartbeatMonitor {
                peer,
                shutdown,
                task,
            },
        );
        Ok(())
    }

    /// Stop probing `peer_id`. Returns whether a monitor existed.
    pub fn stop_heartbeat(&self, peer_id: NodeId) -> bool {
        let monitor = self.monitors().remove(&peer_id);
        match monitor {
            Some(monitor) => {
                tracing::debug!("{}: heartbeat removed for {}", self.info(), monitor.peer);
                monitor.stop();
                true
            }
            None => false,
        }
    }

    /// Peers currently monitored, ordered by id.
    pub fn heartbeat_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .monitors()
            .values()
            .map(|monitor| monitor.peer.clone())
            .collect();
        peers.sort_by_key(|peer| peer.id);
        peers
    }

    /// Abort every monitor. Repairs already running are not interrupted.
    pub fn shutdown(&self) {
        let monitors: Vec<HeartbeatMonitor> =
            self.monitors().drain().map(|(_, monitor)| monitor).collect();
        if !monitors.is_empty() {
            tracing::info!("{}: stopping {} heartbeats", self.info(), monitors.len());
        }
        for monitor in monitors {
            monitor.abort();
        }
    }

    async fn run_heartbeat(
        self,
        peer: PeerInfo,
        handle: PeerHandle,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config().heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match handle.hashed_id().await {
                        Ok(_) => {}
                        Err(e) if e.is_communication_failure() => {
                            tracing::warn!("{}: {} failed: {}", self.info(), peer, e);
                            break;
                        }
                        Err(e) => {
                            tracing::debug!("{}: probe of {} errored: {}", self.info(), peer, e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    return;
                }
            }
        }

        self.handle_peer_failure(&peer).await;
    }

    /// Repair the ring after `failed` stopped answering.
    pub async fn handle_peer_failure(&self, failed: &PeerInfo) {
        // Detach only: the running task is the one doing this repair.
        self.monitors().remove(&failed.id);

        self.record().recovering = true;
        self.record().membership.remove(&failed.id);

        tokio::time::sleep(self.config().recovery_delay()).await;

        match self.repair_ring(failed).await {
            Ok((pred, succ)) => {
                tracing::info!(
                    "{}: ring repaired around {}: {} -> {}",
                    self.info(),
                    failed,
                    pred,
                    succ
                );
            }
            Err(e) => tracing::error!("{}: ring repair for {} failed: {}", self.info(), failed, e),
        }

        self.restore_replication().await;

        self.record().recovering = false;
    }

    /// Link the members on either side of `failed` directly to each other.
    pub async fn repair_ring(&self, failed: &PeerInfo) -> Result<(PeerInfo, PeerInfo)> {
        let (pred, succ) = {
            let record = self.record();
            bracket(&record.membership, failed.id).ok_or_else(|| {
                Error::ProtocolInconsistency(format!(
                    "{}: membership table is empty, cannot repair around {}",
                    self.info(),
                    failed
                ))
            })?
        };

        self.peer(&pred)?.set_successor(succ.clone()).await?;
        self.peer(&succ)?.set_predecessor(pred.clone()).await?;
        Ok((pred, succ))
    }

    async fn restore_replication(&self) {
        match self.config().repair_strategy {
            RepairStrategy::Rebalance => {
                if !self.is_leader() {
                    return;
                }
                if let Err(e) = self.rebalance_cluster().await {
                    tracing::error!("{}: rebalance after repair failed: {}", self.info(), e);
                }
            }
            RepairStrategy::Reconcile => {
                let report = self.reconcile_local().await;
                if !report.converged {
                    tracing::warn!(
                        "{}: reconcile did not settle after {} passes",
                        self.info(),
                        report.passes
                    );
                }
            }
        }
    }
}
