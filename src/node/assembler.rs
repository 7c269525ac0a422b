//! Joining and leaving the ring

use crate::common::{hash_key, BootstrapEntry, Error, Result};
use crate::node::state::{bracket, leader, membership_of, NodePhase};
use crate::node::Node;
use crate::transport::{PeerInfo, RingPeer};

impl Node {
    /// Join using the bootstrap address list.
    pub async fn join(&self, entries: &[BootstrapEntry]) -> Result<()> {
        let config = self.config();
        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.name(&config.name_prefix);
            let id = hash_key(&name, config.space());
            candidates.push(PeerInfo::new(name, id, entry.address(config.base_port)?));
        }
        self.join_peers(candidates).await
    }

    /// Splice into the ring formed by whichever `candidates` answer.
    ///
    /// With no reachable candidate the node stays a singleton ring. The node
    /// ends up `Active` whether or not the join succeeds; a failure before
    /// the splice leaves it a working singleton.
    pub async fn join_peers(&self, candidates: Vec<PeerInfo>) -> Result<()> {
        self.set_phase(NodePhase::Joining);
        let joined = self.try_join(candidates).await;
        if let Err(e) = &joined {
            tracing::error!("{}: join failed: {}", self.info(), e);
        }
        self.set_phase(NodePhase::Active);
        joined
    }

    async fn try_join(&self, candidates: Vec<PeerInfo>) -> Result<()> {
        let mut reachable = Vec::new();
        for candidate in candidates {
            if candidate.name == self.info().name {
                continue;
            }
            let probed = match self.peer(&candidate) {
                Ok(handle) => handle.hashed_id().await,
                Err(e) => Err(e),
            };
            match probed {
                Ok(id) => reachable.push(PeerInfo { id, ..candidate }),
                Err(e) => tracing::debug!("{}: {} unreachable: {}", self.info(), candidate, e),
            }
        }

        if reachable.is_empty() {
            tracing::info!("{}: no reachable peers, starting a new ring", self.info());
            self.record().reset_to_singleton();
            return Ok(());
        }

        self.wait_for_recovery(&reachable).await;

        let known = membership_of(reachable);
        let (pred, succ) = bracket(&known, self.id()).ok_or_else(|| {
            Error::ProtocolInconsistency(format!("{}: no splice point found", self.info()))
        })?;

        if let Err(e) = self.splice_in(&pred, &succ).await {
            self.record().reset_to_singleton();
            return Err(e);
        }
        tracing::info!("{}: joined between {} and {}", self.info(), pred, succ);

        let nodes = self.all_nodes().await?;
        self.record().membership = membership_of(nodes.clone());
        for node in nodes.iter().filter(|node| node.name != self.info().name) {
            let pushed = match self.peer(node) {
                Ok(handle) => handle.build_membership_table(nodes.clone()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = pushed {
                tracing::warn!("{}: membership push to {} failed: {}", self.info(), node, e);
            }
        }

        for node in nodes.iter().filter(|node| node.name != self.info().name) {
            if let Err(e) = self.start_heartbeat(node.id) {
                tracing::warn!("{}: cannot monitor {}: {}", self.info(), node, e);
            }
            let registered = match self.peer(node) {
                Ok(handle) => handle.setup_heartbeat(self.id()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = registered {
                tracing::warn!("{}: {} cannot monitor us: {}", self.info(), node, e);
            }
        }

        self.set_phase(NodePhase::Active);
        let leader = leader(&membership_of(nodes)).cloned().ok_or_else(|| {
            Error::ProtocolInconsistency(format!("{}: ring has no leader", self.info()))
        })?;
        if let Err(e) = self.peer(&leader)?.rebalance().await {
            tracing::error!("{}: rebalance on leader {} failed: {}", self.info(), leader, e);
        }
        Ok(())
    }

    /// Point `pred` and `succ` at this node, then this node at them.
    ///
    /// If `succ` cannot be updated, `pred` gets its old successor back so
    /// the ring is left as it was.
    async fn splice_in(&self, pred: &PeerInfo, succ: &PeerInfo) -> Result<()> {
        let me = self.info().clone();
        let pred_handle = self.peer(pred)?;
        let succ_handle = self.peer(succ)?;
        let previous = pred_handle.successor().await?;

        pred_handle.set_successor(me.clone()).await?;
        if let Err(e) = succ_handle.set_predecessor(me).await {
            if let Err(undo) = pred_handle.set_successor(previous).await {
                tracing::warn!("{}: cannot restore successor of {}: {}", self.info(), pred, undo);
            }
            return Err(e);
        }

        let mut record = self.record();
        record.successor = succ.clone();
        record.predecessor = pred.clone();
        Ok(())
    }

    /// Every node reached by following successors from this one, starting
    /// with this node.
    pub async fn all_nodes(&self) -> Result<Vec<PeerInfo>> {
        let max_hops = self.config().max_ring_hops();
        let mut nodes = vec![self.info().clone()];
        let mut current = self.record().successor.clone();

        while current.name != self.info().name {
            if nodes.len() >= max_hops {
                return Err(Error::ProtocolInconsistency(format!(
                    "{}: successor walk did not return after {} hops",
                    self.info(),
                    max_hops
                )));
            }
            let next = self.peer(&current)?.successor().await?;
            nodes.push(current);
            current = next;
        }
        Ok(nodes)
    }

    /// Hand off local keys, splice out of the ring, and tell the remaining
    /// members to forget this node.
    pub async fn leave(&self) -> Result<()> {
        self.set_phase(NodePhase::Leaving);
        let (pred, succ) = self.neighbors();

        if succ.name == self.info().name {
            tracing::info!("{}: leaving a single-node ring", self.info());
            self.shutdown();
            let mut record = self.record();
            record.reset_to_singleton();
            record.storage.clear();
            return Ok(());
        }

        self.hand_off_storage(&pred, &succ).await?;

        let remaining: Vec<PeerInfo> = self
            .all_nodes()
            .await?
            .into_iter()
            .filter(|node| node.name != self.info().name)
            .collect();

        self.peer(&succ)?.set_predecessor(pred.clone()).await?;
        self.peer(&pred)?.set_successor(succ.clone()).await?;
        self.shutdown();
        {
            let mut record = self.record();
            record.reset_to_singleton();
            record.storage.clear();
        }

        for node in &remaining {
            let handle = match self.peer(node) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!("{}: cannot reach {} on leave: {}", self.info(), node, e);
                    continue;
                }
            };
            if let Err(e) = handle.build_membership_table(remaining.clone()).await {
                tracing::warn!("{}: membership rebuild on {} failed: {}", self.info(), node, e);
            }
            if let Err(e) = handle.remove_heartbeat(self.id()).await {
                tracing::warn!("{}: heartbeat removal on {} failed: {}", self.info(), node, e);
            }
        }

        tracing::info!("{}: left the ring ({} members remain)", self.info(), remaining.len());
        Ok(())
    }

    /// Move each local key so that it still has three replicas once this
    /// node is gone.
    ///
    /// Both successor and the one after hold it: this node was the key's
    /// predecessor, so the predecessor takes its place. Only the successor
    /// holds it: the next node fills the gap. Otherwise the successor takes it.
    async fn hand_off_storage(&self, pred: &PeerInfo, succ: &PeerInfo) -> Result<()> {
        let storage = self.storage_snapshot();
        let pred_handle = self.peer(pred)?;
        let succ_handle = self.peer(succ)?;
        let next = succ_handle.successor().await?;
        let next_handle = self.peer(&next)?;

        for (key, value) in storage {
            let on_succ = succ_handle.get_local(key.clone()).await?.is_some();
            let on_next = next_handle.get_local(key.clone()).await?.is_some();
            let target = match (on_succ, on_next) {
                (true, true) => &pred_handle,
                (true, false) => &next_handle,
                _ => &succ_handle,
            };
            if let Err(e) = target.put_local(key.clone(), value).await {
                tracing::warn!("{}: hand-off of {} failed: {}", self.info(), key, e);
            }
        }
        Ok(())
    }
}
