//! JSON-over-HTTP transport
//!
//! Every peer call is a `POST /rpc` carrying a tagged [`RingRequest`] and
//! answered with a [`RingResponse`] or an `{"error": ...}` body whose status
//! comes from [`Error::to_http_status`].
//!
//! Only failures to reach the peer at all become
//! [`Error::CommunicationFailure`]. An answer the client cannot decode is a
//! protocol inconsistency, not a dead peer.

use super::{Connector, LocalStorage, MembershipTable, PeerHandle, PeerInfo, RingPeer};
use crate::common::{Error, NodeId, Result};
use crate::node::Node;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RingRequest {
    Name,
    HashedId,
    Successor,
    Predecessor,
    SetSuccessor { peer: PeerInfo },
    SetPredecessor { peer: PeerInfo },
    MembershipTable,
    BuildMembershipTable { nodes: Vec<PeerInfo> },
    UpdateMembershipTable,
    RemoveMembership { id: NodeId },
    RecoverStatus,
    SetRecoverStatus { recovering: bool },
    PutLocal { key: String, value: String },
    GetLocal { key: String },
    RemoveLocal { key: String },
    LocalStorage,
    FindNodeByHashedId { id: NodeId },
    Rebalance,
    SetupHeartbeat { peer: NodeId },
    RemoveHeartbeat { peer: NodeId },
    Put { key: String, value: String },
    Get { key: String },
    FindOwners { key: String },
    Leave,
}

impl RingRequest {
    /// Calls that may walk the ring or wait on recovery flags. These run
    /// without the per-call timeout.
    fn is_long_running(&self) -> bool {
        matches!(
            self,
            RingRequest::UpdateMembershipTable
                | RingRequest::Rebalance
                | RingRequest::Put { .. }
                | RingRequest::Get { .. }
                | RingRequest::FindOwners { .. }
                | RingRequest::Leave
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RingResponse {
    Unit,
    Name(String),
    Id(NodeId),
    Peer(PeerInfo),
    Peers(Vec<PeerInfo>),
    Membership(MembershipTable),
    Flag(bool),
    Value(Option<String>),
    Storage(LocalStorage),
}

impl RingResponse {
    fn mismatch(self, expected: &str) -> Error {
        Error::ProtocolInconsistency(format!("expected {} reply, got {:?}", expected, self))
    }

    fn into_unit(self) -> Result<()> {
        match self {
            RingResponse::Unit => Ok(()),
            other => Err(other.mismatch("unit")),
        }
    }

    fn into_name(self) -> Result<String> {
        match self {
            RingResponse::Name(name) => Ok(name),
            other => Err(other.mismatch("name")),
        }
    }

    fn into_id(self) -> Result<NodeId> {
        match self {
            RingResponse::Id(id) => Ok(id),
            other => Err(other.mismatch("id")),
        }
    }

    fn into_peer(self) -> Result<PeerInfo> {
        match self {
            RingResponse::Peer(peer) => Ok(peer),
            other => Err(other.mismatch("peer")),
        }
    }

    fn into_peers(self) -> Result<Vec<PeerInfo>> {
        match self {
            RingResponse::Peers(peers) => Ok(peers),
            other => Err(other.mismatch("peers")),
        }
    }

    fn into_membership(self) -> Result<MembershipTable> {
        match self {
            RingResponse::Membership(table) => Ok(table),
            other => Err(other.mismatch("membership")),
        }
    }

    fn into_flag(self) -> Result<bool> {
        match self {
            RingResponse::Flag(flag) => Ok(flag),
            other => Err(other.mismatch("flag")),
        }
    }

    fn into_value(self) -> Result<Option<String>> {
        match self {
            RingResponse::Value(value) => Ok(value),
            other => Err(other.mismatch("value")),
        }
    }

    fn into_storage(self) -> Result<LocalStorage> {
        match self {
            RingResponse::Storage(storage) => Ok(storage),
            other => Err(other.mismatch("storage")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Run one request against a local peer.
pub async fn dispatch(peer: &dyn RingPeer, request: RingRequest) -> Result<RingResponse> {
    use RingRequest as Req;
    use RingResponse as Resp;

    Ok(match request {
        Req::Name => Resp::Name(peer.name().await?),
        Req::HashedId => Resp::Id(peer.hashed_id().await?),
        Req::Successor => Resp::Peer(peer.successor().await?),
        Req::Predecessor => Resp::Peer(peer.predecessor().await?),
        Req::SetSuccessor { peer: next } => {
            peer.set_successor(next).await?;
            Resp::Unit
        }
        Req::SetPredecessor { peer: prev } => {
            peer.set_predecessor(prev).await?;
            Resp::Unit
        }
        Req::MembershipTable => Resp::Membership(peer.membership_table().await?),
        Req::BuildMembershipTable { nodes } => {
            peer.build_membership_table(nodes).await?;
            Resp::Unit
        }
        Req::UpdateMembershipTable => {
            peer.update_membership_table().await?;
            Resp::Unit
        }
        Req::RemoveMembership { id } => {
            peer.remove_membership(id).await?;
            Resp::Unit
        }
        Req::RecoverStatus => Resp::Flag(peer.recover_status().await?),
        Req::SetRecoverStatus { recovering } => {
            peer.set_recover_status(recovering).await?;
            Resp::Unit
        }
        Req::PutLocal { key, value } => {
            peer.put_local(key, value).await?;
            Resp::Unit
        }
        Req::GetLocal { key } => Resp::Value(peer.get_local(key).await?),
        Req::RemoveLocal { key } => {
            peer.remove_local(key).await?;
            Resp::Unit
        }
        Req::LocalStorage => Resp::Storage(peer.local_storage().await?),
        Req::FindNodeByHashedId { id } => Resp::Peer(peer.find_node_by_hashed_id(id).await?),
        Req::Rebalance => {
            peer.rebalance().await?;
            Resp::Unit
        }
        Req::SetupHeartbeat { peer: id } => {
            peer.setup_heartbeat(id).await?;
            Resp::Unit
        }
        Req::RemoveHeartbeat { peer: id } => {
            peer.remove_heartbeat(id).await?;
            Resp::Unit
        }
        Req::Put { key, value } => {
            peer.put(key, value).await?;
            Resp::Unit
        }
        Req::Get { key } => Resp::Value(peer.get(key).await?),
        Req::FindOwners { key } => Resp::Peers(peer.find_owners(key).await?),
        Req::Leave => {
            peer.leave().await?;
            Resp::Unit
        }
    })
}

/// Peer RPC router
pub fn create_router(node: Node) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serve peer calls for `node` until the listener fails.
pub async fn serve(listener: TcpListener, node: Node) -> Result<()> {
    tracing::info!("{}: peer RPC listening on {}", node.info(), listener.local_addr()?);
    axum::serve(listener, create_router(node)).await?;
    Ok(())
}

async fn rpc(State(node): State<Node>, Json(request): Json<RingRequest>) -> Response {
    match dispatch(&node, request).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            tracing::debug!("{}: RPC failed: {}", node.info(), e);
            let body = ErrorBody {
                error: e.to_string(),
            };
            (e.to_http_status(), Json(body)).into_response()
        }
    }
}

async fn health(State(node): State<Node>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "name": node.info().name,
            "id": node.id(),
            "phase": node.phase(),
            "recovering": node.is_recovering(),
            "members": node.membership().len(),
        })),
    )
}

/// Resolves peers to HTTP clients sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, peer: &PeerInfo) -> Result<PeerHandle> {
        Ok(Arc::new(HttpPeer {
            client: self.client.clone(),
            url: format!("http://{}/rpc", peer.addr),
            name: peer.name.clone(),
            timeout: self.timeout,
        }))
    }
}

pub struct HttpPeer {
    client: reqwest::Client,
    url: String,
    name: String,
    timeout: Duration,
}

impl HttpPeer {
    async fn call(&self, request: RingRequest) -> Result<RingResponse> {
        let mut builder = self.client.post(&self.url).json(&request);
        if !request.is_long_running() {
            builder = builder.timeout(self.timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::communication(&self.name, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::communication(&self.name, e))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|body| body.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(Error::from_remote(
                status,
                format!("{}: {}", self.name, message),
            ));
        }

        serde_json::from_slice(&body).map_err(|e| {
            Error::ProtocolInconsistency(format!("{}: undecodable reply: {}", self.name, e))
        })
    }
}

#[async_trait]
impl RingPeer for HttpPeer {
    async fn name(&self) -> Result<String> {
        self.call(RingRequest::Name).await?.into_name()
    }

    async fn hashed_id(&self) -> Result<NodeId> {
        self.call(RingRequest::HashedId).await?.into_id()
    }

    async fn successor(&self) -> Result<PeerInfo> {
        self.call(RingRequest::Successor).await?.into_peer()
    }

    async fn predecessor(&self) -> Result<PeerInfo> {
        self.call(RingRequest::Predecessor).await?.into_peer()
    }

    async fn set_successor(&self, successor: PeerInfo) -> Result<()> {
        self.call(RingRequest::SetSuccessor { peer: successor })
            .await?
            .into_unit()
    }

    async fn set_predecessor(&self, predecessor: PeerInfo) -> Result<()> {
        self.call(RingRequest::SetPredecessor { peer: predecessor })
            .await?
            .into_unit()
    }

    async fn membership_table(&self) -> Result<MembershipTable> {
        self.call(RingRequest::MembershipTable)
            .await?
            .into_membership()
    }

    async fn build_membership_table(&self, nodes: Vec<PeerInfo>) -> Result<()> {
        self.call(RingRequest::BuildMembershipTable { nodes })
            .await?
            .into_unit()
    }

    async fn update_membership_table(&self) -> Result<()> {
        self.call(RingRequest::UpdateMembershipTable)
            .await?
            .into_unit()
    }

    async fn remove_membership(&self, id: NodeId) -> Result<()> {
        self.call(RingRequest::RemoveMembership { id })
            .await?
            .into_unit()
    }

    async fn recover_status(&self) -> Result<bool> {
        self.call(RingRequest::RecoverStatus).await?.into_flag()
    }

    async fn set_recover_status(&self, recovering: bool) -> Result<()> {
        self.call(RingRequest::SetRecoverStatus { recovering })
            .await?
            .into_unit()
    }

    async fn put_local(&self, key: String, value: String) -> Result<()> {
        self.call(RingRequest::PutLocal { key, value })
            .await?
            .into_unit()
    }

    async fn get_local(&self, key: String) -> Result<Option<String>> {
        self.call(RingRequest::GetLocal { key }).await?.into_value()
    }

    async fn remove_local(&self, key: String) -> Result<()> {
        self.call(RingRequest::RemoveLocal { key }).await?.into_unit()
    }

    async fn local_storage(&self) -> Result<LocalStorage> {
        self.call(RingRequest::LocalStorage).await?.into_storage()
    }

    async fn find_node_by_hashed_id(&self, id: NodeId) -> Result<PeerInfo> {
        self.call(RingRequest::FindNodeByHashedId { id })
            .await?
            .into_peer()
    }

    async fn rebalance(&self) -> Result<()> {
        self.call(RingRequest::Rebalance).await?.into_unit()
    }

    async fn setup_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.call(RingRequest::SetupHeartbeat { peer })
            .await?
            .into_unit()
    }

    async fn remove_heartbeat(&self, peer: NodeId) -> Result<()> {
        self.call(RingRequest::RemoveHeartbeat { peer })
            .await?
            .into_unit()
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        self.call(RingRequest::Put { key, value }).await?.into_unit()
    }

    async fn get(&self, key: String) -> Result<Option<String>> {
        self.call(RingRequest::Get { key }).await?.into_value()
    }

    async fn find_owners(&self, key: String) -> Result<Vec<PeerInfo>> {
        self.call(RingRequest::FindOwners { key }).await?.into_peers()
    }

    async fn leave(&self) -> Result<()> {
        self.call(RingRequest::Leave).await?.into_unit()
    }
}
