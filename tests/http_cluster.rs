//! Three nodes talking JSON/HTTP over loopback

use ringkv::common::Config;
use ringkv::transport::http::{serve, HttpConnector};
use ringkv::transport::{Connector, RingPeer};
use ringkv::{Node, PeerInfo};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn start_node(name: &str, id: u64) -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config::test_config();
    let connector = HttpConnector::new(config.rpc_timeout()).unwrap();
    let node = Node::new(
        PeerInfo::new(name, id, addr.to_string()),
        config,
        Arc::new(connector),
    );
    tokio::spawn(serve(listener, node.clone()));
    node
}

#[tokio::test]
async fn test_ring_over_http() {
    let a = start_node("vm-1", 10).await;
    let b = start_node("vm-2", 50).await;
    let c = start_node("vm-3", 90).await;

    a.join_peers(vec![]).await.unwrap();
    b.join_peers(vec![a.info().clone()]).await.unwrap();
    // the advertised id is replaced by the probed one
    let mut stale = a.info().clone();
    stale.id = 0;
    c.join_peers(vec![stale, b.info().clone()]).await.unwrap();

    let ring: Vec<_> = a.all_nodes().await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ring, vec![10, 50, 90]);

    a.put("alpha", "1").await.unwrap();
    assert_eq!(c.get("alpha").await.unwrap().as_deref(), Some("1"));
    assert_eq!(b.find_owners("alpha").await.unwrap().len(), 3);

    // client-facing calls also travel over the wire
    let remote = HttpConnector::new(Config::test_config().rpc_timeout())
        .unwrap()
        .connect(c.info())
        .unwrap();
    remote.put("beta".into(), "2".into()).await.unwrap();
    assert_eq!(a.get("beta").await.unwrap().as_deref(), Some("2"));
    assert_eq!(remote.membership_table().await.unwrap().len(), 3);

    b.leave().await.unwrap();
    let ring: Vec<_> = a.all_nodes().await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ring, vec![10, 90]);
    assert_eq!(c.get("alpha").await.unwrap().as_deref(), Some("1"));
    assert_eq!(a.get("beta").await.unwrap().as_deref(), Some("2"));

    a.shutdown();
    c.shutdown();
}
