//! Helpers for multi-node overlay scenarios.
//!
//! Every node listens on an ephemeral loopback port. Event waits are bounded
//! so a broken scenario fails instead of hanging.

use std::net::SocketAddr;
use std::time::Duration;

use flotilla_node::{Disconnect, EventKind, Node, NodeConfig, NodeEvent, Subscription};
use tokio::time::timeout;

/// How long to wait for an event that should arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to watch for an event that should not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// A listening node plus its bound address.
pub struct TestNode {
    pub node: Node,
    pub addr: SocketAddr,
}

impl TestNode {
    pub fn id(&self) -> &flotilla_node::NodeId {
        self.node.id()
    }
}

/// Spawn a node without persistence listening on 127.0.0.1.
pub async fn spawn_node() -> TestNode {
    spawn_node_with(NodeConfig::local()).await
}

pub async fn spawn_node_with(config: NodeConfig) -> TestNode {
    let node = Node::spawn(config).expect("spawn node");
    let addr = node.listen("127.0.0.1:0").await.expect("listen");
    TestNode { node, addr }
}

/// Connect `from` to `to` and wait until both sides have bound each other.
pub async fn connect_and_wait(from: &TestNode, to: &TestNode) -> Disconnect {
    let mut from_events = from.node.on(&[EventKind::Connect]);
    let mut to_events = to.node.on(&[EventKind::Connect]);

    let link = from.node.connect(to.addr).await.expect("connect");

    wait_for(&mut from_events, |e| {
        matches!(e, NodeEvent::Connected { node_id } if node_id == to.id())
    })
    .await;
    wait_for(&mut to_events, |e| {
        matches!(e, NodeEvent::Connected { node_id } if node_id == from.id())
    })
    .await;
    link
}

/// Next event on `sub`, failing the test after [`EVENT_TIMEOUT`].
pub async fn expect_event(sub: &mut Subscription) -> NodeEvent {
    timeout(EVENT_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skip events until one satisfies `pred`.
pub async fn wait_for(sub: &mut Subscription, pred: impl Fn(&NodeEvent) -> bool) -> NodeEvent {
    loop {
        let event = expect_event(sub).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Fail if `sub` yields anything during [`QUIET_PERIOD`].
pub async fn assert_no_event(sub: &mut Subscription) {
    if let Ok(Some(event)) = timeout(QUIET_PERIOD, sub.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
