//! Events raised to library consumers.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use flotilla_protocol::{NodeId, Packet};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Error;

/// Something that happened on the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A connection completed its handshake.
    Connected { node_id: NodeId },
    /// A neighbor's connection went away.
    Disconnected { node_id: NodeId },
    /// Any routed packet from a bound neighbor, before routing.
    Message { from: NodeId, packet: Packet },
    /// A broadcast reached this node.
    Broadcast { message: Value, origin: NodeId },
    /// A direct packet addressed to this node arrived.
    Direct { message: Value, origin: NodeId },
    /// Transport failure. `node_id` is unset when the connection never
    /// completed a handshake (or never connected at all).
    ConnectionError {
        node_id: Option<NodeId>,
        addr: Option<SocketAddr>,
        error: String,
    },
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connect,
            Self::Disconnected { .. } => EventKind::Disconnect,
            Self::Message { .. } => EventKind::Message,
            Self::Broadcast { .. } => EventKind::Broadcast,
            Self::Direct { .. } => EventKind::Direct,
            Self::ConnectionError { .. } => EventKind::ConnectionError,
        }
    }
}

/// Event names consumers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Message,
    Broadcast,
    Direct,
    ConnectionError,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Connect,
        Self::Disconnect,
        Self::Message,
        Self::Broadcast,
        Self::Direct,
        Self::ConnectionError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::Direct => "direct",
            Self::ConnectionError => "connection-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown event name: {s}")))
    }
}

/// Fan-out of node events to every live subscription.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, kinds: Option<HashSet<EventKind>>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds,
        }
    }
}

/// A live event subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<NodeEvent>,
    kinds: Option<HashSet<EventKind>>,
}

impl Subscription {
    /// Next matching event, or `None` once the node is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn accepts(&self, event: &NodeEvent) -> bool {
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&event.kind()))
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_kinds() {
        let bus = EventBus::new(16);
        let mut direct_only = bus.subscribe(Some([EventKind::Direct].into_iter().collect()));
        let mut everything = bus.subscribe(None);

        bus.emit(NodeEvent::Connected { node_id: NodeId::from("a") });
        bus.emit(NodeEvent::Direct { message: Value::from("hi"), origin: NodeId::from("a") });

        assert_eq!(everything.recv().await.unwrap().kind(), EventKind::Connect);
        assert_eq!(everything.recv().await.unwrap().kind(), EventKind::Direct);
        assert_eq!(direct_only.recv().await.unwrap().kind(), EventKind::Direct);
        assert!(direct_only.try_recv().is_none());
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe(None);
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(None);
        for i in 0..5 {
            bus.emit(NodeEvent::Disconnected { node_id: NodeId::new(i.to_string()) });
        }

        assert_eq!(
            sub.recv().await,
            Some(NodeEvent::Disconnected { node_id: NodeId::from("3") })
        );
    }
}
