//! Flood router.
//!
//! Broadcast and direct packets are both flooded to every neighbor. Each node
//! processes a packet id at most once (the [`SeenSet`]) and every hop spends
//! one unit of ttl, so propagation terminates on any topology.
//!
//! The router is sans-IO: [`Router::receive`] returns a [`Decision`] telling
//! the caller what to deliver locally and which copy to flood onward.

use serde_json::Value;
use tracing::{debug, trace};

use crate::identity::{NodeId, PacketId};
use crate::seen::{SeenPolicy, SeenSet};
use crate::wire::{Packet, PacketKind, DEFAULT_TTL};

/// Optional arguments when originating a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Defaults to a fresh random id.
    pub id: Option<PacketId>,
    /// Defaults to the local identity.
    pub origin: Option<NodeId>,
    /// Defaults to the router's default ttl.
    pub ttl: Option<u32>,
}

impl SendOptions {
    #[must_use]
    pub fn with_id(mut self, id: PacketId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: NodeId) -> Self {
        self.origin = Some(origin);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Application payload that reached this node.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Broadcast { message: Value, origin: NodeId },
    Direct { message: Value, origin: NodeId },
}

/// Why a received packet was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The id was already processed here.
    Duplicate,
    /// The packet arrived with no hops left.
    Expired,
}

/// What to do with a received packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Dropped(DropReason),
    Accepted {
        delivery: Option<Delivery>,
        forward: Option<Packet>,
    },
}

#[derive(Debug)]
pub struct Router {
    local: NodeId,
    seen: SeenSet,
    default_ttl: u32,
}

impl Router {
    pub fn new(local: NodeId, policy: SeenPolicy) -> Self {
        Self {
            local,
            seen: SeenSet::new(policy),
            default_ttl: DEFAULT_TTL,
        }
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn has_seen(&self, id: &PacketId) -> bool {
        self.seen.contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Build a broadcast packet to flood to all neighbors.
    ///
    /// The id is marked seen here so an echo from a neighbor is dropped.
    pub fn broadcast(&mut self, message: Value, options: SendOptions) -> Packet {
        self.originate(PacketKind::Broadcast, message, options)
    }

    /// Build a direct packet for `destination`, flooded like a broadcast.
    pub fn direct(&mut self, destination: NodeId, message: Value, options: SendOptions) -> Packet {
        self.originate(PacketKind::Direct { destination }, message, options)
    }

    fn originate(&mut self, kind: PacketKind, message: Value, options: SendOptions) -> Packet {
        let packet = Packet {
            id: options.id.unwrap_or_else(PacketId::random),
            ttl: options.ttl.unwrap_or(self.default_ttl),
            kind,
            message,
            origin: options.origin.unwrap_or_else(|| self.local.clone()),
        };
        self.seen.insert(packet.id.clone());
        trace!(id = %packet.id, ttl = packet.ttl, "Originated packet");
        packet
    }

    /// Process a packet that arrived from neighbor `from`.
    pub fn receive(&mut self, from: &NodeId, packet: Packet) -> Decision {
        if self.seen.contains(&packet.id) {
            trace!(id = %packet.id, from = %from, "Dropping duplicate packet");
            return Decision::Dropped(DropReason::Duplicate);
        }
        if packet.ttl < 1 {
            trace!(id = %packet.id, from = %from, "Dropping expired packet");
            return Decision::Dropped(DropReason::Expired);
        }

        // Mark before any side effect so re-entrant floods see it.
        self.seen.insert(packet.id.clone());

        match &packet.kind {
            PacketKind::Broadcast => {
                debug!(id = %packet.id, origin = %packet.origin, ttl = packet.ttl, "Broadcast received");
                Decision::Accepted {
                    delivery: Some(Delivery::Broadcast {
                        message: packet.message.clone(),
                        origin: packet.origin.clone(),
                    }),
                    forward: Some(packet.forwarded()),
                }
            }
            PacketKind::Direct { destination } if *destination == self.local => {
                debug!(id = %packet.id, origin = %packet.origin, "Direct packet delivered");
                Decision::Accepted {
                    delivery: Some(Delivery::Direct {
                        message: packet.message,
                        origin: packet.origin,
                    }),
                    forward: None,
                }
            }
            PacketKind::Direct { destination } => {
                trace!(id = %packet.id, destination = %destination, "Forwarding direct packet");
                Decision::Accepted {
                    delivery: None,
                    forward: Some(packet.forwarded()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn router(id: &str) -> Router {
        Router::new(NodeId::from(id), SeenPolicy::Unbounded)
    }

    #[test]
    fn originate_applies_defaults() {
        let mut r = router("me");
        let packet = r.broadcast(json!("hi"), SendOptions::default());

        assert_eq!(packet.ttl, DEFAULT_TTL);
        assert_eq!(packet.origin, NodeId::from("me"));
        assert!(packet.is_broadcast());
        assert!(r.has_seen(&packet.id));
    }

    #[test]
    fn originate_honors_options() {
        let mut r = router("me").with_default_ttl(9);
        let packet = r.direct(
            NodeId::from("you"),
            json!(null),
            SendOptions::default()
                .with_id(PacketId::from("fixed"))
                .with_origin(NodeId::from("relay")),
        );

        assert_eq!(packet.id, PacketId::from("fixed"));
        assert_eq!(packet.origin, NodeId::from("relay"));
        assert_eq!(packet.ttl, 9);
        assert_eq!(packet.destination(), Some(&NodeId::from("you")));
    }

    #[test]
    fn broadcast_is_delivered_and_reflooded_once() {
        let mut r = router("b");
        let packet = Packet::broadcast(json!("x"), NodeId::from("a")).with_ttl(5);

        let Decision::Accepted { delivery, forward } = r.receive(&NodeId::from("a"), packet.clone()) else {
            panic!("first receipt must be accepted");
        };
        assert_eq!(
            delivery,
            Some(Delivery::Broadcast { message: json!("x"), origin: NodeId::from("a") })
        );
        let forward = forward.unwrap();
        assert_eq!(forward.ttl, 4);
        assert_eq!(forward.id, packet.id);
        assert_eq!(forward.origin, packet.origin);

        // Same id through another neighbor is a duplicate.
        assert_eq!(
            r.receive(&NodeId::from("c"), packet),
            Decision::Dropped(DropReason::Duplicate)
        );
        assert_eq!(r.seen_count(), 1);
    }

    #[test]
    fn expired_seen_entry_no_longer_blocks() {
        let policy = SeenPolicy::Bounded { capacity: None, ttl: Some(Duration::ZERO) };
        let mut r = Router::new(NodeId::from("b"), policy);
        let packet = Packet::broadcast(json!("again"), NodeId::from("a"));

        assert!(matches!(
            r.receive(&NodeId::from("a"), packet.clone()),
            Decision::Accepted { .. }
        ));
        // Nothing else was inserted in between; the entry is already stale.
        assert!(matches!(
            r.receive(&NodeId::from("a"), packet),
            Decision::Accepted { .. }
        ));
        assert_eq!(r.seen_count(), 1);
    }

    #[test]
    fn expired_packets_are_dropped_without_marking() {
        let mut r = router("b");
        let packet = Packet::broadcast(json!(1), NodeId::from("a")).with_ttl(0);

        assert_eq!(
            r.receive(&NodeId::from("a"), packet.clone()),
            Decision::Dropped(DropReason::Expired)
        );
        assert!(!r.has_seen(&packet.id));
    }

    #[test]
    fn ttl_one_reaches_one_hop_only() {
        let mut b = router("b");
        let mut c = router("c");
        let packet = Packet::broadcast(json!("near"), NodeId::from("a")).with_ttl(1);

        let Decision::Accepted { delivery, forward } = b.receive(&NodeId::from("a"), packet) else {
            panic!("one hop away must accept");
        };
        assert!(delivery.is_some());
        let forward = forward.unwrap();
        assert_eq!(forward.ttl, 0);

        assert_eq!(
            c.receive(&NodeId::from("b"), forward),
            Decision::Dropped(DropReason::Expired)
        );
    }

    #[test]
    fn direct_delivered_at_destination_only() {
        let mut b = router("b");
        let mut c = router("c");
        let packet = Packet::direct(NodeId::from("c"), json!("hi"), NodeId::from("a"));

        let Decision::Accepted { delivery, forward } = b.receive(&NodeId::from("a"), packet) else {
            panic!("intermediate hop must accept");
        };
        assert_eq!(delivery, None);
        let forward = forward.unwrap();

        let Decision::Accepted { delivery, forward } = c.receive(&NodeId::from("b"), forward) else {
            panic!("destination must accept");
        };
        assert_eq!(
            delivery,
            Some(Delivery::Direct { message: json!("hi"), origin: NodeId::from("a") })
        );
        assert_eq!(forward, None);
    }

    #[test]
    fn echo_of_own_packet_is_dropped() {
        let mut hub = router("hub");
        let packet = hub.broadcast(json!("all"), SendOptions::default());

        let echoed = packet.forwarded();
        assert_eq!(
            hub.receive(&NodeId::from("leaf"), echoed),
            Decision::Dropped(DropReason::Duplicate)
        );
    }
}
