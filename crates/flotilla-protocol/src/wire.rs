//! Wire format.
//!
//! Every frame is one JSON document on its own line:
//!
//! ```text
//! {"type":"handshake","data":{"nodeId":"<id>"}}
//! {"type":"message","data":{"id":"<id>","ttl":255,"type":"broadcast","message":<any>,"origin":"<id>"}}
//! {"type":"message","data":{"id":"<id>","ttl":255,"type":"direct","message":<any>,"origin":"<id>","destination":"<id>"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identity::{NodeId, PacketId};

/// Default hop budget for originated packets.
pub const DEFAULT_TTL: u32 = 255;

/// A single frame exchanged between neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    /// First frame on every connection, announcing the sender's identity.
    Handshake(Handshake),
    /// Routed overlay traffic.
    Message(Packet),
}

impl WireMessage {
    pub fn handshake(node_id: NodeId) -> Self {
        Self::Handshake(Handshake { node_id })
    }

    /// Encode as a newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line (the trailing newline is optional).
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
}

/// Routing class of a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacketKind {
    /// Delivered to every node the flood reaches.
    Broadcast,
    /// Delivered only at `destination`; every other node forwards.
    Direct { destination: NodeId },
}

/// An overlay packet. Immutable once built; forwarding produces a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    pub ttl: u32,
    #[serde(flatten)]
    pub kind: PacketKind,
    pub message: Value,
    pub origin: NodeId,
}

impl Packet {
    /// A broadcast packet with a fresh id and the default ttl.
    pub fn broadcast(message: Value, origin: NodeId) -> Self {
        Self {
            id: PacketId::random(),
            ttl: DEFAULT_TTL,
            kind: PacketKind::Broadcast,
            message,
            origin,
        }
    }

    /// A direct packet with a fresh id and the default ttl.
    pub fn direct(destination: NodeId, message: Value, origin: NodeId) -> Self {
        Self {
            id: PacketId::random(),
            ttl: DEFAULT_TTL,
            kind: PacketKind::Direct { destination },
            message,
            origin,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: PacketId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.kind, PacketKind::Broadcast)
    }

    pub fn destination(&self) -> Option<&NodeId> {
        match &self.kind {
            PacketKind::Broadcast => None,
            PacketKind::Direct { destination } => Some(destination),
        }
    }

    /// The copy sent on to neighbors: same id, origin and destination, one
    /// hop less.
    pub fn forwarded(&self) -> Self {
        Self {
            ttl: self.ttl.saturating_sub(1),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_wire_shape() {
        let msg = WireMessage::handshake(NodeId::from("a1b2"));
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value, json!({ "type": "handshake", "data": { "nodeId": "a1b2" } }));
    }

    #[test]
    fn broadcast_packet_has_no_destination() {
        let packet = Packet::broadcast(json!("hello"), NodeId::from("origin"))
            .with_id(PacketId::from("p1"))
            .with_ttl(3);
        let value = serde_json::to_value(WireMessage::Message(packet)).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "message",
                "data": { "id": "p1", "ttl": 3, "type": "broadcast", "message": "hello", "origin": "origin" }
            })
        );
    }

    #[test]
    fn direct_packet_from_foreign_line() {
        let line = r#"{"type":"message","data":{"id":"p2","ttl":7,"type":"direct","message":{"n":1},"destination":"dst","origin":"src"}}"#;

        let WireMessage::Message(packet) = WireMessage::from_line(line).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(packet.id, PacketId::from("p2"));
        assert_eq!(packet.ttl, 7);
        assert_eq!(packet.destination(), Some(&NodeId::from("dst")));
        assert_eq!(packet.message, json!({ "n": 1 }));
        assert_eq!(packet.origin, NodeId::from("src"));
    }

    #[test]
    fn line_is_newline_terminated_and_decodes() {
        let msg = WireMessage::handshake(NodeId::random());
        let line = msg.to_line().unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(WireMessage::from_line(&line).unwrap(), msg);
    }

    #[test]
    fn rejects_garbage_and_negative_ttl() {
        assert!(WireMessage::from_line("not json").is_err());
        assert!(WireMessage::from_line(r#"{"type":"gossip","data":{}}"#).is_err());

        let negative = r#"{"type":"message","data":{"id":"p","ttl":-1,"type":"broadcast","message":null,"origin":"o"}}"#;
        assert!(WireMessage::from_line(negative).is_err());
    }

    #[test]
    fn forwarded_copy_decrements_ttl_only() {
        let packet = Packet::direct(NodeId::from("d"), json!(1), NodeId::from("o")).with_ttl(2);
        let next = packet.forwarded();

        assert_eq!(next.ttl, 1);
        assert_eq!(next.id, packet.id);
        assert_eq!(next.origin, packet.origin);
        assert_eq!(next.destination(), packet.destination());
        assert_eq!(next.forwarded().forwarded().ttl, 0);
    }
}
