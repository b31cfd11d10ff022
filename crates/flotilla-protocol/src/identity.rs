//! Identity tokens for nodes, packets and connections.
//!
//! Node and packet ids are random tokens of eight 4-digit hex groups joined
//! by `-` (`3f9a-01c2-...`). Collisions are not detected; with 128 random
//! bits this is an accepted risk. Connection ids never leave the process and
//! are plain counters handed out by the connection registry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a fresh random token (`xxxx-xxxx-xxxx-xxxx-xxxx-xxxx-xxxx-xxxx`).
pub fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes
        .chunks(2)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join("-")
}

/// Logical identity of a participant in the overlay.
///
/// Chosen once at startup and independent of any connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a random node identity.
    pub fn random() -> Self {
        Self(random_token())
    }

    /// Wrap an existing token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of a routed packet, used for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketId(String);

impl PacketId {
    /// Generate a random packet id.
    pub fn random() -> Self {
        Self(random_token())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PacketId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque handle for one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let token = random_token();
        let groups: Vec<&str> = token.split('-').collect();

        assert_eq!(groups.len(), 8);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(NodeId::random(), NodeId::random());
        assert_ne!(PacketId::random(), PacketId::random());
    }

    #[test]
    fn node_id_serializes_as_plain_string() {
        let id = NodeId::from("abcd-0123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abcd-0123\"");
        assert_eq!(id.to_string(), "abcd-0123");
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }
}
