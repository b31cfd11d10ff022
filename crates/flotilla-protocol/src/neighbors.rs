//! Neighbor table and per-connection handshake state.
//!
//! A transport connection starts anonymous. After we send our handshake it
//! waits for the remote one; once that arrives the connection is bound to the
//! announced [`NodeId`] and becomes a neighbor. Only bound connections may
//! carry routed packets.
//!
//! ```text
//! Connected ──(handshake sent)──► AwaitingHandshake ──(handshake received)──► Bound(id)
//! ```
//!
//! An identity maps to at most one connection. A second handshake for an
//! identity that is already bound moves the route to the newer connection
//! (last write wins) and returns the older connection to `AwaitingHandshake`.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{ConnectionId, NodeId};

/// Handshake progress of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    AwaitingHandshake,
    Bound(NodeId),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::AwaitingHandshake => write!(f, "AwaitingHandshake"),
            Self::Bound(id) => write!(f, "Bound({id})"),
        }
    }
}

/// Result of binding a connection to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub node_id: NodeId,
    /// Connection that previously carried this identity, if any.
    pub superseded: Option<ConnectionId>,
    /// Identity this connection was previously bound to, if different.
    pub previous_identity: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct NeighborTable {
    links: HashMap<ConnectionId, LinkState>,
    routes: HashMap<NodeId, ConnectionId>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly registered connection.
    pub fn track(&mut self, conn: ConnectionId) {
        self.links.insert(conn, LinkState::Connected);
    }

    /// Record that our handshake went out on `conn`.
    pub fn handshake_sent(&mut self, conn: ConnectionId) {
        if let Some(state) = self.links.get_mut(&conn) {
            if *state == LinkState::Connected {
                *state = LinkState::AwaitingHandshake;
            }
        }
    }

    /// Bind `conn` to the identity announced in its handshake.
    pub fn bind(&mut self, conn: ConnectionId, node_id: NodeId) -> Result<Binding> {
        let state = self.links.get(&conn).ok_or_else(|| {
            Error::ProtocolViolation(format!("handshake on untracked connection {conn}"))
        })?;

        let previous_identity = match state {
            LinkState::Bound(old) if *old != node_id => {
                if self.routes.get(old) == Some(&conn) {
                    self.routes.remove(old);
                }
                Some(old.clone())
            }
            _ => None,
        };

        let superseded = self
            .routes
            .insert(node_id.clone(), conn)
            .filter(|old| *old != conn);

        if let Some(old) = superseded {
            debug!(node = %node_id, old = %old, new = %conn, "Identity moved to newer connection");
            self.links.insert(old, LinkState::AwaitingHandshake);
        }
        self.links.insert(conn, LinkState::Bound(node_id.clone()));

        Ok(Binding {
            node_id,
            superseded,
            previous_identity,
        })
    }

    pub fn state(&self, conn: ConnectionId) -> Option<&LinkState> {
        self.links.get(&conn)
    }

    /// Identity bound to `conn`, if the handshake completed.
    pub fn node_for(&self, conn: ConnectionId) -> Option<&NodeId> {
        match self.links.get(&conn) {
            Some(LinkState::Bound(id)) => Some(id),
            _ => None,
        }
    }

    /// Like [`node_for`](Self::node_for), but a missing binding is a protocol
    /// violation by the sender.
    pub fn require_bound(&self, conn: ConnectionId) -> Result<&NodeId> {
        match self.links.get(&conn) {
            Some(LinkState::Bound(id)) => Ok(id),
            Some(state) => Err(Error::ProtocolViolation(format!(
                "routed frame on {conn} in state {state}"
            ))),
            None => Err(Error::ProtocolViolation(format!(
                "routed frame on untracked connection {conn}"
            ))),
        }
    }

    /// Connection currently carrying `node_id`.
    pub fn resolve(&self, node_id: &NodeId) -> Result<ConnectionId> {
        self.routes
            .get(node_id)
            .copied()
            .ok_or_else(|| Error::UnknownNeighbor(node_id.clone()))
    }

    /// Forget `conn`. Returns the identity whose route went away with it.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Option<NodeId> {
        match self.links.remove(&conn)? {
            LinkState::Bound(id) if self.routes.get(&id) == Some(&conn) => {
                self.routes.remove(&id);
                Some(id)
            }
            _ => None,
        }
    }

    /// Identities of all bound neighbors.
    pub fn neighbors(&self) -> impl Iterator<Item = &NodeId> {
        self.routes.keys()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
