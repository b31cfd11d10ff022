//! Error types for the Flotilla node.

use std::path::PathBuf;

use flotilla_protocol::{ConnectionId, NodeId};
use thiserror::Error;

use crate::node::Disconnect;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Raw send to a connection that is closed or was never registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Send to an identity with no bound connection.
    #[error("unknown neighbor: {0}")]
    UnknownNeighbor(NodeId),

    /// Overlay protocol error
    #[error("protocol error: {0}")]
    Protocol(flotilla_protocol::Error),

    /// Connection-level I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer list could not be written.
    #[error("failed to persist peer list to {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection is up but its peer record was not written. `link`
    /// still controls the connection.
    #[error("connected to {}, but the peer list was not saved: {source}", .link.peer_addr())]
    PeerListNotSaved {
        link: Disconnect,
        #[source]
        source: Box<Error>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The node's control task is gone.
    #[error("node has shut down")]
    Shutdown,
}

impl From<flotilla_protocol::Error> for Error {
    fn from(e: flotilla_protocol::Error) -> Self {
        match e {
            flotilla_protocol::Error::UnknownNeighbor(id) => Error::UnknownNeighbor(id),
            other => Error::Protocol(other),
        }
    }
}
