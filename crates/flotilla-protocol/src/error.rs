//! Error types for flotilla-protocol.

use thiserror::Error;

use crate::identity::NodeId;

/// Result type for flotilla-protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting overlay traffic.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame could not be decoded as a wire message.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A peer broke the handshake/routing rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No connection is bound to this node identity.
    #[error("unknown neighbor: {0}")]
    UnknownNeighbor(NodeId),
}
