//! Flotilla Protocol - overlay core without I/O
//!
//! This crate holds the parts of the Flotilla overlay that do not touch a
//! socket:
//!
//! - **Identity**: random [`NodeId`]s and [`PacketId`]s, opaque [`ConnectionId`]s
//! - **Wire**: the JSON line format for handshakes and routed packets
//! - **Neighbors**: the handshake state machine that turns an anonymous
//!   connection into a neighbor keyed by identity
//! - **Router**: flood routing for broadcast and direct packets with ttl decay
//!   and duplicate suppression
//!
//! The runtime in `flotilla-node` feeds frames in and carries the returned
//! decisions out.
//!
//! # Example
//!
//! ```rust
//! use flotilla_protocol::{Decision, NodeId, Router, SeenPolicy, SendOptions};
//! use serde_json::json;
//!
//! let mut alice = Router::new(NodeId::random(), SeenPolicy::Unbounded);
//! let mut bob = Router::new(NodeId::random(), SeenPolicy::Unbounded);
//!
//! let packet = alice.broadcast(json!("hello"), SendOptions::default());
//! let from = alice.local_id().clone();
//! match bob.receive(&from, packet) {
//!     Decision::Accepted { delivery, forward } => {
//!         assert!(delivery.is_some());
//!         assert_eq!(forward.unwrap().ttl, 254);
//!     }
//!     Decision::Dropped(reason) => panic!("dropped: {reason:?}"),
//! }
//! ```

pub mod error;
pub mod identity;
pub mod neighbors;
pub mod router;
pub mod seen;
pub mod wire;

pub use error::{Error, Result};
pub use identity::{random_token, ConnectionId, NodeId, PacketId};
pub use neighbors::{Binding, LinkState, NeighborTable};
pub use router::{Decision, Delivery, DropReason, Router, SendOptions};
pub use seen::{SeenPolicy, SeenSet};
pub use wire::{Handshake, Packet, PacketKind, WireMessage, DEFAULT_TTL};
