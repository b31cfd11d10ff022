//! Flotilla Node - peer-to-peer overlay over TCP
//!
//! Nodes connect over plain TCP streams, exchange a handshake carrying their
//! [`NodeId`], and then route application messages either to everyone
//! (broadcast) or to one node (direct) by controlled flooding.
//!
//! # Architecture
//!
//! - **Transport**: TCP streams framed as newline-delimited JSON, one reader
//!   and one writer task per connection
//! - **Registry**: owns connections by opaque [`ConnectionId`]
//! - **Peers**: directory of connected endpoints, persisted to a JSON file
//! - **Service**: single task owning registry, peers, neighbor table and
//!   router; everything else talks to it over channels
//! - **Node**: cloneable public handle with an event subscription API
//!
//! # Example
//!
//! ```no_run
//! use flotilla_node::{EventKind, Node, NodeConfig, NodeEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::spawn(NodeConfig::from_env()?)?;
//!     node.listen("0.0.0.0:7000").await?;
//!
//!     let mut inbox = node.on(&[EventKind::Broadcast, EventKind::Direct]);
//!     node.connect("10.0.0.2:7000".parse()?).await?;
//!     node.broadcast("hello overlay").await?;
//!
//!     while let Some(event) = inbox.recv().await {
//!         if let NodeEvent::Direct { message, origin } = event {
//!             println!("{origin}: {message}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod node;
pub mod peers;
mod registry;
mod service;
mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use events::{EventKind, NodeEvent, Subscription};
pub use node::{Disconnect, Node};
pub use peers::{Peer, PeerDirectory, PeerStore};

pub use flotilla_protocol::{ConnectionId, NodeId, Packet, PacketId, SeenPolicy, SendOptions};
