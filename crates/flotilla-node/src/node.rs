//! Node handle - the public entry point.
//!
//! A [`Node`] is a cheap, cloneable handle onto the overlay service task.
//! Listening, dialing and name resolution happen on the caller's task; only
//! the resulting sockets are handed to the service.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use flotilla_protocol::{ConnectionId, NodeId, Packet, PacketId, SendOptions};
use serde_json::Value;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind, NodeEvent, Subscription};
use crate::peers::Peer;
use crate::service::{Command, OverlayService};
use crate::transport;

const COMMAND_QUEUE: usize = 256;

/// Handle onto a running overlay node.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    config: Arc<NodeConfig>,
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish()
    }
}

impl Node {
    /// Start the overlay service with a fresh random identity.
    ///
    /// Must be called from within a tokio runtime. The service stops once
    /// every handle (and every [`Disconnect`]) has been dropped.
    pub fn spawn(config: NodeConfig) -> Result<Self> {
        Self::spawn_with_id(NodeId::random(), config)
    }

    /// Start the overlay service with a caller-chosen identity.
    pub fn spawn_with_id(id: NodeId, config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let (service, transport_rx) = OverlayService::new(id.clone(), &config, events.clone());
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(service.run(command_rx, transport_rx));

        info!(node = %id, "Node spawned");
        Ok(Self {
            id,
            config: Arc::new(config),
            commands,
            events,
        })
    }

    /// This node's identity.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Bind the listener. The returned address is the ready signal.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        self.request(|reply| Command::Serve { listener, reply }).await?
    }

    /// Bind the listener on the configured address.
    pub async fn listen_configured(&self) -> Result<SocketAddr> {
        self.listen(self.config.listen_addr).await
    }

    /// Address the listener is bound to, if listening.
    pub async fn local_addr(&self) -> Result<Option<SocketAddr>> {
        self.request(|reply| Command::LocalAddr { reply }).await
    }

    /// Dial `addr`. A failed dial also raises a connection-error event.
    ///
    /// If the peer list cannot be written the connection is kept and
    /// returned inside [`Error::PeerListNotSaved`].
    pub async fn connect(&self, addr: SocketAddr) -> Result<Disconnect> {
        let stream = match transport::dial(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}: {}", addr, e);
                self.events.emit(NodeEvent::ConnectionError {
                    node_id: None,
                    addr: Some(addr),
                    error: e.to_string(),
                });
                return Err(Error::Transport(e));
            }
        };

        let (conn, recorded) = self
            .request(|reply| Command::Adopt {
                stream,
                addr,
                reply,
            })
            .await?;

        let link = Disconnect {
            conn,
            addr,
            commands: self.commands.clone(),
        };
        match recorded {
            Ok(()) => Ok(link),
            Err(e) => Err(Error::PeerListNotSaved {
                link,
                source: Box::new(e),
            }),
        }
    }

    /// Dial every configured bootstrap peer. Failures are logged and raised
    /// as connection-error events; the successful links are returned.
    pub async fn bootstrap(&self) -> Vec<Disconnect> {
        let mut links = Vec::new();
        for peer in &self.config.bootstrap_peers {
            info!("Connecting to bootstrap peer: {}", peer);
            let addrs = match tokio::net::lookup_host(peer.as_str()).await {
                Ok(addrs) => addrs.collect::<Vec<_>>(),
                Err(e) => {
                    warn!("Failed to resolve bootstrap peer {}: {}", peer, e);
                    self.events.emit(NodeEvent::ConnectionError {
                        node_id: None,
                        addr: None,
                        error: format!("{peer}: {e}"),
                    });
                    continue;
                }
            };
            for addr in addrs {
                match self.connect(addr).await {
                    Ok(link) => {
                        links.push(link);
                        break;
                    }
                    Err(Error::PeerListNotSaved { link, source }) => {
                        warn!("Connected to {} without saving the peer list: {}", addr, source);
                        links.push(link);
                        break;
                    }
                    Err(_) => {}
                }
            }
        }
        links
    }

    /// Close every connection and the listener. Calling it again is a no-op.
    ///
    /// Connections are closed even when the peer list cannot be rewritten;
    /// the write failure is then returned.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| Command::Close { reply }).await?
    }

    /// Flood `message` to the whole overlay.
    pub async fn broadcast(&self, message: impl Into<Value>) -> Result<PacketId> {
        self.broadcast_with(message, SendOptions::default()).await
    }

    /// Flood `message` with an explicit id, origin or ttl.
    pub async fn broadcast_with(
        &self,
        message: impl Into<Value>,
        options: SendOptions,
    ) -> Result<PacketId> {
        let message = message.into();
        self.request(|reply| Command::Broadcast {
            message,
            options,
            reply,
        })
        .await?
    }

    /// Flood `message` towards `destination`; only that node delivers it.
    pub async fn direct(&self, destination: NodeId, message: impl Into<Value>) -> Result<PacketId> {
        self.direct_with(destination, message, SendOptions::default())
            .await
    }

    pub async fn direct_with(
        &self,
        destination: NodeId,
        message: impl Into<Value>,
        options: SendOptions,
    ) -> Result<PacketId> {
        let message = message.into();
        self.request(|reply| Command::Direct {
            destination,
            message,
            options,
            reply,
        })
        .await?
    }

    /// Hand `packet` to one neighbor without routing.
    pub async fn send_to_neighbor(&self, node_id: NodeId, packet: Packet) -> Result<()> {
        self.request(|reply| Command::SendToNeighbor {
            node_id,
            packet,
            reply,
        })
        .await?
    }

    /// Identities of the currently bound neighbors.
    pub async fn neighbors(&self) -> Result<Vec<NodeId>> {
        self.request(|reply| Command::Neighbors { reply }).await
    }

    /// Snapshot of the peer directory.
    pub async fn peers(&self) -> Result<Vec<Peer>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe(None)
    }

    /// Subscribe to the named event kinds only.
    pub fn on(&self, kinds: &[EventKind]) -> Subscription {
        self.events
            .subscribe(Some(kinds.iter().copied().collect::<HashSet<_>>()))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

/// Tears down the one connection returned by [`Node::connect`].
#[derive(Debug)]
pub struct Disconnect {
    conn: ConnectionId,
    addr: SocketAddr,
    commands: mpsc::Sender<Command>,
}

impl Disconnect {
    pub fn connection_id(&self) -> ConnectionId {
        self.conn
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close the connection. A no-op if it is already gone.
    ///
    /// The connection is closed even if removing its peer record from the
    /// peer list file fails; that error is returned.
    pub async fn disconnect(self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect {
                conn: self.conn,
                reply,
            })
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }
}
