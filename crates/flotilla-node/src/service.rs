//! Overlay service: the single task that owns all overlay state.
//!
//! Connection registry, peer directory, neighbor table and router live here
//! and are only touched from this task. Transport tasks report through
//! [`TransportEvent`]s and [`Node`](crate::Node) handles through
//! [`Command`]s, so handshake processing, packet routing and connection
//! teardown never interleave.

use std::collections::HashMap;
use std::net::SocketAddr;

use flotilla_protocol::{
    ConnectionId, Decision, Delivery, NeighborTable, NodeId, Packet, PacketId, Router, SendOptions,
    WireMessage,
};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, NodeEvent};
use crate::peers::{Peer, PeerDirectory, PeerStore};
use crate::registry::ConnectionRegistry;
use crate::transport::{self, TransportEvent};

/// Requests from [`Node`](crate::Node) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Serve {
        listener: TcpListener,
        reply: oneshot::Sender<Result<SocketAddr>>,
    },
    /// Replies with the new connection and the outcome of recording its peer.
    Adopt {
        stream: TcpStream,
        addr: SocketAddr,
        reply: oneshot::Sender<(ConnectionId, Result<()>)>,
    },
    Disconnect {
        conn: ConnectionId,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
    Broadcast {
        message: Value,
        options: SendOptions,
        reply: oneshot::Sender<Result<PacketId>>,
    },
    Direct {
        destination: NodeId,
        message: Value,
        options: SendOptions,
        reply: oneshot::Sender<Result<PacketId>>,
    },
    SendToNeighbor {
        node_id: NodeId,
        packet: Packet,
        reply: oneshot::Sender<Result<()>>,
    },
    Neighbors {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<Peer>>,
    },
    LocalAddr {
        reply: oneshot::Sender<Option<SocketAddr>>,
    },
}

struct Listening {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

pub(crate) struct OverlayService {
    local_id: NodeId,
    registry: ConnectionRegistry,
    peers: PeerDirectory,
    neighbors: NeighborTable,
    router: Router,
    events: EventBus,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Peer record created for each connection, if any.
    peer_records: HashMap<ConnectionId, String>,
    listener: Option<Listening>,
}

impl OverlayService {
    /// Build the service and its transport event channel.
    pub fn new(
        local_id: NodeId,
        config: &NodeConfig,
        events: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let store = config.peer_list_path.clone().map(PeerStore::new);
        let router =
            Router::new(local_id.clone(), config.seen_policy).with_default_ttl(config.default_ttl);

        let service = Self {
            local_id,
            registry: ConnectionRegistry::new(config.send_queue, transport_tx.clone()),
            peers: PeerDirectory::new(store),
            neighbors: NeighborTable::new(),
            router,
            events,
            transport_tx,
            peer_records: HashMap::new(),
            listener: None,
        };
        (service, transport_rx)
    }

    /// Run until every [`Node`](crate::Node) handle is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!(node = %self.local_id, "Overlay service started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = transport_rx.recv() => self.handle_transport(event),
            }
        }
        if let Err(e) = self.close() {
            error!(node = %self.local_id, "Failed to persist peer list on shutdown: {}", e);
        }
        info!(node = %self.local_id, "Overlay service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Serve { listener, reply } => {
                let _ = reply.send(self.serve(listener));
            }
            Command::Adopt {
                stream,
                addr,
                reply,
            } => {
                let _ = reply.send(self.on_connection(stream, addr));
            }
            Command::Disconnect { conn, reply } => {
                let _ = reply.send(self.teardown(conn, None));
            }
            Command::Close { reply } => {
                let _ = reply.send(self.close());
            }
            Command::Broadcast {
                message,
                options,
                reply,
            } => {
                let packet = self.router.broadcast(message, options);
                self.flood(&packet);
                let _ = reply.send(Ok(packet.id));
            }
            Command::Direct {
                destination,
                message,
                options,
                reply,
            } => {
                let _ = reply.send(Ok(self.direct(destination, message, options)));
            }
            Command::SendToNeighbor {
                node_id,
                packet,
                reply,
            } => {
                let _ = reply.send(self.send_to_neighbor(&node_id, &WireMessage::Message(packet)));
            }
            Command::Neighbors { reply } => {
                let mut neighbors: Vec<NodeId> = self.neighbors.neighbors().cloned().collect();
                neighbors.sort();
                let _ = reply.send(neighbors);
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.peers.peers().to_vec());
            }
            Command::LocalAddr { reply } => {
                let _ = reply.send(self.listener.as_ref().map(|l| l.addr));
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted { stream, addr } => {
                if self.listener.is_none() {
                    debug!(addr = %addr, "Not listening, dropping accepted connection");
                    return;
                }
                let (conn, recorded) = self.on_connection(stream, addr);
                if let Err(e) = recorded {
                    error!(conn = %conn, addr = %addr, "Failed to record inbound peer: {}", e);
                }
            }
            TransportEvent::Frame { conn, message } => {
                if !self.registry.contains(conn) {
                    trace!(conn = %conn, "Frame from closed connection ignored");
                    return;
                }
                match message {
                    WireMessage::Handshake(handshake) => self.on_handshake(conn, handshake.node_id),
                    WireMessage::Message(packet) => self.on_packet(conn, packet),
                }
            }
            TransportEvent::Malformed { conn, error } => {
                warn!(conn = %conn, "Dropping malformed frame: {}", error);
            }
            TransportEvent::Closed { conn } => self.log_teardown(conn, None),
            TransportEvent::Failed { conn, error } => self.log_teardown(conn, Some(error)),
        }
    }

    fn serve(&mut self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        if let Some(previous) = self.listener.take() {
            warn!("Replacing listener on {} with {}", previous.addr, addr);
            previous.task.abort();
        }
        let task = transport::spawn_listener(listener, self.transport_tx.clone());
        self.listener = Some(Listening { addr, task });
        info!(node = %self.local_id, "Listening on {}", addr);
        Ok(addr)
    }

    /// Register a new connection (either direction) and send our handshake.
    ///
    /// The connection stays up even when its peer record could not be
    /// persisted; that failure is returned beside the id.
    fn on_connection<S>(&mut self, stream: S, addr: SocketAddr) -> (ConnectionId, Result<()>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let conn = self.registry.register(stream, addr);
        self.neighbors.track(conn);

        let handshake = WireMessage::handshake(self.local_id.clone());
        match self.registry.send_raw(conn, &handshake) {
            Ok(()) => self.neighbors.handshake_sent(conn),
            Err(e) => warn!(conn = %conn, "Failed to send handshake: {}", e),
        }

        let recorded = match self.peers.on_peer_connected(addr.ip(), addr.port()) {
            Ok(Some(peer)) => {
                self.peer_records.insert(conn, peer.id);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                // The in-memory record exists even though the write failed.
                if let Some(peer) = self.peers.find_by_ip(addr.ip()) {
                    self.peer_records.insert(conn, peer.id.clone());
                }
                Err(e)
            }
        };

        info!(conn = %conn, addr = %addr, open = self.registry.len(), "Connection established");
        (conn, recorded)
    }

    fn on_handshake(&mut self, conn: ConnectionId, node_id: NodeId) {
        match self.neighbors.bind(conn, node_id) {
            Ok(binding) => {
                if let Some(old) = binding.previous_identity {
                    self.events.emit(NodeEvent::Disconnected { node_id: old });
                }
                info!(conn = %conn, node = %binding.node_id, "Neighbor connected");
                self.events.emit(NodeEvent::Connected {
                    node_id: binding.node_id,
                });
            }
            Err(e) => warn!(conn = %conn, "Handshake rejected: {}", e),
        }
    }

    fn on_packet(&mut self, conn: ConnectionId, packet: Packet) {
        let from = match self.neighbors.require_bound(conn) {
            Ok(from) => from.clone(),
            Err(e) => {
                debug!(conn = %conn, id = %packet.id, "Dropping packet: {}", e);
                return;
            }
        };

        self.events.emit(NodeEvent::Message {
            from: from.clone(),
            packet: packet.clone(),
        });

        match self.router.receive(&from, packet) {
            Decision::Dropped(_) => {}
            Decision::Accepted { delivery, forward } => {
                if let Some(delivery) = delivery {
                    self.events.emit(match delivery {
                        Delivery::Broadcast { message, origin } => {
                            NodeEvent::Broadcast { message, origin }
                        }
                        Delivery::Direct { message, origin } => NodeEvent::Direct { message, origin },
                    });
                }
                if let Some(forward) = forward {
                    self.flood(&forward);
                }
            }
        }
    }

    fn direct(&mut self, destination: NodeId, message: Value, options: SendOptions) -> PacketId {
        let packet = self.router.direct(destination, message, options);
        if packet.destination() == Some(&self.local_id) {
            debug!(id = %packet.id, "Direct packet addressed to ourselves");
            self.events.emit(NodeEvent::Direct {
                message: packet.message,
                origin: packet.origin,
            });
            return packet.id;
        }
        self.flood(&packet);
        packet.id
    }

    /// Send `packet` to every bound neighbor. Returns how many accepted it.
    fn flood(&self, packet: &Packet) -> usize {
        let line = match WireMessage::Message(packet.clone()).to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(id = %packet.id, "Failed to encode packet: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for node_id in self.neighbors.neighbors() {
            let result = self
                .neighbors
                .resolve(node_id)
                .map_err(Error::from)
                .and_then(|conn| self.registry.send_line(conn, line.clone()));
            match result {
                Ok(()) => sent += 1,
                Err(e) => debug!(node = %node_id, "Flood send failed: {}", e),
            }
        }
        trace!(id = %packet.id, ttl = packet.ttl, sent, "Flooded packet");
        sent
    }

    fn send_to_neighbor(&self, node_id: &NodeId, message: &WireMessage) -> Result<()> {
        let conn = self.neighbors.resolve(node_id)?;
        self.registry.send_raw(conn, message)
    }

    /// Remove every trace of `conn`. Safe to call more than once.
    ///
    /// Only a failed peer-list write is returned; the connection is gone
    /// either way.
    fn teardown(&mut self, conn: ConnectionId, error: Option<std::io::Error>) -> Result<()> {
        let Some(addr) = self.registry.unregister(conn) else {
            return Ok(());
        };
        self.forget(conn, addr, error)
    }

    /// Teardown driven by the transport, where nobody waits for the result.
    fn log_teardown(&mut self, conn: ConnectionId, error: Option<std::io::Error>) {
        if let Err(e) = self.teardown(conn, error) {
            error!(conn = %conn, "Failed to persist peer removal: {}", e);
        }
    }

    fn forget(
        &mut self,
        conn: ConnectionId,
        addr: SocketAddr,
        error: Option<std::io::Error>,
    ) -> Result<()> {
        let node_id = self.neighbors.remove_connection(conn);

        if let Some(error) = error {
            warn!(conn = %conn, addr = %addr, "Connection error: {}", error);
            self.events.emit(NodeEvent::ConnectionError {
                node_id: node_id.clone(),
                addr: Some(addr),
                error: error.to_string(),
            });
        }

        match node_id {
            Some(node_id) => {
                info!(conn = %conn, node = %node_id, "Neighbor disconnected");
                self.events.emit(NodeEvent::Disconnected { node_id });
            }
            None => debug!(conn = %conn, addr = %addr, "Connection closed before handshake"),
        }

        match self.peer_records.remove(&conn) {
            Some(peer_id) => self.peers.on_peer_disconnected(&peer_id).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Close every connection and release the listener. Idempotent.
    ///
    /// Every connection is torn down even if a peer-list write fails; the
    /// first such failure is returned.
    fn close(&mut self) -> Result<()> {
        if let Some(listening) = self.listener.take() {
            listening.task.abort();
            info!(node = %self.local_id, "Stopped listening on {}", listening.addr);
        }

        let mut result = Ok(());
        for (conn, addr) in self.registry.close_all() {
            if let Err(e) = self.forget(conn, addr, None) {
                warn!(conn = %conn, "Failed to persist peer removal: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn accepted_pair(listener: &TcpListener) -> (TcpStream, SocketAddr, TcpStream) {
        let dialer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();
        (stream, addr, dialer)
    }

    fn service() -> OverlayService {
        let config = NodeConfig::local();
        OverlayService::new(NodeId::from("local"), &config, EventBus::new(16)).0
    }

    #[tokio::test]
    async fn accepted_connection_is_adopted_while_listening() {
        let mut service = service();
        service.serve(TcpListener::bind("127.0.0.1:0").await.unwrap()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stream, addr, _dialer) = accepted_pair(&listener).await;
        service.handle_transport(TransportEvent::Accepted { stream, addr });

        assert_eq!(service.registry.len(), 1);
    }

    #[tokio::test]
    async fn accepted_connection_after_close_is_dropped() {
        let mut service = service();
        service.serve(TcpListener::bind("127.0.0.1:0").await.unwrap()).unwrap();
        service.close().unwrap();

        // An accept that was already queued when the listener stopped.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stream, addr, _dialer) = accepted_pair(&listener).await;
        service.handle_transport(TransportEvent::Accepted { stream, addr });

        assert_eq!(service.registry.len(), 0);
        assert!(service.neighbors.is_empty());
    }
}
