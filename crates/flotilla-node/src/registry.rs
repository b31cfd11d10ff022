//! Connection registry.
//!
//! Owns every live transport connection, keyed by a [`ConnectionId`] handed
//! out here. Nothing outside the registry holds a connection; the neighbor
//! table and peer directory refer to connections by id only.

use std::collections::HashMap;
use std::net::SocketAddr;

use flotilla_protocol::{ConnectionId, WireMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{EventSender, Link, QueueError};

#[derive(Debug)]
pub(crate) struct ConnectionRegistry {
    links: HashMap<ConnectionId, Link>,
    next_id: u64,
    queue: usize,
    events: EventSender,
}

impl ConnectionRegistry {
    pub fn new(queue: usize, events: EventSender) -> Self {
        Self {
            links: HashMap::new(),
            next_id: 1,
            queue,
            events,
        }
    }

    /// Take ownership of a connection and start its I/O tasks.
    pub fn register<S>(&mut self, stream: S, addr: SocketAddr) -> ConnectionId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let link = Link::spawn(conn, stream, addr, self.queue, self.events.clone());
        self.links.insert(conn, link);
        debug!(conn = %conn, addr = %addr, "Connection registered");
        conn
    }

    /// Encode `message` and queue it on `conn`.
    pub fn send_raw(&self, conn: ConnectionId, message: &WireMessage) -> Result<()> {
        let line = message.to_line()?;
        self.send_line(conn, line)
    }

    /// Queue an already encoded frame on `conn`.
    pub fn send_line(&self, conn: ConnectionId, line: String) -> Result<()> {
        let link = self.links.get(&conn).ok_or(Error::UnknownConnection(conn))?;
        match link.queue(line) {
            Ok(()) => Ok(()),
            Err(QueueError::Full) => {
                warn!(conn = %conn, "Send queue full, dropping frame");
                Ok(())
            }
            Err(QueueError::Closed) => Err(Error::UnknownConnection(conn)),
        }
    }

    /// Drop `conn`, closing its stream. A second call is a no-op.
    pub fn unregister(&mut self, conn: ConnectionId) -> Option<SocketAddr> {
        let link = self.links.remove(&conn)?;
        let addr = link.addr();
        link.close();
        debug!(conn = %conn, addr = %addr, "Connection unregistered");
        Some(addr)
    }

    /// Forcibly close every connection. Returns the ids that were open.
    pub fn close_all(&mut self) -> Vec<(ConnectionId, SocketAddr)> {
        let mut closed: Vec<_> = self
            .links
            .drain()
            .map(|(conn, link)| {
                let addr = link.addr();
                link.abort();
                (conn, addr)
            })
            .collect();
        closed.sort_by_key(|(conn, _)| *conn);
        closed
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.links.contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}
