//! Transport adapter: TCP streams carrying newline-delimited JSON frames.
//!
//! Each connection gets a reader task that turns lines into
//! [`TransportEvent`]s for the control task, and a writer task draining a
//! bounded per-connection queue so a slow peer never stalls the others.

use std::net::SocketAddr;

use flotilla_protocol::{ConnectionId, WireMessage};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Everything the transport reports to the control task.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Inbound connection accepted by the listener.
    Accepted { stream: TcpStream, addr: SocketAddr },
    /// A decoded frame, in per-connection arrival order.
    Frame { conn: ConnectionId, message: WireMessage },
    /// A line that did not decode.
    Malformed {
        conn: ConnectionId,
        error: flotilla_protocol::Error,
    },
    /// The remote closed the stream.
    Closed { conn: ConnectionId },
    /// Read or write failed.
    Failed { conn: ConnectionId, error: std::io::Error },
}

pub(crate) type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueError {
    /// The writer is gone.
    Closed,
    /// The per-connection queue is full; the frame was dropped.
    Full,
}

/// Reader and writer tasks for one live connection.
#[derive(Debug)]
pub(crate) struct Link {
    addr: SocketAddr,
    outbound: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Split `stream` and start its reader and writer tasks.
    pub fn spawn<S>(
        conn: ConnectionId,
        stream: S,
        addr: SocketAddr,
        queue: usize,
        events: EventSender,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, rx) = mpsc::channel(queue.max(1));

        let reader = tokio::spawn(read_frames(conn, reader, events.clone()));
        let writer = tokio::spawn(write_frames(conn, writer, rx, events));

        Self {
            addr,
            outbound,
            reader,
            writer,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue an encoded line without waiting.
    pub fn queue(&self, line: String) -> Result<(), QueueError> {
        self.outbound.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Stop reading; the writer flushes what is queued, then shuts the stream.
    pub fn close(self) {
        self.reader.abort();
        drop(self.outbound);
    }

    /// Stop both directions immediately, dropping queued frames.
    pub fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_frames<R>(conn: ConnectionId, reader: R, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match WireMessage::from_line(&line) {
                    Ok(message) => TransportEvent::Frame { conn, message },
                    Err(error) => TransportEvent::Malformed { conn, error },
                }
            }
            Ok(None) => {
                debug!(conn = %conn, "Stream closed by remote");
                let _ = events.send(TransportEvent::Closed { conn });
                return;
            }
            Err(error) => {
                debug!(conn = %conn, "Read error: {}", error);
                let _ = events.send(TransportEvent::Failed { conn, error });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

async fn write_frames<W>(
    conn: ConnectionId,
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
    events: EventSender,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        trace!(conn = %conn, bytes = line.len(), "Writing frame");
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            debug!(conn = %conn, "Write error: {}", error);
            let _ = events.send(TransportEvent::Failed { conn, error });
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Accept inbound connections until the task is aborted or the control task
/// goes away.
pub(crate) fn spawn_listener(listener: TcpListener, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Incoming connection from {}", addr);
                    if events.send(TransportEvent::Accepted { stream, addr }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    })
}

/// Dial a remote node. Runs outside the control task.
pub(crate) async fn dial(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    Ok(stream)
}
