//! Async TCP transport for the dashboard protocol.
//!
//! A connection runs two tasks: a read pump forwarding every read as a data
//! event, and a write pump draining a channel of command frames. Neither
//! blocks the caller; outcomes come back as [`TransportEvent`]s.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::codec::encode_command;
use crate::types::Target;

/// An event raised by the transport, tagged with the connection generation
/// it belongs to so that events from a replaced socket can be told apart.
#[derive(Debug)]
pub struct TransportEvent {
    /// Generation of the connection attempt that produced this event.
    pub generation: u64,
    /// What happened.
    pub kind: TransportEventKind,
}

/// Kinds of transport events.
#[derive(Debug)]
pub enum TransportEventKind {
    /// Outcome of an open attempt.
    Opened(io::Result<TcpStream>),
    /// One read's worth of bytes.
    Data(Bytes),
    /// A command frame was written and flushed.
    Written { write_id: u64, bytes: usize },
    /// Writing a command frame failed.
    WriteFailed { write_id: u64, error: io::Error },
    /// The peer closed the stream.
    Closed,
    /// The socket failed.
    Error(io::Error),
}

/// Open a connection to `target` in the background.
///
/// The outcome is delivered as [`TransportEventKind::Opened`]; a timeout is
/// reported as an [`io::ErrorKind::TimedOut`] error.
pub fn spawn_connect(
    target: &Target,
    connect_timeout: Duration,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    let host = target.host.clone();
    let port = target.port;

    tokio::spawn(async move {
        let outcome = match timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "Connection timeout")),
        };
        let _ = events.send(TransportEvent {
            generation,
            kind: TransportEventKind::Opened(outcome),
        });
    })
}

struct OutgoingFrame {
    write_id: u64,
    frame: Bytes,
}

/// An established connection to a controller.
///
/// Dropping the connection stops both pumps and closes the socket, even if a
/// write is stuck on a peer that stopped reading.
pub struct ControllerConnection {
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    peer_addr: SocketAddr,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ControllerConnection {
    /// Take ownership of a connected stream and start pumping it.
    pub fn start(
        stream: TcpStream,
        read_buffer_size: usize,
        generation: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self::from_io(
            read_half,
            write_half,
            peer_addr,
            read_buffer_size,
            generation,
            events,
        ))
    }

    /// Start pumping an arbitrary reader/writer pair, such as a tunnel or an
    /// in-memory pipe.
    pub fn from_io<R, W>(
        reader: R,
        writer: W,
        peer_addr: SocketAddr,
        read_buffer_size: usize,
        generation: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, frames) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_pump(reader, read_buffer_size, generation, events.clone()));
        let writer = tokio::spawn(write_pump(writer, frames, generation, events));

        Self {
            outgoing,
            peer_addr,
            reader,
            writer,
        }
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Hand one command line to the write pump.
    ///
    /// Returns immediately. The outcome arrives later as
    /// [`TransportEventKind::Written`] or [`TransportEventKind::WriteFailed`]
    /// carrying `write_id`. Fails only if the write pump has stopped.
    pub fn send_command(&self, write_id: u64, command: &str) -> io::Result<()> {
        self.outgoing
            .send(OutgoingFrame {
                write_id,
                frame: encode_command(command),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "write pump stopped"))
    }
}

impl Drop for ControllerConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for ControllerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConnection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Forward every read as one data event until the stream ends.
async fn read_pump<R>(
    mut reader: R,
    read_buffer_size: usize,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(read_buffer_size);

    loop {
        buf.reserve(read_buffer_size);
        let kind = match reader.read_buf(&mut buf).await {
            Ok(0) => TransportEventKind::Closed,
            Ok(n) => {
                trace!(bytes = n, "read from controller");
                TransportEventKind::Data(buf.split().freeze())
            }
            Err(e) => TransportEventKind::Error(e),
        };

        let terminal = !matches!(kind, TransportEventKind::Data(_));
        if events.send(TransportEvent { generation, kind }).is_err() {
            debug!("transport event receiver gone, stopping read pump");
            return;
        }
        if terminal {
            return;
        }
    }
}

/// Write queued frames one at a time and report each outcome.
async fn write_pump<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<OutgoingFrame>,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(OutgoingFrame { write_id, frame }) = frames.recv().await {
        let kind = match write_frame(&mut writer, &frame).await {
            Ok(()) => {
                trace!(write_id, bytes = frame.len(), "wrote to controller");
                TransportEventKind::Written {
                    write_id,
                    bytes: frame.len(),
                }
            }
            Err(error) => TransportEventKind::WriteFailed { write_id, error },
        };

        if events.send(TransportEvent { generation, kind }).is_err() {
            debug!("transport event receiver gone, stopping write pump");
            return;
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
