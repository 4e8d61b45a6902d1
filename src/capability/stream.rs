//! Raw stream layer.
//!
//! Owns the TCP side of a session: binding listeners and opening outgoing
//! connections with the configured socket buffer sizes, and framing a byte
//! stream as a [`Link`] whose reader fills pool buffers.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tracing::{debug, trace};

use crate::buffer::{BufferPool, Payload};
use crate::config::Options;
use crate::error::{Error, Result};

use super::{BoxedIo, Link, LinkReader, LinkWriter};

// ============================================================================
// Constants
// ============================================================================

/// Listen backlog for server sockets.
const LISTEN_BACKLOG: u32 = 1024;

// ============================================================================
// Socket Setup
// ============================================================================

/// Creates an unconnected socket for `addr` with the configured buffer sizes.
fn socket_for(addr: &SocketAddr, options: &Options) -> Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(u32::try_from(size).unwrap_or(u32::MAX))?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(u32::try_from(size).unwrap_or(u32::MAX))?;
    }

    Ok(socket)
}

/// Binds a listener on `authority` (`host:port`).
///
/// Accepted sockets inherit the listener's buffer sizes.
///
/// # Errors
///
/// - [`Error::Connection`] if the authority does not resolve
/// - [`Error::Io`] if binding fails
pub async fn bind(authority: &str, options: &Options) -> Result<TcpListener> {
    let addr = lookup_host(authority)
        .await?
        .next()
        .ok_or_else(|| Error::connection(format!("cannot resolve '{authority}'")))?;

    let socket = socket_for(&addr, options)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(LISTEN_BACKLOG)?;

    debug!(addr = ?listener.local_addr()?, "Listener bound");
    Ok(listener)
}

/// Connects to `authority`, trying each resolved address in turn.
///
/// # Errors
///
/// - [`Error::Connection`] if the authority does not resolve
/// - [`Error::Io`] with the last connect failure
pub async fn connect(authority: &str, options: &Options) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in lookup_host(authority).await? {
        let socket = socket_for(&addr, options)?;
        match socket.connect(addr).await {
            Ok(stream) => {
                debug!(?addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                trace!(?addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.map_or_else(
        || Error::connection(format!("cannot resolve '{authority}'")),
        Error::Io,
    ))
}

/// Starts the stream layer on a connected socket.
///
/// # Errors
///
/// Returns [`Error::Io`] if socket options cannot be applied.
pub fn start(stream: TcpStream) -> Result<BoxedIo> {
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

// ============================================================================
// StreamLink
// ============================================================================

/// [`Link`] over a raw byte stream.
///
/// Each receive fills one pool buffer with whatever the stream has ready, so
/// message boundaries are not preserved.
pub struct StreamLink {
    io: BoxedIo,
    pool: BufferPool,
}

impl StreamLink {
    /// Frames `io` with receive buffers from `pool`.
    #[must_use]
    pub fn new(io: BoxedIo, pool: BufferPool) -> Self {
        Self { io, pool }
    }
}

impl Link for StreamLink {
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        let (read, write) = tokio::io::split(self.io);
        let reader = StreamReader {
            io: read,
            pool: self.pool,
        };
        (Box::new(reader), Box::new(StreamWriter { io: write }))
    }
}

struct StreamReader {
    io: ReadHalf<BoxedIo>,
    pool: BufferPool,
}

#[async_trait]
impl LinkReader for StreamReader {
    async fn recv(&mut self) -> Result<Option<Payload>> {
        let mut buffer = self.pool.acquire(0);
        let read = self.io.read_buf(buffer.as_mut_vec()).await?;

        if read == 0 {
            return Ok(None);
        }
        Ok(Some(Payload::Pooled(buffer)))
    }
}

struct StreamWriter {
    io: WriteHalf<BoxedIo>,
}

#[async_trait]
impl LinkWriter for StreamWriter {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
