//! Upgrade layer.
//!
//! An upgrade layer negotiates a message protocol over an established
//! (possibly secured) byte stream and becomes the top of the stack. The
//! bundled implementation is [`WebSocketUpgrade`], built on
//! `tokio-tungstenite`.

// ============================================================================
// Imports
// ============================================================================

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use crate::buffer::Payload;
use crate::error::{Error, Result};

use super::{BoxedIo, Link, LinkReader, LinkWriter, Role};

// ============================================================================
// UpgradeTarget
// ============================================================================

/// What the upgrade negotiates for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTarget {
    /// Side of the connection.
    pub role: Role,
    /// `host:port` of the server.
    pub authority: String,
    /// Request target.
    pub path: String,
}

// ============================================================================
// UpgradeHandshake
// ============================================================================

/// Upgrade negotiation over a byte stream.
#[async_trait]
pub trait UpgradeHandshake: Send + Sync + 'static {
    /// Short name used in logs and upgrade errors.
    fn name(&self) -> &str;

    /// Negotiates the upgrade and returns the message link.
    ///
    /// On error the stream is dropped, which closes the transport.
    async fn handshake(&self, io: BoxedIo, target: &UpgradeTarget) -> Result<Box<dyn Link>>;
}

// ============================================================================
// WebSocketUpgrade
// ============================================================================

/// RFC 6455 upgrade.
///
/// Binary and text messages are delivered as one payload each; control
/// frames are handled internally.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketUpgrade;

impl WebSocketUpgrade {
    /// Creates the WebSocket upgrade layer.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpgradeHandshake for WebSocketUpgrade {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn handshake(&self, io: BoxedIo, target: &UpgradeTarget) -> Result<Box<dyn Link>> {
        let ws = match target.role {
            Role::Server => tokio_tungstenite::accept_async(io)
                .await
                .map_err(|e| Error::upgrade(self.name(), e.to_string()))?,
            Role::Client => {
                let url = format!("ws://{}{}", target.authority, target.path);
                let (ws, response) = tokio_tungstenite::client_async(url, io)
                    .await
                    .map_err(|e| Error::upgrade(self.name(), e.to_string()))?;
                trace!(status = %response.status(), "WebSocket upgrade response");
                ws
            }
        };

        debug!(role = ?target.role, "WebSocket upgrade completed");
        Ok(Box::new(WebSocketLink { ws }))
    }
}

// ============================================================================
// WebSocketLink
// ============================================================================

type WsStream = WebSocketStream<BoxedIo>;

/// [`Link`] over an upgraded WebSocket stream.
struct WebSocketLink {
    ws: WsStream,
}

/// Returns `true` for errors that only mean the peer is gone.
fn is_closed_error(error: &WsError) -> bool {
    matches!(error, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

impl Link for WebSocketLink {
    /// Both halves share the stream. The lock is taken for one poll at a
    /// time, never across an await, so a pending write leaves reads free.
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        let ws = Arc::new(Mutex::new(self.ws));
        (
            Box::new(WebSocketReader { ws: Arc::clone(&ws) }),
            Box::new(WebSocketWriter { ws }),
        )
    }
}

struct WebSocketReader {
    ws: Arc<Mutex<WsStream>>,
}

#[async_trait]
impl LinkReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Payload>> {
        loop {
            let next = poll_fn(|cx| self.ws.lock().poll_next_unpin(cx)).await;
            match next {
                Some(Ok(Message::Binary(data))) => return Ok(Some(Payload::Shared(data))),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Payload::Shared(Bytes::copy_from_slice(
                        text.as_bytes(),
                    ))));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return Ok(None);
                }
                // Ping, Pong, raw frames
                Some(Ok(_)) => {}
                Some(Err(e)) if is_closed_error(&e) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

struct WebSocketWriter {
    ws: Arc<Mutex<WsStream>>,
}

#[async_trait]
impl LinkWriter for WebSocketWriter {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let ws = &self.ws;
        poll_fn(|cx| ws.lock().poll_ready_unpin(cx)).await?;
        ws.lock()
            .start_send_unpin(Message::Binary(Bytes::copy_from_slice(data)))?;
        poll_fn(|cx| ws.lock().poll_flush_unpin(cx)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let ws = &self.ws;
        match poll_fn(|cx| ws.lock().poll_close_unpin(cx)).await {
            Ok(()) => {}
            Err(e) if is_closed_error(&e) => {}
            Err(e) => return Err(e.into()),
        }

        // Inner layers next: secure shutdown, then the transport.
        poll_fn(|cx| Pin::new(ws.lock().get_mut()).poll_shutdown(cx)).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
