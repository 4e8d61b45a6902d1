//! Capability layers.
//!
//! A session's protocol is an ordered stack of layers assembled once at
//! construction and never reordered:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Upgrade  (WebSocket …)   │  framing: messages in, messages out
//! ├──────────────────────────┤
//! │ Secure   (TLS …)         │  handshake wraps the byte stream
//! ├──────────────────────────┤
//! │ Stream   (TCP)           │  connect / accept, raw bytes
//! └──────────────────────────┘
//! ```
//!
//! Each layer does its own concern and delegates to the one below it. The
//! result of starting the stack is one [`Link`], which the session splits
//! into a [`LinkReader`] and a [`LinkWriter`] so a slow write never holds up
//! a receive. Closing goes through the writer and walks the stack top-down:
//! the upgrade layer sends its close frame, then shuts down the stream it
//! wraps, which lets a secure layer finish its own shutdown before the TCP
//! socket is closed. Layers that never started own nothing, so stopping
//! them is a no-op.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `stream` | TCP connect/listen and the raw byte [`Link`] |
//! | `secure` | [`SecureHandshake`] primitive contract |
//! | `upgrade` | [`UpgradeHandshake`] contract and the WebSocket layer |

// ============================================================================
// Submodules
// ============================================================================

/// Secure-stream layer contract.
pub mod secure;

/// Raw stream layer.
pub mod stream;

/// Upgrade layer contract and WebSocket implementation.
pub mod upgrade;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::buffer::Payload;
use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use secure::SecureHandshake;
pub use stream::StreamLink;
pub use upgrade::{UpgradeHandshake, UpgradeTarget, WebSocketUpgrade};

// ============================================================================
// Byte Streams
// ============================================================================

/// A bidirectional byte stream a layer can wrap.
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased byte stream passed between layers.
pub type BoxedIo = Box<dyn AsyncIo>;

// ============================================================================
// Role
// ============================================================================

/// Which side of the connection a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepted by a server.
    Server,
    /// Initiated by a client.
    Client,
}

// ============================================================================
// Link
// ============================================================================

/// The established, top-of-stack I/O surface of a session.
///
/// Only the session's own lane touches a link.
pub trait Link: Send {
    /// Separates the receive and send directions.
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>);
}

/// Receive half of a [`Link`].
#[async_trait]
pub trait LinkReader: Send {
    /// Receives the next chunk or message. `Ok(None)` means orderly close.
    ///
    /// Must be cancel-safe: dropping the future loses no data.
    async fn recv(&mut self) -> Result<Option<Payload>>;
}

/// Send half of a [`Link`].
#[async_trait]
pub trait LinkWriter: Send {
    /// Writes one payload completely.
    ///
    /// Dropping the future mid-write leaves the stream unusable.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Tears the stack down top to bottom.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// LayerKind
// ============================================================================

/// Kinds of capability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Raw byte stream.
    Stream,
    /// Secure-stream handshake.
    Secure,
    /// Upgrade negotiation.
    Upgrade,
}

// ============================================================================
// CapabilityStack
// ============================================================================

/// An immutable, ordered set of layers.
///
/// The stream layer is always present at the bottom.
///
/// # Example
///
/// ```ignore
/// let stack = CapabilityStack::stream()
///     .with_secure(MyTls::new(config))
///     .with_upgrade(WebSocketUpgrade::new());
///
/// assert_eq!(
///     stack.layers(),
///     vec![LayerKind::Stream, LayerKind::Secure, LayerKind::Upgrade]
/// );
/// ```
#[derive(Clone, Default)]
pub struct CapabilityStack {
    secure: Option<Arc<dyn SecureHandshake>>,
    upgrade: Option<Arc<dyn UpgradeHandshake>>,
}

impl CapabilityStack {
    /// Creates a stack with only the stream layer.
    #[inline]
    #[must_use]
    pub fn stream() -> Self {
        Self::default()
    }

    /// Adds a secure layer above the stream.
    #[inline]
    #[must_use]
    pub fn with_secure(self, layer: impl SecureHandshake) -> Self {
        self.with_secure_arc(Arc::new(layer))
    }

    /// Adds a shared secure layer above the stream.
    #[inline]
    #[must_use]
    pub fn with_secure_arc(mut self, layer: Arc<dyn SecureHandshake>) -> Self {
        self.secure = Some(layer);
        self
    }

    /// Adds an upgrade layer on top.
    #[inline]
    #[must_use]
    pub fn with_upgrade(self, layer: impl UpgradeHandshake) -> Self {
        self.with_upgrade_arc(Arc::new(layer))
    }

    /// Adds a shared upgrade layer on top.
    #[inline]
    #[must_use]
    pub fn with_upgrade_arc(mut self, layer: Arc<dyn UpgradeHandshake>) -> Self {
        self.upgrade = Some(layer);
        self
    }

    /// Returns the secure layer, if any.
    #[inline]
    #[must_use]
    pub fn secure(&self) -> Option<&Arc<dyn SecureHandshake>> {
        self.secure.as_ref()
    }

    /// Returns the upgrade layer, if any.
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<&Arc<dyn UpgradeHandshake>> {
        self.upgrade.as_ref()
    }

    /// Returns the layers bottom to top.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerKind> {
        let mut layers = vec![LayerKind::Stream];
        if self.secure.is_some() {
            layers.push(LayerKind::Secure);
        }
        if self.upgrade.is_some() {
            layers.push(LayerKind::Upgrade);
        }
        layers
    }
}

impl fmt::Debug for CapabilityStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityStack")
            .field("secure", &self.secure.as_ref().map(|l| l.name()))
            .field("upgrade", &self.upgrade.as_ref().map(|l| l.name()))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
