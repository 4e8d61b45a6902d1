//! Secure-stream layer contract.
//!
//! The crate does not implement a security protocol. A secure layer is any
//! type that can run a handshake over a byte stream and hand back a stream
//! that encrypts on write and decrypts on read, for example a thin wrapper
//! over a TLS acceptor or connector:
//!
//! ```ignore
//! struct Tls(tokio_rustls::TlsAcceptor);
//!
//! #[async_trait]
//! impl SecureHandshake for Tls {
//!     fn name(&self) -> &str {
//!         "tls"
//!     }
//!
//!     async fn handshake(&self, io: BoxedIo, _role: Role) -> Result<BoxedIo> {
//!         let stream = self.0.accept(io).await?;
//!         Ok(Box::new(stream))
//!     }
//! }
//! ```
//!
//! The returned stream's `poll_shutdown` must finish the secure session
//! (close_notify or equivalent) and then shut down the stream it wraps;
//! session teardown relies on that to stop the layers in order.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

use super::{BoxedIo, Role};

// ============================================================================
// SecureHandshake
// ============================================================================

/// A security handshake over a byte stream.
#[async_trait]
pub trait SecureHandshake: Send + Sync + 'static {
    /// Short name used in logs and handshake errors.
    fn name(&self) -> &str;

    /// Runs the handshake for `role` and returns the secured stream.
    ///
    /// On error the stream is dropped, which closes the transport.
    async fn handshake(&self, io: BoxedIo, role: Role) -> Result<BoxedIo>;
}
