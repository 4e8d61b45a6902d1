//! Error types for laneway.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use laneway::{Result, Server};
//!
//! async fn example() -> Result<()> {
//!     let server = Server::builder("tcp://127.0.0.1:0")?.build()?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidEndpoint`], [`Error::UnsupportedProtocol`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::SessionClosed`], [`Error::SessionNotFound`], [`Error::RegistryShutdown`] |
//! | Handshake | [`Error::Handshake`], [`Error::Upgrade`] |
//! | Timeout | [`Error::Timeout`], [`Error::IdleTimeout`] |
//! | Lifecycle | [`Error::AlreadyRunning`], [`Error::NotRunning`] |
//! | External | [`Error::Io`], [`Error::WebSocket`], [`Error::Url`], [`Error::ChannelClosed`] |
//!
//! # Last Error
//!
//! Every public entry point that fails also records its error in a
//! per-thread slot readable through [`last_error`]. The slot is a
//! convenience for callers that only keep a boolean around; the returned
//! [`Result`] is always authoritative.

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::SessionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when an option value is malformed or inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Endpoint string could not be parsed.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The endpoint string as given.
        endpoint: String,
        /// What was wrong with it.
        message: String,
    },

    /// Endpoint scheme names a protocol this crate does not assemble.
    #[error("Unsupported protocol: {protocol}")]
    UnsupportedProtocol {
        /// The scheme found in the endpoint.
        protocol: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level connection failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connect did not complete within the configured timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation on a session that is closing or closed.
    #[error("Session closed")]
    SessionClosed,

    /// No live session with the given identity.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session ID.
        session_id: SessionId,
    },

    /// The registry is draining and rejects new sessions.
    #[error("Session registry is shutting down")]
    RegistryShutdown,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Secure-stream handshake failed.
    #[error("Handshake failed ({layer}): {message}")]
    Handshake {
        /// Name of the secure layer.
        layer: String,
        /// Description of the failure.
        message: String,
    },

    /// Upgrade negotiation failed.
    #[error("Upgrade failed ({layer}): {message}")]
    Upgrade {
        /// Name of the upgrade layer.
        layer: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Session saw no inbound traffic for the idle duration.
    #[error("Idle timeout after {timeout_ms}ms")]
    IdleTimeout {
        /// Configured idle duration in milliseconds.
        timeout_ms: u64,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// `start` called on an endpoint that is already running.
    #[error("Already running")]
    AlreadyRunning,

    /// Operation requires a running endpoint.
    #[error("Not running")]
    NotRunning,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported protocol error.
    #[inline]
    pub fn unsupported_protocol(protocol: impl Into<String>) -> Self {
        Self::UnsupportedProtocol {
            protocol: protocol.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Creates an upgrade error.
    #[inline]
    pub fn upgrade(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upgrade {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates an idle timeout error.
    #[inline]
    pub fn idle_timeout(timeout_ms: u64) -> Self {
        Self::IdleTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. } | Self::IdleTimeout { .. }
        )
    }

    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidEndpoint { .. } | Self::UnsupportedProtocol { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::SessionClosed
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if this is a handshake or upgrade error.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Self::Handshake { .. } | Self::Upgrade { .. })
    }

    /// Returns `true` if the operation targeted a closed session.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::SessionNotFound { .. })
    }
}

// ============================================================================
// Last Error Slot
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Records `err` as the last error observed on this thread.
pub(crate) fn set_last_error(err: &Error) {
    let message = err.to_string();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Records the error of a failed result and passes the result through.
pub(crate) fn record<T>(result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        set_last_error(e);
    }
    result
}

/// Returns the description of the last error observed on this thread.
#[must_use]
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Clears the last error slot for this thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

// ============================================================================
// Tests
// ============================================================================
