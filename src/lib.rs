//! Laneway - layered async connection framework.
//!
//! This library runs TCP servers and clients whose connections are
//! assembled from stacked capability layers: a raw stream at the bottom,
//! an optional secure-stream handshake above it and an optional upgrade
//! negotiation (WebSocket) on top.
//!
//! # Architecture
//!
//! - **Session**: one connection, driven by a single lane task that owns
//!   its transport; lifecycle `initial → connecting → handshaking →
//!   upgrading → running → disconnecting → closed`
//! - **Registry**: the one owner of an endpoint's live sessions
//! - **Listeners**: user callbacks, delivered inline on the session lane or
//!   deferred to a per-session notification lane
//!
//! Key guarantees:
//!
//! - Sends on one session are written in the order `send` accepted them
//! - The close event fires exactly once per session
//! - `stop` returns only after every session has closed and left the registry
//!
//! # Quick Start
//!
//! ```no_run
//! use laneway::{Client, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::new("tcp://127.0.0.1:0")?;
//!     server.listeners().bind_recv(|session, data| {
//!         let _ = session.send(data.to_vec());
//!     });
//!     server.start().await?;
//!
//!     let port = server.port().unwrap_or_default();
//!     let client = Client::new(&format!("tcp://127.0.0.1:{port}"))?;
//!     client.listeners().bind_recv(|_, data| {
//!         println!("echo: {}", String::from_utf8_lossy(data));
//!     });
//!     let session = client.connect().await?;
//!     session.send("ping")?;
//!     session.flush().await?;
//!
//!     client.stop().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Receive-buffer pool and payloads |
//! | [`capability`] | Stream, secure and upgrade layers |
//! | [`config`] | Endpoint strings, options and builders |
//! | [`endpoint`] | [`Server`] and [`Client`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`listener`] | Events, listeners and dispatch |
//! | [`runtime`] | Lanes, execution contexts and timers |
//! | [`session`] | Session state machine, handles and registry |

// ============================================================================
// Modules
// ============================================================================

/// Receive-buffer pool.
pub mod buffer;

/// Capability layers.
///
/// The stream layer is built in; [`capability::SecureHandshake`] and
/// [`capability::UpgradeHandshake`] are the seams for the layers above it.
pub mod capability;

/// Endpoint configuration.
pub mod config;

/// Server and client endpoints.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Events and listeners.
pub mod listener;

/// Scheduling primitives.
pub mod runtime;

/// Sessions.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Buffer types
pub use buffer::{BufferPool, Payload, PoolStats, PooledBuffer};

// Capability types
pub use capability::{
    AsyncIo, BoxedIo, CapabilityStack, LayerKind, Link, LinkReader, LinkWriter, Role,
    SecureHandshake, UpgradeHandshake, UpgradeTarget, WebSocketUpgrade,
};

// Configuration types
pub use config::{ClientBuilder, Endpoint, NotifyMode, Options, Protocol, ServerBuilder};

// Endpoint types
pub use endpoint::{Client, Server};

// Error types
pub use error::{Error, Result, clear_last_error, last_error};

// Identifier types
pub use identifiers::SessionId;

// Listener types
pub use listener::{Event, EventKind, Listener, Listeners};

// Session types
pub use session::{Registry, SessionHandle, SessionState};
