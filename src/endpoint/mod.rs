//! Server and client endpoints.
//!
//! An endpoint owns the pieces its sessions share: the capability stack,
//! the buffer pool, the listeners, the session registry and the execution
//! contexts.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Server`] | Accepts connections, one session each |
//! | [`Client`] | One outgoing session |

// ============================================================================
// Submodules
// ============================================================================

/// Client endpoint.
pub mod client;

/// Server endpoint.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::Client;
pub use server::Server;
