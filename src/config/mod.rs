//! Endpoint configuration.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | [`Endpoint`] string parsing and [`Protocol`] |
//! | `options` | [`Options`] and the flat key/value form |
//! | `builder` | [`ServerBuilder`] / [`ClientBuilder`] |

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint builders.
pub mod builder;

/// Endpoint strings.
pub mod endpoint;

/// Connection options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{Builder, ClientBuilder, ServerBuilder};
pub use endpoint::{Endpoint, Protocol};
pub use options::{NotifyMode, Options};

pub(crate) use builder::EndpointConfig;
