//! Sessions.
//!
//! A session is one live connection and its state machine.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `state` | [`SessionState`] lifecycle |
//! | `handle` | [`SessionHandle`], the non-owning user-facing reference |
//! | `registry` | [`Registry`] owning the live sessions of an endpoint |
//! | `runner` | The per-session lane driving the capability stack |

// ============================================================================
// Submodules
// ============================================================================

/// Session handles.
pub mod handle;

/// Session registry.
pub mod registry;

/// Session lane.
pub(crate) mod runner;

/// Session lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use handle::SessionHandle;
pub use registry::Registry;
pub use state::SessionState;

pub(crate) use handle::{SessionCommand, SessionShared, StopReason};
pub(crate) use runner::{Origin, SessionContext, spawn};
