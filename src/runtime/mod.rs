//! Scheduling primitives.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `lane` | Serial job queue with drain marker |
//! | `context` | I/O and notification runtimes |
//! | `timer` | Idle deadline and step timeouts |

// ============================================================================
// Submodules
// ============================================================================

/// I/O and notification runtimes.
pub mod context;

/// Serial execution lane.
pub mod lane;

/// Session timers.
pub mod timer;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::ExecutionContexts;
pub use lane::Lane;
pub use timer::{SilenceTimer, with_timeout};
