//! Session lifecycle states.
//!
//! ```text
//! Initial → Connecting → (Handshaking) → (Upgrading) → Running → Disconnecting → Closed
//!               │              │              │
//!               └──────────────┴──────────────┴──── error / stop ──→ Disconnecting
//! ```
//!
//! `Handshaking` appears only with a secure layer, `Upgrading` only with an
//! upgrade layer. States only move forward; `Closed` is absorbing.

use std::fmt;

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, nothing started.
    #[default]
    Initial,
    /// Transport connect or accept in progress.
    Connecting,
    /// Secure handshake in progress.
    Handshaking,
    /// Upgrade negotiation in progress.
    Upgrading,
    /// Established; data flows.
    Running,
    /// Tearing down.
    Disconnecting,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Position in the lifecycle.
    const fn rank(self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Connecting => 1,
            Self::Handshaking => 2,
            Self::Upgrading => 3,
            Self::Running => 4,
            Self::Disconnecting => 5,
            Self::Closed => 6,
        }
    }

    /// Returns `true` if moving to `next` goes forward in the lifecycle.
    #[inline]
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }

    /// Returns `true` while the transport is owned by the session.
    #[inline]
    #[must_use]
    pub const fn has_transport(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Upgrading | Self::Running
        )
    }

    /// Returns `true` once teardown has begun.
    #[inline]
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Disconnecting | Self::Closed)
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Upgrading => "upgrading",
            Self::Running => "running",
            Self::Disconnecting => "disconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
