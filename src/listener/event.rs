//! Event records.
//!
//! Every lifecycle occurrence of an endpoint or session is reported as one
//! [`Event`]:
//!
//! | Kind | Session | Data | Error |
//! |------|---------|------|-------|
//! | `Listen` | – | – | – |
//! | `Accept` | yes | – | – |
//! | `Connect` | yes | – | connect failure |
//! | `Handshake` | yes | – | secure handshake failure |
//! | `Upgrade` | yes | – | upgrade failure |
//! | `Recv` | yes | received bytes | – |
//! | `Send` | yes | sent bytes | send failure |
//! | `Close` | yes | – | cause, `None` for a local stop |
//! | `Shutdown` | – | – | – |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::Payload;
use crate::error::Error;
use crate::session::SessionHandle;

// ============================================================================
// EventKind
// ============================================================================

/// Kinds of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Server started listening.
    Listen,
    /// Server accepted a connection.
    Accept,
    /// Client connect finished.
    Connect,
    /// Secure handshake finished.
    Handshake,
    /// Upgrade negotiation finished.
    Upgrade,
    /// Data received.
    Recv,
    /// A send finished.
    Send,
    /// Session closed.
    Close,
    /// Server stopped.
    Shutdown,
}

impl EventKind {
    /// Returns the lowercase event name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Listen => "listen",
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Upgrade => "upgrade",
            Self::Recv => "recv",
            Self::Send => "send",
            Self::Close => "close",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// Bytes attached to an event.
#[derive(Debug)]
enum EventData {
    Received(Payload),
    Sent(Bytes),
}

/// A tagged notification.
pub struct Event {
    kind: EventKind,
    session: Option<SessionHandle>,
    data: Option<EventData>,
    error: Option<Arc<Error>>,
}

impl Event {
    /// Creates an event with no session, data or error.
    #[must_use]
    pub(crate) fn new(kind: EventKind) -> Self {
        Self {
            kind,
            session: None,
            data: None,
            error: None,
        }
    }

    /// Creates a session event.
    #[must_use]
    pub(crate) fn for_session(kind: EventKind, session: SessionHandle) -> Self {
        Self {
            session: Some(session),
            ..Self::new(kind)
        }
    }

    /// Attaches an error.
    #[must_use]
    pub(crate) fn with_error(mut self, error: Option<Arc<Error>>) -> Self {
        self.error = error;
        self
    }

    /// Attaches received bytes.
    #[must_use]
    pub(crate) fn with_received(mut self, payload: Payload) -> Self {
        self.data = Some(EventData::Received(payload));
        self
    }

    /// Attaches sent bytes.
    #[must_use]
    pub(crate) fn with_sent(mut self, data: Bytes) -> Self {
        self.data = Some(EventData::Sent(data));
        self
    }

    /// Returns the event kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the session the event is about.
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Returns the received or sent bytes (empty for other kinds).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match &self.data {
            Some(EventData::Received(payload)) => payload,
            Some(EventData::Sent(bytes)) => bytes,
            None => &[],
        }
    }

    /// Returns the error carried by the event.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_deref()
    }

    /// Returns `true` if the event reports a failure.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("session", &self.session.as_ref().map(SessionHandle::id))
            .field("len", &self.data().len())
            .field("error", &self.error)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
