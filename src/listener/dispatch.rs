//! Inline and deferred delivery.
//!
//! | Mode | Where handlers run |
//! |------|--------------------|
//! | [`NotifyMode::Sync`] | directly on the session lane that produced the event |
//! | [`NotifyMode::Async`] | on the session's notification lane, on the notification context |
//!
//! In both modes the events of one session reach handlers in the order the
//! session produced them, whatever their kind. Events of different
//! sessions are not ordered relative to each other.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::config::NotifyMode;
use crate::runtime::Lane;

use super::{Event, Listeners};

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes events to listeners according to the notify mode.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    listeners: Arc<Listeners>,
    mode: NotifyMode,
}

impl Dispatcher {
    /// Creates a dispatcher over `listeners`.
    #[must_use]
    pub fn new(listeners: Arc<Listeners>, mode: NotifyMode) -> Self {
        Self { listeners, mode }
    }

    /// Returns the notify mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> NotifyMode {
        self.mode
    }

    /// Returns the bound listeners.
    #[inline]
    #[must_use]
    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    /// Creates the notification lane for one session, if the mode defers.
    #[must_use]
    pub fn lane_for(&self, notify: &Handle) -> Option<Lane> {
        match self.mode {
            NotifyMode::Sync => None,
            NotifyMode::Async => Some(Lane::spawn(notify, "notify")),
        }
    }

    /// Delivers `event`, inline or through `lane`.
    ///
    /// Without a lane, or once the lane has stopped, delivery is inline.
    pub fn notify(&self, lane: Option<&Lane>, event: Event) {
        let lane = match lane {
            Some(lane) if !lane.is_closed() => lane,
            _ => {
                self.listeners.deliver(&event);
                return;
            }
        };

        let kind = event.kind();
        let listeners = Arc::clone(&self.listeners);
        if lane.post(move || listeners.deliver(&event)).is_err() {
            warn!(%kind, "Notification lane stopped, event dropped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
