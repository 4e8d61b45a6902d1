//! Session handles.
//!
//! The registry owns each session's shared state. Everything else,
//! including user code and events, reaches a session through a
//! [`SessionHandle`] holding a weak reference; once the session is removed
//! from its registry every operation on the handle reports
//! [`Error::SessionClosed`].

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::trace;

use crate::capability::Role;
use crate::error::{self, Error, Result};
use crate::identifiers::SessionId;

use super::SessionState;

// ============================================================================
// Commands
// ============================================================================

/// Why a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// User asked the session to stop.
    Local,
    /// The owning endpoint is shutting down.
    Shutdown,
}

/// Work queued on a session lane.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Write one payload.
    Send(Bytes),
    /// Begin teardown.
    Stop(StopReason),
    /// Acknowledge once everything queued earlier has run.
    Drain(oneshot::Sender<()>),
}

// ============================================================================
// SessionShared
// ============================================================================

/// State shared between a session's lane, its registry and its handles.
pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) role: Role,
    pub(crate) state: watch::Sender<SessionState>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    /// `(local, remote)`, present only while running.
    pub(crate) addrs: Mutex<Option<(SocketAddr, SocketAddr)>>,
    /// Set once the close event has been issued.
    pub(crate) closed: AtomicBool,
    user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    last_active: Mutex<Instant>,
    pub(crate) last_error: Mutex<Option<Arc<Error>>>,
}

impl SessionShared {
    pub(crate) fn new(
        id: SessionId,
        role: Role,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            id,
            role,
            state: watch::Sender::new(SessionState::Initial),
            commands,
            addrs: Mutex::new(None),
            closed: AtomicBool::new(false),
            user_data: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
            last_error: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Queues a command unless teardown has begun.
    pub(crate) fn enqueue(&self, command: SessionCommand) -> Result<()> {
        if self.state().is_closing() {
            return Err(Error::SessionClosed);
        }
        self.commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }

    /// Requests teardown. No-op once teardown has begun.
    pub(crate) fn request_stop(&self, reason: StopReason) {
        if self.enqueue(SessionCommand::Stop(reason)).is_err() {
            trace!(session_id = %self.id, ?reason, "Stop ignored, session already closing");
        }
    }

    /// Records inbound activity.
    #[inline]
    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Non-owning reference to a session.
///
/// Cheap to clone. Handles compare equal when they refer to the same
/// session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    shared: Weak<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(shared: &Arc<SessionShared>) -> Self {
        Self {
            id: shared.id,
            shared: Arc::downgrade(shared),
        }
    }

    /// Returns the session identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns which side of the connection this session is.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.shared.upgrade().map(|shared| shared.role)
    }

    /// Returns the current state. A released session reports `Closed`.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared
            .upgrade()
            .map_or(SessionState::Closed, |shared| shared.state())
    }

    /// Returns `true` while data can flow.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Queues `data` for sending.
    ///
    /// `Ok` means queued, not written; the outcome is reported by the send
    /// event. Sends queued before the session is running are written once
    /// it is, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] once the session is closing or
    /// closed. The error is also recorded in [`crate::last_error`].
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        error::record(
            self.live()
                .and_then(|shared| shared.enqueue(SessionCommand::Send(data.into()))),
        )
    }

    /// Requests teardown. Idempotent.
    ///
    /// Takes effect without waiting for the peer: a write still in progress
    /// is abandoned, and it and every later send are reported as failed
    /// with [`Error::SessionClosed`]. Call [`flush`](Self::flush) first to
    /// deliver them.
    pub fn stop(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.request_stop(StopReason::Local);
        }
    }

    /// Requests teardown and waits until the session is closed.
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.closed().await;
    }

    /// Waits until the session is closed.
    pub async fn closed(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.subscribe();
        drop(shared);

        // A dropped sender means the session was released.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Waits until the session is running.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the session first, or
    /// [`Error::SessionClosed`] if it was stopped before running.
    pub async fn established(&self) -> Result<()> {
        let shared = self.live()?;
        let mut state = shared.state.subscribe();
        let reached = state
            .wait_for(|s| *s == SessionState::Running || s.is_closing())
            .await
            .map(|s| *s);

        match reached {
            Ok(SessionState::Running) => Ok(()),
            _ => Err(shared
                .last_error
                .lock()
                .as_deref()
                .map_or(Error::SessionClosed, |e| Error::connection(e.to_string()))),
        }
    }

    /// Waits until every send queued before this call has completed and its
    /// event has been delivered.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the session is closing or closed
    /// - [`Error::ChannelClosed`] if the session closed before reaching the marker
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        error::record(
            self.live()
                .and_then(|shared| shared.enqueue(SessionCommand::Drain(done_tx))),
        )?;
        error::record(done_rx.await.map_err(Error::from))
    }

    /// Returns the local address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running_addrs().map(|(local, _)| local)
    }

    /// Returns the remote address while running.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.running_addrs().map(|(_, remote)| remote)
    }

    /// Returns the local port while running.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Returns the remote port while running.
    #[must_use]
    pub fn remote_port(&self) -> Option<u16> {
        self.remote_addr().map(|addr| addr.port())
    }

    /// Returns how long the session has gone without receiving.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        self.shared
            .upgrade()
            .map(|shared| shared.last_active.lock().elapsed())
    }

    /// Returns the error that closed the session, once closing.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.shared
            .upgrade()
            .and_then(|shared| shared.last_error.lock().clone())
    }

    /// Attaches user data, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session was released.
    pub fn set_user_data<T: Any + Send + Sync>(&self, value: T) -> Result<()> {
        let shared = error::record(self.live())?;
        *shared.user_data.lock() = Some(Arc::new(value));
        Ok(())
    }

    /// Returns the user data if it is a `T`.
    #[must_use]
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.shared.upgrade()?.user_data.lock().clone()?;
        data.downcast::<T>().ok()
    }

    /// Upgrades the weak reference.
    fn live(&self) -> Result<Arc<SessionShared>> {
        self.shared.upgrade().ok_or(Error::SessionClosed)
    }

    fn running_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        let shared = self.shared.upgrade()?;
        if shared.state() != SessionState::Running {
            return None;
        }
        *shared.addrs.lock()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Arc<SessionShared>, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::new(SessionId::next(), Role::Server, tx));
        (shared, rx)
    }

    #[test]
    fn test_send_queues_in_order() {
        let (shared, mut rx) = shared();
        let handle = SessionHandle::new(&shared);

        handle.send("a").expect("send");
        handle.send(vec![b'b']).expect("send");

        assert!(matches!(rx.try_recv(), Ok(SessionCommand::Send(d)) if d == "a"));
        assert!(matches!(rx.try_recv(), Ok(SessionCommand::Send(d)) if d == "b"));
    }

    #[test]
    fn test_send_rejected_while_closing() {
        let (shared, _rx) = shared();
        let handle = SessionHandle::new(&shared);
        shared.state.send_replace(SessionState::Disconnecting);

        crate::error::clear_last_error();
        let err = handle.send("late").unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert_eq!(crate::error::last_error().as_deref(), Some("Session closed"));
    }

    #[test]
    fn test_released_session() {
        let (shared, _rx) = shared();
        let handle = SessionHandle::new(&shared);
        drop(shared);

        assert_eq!(handle.state(), SessionState::Closed);
        assert!(handle.send("x").is_err());
        assert!(handle.local_addr().is_none());
        assert!(handle.set_user_data(1u8).is_err());
        handle.stop();
    }

    #[test]
    fn test_addrs_only_while_running() {
        let (shared, _rx) = shared();
        let handle = SessionHandle::new(&shared);
        let local: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let remote: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        *shared.addrs.lock() = Some((local, remote));

        assert!(handle.local_addr().is_none());
        shared.state.send_replace(SessionState::Running);
        assert_eq!(handle.local_port(), Some(1000));
        assert_eq!(handle.remote_addr(), Some(remote));
    }

    #[test]
    fn test_user_data_roundtrip() {
        let (shared, _rx) = shared();
        let handle = SessionHandle::new(&shared);

        handle.set_user_data(String::from("alice")).expect("set");
        assert_eq!(handle.user_data::<String>().as_deref().map(String::as_str), Some("alice"));
        assert!(handle.user_data::<u32>().is_none());
    }

    #[tokio::test]
    async fn test_closed_resolves_on_release() {
        let (shared, _rx) = shared();
        let handle = SessionHandle::new(&shared);

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });
        tokio::task::yield_now().await;
        drop(shared);

        waiter.await.expect("waiter");
    }
}
