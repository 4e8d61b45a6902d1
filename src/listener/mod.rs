//! Event listeners.
//!
//! User code observes endpoints through listeners. There are two ways to
//! bind one:
//!
//! - implement [`Listener`] and bind the object; every event is offered to
//!   its [`Listener::on_event`], which by default routes to the `on_*`
//!   method for the event kind
//! - bind a closure for one event kind with a `bind_*` method
//!
//! Bindings of both forms are invoked for each event in the order they
//! were registered. A panicking handler is caught and logged; it never
//! interrupts the session that produced the event.
//!
//! # Example
//!
//! ```ignore
//! let server = Server::builder("tcp://127.0.0.1:0")?.build()?;
//!
//! server.listeners().bind_recv(|session, data| {
//!     let _ = session.send(data.to_vec());
//! });
//! server.listeners().bind_close(|session, error| {
//!     println!("{} closed: {:?}", session.id(), error);
//! });
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Inline and deferred delivery.
pub mod dispatch;

/// Event records.
pub mod event;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::error::Error;
use crate::session::SessionHandle;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatch::Dispatcher;
pub use event::{Event, EventKind};

// ============================================================================
// Listener
// ============================================================================

/// Receives endpoint and session events.
///
/// Every method has an empty default, so implementors override only what
/// they need. Handlers run on the session's lane (or its notification lane
/// in async mode) and must not block.
#[allow(unused_variables)]
pub trait Listener: Send + Sync + 'static {
    /// Receives every event. Routes to the per-kind methods by default.
    fn on_event(&self, event: &Event) {
        let Some(session) = event.session() else {
            match event.kind() {
                EventKind::Listen => self.on_listen(),
                EventKind::Shutdown => self.on_shutdown(event.error()),
                _ => {}
            }
            return;
        };

        match event.kind() {
            EventKind::Accept => self.on_accept(session),
            EventKind::Connect => self.on_connect(session, event.error()),
            EventKind::Handshake => self.on_handshake(session, event.error()),
            EventKind::Upgrade => self.on_upgrade(session, event.error()),
            EventKind::Recv => self.on_recv(session, event.data()),
            EventKind::Send => self.on_send(session, event.data(), event.error()),
            EventKind::Close => self.on_close(session, event.error()),
            EventKind::Listen | EventKind::Shutdown => {}
        }
    }

    /// Server started listening.
    fn on_listen(&self) {}

    /// Server accepted a session.
    fn on_accept(&self, session: &SessionHandle) {}

    /// Client connect finished, with the failure if any.
    fn on_connect(&self, session: &SessionHandle, error: Option<&Error>) {}

    /// Secure handshake finished, with the failure if any.
    fn on_handshake(&self, session: &SessionHandle, error: Option<&Error>) {}

    /// Upgrade negotiation finished, with the failure if any.
    fn on_upgrade(&self, session: &SessionHandle, error: Option<&Error>) {}

    /// Bytes received.
    fn on_recv(&self, session: &SessionHandle, data: &[u8]) {}

    /// A send finished, with the failure if any.
    fn on_send(&self, session: &SessionHandle, data: &[u8], error: Option<&Error>) {}

    /// Session closed. `error` is `None` for a local stop.
    fn on_close(&self, session: &SessionHandle, error: Option<&Error>) {}

    /// Server stopped.
    fn on_shutdown(&self, error: Option<&Error>) {}
}

// ============================================================================
// Listeners
// ============================================================================

/// Closure bound to one event kind.
type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// One registration.
#[derive(Clone)]
enum Binding {
    /// Listener object offered every event.
    Object(Arc<dyn Listener>),
    /// Closure for one kind.
    Handler(EventKind, Handler),
}

/// Ordered set of bindings shared by an endpoint and its sessions.
#[derive(Default)]
pub struct Listeners {
    bindings: RwLock<Vec<Binding>>,
}

impl Listeners {
    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a listener object.
    pub fn bind_listener(&self, listener: impl Listener) {
        self.bind_listener_arc(Arc::new(listener));
    }

    /// Binds a shared listener object.
    pub fn bind_listener_arc(&self, listener: Arc<dyn Listener>) {
        self.bindings.write().push(Binding::Object(listener));
    }

    /// Binds a raw event handler for `kind`.
    pub fn bind(&self, kind: EventKind, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.bindings
            .write()
            .push(Binding::Handler(kind, Arc::new(handler)));
    }

    /// Binds a handler for [`EventKind::Listen`].
    pub fn bind_listen(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.bind(EventKind::Listen, move |_| handler());
    }

    /// Binds a handler for [`EventKind::Accept`].
    pub fn bind_accept(&self, handler: impl Fn(&SessionHandle) + Send + Sync + 'static) {
        self.bind(EventKind::Accept, move |event| {
            if let Some(session) = event.session() {
                handler(session);
            }
        });
    }

    /// Binds a handler for [`EventKind::Connect`].
    pub fn bind_connect(
        &self,
        handler: impl Fn(&SessionHandle, Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind_session_result(EventKind::Connect, handler);
    }

    /// Binds a handler for [`EventKind::Handshake`].
    pub fn bind_handshake(
        &self,
        handler: impl Fn(&SessionHandle, Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind_session_result(EventKind::Handshake, handler);
    }

    /// Binds a handler for [`EventKind::Upgrade`].
    pub fn bind_upgrade(
        &self,
        handler: impl Fn(&SessionHandle, Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind_session_result(EventKind::Upgrade, handler);
    }

    /// Binds a handler for [`EventKind::Recv`].
    pub fn bind_recv(&self, handler: impl Fn(&SessionHandle, &[u8]) + Send + Sync + 'static) {
        self.bind(EventKind::Recv, move |event| {
            if let Some(session) = event.session() {
                handler(session, event.data());
            }
        });
    }

    /// Binds a handler for [`EventKind::Send`].
    pub fn bind_send(
        &self,
        handler: impl Fn(&SessionHandle, &[u8], Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind(EventKind::Send, move |event| {
            if let Some(session) = event.session() {
                handler(session, event.data(), event.error());
            }
        });
    }

    /// Binds a handler for [`EventKind::Close`].
    pub fn bind_close(
        &self,
        handler: impl Fn(&SessionHandle, Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind_session_result(EventKind::Close, handler);
    }

    /// Binds a handler for [`EventKind::Shutdown`].
    pub fn bind_shutdown(&self, handler: impl Fn(Option<&Error>) + Send + Sync + 'static) {
        self.bind(EventKind::Shutdown, move |event| handler(event.error()));
    }

    /// Removes every binding.
    pub fn clear(&self) {
        self.bindings.write().clear();
    }

    /// Returns the number of bindings.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns `true` if nothing is bound.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Invokes every binding interested in `event`, in registration order.
    ///
    /// The binding list is snapshotted first, so handlers may bind more
    /// handlers; those see the next event.
    pub fn deliver(&self, event: &Event) {
        let bindings = self.bindings.read().clone();

        for binding in &bindings {
            let outcome = catch_unwind(AssertUnwindSafe(|| match binding {
                Binding::Object(listener) => listener.on_event(event),
                Binding::Handler(kind, handler) if *kind == event.kind() => handler(event),
                Binding::Handler(..) => {}
            }));

            if outcome.is_err() {
                error!(
                    kind = %event.kind(),
                    session = ?event.session().map(SessionHandle::id),
                    "Event handler panicked"
                );
            }
        }
    }

    fn bind_session_result(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionHandle, Option<&Error>) + Send + Sync + 'static,
    ) {
        self.bind(kind, move |event| {
            if let Some(session) = event.session() {
                handler(session, event.error());
            }
        });
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("bindings", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Listener for Recorder {
        fn on_listen(&self) {
            self.seen.lock().push(format!("{}:listen", self.tag));
        }

        fn on_shutdown(&self, _error: Option<&Error>) {
            self.seen.lock().push(format!("{}:shutdown", self.tag));
        }
    }

    #[test]
    fn test_registration_order() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        listeners.bind_listener(Recorder {
            tag: "a",
            seen: Arc::clone(&seen),
        });
        let log = Arc::clone(&seen);
        listeners.bind_listen(move || log.lock().push("closure:listen".to_string()));
        listeners.bind_listener(Recorder {
            tag: "b",
            seen: Arc::clone(&seen),
        });

        listeners.deliver(&Event::new(EventKind::Listen));

        assert_eq!(
            *seen.lock(),
            vec!["a:listen", "closure:listen", "b:listen"]
        );
    }

    #[test]
    fn test_handlers_filter_by_kind() {
        let listeners = Listeners::new();
        let listens = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&listens);
        listeners.bind_listen(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&shutdowns);
        listeners.bind_shutdown(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.deliver(&Event::new(EventKind::Shutdown));
        listeners.deliver(&Event::new(EventKind::Shutdown));

        assert_eq!(listens.load(Ordering::SeqCst), 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let listeners = Listeners::new();
        let after = Arc::new(AtomicUsize::new(0));

        listeners.bind_listen(|| panic!("handler failure"));
        let counter = Arc::clone(&after);
        listeners.bind_listen(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.deliver(&Event::new(EventKind::Listen));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let listeners = Listeners::new();
        listeners.bind_listen(|| {});
        assert_eq!(listeners.len(), 1);
        listeners.clear();
        assert!(listeners.is_empty());
    }
}
