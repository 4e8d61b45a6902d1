//! Session registry.
//!
//! The registry is the one owner of the sessions of an endpoint. It holds
//! the strong reference to each session's shared state; everything else
//! holds [`SessionHandle`]s.
//!
//! A session is inserted when it is created and removed by its own lane at
//! the very end of its close sequence, so an identity never leaves the
//! registry while the session can still run.
//!
//! The membership map is guarded by a short-held mutex that is never held
//! across an await or a user callback.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::{SessionHandle, SessionShared, StopReason};

// ============================================================================
// Registry
// ============================================================================

/// Live sessions of one endpoint, keyed by identity.
pub struct Registry {
    sessions: Mutex<FxHashMap<SessionId, Arc<SessionShared>>>,
    /// Set while draining; new sessions are refused.
    shutting_down: AtomicBool,
    /// Mirrors the map size for waiters.
    count: watch::Sender<usize>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            shutting_down: AtomicBool::new(false),
            count: watch::Sender::new(0),
        }
    }

    /// Assigns an identity and inserts the session built by `make`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryShutdown`] while the registry is draining.
    pub(crate) fn insert(
        &self,
        make: impl FnOnce(SessionId) -> Arc<SessionShared>,
    ) -> Result<Arc<SessionShared>> {
        let mut sessions = self.sessions.lock();
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::RegistryShutdown);
        }

        let id = SessionId::next();
        let shared = make(id);
        sessions.insert(id, Arc::clone(&shared));
        self.count.send_replace(sessions.len());
        drop(sessions);

        debug!(session_id = %id, "Session registered");
        Ok(shared)
    }

    /// Removes a session. Returns `false` if it was not present.
    pub(crate) fn remove(&self, id: SessionId) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(&id);
            self.count.send_replace(sessions.len());
            removed
        };

        if removed.is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
        removed.is_some()
    }

    /// Looks a session up by identity.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(&id).map(SessionHandle::new)
    }

    /// Returns handles to every live session.
    #[must_use]
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .values()
            .map(SessionHandle::new)
            .collect()
    }

    /// Calls `f` for every live session.
    ///
    /// Runs on a snapshot taken under the lock; `f` itself runs unlocked
    /// and may touch the registry.
    pub fn for_each(&self, mut f: impl FnMut(&SessionHandle)) {
        for handle in self.handles() {
            f(&handle);
        }
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while draining.
    #[inline]
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stops every session and waits until the registry is empty.
    ///
    /// New sessions are refused from the moment this is called until
    /// [`Registry::reopen`].
    pub async fn shutdown_all(&self) {
        let live: Vec<_> = {
            let sessions = self.sessions.lock();
            self.shutting_down.store(true, Ordering::Release);
            sessions.values().cloned().collect()
        };

        info!(sessions = live.len(), "Stopping all sessions");

        let mut count = self.count.subscribe();
        for shared in live {
            shared.request_stop(StopReason::Shutdown);
        }

        // The sender lives in `self`, so this only ends once the map is empty.
        let _ = count.wait_for(|n| *n == 0).await;
        debug!("All sessions stopped");
    }

    /// Accepts new sessions again after [`Registry::shutdown_all`].
    pub(crate) fn reopen(&self) {
        self.shutting_down.store(false, Ordering::Release);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::capability::Role;
    use crate::session::SessionCommand;

    /// Inserts a session whose "lane" removes it on the first stop.
    fn insert_stoppable(registry: &Arc<Registry>) -> SessionHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = registry
            .insert(|id| Arc::new(SessionShared::new(id, Role::Server, tx)))
            .expect("insert");
        let id = shared.id;
        let handle = SessionHandle::new(&shared);

        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let SessionCommand::Stop(_) = command {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    registry.remove(id);
                    break;
                }
            }
        });
        handle
    }

    #[tokio::test]
    async fn test_insert_assigns_unique_ids() {
        let registry = Arc::new(Registry::new());
        let ids: HashSet<_> = (0..50).map(|_| insert_stoppable(&registry).id()).collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(registry.len(), 50);
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let registry = Arc::new(Registry::new());
        let handle = insert_stoppable(&registry);

        assert_eq!(registry.get(handle.id()), Some(handle.clone()));
        assert!(registry.remove(handle.id()));
        assert!(!registry.remove(handle.id()));
        assert!(registry.get(handle.id()).is_none());
        assert_eq!(handle.state(), crate::session::SessionState::Closed);
    }

    #[tokio::test]
    async fn test_for_each_may_reenter() {
        let registry = Arc::new(Registry::new());
        for _ in 0..3 {
            insert_stoppable(&registry);
        }

        let mut visited = 0;
        registry.for_each(|handle| {
            visited += 1;
            assert!(registry.get(handle.id()).is_some());
        });
        assert_eq!(visited, 3);
    }

    #[tokio::test]
    async fn test_shutdown_all_empties_registry() {
        let registry = Arc::new(Registry::new());
        for _ in 0..20 {
            insert_stoppable(&registry);
        }

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert!(registry.is_shutting_down());
    }

    #[tokio::test]
    async fn test_insert_refused_while_draining() {
        let registry = Arc::new(Registry::new());
        registry.shutdown_all().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = registry.insert(|id| Arc::new(SessionShared::new(id, Role::Client, tx)));
        assert!(matches!(result, Err(Error::RegistryShutdown)));

        registry.reopen();
        assert!(!registry.is_shutting_down());
        insert_stoppable(&registry);
        assert_eq!(registry.len(), 1);
    }
}
