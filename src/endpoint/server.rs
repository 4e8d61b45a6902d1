//! Server endpoint.
//!
//! A server binds its endpoint address, accepts connections and runs one
//! session per connection. All sessions share the server's capability
//! stack, buffer pool, listeners and execution contexts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Server                   │
//! │  accept loop ──► session::spawn          │
//! │  ┌────────────────────────────────────┐  │
//! │  │ Registry                           │  │
//! │  │  SessionId=1 → lane 1              │  │
//! │  │  SessionId=2 → lane 2              │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferPool, PoolStats};
use crate::capability::stream;
use crate::config::{Endpoint, EndpointConfig, ServerBuilder};
use crate::error::{self, Error, Result};
use crate::identifiers::SessionId;
use crate::listener::{Dispatcher, Event, EventKind, Listeners};
use crate::runtime::{ExecutionContexts, Lane};
use crate::session::{self, Origin, Registry, SessionContext, SessionHandle};

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// Types
// ============================================================================

/// Resources that exist only while the server runs.
struct Active {
    ctx: Arc<SessionContext>,
    local_addr: SocketAddr,
    /// Server-level notification lane in async mode.
    lane: Option<Lane>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

// ============================================================================
// Server
// ============================================================================

/// Accepts connections and runs a session for each.
///
/// # Example
///
/// ```ignore
/// let server = Server::builder("tcp://127.0.0.1:0")?.build()?;
/// server.listeners().bind_recv(|session, data| {
///     let _ = session.send(data.to_vec());
/// });
///
/// server.start().await?;
/// println!("listening on {:?}", server.local_addr());
/// server.stop().await?;
/// ```
pub struct Server {
    config: EndpointConfig,
    registry: Arc<Registry>,
    pool: BufferPool,
    /// Set from the start of `start` to the end of `stop`.
    running: AtomicBool,
    active: Mutex<Option<Active>>,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Returns a builder for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint does not parse.
    pub fn builder(endpoint: &str) -> Result<ServerBuilder> {
        ServerBuilder::new(endpoint)
    }

    /// Creates a server for a `tcp` or `ws` endpoint with default layers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed endpoint, or for `tcps`
    /// and `wss`, which need a secure layer from the builder.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::builder(endpoint)?.build()
    }

    pub(crate) fn from_config(config: EndpointConfig) -> Self {
        let pool = BufferPool::new(
            config.options.pool_buffer_size,
            config.options.max_pooled_buffers,
        );

        Self {
            config,
            registry: Arc::new(Registry::new()),
            pool,
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }
}

// ============================================================================
// Server - Lifecycle
// ============================================================================

impl Server {
    /// Binds the endpoint and starts accepting.
    ///
    /// Fires the listen event once accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if started twice
    /// - [`Error::Config`] if no runtime is available or options are invalid
    /// - [`Error::Io`] if binding fails
    pub async fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return error::record(Err(Error::AlreadyRunning));
        }

        match self.launch().await {
            Ok(active) => {
                *self.active.lock() = Some(active);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!(endpoint = %self.config.endpoint.authority(), error = %e, "Server start failed");
                error::record(Err(e))
            }
        }
    }

    /// Stops accepting, stops every session and waits for them to close.
    ///
    /// Fires the shutdown event once every session has closed. Does nothing
    /// if the server is not running.
    pub async fn stop(&self) -> Result<()> {
        let Some(active) = self.active.lock().take() else {
            return Ok(());
        };

        info!(addr = %active.local_addr, "Server stopping");

        let _ = active.shutdown.send(true);
        if let Err(e) = active.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }

        self.registry.shutdown_all().await;

        active
            .ctx
            .dispatcher
            .notify(active.lane.as_ref(), Event::new(EventKind::Shutdown));
        if let Some(lane) = &active.lane
            && let Err(e) = lane.drain().await
        {
            trace!(error = %e, "Server notification lane already stopped");
        }

        active.ctx.contexts.shutdown();
        self.running.store(false, Ordering::Release);

        info!(addr = %active.local_addr, "Server stopped");
        Ok(())
    }

    /// Returns `true` while started.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    async fn launch(&self) -> Result<Active> {
        let options = Arc::clone(&self.config.options);
        options.validate()?;

        let contexts = Arc::new(ExecutionContexts::new(options.execution_context_pool_size)?);

        // Bind inside the I/O context so the socket uses its reactor.
        let authority = self.config.endpoint.authority();
        let listener = {
            let authority = authority.clone();
            let options = Arc::clone(&options);
            contexts
                .io()
                .spawn(async move { stream::bind(&authority, &options).await })
                .await
                .map_err(|e| Error::connection(format!("bind task failed: {e}")))??
        };
        let local_addr = listener.local_addr()?;

        self.registry.reopen();

        let dispatcher = Dispatcher::new(Arc::clone(&self.config.listeners), options.notify_mode);
        let lane = dispatcher.lane_for(contexts.notify());
        let ctx = Arc::new(SessionContext {
            stack: self.config.stack.clone(),
            pool: self.pool.clone(),
            options,
            dispatcher,
            registry: Arc::clone(&self.registry),
            contexts: Arc::clone(&contexts),
            authority,
            path: self.config.endpoint.path.clone(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = contexts
            .io()
            .spawn(accept_loop(listener, Arc::clone(&ctx), shutdown_rx));

        info!(
            protocol = %self.config.endpoint.protocol,
            addr = %local_addr,
            layers = ?self.config.stack.layers(),
            "Server listening"
        );
        ctx.dispatcher.notify(lane.as_ref(), Event::new(EventKind::Listen));

        Ok(Active {
            ctx,
            local_addr,
            lane,
            shutdown,
            accept_task,
        })
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the parsed endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Returns the listeners events are delivered to.
    #[inline]
    #[must_use]
    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.config.listeners
    }

    /// Returns the session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().as_ref().map(|active| active.local_addr)
    }

    /// Returns the bound port while running.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Looks a live session up.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.registry.get(id)
    }

    /// Returns handles to every live session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.registry.handles()
    }

    /// Queues `data` on a session.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if no live session has `id`
    /// - [`Error::SessionClosed`] if the session is closing
    pub fn send(&self, id: SessionId, data: impl Into<Bytes>) -> Result<()> {
        let session = error::record(self.registry.get(id).ok_or(Error::session_not_found(id)))?;
        session.send(data)
    }

    /// Queues `data` on every running session.
    ///
    /// Returns how many sessions accepted it.
    pub fn broadcast(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let mut queued = 0;

        self.registry.for_each(|session| {
            if session.is_running() && session.send(data.clone()).is_ok() {
                queued += 1;
            }
        });

        debug!(queued, len = data.len(), "Broadcast queued");
        queued
    }

    /// Returns receive-buffer pool counters.
    #[inline]
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

/// Accepts until the shutdown signal, spawning a session per connection.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Accept loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((tcp, addr)) => {
                    trace!(?addr, "Connection accepted");
                    if let Err(e) = session::spawn(&ctx, Origin::Accepted(tcp)) {
                        warn!(?addr, error = %e, "Session rejected");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    debug!("Accept loop terminated");
}

// ============================================================================
// Server - Drop
// ============================================================================

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            let _ = active.shutdown.send(true);
            self.registry.for_each(SessionHandle::stop);
            debug!(addr = %active.local_addr, "Server dropped while running");
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("endpoint", &self.config.endpoint)
            .field("local_addr", &self.local_addr())
            .field("sessions", &self.session_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = Server::new("tcp://127.0.0.1:0").expect("server");
        let events = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&events);
        server.listeners().bind_listen(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&events);
        server.listeners().bind_shutdown(move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        assert!(!server.is_running());
        server.start().await.expect("start");
        assert!(server.is_running());
        assert!(server.port().is_some_and(|p| p > 0));

        server.stop().await.expect("stop");
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert_eq!(events.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let server = Server::new("tcp://127.0.0.1:0").expect("server");
        server.start().await.expect("start");

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));

        server.stop().await.expect("stop");
        server.stop().await.expect("second stop is a no-op");
    }

    #[tokio::test]
    async fn test_restart() {
        let server = Server::new("tcp://127.0.0.1:0").expect("server");
        server.start().await.expect("start");
        server.stop().await.expect("stop");
        server.start().await.expect("restart");
        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_echo_with_raw_peer() {
        let server = Server::new("tcp://127.0.0.1:0").expect("server");
        server.listeners().bind_recv(|session, data| {
            let _ = session.send(data.to_vec());
        });
        server.start().await.expect("start");

        let mut peer = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert_eq!(server.session_count(), 1);
        let session = server.sessions().pop().expect("session");
        assert!(server.session(session.id()).is_some());

        server.stop().await.expect("stop");
        assert_eq!(server.session_count(), 0);
        assert!(server.send(session.id(), "x").unwrap_err().is_closed());
    }
}
