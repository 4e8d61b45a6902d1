//! Client endpoint.
//!
//! A client runs one outgoing session at a time. Starting it registers the
//! session and begins connecting in the background; the outcome arrives
//! as the connect event, or can be awaited with [`Client::connect`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::{BufferPool, PoolStats};
use crate::config::{ClientBuilder, Endpoint, EndpointConfig};
use crate::error::{self, Error, Result};
use crate::listener::{Dispatcher, Listeners};
use crate::runtime::ExecutionContexts;
use crate::session::{self, Origin, Registry, SessionContext, SessionHandle, SessionState};

// ============================================================================
// Client
// ============================================================================

/// Resources of the current connection attempt.
struct Active {
    contexts: Arc<ExecutionContexts>,
    session: SessionHandle,
}

/// Opens one session to a server.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder("tcp://127.0.0.1:8088")?.build()?;
/// client.listeners().bind_recv(|_, data| println!("{data:?}"));
///
/// client.connect().await?;
/// client.send("ping")?;
/// client.stop().await?;
/// ```
pub struct Client {
    config: EndpointConfig,
    registry: Arc<Registry>,
    pool: BufferPool,
    active: Mutex<Option<Active>>,
}

impl Client {
    /// Returns a builder for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint does not parse.
    pub fn builder(endpoint: &str) -> Result<ClientBuilder> {
        ClientBuilder::new(endpoint)
    }

    /// Creates a client for a `tcp` or `ws` endpoint with default layers.
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
            active: Mutex::new(None),
        }
    }

    /// Starts connecting in the background.
    ///
    /// Returns once the session is registered. Data sent before the
    /// connection is up is written once it is.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the current session has not closed
    /// - [`Error::Config`] if no runtime is available or options are invalid
    pub fn start(&self) -> Result<SessionHandle> {
        error::record(self.launch())
    }

    /// Starts connecting and waits until the session is running.
    ///
    /// # Errors
    ///
    /// Everything [`Client::start`] returns, plus a connection error carrying
    /// the cause if the session closes before running.
    pub async fn connect(&self) -> Result<SessionHandle> {
        let session = self.start()?;
        error::record(session.established().await)?;
        Ok(session)
    }

    /// Stops the session and waits for it to close.
    ///
    /// Does nothing if the client was never started.
    pub async fn stop(&self) -> Result<()> {
        let Some(active) = self.active.lock().take() else {
            return Ok(());
        };

        active.session.stop_and_wait().await;
        self.registry.shutdown_all().await;
        active.contexts.shutdown();

        info!(endpoint = %self.config.endpoint.authority(), "Client stopped");
        Ok(())
    }

    /// Returns `true` from start until the session has closed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.session.state() != SessionState::Closed)
    }

    /// Queues `data` on the session.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the client was never started
    /// - [`Error::SessionClosed`] if the session is closing or closed
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let session = error::record(self.session().ok_or(Error::NotRunning))?;
        session.send(data)
    }

    /// Returns the current session.
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.active.lock().as_ref().map(|active| active.session.clone())
    }

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

    /// Returns the local address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session()?.local_addr()
    }

    /// Returns the server address while running.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.session()?.remote_addr()
    }

    /// Returns receive-buffer pool counters.
    #[inline]
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn launch(&self) -> Result<SessionHandle> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.session.state() != SessionState::Closed {
                return Err(Error::AlreadyRunning);
            }
            current.contexts.shutdown();
        }

        let options = Arc::clone(&self.config.options);
        options.validate()?;
        let contexts = Arc::new(ExecutionContexts::new(options.execution_context_pool_size)?);

        self.registry.reopen();
        let ctx = Arc::new(SessionContext {
            stack: self.config.stack.clone(),
            pool: self.pool.clone(),
            dispatcher: Dispatcher::new(Arc::clone(&self.config.listeners), options.notify_mode),
            options,
            registry: Arc::clone(&self.registry),
            contexts: Arc::clone(&contexts),
            authority: self.config.endpoint.authority(),
            path: self.config.endpoint.path.clone(),
        });

        let session = session::spawn(&ctx, Origin::Connect)?;
        debug!(
            session_id = %session.id(),
            endpoint = %ctx.authority,
            layers = ?self.config.stack.layers(),
            "Client connecting"
        );

        *active = Some(Active {
            contexts,
            session: session.clone(),
        });
        Ok(session)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.session.stop();
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.config.endpoint)
            .field("session", &self.session())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Client::new(&format!("tcp://{addr}")).expect("client");

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let session = client.connect().await.expect("connect");
        assert!(client.is_running());
        assert_eq!(client.remote_addr(), Some(addr));
        assert_eq!(session.remote_port(), Some(addr.port()));

        tokio_test::assert_ok!(client.send("hi"));
        let mut peer = accept.await.unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        client.stop().await.expect("stop");
        assert!(!client.is_running());
        assert!(session.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(&format!("tcp://{addr}")).expect("client");
        let err = client.connect().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_send_before_start() {
        let client = Client::new("tcp://127.0.0.1:1").expect("client");
        assert!(matches!(client.send("x"), Err(Error::NotRunning)));
        client.stop().await.expect("stop is a no-op");
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client =
            Client::new(&format!("tcp://{}", listener.local_addr().unwrap())).expect("client");

        client.start().expect("start");
        assert!(matches!(client.start(), Err(Error::AlreadyRunning)));
        client.stop().await.expect("stop");
    }
}
