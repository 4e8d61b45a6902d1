//! Builder pattern for endpoint configuration.
//!
//! Assembles an endpoint string, option overrides, capability layers and
//! listeners into a [`Server`] or [`Client`].
//!
//! # Example
//!
//! ```ignore
//! use laneway::{NotifyMode, Server};
//!
//! let server = Server::builder("ws://127.0.0.1:0/chat")?
//!     .option("notify_mode", "async")
//!     .idle_timeout(Duration::from_secs(30))
//!     .listener(MyListener::default())
//!     .build()?;
//! ```
//!
//! # Layer Selection
//!
//! | Protocol | Secure layer | Upgrade layer |
//! |----------|--------------|---------------|
//! | `tcp` | not allowed | not allowed |
//! | `tcps` | required | not allowed |
//! | `ws` | not allowed | WebSocket unless overridden |
//! | `wss` | required | WebSocket unless overridden |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::{CapabilityStack, SecureHandshake, UpgradeHandshake, WebSocketUpgrade};
use crate::endpoint::{Client, Server};
use crate::error::{self, Error, Result};
use crate::listener::{Listener, Listeners};

use super::{Endpoint, NotifyMode, Options};

// ============================================================================
// EndpointConfig
// ============================================================================

/// Validated configuration shared by servers and clients.
pub(crate) struct EndpointConfig {
    pub(crate) endpoint: Endpoint,
    pub(crate) options: Arc<Options>,
    pub(crate) stack: CapabilityStack,
    pub(crate) listeners: Arc<Listeners>,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoint", &self.endpoint)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`Server`] or [`Client`].
///
/// Use [`Server::builder`] or [`Client::builder`] to create one.
pub struct Builder<E> {
    endpoint: Endpoint,
    /// Key/value overrides applied over the endpoint's options at build.
    overrides: Vec<(String, String)>,
    secure: Option<Arc<dyn SecureHandshake>>,
    upgrade: Option<Arc<dyn UpgradeHandshake>>,
    listeners: Vec<Arc<dyn Listener>>,
    _target: PhantomData<fn() -> E>,
}

/// Builder for a [`Server`].
pub type ServerBuilder = Builder<Server>;

/// Builder for a [`Client`].
pub type ClientBuilder = Builder<Client>;

impl<E> Builder<E> {
    /// Creates a builder from an endpoint string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint does not parse.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = error::record(Endpoint::parse(endpoint))?;
        Ok(Self::from_endpoint(endpoint))
    }

    /// Creates a builder from a parsed endpoint.
    #[must_use]
    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            overrides: Vec::new(),
            secure: None,
            upgrade: None,
            listeners: Vec::new(),
            _target: PhantomData,
        }
    }

    /// Replaces the endpoint's options wholesale.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.endpoint.options = options;
        self
    }

    /// Sets one option by key, as in an endpoint query string.
    ///
    /// Values are checked at build.
    #[inline]
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Sets the notification mode.
    #[inline]
    #[must_use]
    pub fn notify_mode(mut self, mode: NotifyMode) -> Self {
        self.endpoint.options.notify_mode = mode;
        self
    }

    /// Sets the idle timeout.
    #[inline]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.options.idle_timeout = Some(timeout);
        self
    }

    /// Sets the number of worker threads per dedicated execution context.
    #[inline]
    #[must_use]
    pub fn execution_context_pool_size(mut self, size: usize) -> Self {
        self.endpoint.options.execution_context_pool_size = size;
        self
    }

    /// Sets the secure layer.
    #[inline]
    #[must_use]
    pub fn secure(self, layer: impl SecureHandshake) -> Self {
        self.secure_arc(Arc::new(layer))
    }

    /// Sets a shared secure layer.
    #[inline]
    #[must_use]
    pub fn secure_arc(mut self, layer: Arc<dyn SecureHandshake>) -> Self {
        self.secure = Some(layer);
        self
    }

    /// Overrides the upgrade layer of `ws`/`wss` endpoints.
    #[inline]
    #[must_use]
    pub fn upgrade(self, layer: impl UpgradeHandshake) -> Self {
        self.upgrade_arc(Arc::new(layer))
    }

    /// Overrides the upgrade layer with a shared one.
    #[inline]
    #[must_use]
    pub fn upgrade_arc(mut self, layer: Arc<dyn UpgradeHandshake>) -> Self {
        self.upgrade = Some(layer);
        self
    }

    /// Binds a listener object.
    #[inline]
    #[must_use]
    pub fn listener(mut self, listener: impl Listener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Returns the endpoint as configured so far.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Validates everything and assembles the configuration.
    fn finish(self) -> Result<EndpointConfig> {
        let mut endpoint = self.endpoint;
        endpoint.options.apply_pairs(self.overrides)?;
        endpoint.options.validate()?;

        let protocol = endpoint.protocol;
        let mut stack = CapabilityStack::stream();

        match (protocol.is_secure(), self.secure) {
            (true, Some(layer)) => stack = stack.with_secure_arc(layer),
            (true, None) => {
                return Err(Error::config(format!(
                    "{protocol} requires a secure layer. Use .secure() to set it."
                )));
            }
            (false, Some(layer)) => {
                return Err(Error::config(format!(
                    "secure layer '{}' given for {protocol}; use {} instead",
                    layer.name(),
                    if protocol.is_upgrade() { "wss" } else { "tcps" }
                )));
            }
            (false, None) => {}
        }

        match (protocol.is_upgrade(), self.upgrade) {
            (true, Some(layer)) => stack = stack.with_upgrade_arc(layer),
            (true, None) => stack = stack.with_upgrade(WebSocketUpgrade::new()),
            (false, Some(layer)) => {
                return Err(Error::config(format!(
                    "upgrade layer '{}' given for {protocol}",
                    layer.name()
                )));
            }
            (false, None) => {}
        }

        let listeners = Arc::new(Listeners::new());
        for listener in self.listeners {
            listeners.bind_listener_arc(listener);
        }

        Ok(EndpointConfig {
            options: Arc::new(endpoint.options.clone()),
            endpoint,
            stack,
            listeners,
        })
    }
}

impl Builder<Server> {
    /// Builds the server.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a malformed option or a layer/protocol mismatch
    pub fn build(self) -> Result<Server> {
        error::record(self.finish()).map(Server::from_config)
    }
}

impl Builder<Client> {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a malformed option or a layer/protocol mismatch
    pub fn build(self) -> Result<Client> {
        error::record(self.finish()).map(Client::from_config)
    }
}

impl<E> fmt::Debug for Builder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("endpoint", &self.endpoint)
            .field("overrides", &self.overrides)
            .field("secure", &self.secure.as_ref().map(|l| l.name()))
            .field("upgrade", &self.upgrade.as_ref().map(|l| l.name()))
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
