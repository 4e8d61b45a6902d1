//! Connection options and their flat key/value form.
//!
//! Provides a type-safe interface for the knobs an endpoint accepts:
//! notification mode, socket and pool buffer sizes, execution context
//! count, and the idle/connect/handshake timeouts.
//!
//! # Example
//!
//! ```ignore
//! use laneway::{NotifyMode, Options};
//!
//! let options = Options::new()
//!     .with_notify_mode(NotifyMode::Async)
//!     .with_pool_buffer_size(4096)
//!     .with_idle_timeout(Duration::from_secs(30));
//!
//! let parsed = Options::from_pairs([("recv_buffer_size", "1024k")])?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default size of one pooled receive buffer.
pub const DEFAULT_POOL_BUFFER_SIZE: usize = 1024;

/// Default number of idle buffers the pool keeps.
pub const DEFAULT_MAX_POOLED_BUFFERS: usize = 256;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default secure/upgrade handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// NotifyMode
// ============================================================================

/// Where event handlers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NotifyMode {
    /// Handlers run inline on the lane that produced the event.
    #[default]
    Sync,
    /// Handlers run on a separate notification lane.
    Async,
}

impl FromStr for NotifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(Error::config(format!(
                "notify_mode must be 'sync' or 'async', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("sync"),
            Self::Async => f.write_str("async"),
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Inline or deferred event dispatch.
    pub notify_mode: NotifyMode,

    /// `SO_SNDBUF` for listener and outgoing sockets.
    pub send_buffer_size: Option<usize>,

    /// `SO_RCVBUF` for listener and outgoing sockets.
    pub recv_buffer_size: Option<usize>,

    /// Capacity of one pooled receive buffer.
    pub pool_buffer_size: usize,

    /// Upper bound on idle buffers kept by the pool.
    pub max_pooled_buffers: usize,

    /// Worker threads per dedicated runtime (0 = ambient runtime).
    pub execution_context_pool_size: usize,

    /// Close sessions with no inbound traffic for this long.
    pub idle_timeout: Option<Duration>,

    /// Bound on the transport connect.
    pub connect_timeout: Duration,

    /// Bound on each secure or upgrade handshake.
    pub handshake_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Options {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            notify_mode: NotifyMode::Sync,
            send_buffer_size: None,
            recv_buffer_size: None,
            pool_buffer_size: DEFAULT_POOL_BUFFER_SIZE,
            max_pooled_buffers: DEFAULT_MAX_POOLED_BUFFERS,
            execution_context_pool_size: 0,
            idle_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Parses a flat key/value set on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a recognized key carries a malformed value.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::new();
        options.apply_pairs(pairs)?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Options {
    /// Sets the notification mode.
    #[inline]
    #[must_use]
    pub fn with_notify_mode(mut self, mode: NotifyMode) -> Self {
        self.notify_mode = mode;
        self
    }

    /// Sets the socket send buffer size.
    #[inline]
    #[must_use]
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Sets the socket receive buffer size.
    #[inline]
    #[must_use]
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Sets the pooled receive buffer capacity.
    #[inline]
    #[must_use]
    pub fn with_pool_buffer_size(mut self, size: usize) -> Self {
        self.pool_buffer_size = size;
        self
    }

    /// Sets how many idle buffers the pool keeps.
    #[inline]
    #[must_use]
    pub fn with_max_pooled_buffers(mut self, count: usize) -> Self {
        self.max_pooled_buffers = count;
        self
    }

    /// Sets the worker count of the dedicated runtimes.
    #[inline]
    #[must_use]
    pub fn with_execution_context_pool_size(mut self, size: usize) -> Self {
        self.execution_context_pool_size = size;
        self
    }

    /// Enables the idle timeout.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

// ============================================================================
// Key/Value Parsing
// ============================================================================

impl Options {
    /// Applies a flat key/value set to these options.
    ///
    /// Keys are matched case-insensitively after trimming. Unknown keys are
    /// logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on the first malformed value.
    pub fn apply_pairs<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Applies a single option.
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "notify_mode" => self.notify_mode = value.parse()?,
            "send_buffer_size" => self.send_buffer_size = Some(parse_size(&key, value)?),
            "recv_buffer_size" => self.recv_buffer_size = Some(parse_size(&key, value)?),
            "pool_buffer_size" => self.pool_buffer_size = parse_size(&key, value)?,
            "max_pooled_buffers" => self.max_pooled_buffers = parse_size(&key, value)?,
            "execution_context_pool_size" | "io_service_pool_size" => {
                self.execution_context_pool_size = parse_size(&key, value)?;
            }
            "idle_timeout" | "silence_timeout" => {
                let timeout = parse_duration(&key, value)?;
                self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            "connect_timeout" => self.connect_timeout = parse_duration(&key, value)?,
            "handshake_timeout" => self.handshake_timeout = parse_duration(&key, value)?,
            "" => {}
            _ => warn!(key = %key, value = %value, "Ignoring unknown option"),
        }

        Ok(())
    }

    /// Validates the options configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.pool_buffer_size == 0 {
            return Err(Error::config("pool_buffer_size must be greater than zero"));
        }
        if self.send_buffer_size == Some(0) || self.recv_buffer_size == Some(0) {
            return Err(Error::config("socket buffer sizes must be greater than zero"));
        }
        if self.connect_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(Error::config("connect and handshake timeouts must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Value Parsers
// ============================================================================

/// Parses a byte size with an optional `k`/`m`/`g` suffix.
pub(crate) fn parse_size(key: &str, value: &str) -> Result<usize> {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    let (digits, multiplier) = match lower.strip_suffix(['k', 'm', 'g']) {
        Some(digits) => {
            let multiplier = match lower.as_bytes()[lower.len() - 1] {
                b'k' => 1usize << 10,
                b'm' => 1 << 20,
                _ => 1 << 30,
            };
            (digits.trim(), multiplier)
        }
        None => (lower.as_str(), 1),
    };

    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| Error::config(format!("{key}: invalid size '{value}'")))
}

/// Parses a duration with an optional `ms`/`s`/`m` suffix (default ms).
pub(crate) fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let lower = value.trim().to_ascii_lowercase();
    let invalid = || Error::config(format!("{key}: invalid duration '{value}'"));

    let (digits, unit_ms) = if let Some(d) = lower.strip_suffix("ms") {
        (d, 1)
    } else if let Some(d) = lower.strip_suffix('s') {
        (d, 1_000)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 60_000)
    } else {
        (lower.as_str(), 1)
    };

    let amount: u64 = digits.trim().parse().map_err(|_| invalid())?;
    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

// ============================================================================
// Tests
// ============================================================================
