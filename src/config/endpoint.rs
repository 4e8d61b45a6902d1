//! Endpoint strings.
//!
//! An endpoint names the protocol stack, the address and the options of a
//! server or client in one string:
//!
//! ```text
//! tcp://127.0.0.1:8088/?notify_mode=async&pool_buffer_size=4k
//! wss://example.com:9443/chat?idle_timeout=30s
//! tcp://*:8088
//! ```
//!
//! Parsing is built on the `url` crate. Host `*` binds all interfaces.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use url::{Host, Url};

use crate::error::{Error, Result};

use super::Options;

// ============================================================================
// Protocol
// ============================================================================

/// Protocol variant named by the endpoint scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain byte stream.
    Tcp,
    /// Byte stream over a secure layer.
    Tcps,
    /// WebSocket messages over a plain stream.
    Ws,
    /// WebSocket messages over a secure layer.
    Wss,
}

impl Protocol {
    /// Returns `true` if the stack includes a secure layer.
    #[inline]
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Tcps | Self::Wss)
    }

    /// Returns `true` if the stack includes an upgrade layer.
    #[inline]
    #[must_use]
    pub const fn is_upgrade(&self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }

    /// Returns the scheme string.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcps => "tcps",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "tcps" => Ok(Self::Tcps),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => Err(Error::unsupported_protocol(other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A parsed endpoint string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Protocol stack.
    pub protocol: Protocol,
    /// Host name or IP literal (`0.0.0.0` for `*`).
    pub host: String,
    /// Port (0 lets the OS choose when listening).
    pub port: u16,
    /// Resource path, used as the upgrade request target.
    pub path: String,
    /// Options from the query string, applied over the defaults.
    pub options: Options,
}

impl Endpoint {
    /// Parses an endpoint string.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the string is not a URL or lacks a host/port
    /// - [`Error::UnsupportedProtocol`] for an unknown scheme
    /// - [`Error::Config`] for a malformed option value
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let normalized = trimmed.replacen("://*", "://0.0.0.0", 1);

        let url = Url::parse(&normalized)
            .map_err(|e| Error::invalid_endpoint(trimmed, e.to_string()))?;

        let protocol: Protocol = url.scheme().parse()?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::invalid_endpoint(trimmed, "missing host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_endpoint(trimmed, "missing port"))?;

        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        let options = Options::from_pairs(url.query_pairs())?;

        Ok(Self {
            protocol,
            host,
            port,
            path,
            options,
        })
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
