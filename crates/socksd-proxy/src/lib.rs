//! Restricted SOCKS5 proxy server.
//!
//! `socksd-proxy` implements the server side of a SOCKS5 proxy that supports
//! exactly one flow: "no authentication" negotiation followed by a CONNECT
//! request to an IPv4 or domain-name destination, then a bidirectional relay
//! until either side closes.
//!
//! # Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ProxyServer (127.0.0.1:1080)
//!   |
//!   +-- accept --> spawn Session (one task per connection)
//!                    |
//!                    +-- negotiate     VER NMETHODS METHODS  --> 05 00
//!                    +-- read_request  VER CMD RSV ATYP ADDR PORT
//!                    +-- connect       Dialer::dial(target)  --> 05 00 00 01 0.0.0.0:0
//!                    +-- relay         client <==> upstream
//! ```
//!
//! # Components
//!
//! - [`codec`]: Wire constants and byte-level read helpers
//! - [`Session`]: Per-connection state machine, one method per phase
//! - [`relay()`]: Bidirectional copy with a shared cancellation token
//! - [`Dialer`]: Seam for opening upstream connections ([`TcpDialer`] in production)
//! - [`ProxyServer`]: Accept loop and lifecycle
//!
//! # Usage
//!
//! ```ignore
//! use socksd_proxy::{ProxyConfig, ProxyServer};
//!
//! let server = ProxyServer::new(ProxyConfig::default());
//! server.run().await?;
//! ```
//!
//! # Protocol Coverage
//!
//! - Only the "no authentication" method is ever selected, whatever the
//!   client offers.
//! - BIND, UDP ASSOCIATE and IPv6 destinations are rejected with
//!   [`ProxyError::NotSupported`].
//! - Failures never produce a SOCKS5 error reply; the connection is closed
//!   with no bytes written for the failing phase.

pub mod codec;
mod dialer;
mod relay;
mod server;
mod session;

pub use codec::{AddressType, Command, TargetAddr};
pub use dialer::{Dialer, TcpDialer};
pub use relay::{relay, Direction, RelayOutcome};
pub use server::{ProxyConfig, ProxyHandle, ProxyServer};
pub use session::{Session, SessionState};

use std::net::SocketAddr;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur in proxy operations.
///
/// Every variant except [`ProxyError::Bind`] ends only the session that
/// produced it.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Failed to bind the listener.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Client sent something that is not valid SOCKS5.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client requested a feature this proxy does not implement.
    #[error("Not supported: {0}")]
    NotSupported(Unsupported),

    /// Reading from or writing to the client failed.
    #[error("Failed to {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the requested destination failed.
    #[error("Dial to {target} failed: {source}")]
    Dial {
        target: TargetAddr,
        #[source]
        source: std::io::Error,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Build a closure that tags an I/O error with the operation that failed.
    pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ProxyError::Io { op, source }
    }
}

/// SOCKS5 features that are recognised on the wire but not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// `CMD = 0x02`.
    Bind,
    /// `CMD = 0x03`.
    UdpAssociate,
    /// `ATYP = 0x04`.
    Ipv6,
}

impl std::fmt::Display for Unsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unsupported::Bind => f.write_str("BIND command"),
            Unsupported::UdpAssociate => f.write_str("UDP ASSOCIATE command"),
            Unsupported::Ipv6 => f.write_str("IPv6 destination address"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_operation() {
        let err = ProxyError::io("read version")(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "early eof",
        ));
        assert_eq!(err.to_string(), "Failed to read version: early eof");
    }

    #[test]
    fn test_not_supported_display() {
        let err = ProxyError::NotSupported(Unsupported::Ipv6);
        assert_eq!(err.to_string(), "Not supported: IPv6 destination address");
    }

    #[test]
    fn test_dial_error_names_target() {
        let target = TargetAddr::Domain("example.com".to_string(), 443);
        let err = ProxyError::Dial {
            target,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(err.to_string(), "Dial to example.com:443 failed: refused");
    }

    #[test]
    fn test_bind_error_source_is_preserved() {
        use std::error::Error as _;
        let err = ProxyError::Bind {
            addr: "127.0.0.1:1080".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.source().is_some());
    }
}
