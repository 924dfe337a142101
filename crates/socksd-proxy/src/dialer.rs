//! Upstream connection seam.

use crate::TargetAddr;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens connections to CONNECT destinations.
///
/// The server shares one dialer across all sessions, so implementations
/// must not keep per-session state.
pub trait Dialer: Send + Sync + 'static {
    /// Stream type of an established upstream connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `target`. Called at most once per session.
    fn dial(&self, target: &TargetAddr)
        -> impl Future<Output = std::io::Result<Self::Stream>> + Send;
}

/// Dials destinations over TCP with no timeout.
///
/// Domain names are resolved by the system resolver at dial time; every
/// resolved address is tried in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: &TargetAddr) -> std::io::Result<TcpStream> {
        match target {
            TargetAddr::Ipv4(addr) => TcpStream::connect(*addr).await,
            TargetAddr::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        }
    }
}
