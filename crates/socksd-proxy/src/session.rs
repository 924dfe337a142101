//! Per-connection SOCKS5 session.
//!
//! A session walks one client connection through the protocol phases, each
//! exposed as its own method so it can be driven and tested in isolation:
//!
//! ```text
//! Init --negotiate--> Negotiated --read_request--> Requesting --connect--> Connected
//!   |                     |                            |                      |
//!   +-------> Failed <----+----------------------------+                   relay
//!                                                                             |
//!                                                          Closed <-- Relaying
//! ```
//!
//! `Failed` and `Closed` are terminal. A failed phase writes nothing for
//! that phase; the connection is released when the session is dropped.

use crate::codec::{self, AddressType, Command, TargetAddr};
use crate::relay::{self, RelayOutcome};
use crate::{Dialer, ProxyError, Result, Unsupported};
use std::net::{SocketAddr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Protocol phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, nothing read yet.
    Init,
    /// Reading the method negotiation.
    Negotiating,
    /// "No auth" selected and acknowledged.
    Negotiated,
    /// Reading the CONNECT request, or holding a parsed one.
    Requesting,
    /// Upstream dialed and success reply sent.
    Connected,
    /// Relaying bytes.
    Relaying,
    /// Relay finished and both connections released.
    Closed,
    /// A phase failed; nothing further happens on this session.
    Failed,
}

/// One client connection and its protocol state.
pub struct Session<S> {
    /// Buffered client stream; taken by the relay.
    stream: Option<BufReader<S>>,

    /// Client address (for logging).
    peer: SocketAddr,

    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session for a freshly accepted client.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            peer,
            state: SessionState::Init,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the method negotiation.
    ///
    /// Reads `VER NMETHODS METHODS` and always answers `05 00`; the offered
    /// methods are ignored.
    ///
    /// # Errors
    /// * `ProxyError::Protocol` - Version is not 5.
    /// * `ProxyError::Io` - Client closed early or the reply could not be written.
    pub async fn negotiate(&mut self) -> Result<()> {
        let stream = self.begin(SessionState::Init, SessionState::Negotiating)?;
        let result = negotiate(stream).await;
        self.complete(result, SessionState::Negotiated)
    }

    /// Read and validate the CONNECT request.
    ///
    /// Nothing is written to the client. The session stays in
    /// [`SessionState::Requesting`] until [`Session::connect`] runs.
    ///
    /// # Errors
    /// * `ProxyError::Protocol` - Bad version, unknown command or address type.
    /// * `ProxyError::NotSupported` - BIND, UDP ASSOCIATE or an IPv6 destination.
    /// * `ProxyError::Io` - Client closed before the request was complete.
    pub async fn read_request(&mut self) -> Result<TargetAddr> {
        let stream = self.begin(SessionState::Negotiated, SessionState::Requesting)?;
        let result = read_request(stream).await;
        self.complete(result, SessionState::Requesting)
    }

    /// Dial `target` and acknowledge the CONNECT.
    ///
    /// The success reply is written only after the dial succeeds. A failed
    /// dial writes nothing.
    ///
    /// # Errors
    /// * `ProxyError::Dial` - Destination unreachable.
    /// * `ProxyError::Io` - Success reply could not be written.
    pub async fn connect<D: Dialer>(
        &mut self,
        dialer: &D,
        target: &TargetAddr,
    ) -> Result<D::Stream> {
        let stream = self.begin(SessionState::Requesting, SessionState::Requesting)?;
        let result = connect(stream, dialer, target).await;
        self.complete(result, SessionState::Connected)
    }

    /// Check the current state and move to `next`, handing out the client stream.
    fn begin(
        &mut self,
        expected: SessionState,
        next: SessionState,
    ) -> Result<&mut BufReader<S>> {
        if self.state != expected {
            return Err(ProxyError::Internal(format!(
                "session phase {next:?} requires state {expected:?}, found {:?}",
                self.state
            )));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProxyError::Internal("client stream already released".to_string()))?;
        self.state = next;
        Ok(stream)
    }

    fn complete<T>(&mut self, result: Result<T>, success: SessionState) -> Result<T> {
        self.state = match result {
            Ok(_) => success,
            Err(_) => SessionState::Failed,
        };
        result
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Relay between the client and `upstream` until either side ends.
    ///
    /// Any bytes the client sent early and that are already buffered are
    /// forwarded first.
    ///
    /// # Errors
    /// * `ProxyError::Internal` - Called before a successful [`Session::connect`].
    pub async fn relay<U>(&mut self, upstream: U) -> Result<RelayOutcome>
    where
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.state != SessionState::Connected {
            return Err(ProxyError::Internal(format!(
                "session phase Relaying requires state Connected, found {:?}",
                self.state
            )));
        }
        let client = self
            .stream
            .take()
            .ok_or_else(|| ProxyError::Internal("client stream already released".to_string()))?;

        self.state = SessionState::Relaying;
        let outcome = relay::relay(client, upstream).await;
        self.state = SessionState::Closed;
        Ok(outcome)
    }

    /// Drive every phase in order.
    ///
    /// Returns when the relay ends or at the first failing phase.
    pub async fn run<D: Dialer>(&mut self, dialer: &D) -> Result<RelayOutcome> {
        self.negotiate().await?;
        debug!(client = %self.peer, "negotiated no-auth");

        let target = self.read_request().await?;
        let upstream = self.connect(dialer, &target).await?;
        info!(client = %self.peer, target = %target, "dialed destination");

        let outcome = self.relay(upstream).await?;
        debug!(
            client = %self.peer,
            target = %target,
            first_closed = ?outcome.first_closed,
            "relay finished"
        );
        Ok(outcome)
    }
}

async fn negotiate<S>(stream: &mut BufReader<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = codec::read_u8(stream, "read negotiation version").await?;
    if version != codec::SOCKS_VERSION {
        return Err(ProxyError::Protocol(format!(
            "unsupported SOCKS version in negotiation: {version}"
        )));
    }

    let method_count = codec::read_u8(stream, "read method count").await?;
    // Offered methods are irrelevant: "no auth" is always selected.
    codec::read_vec(stream, usize::from(method_count), "read auth methods").await?;

    stream
        .write_all(&codec::NEGOTIATION_REPLY)
        .await
        .map_err(ProxyError::io("write negotiation reply"))
}

async fn read_request<S>(stream: &mut BufReader<S>) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let [version, command, _reserved, atyp] =
        codec::read_array::<_, 4>(stream, "read request header").await?;

    if version != codec::SOCKS_VERSION {
        return Err(ProxyError::Protocol(format!(
            "unsupported SOCKS version in request: {version}"
        )));
    }

    match Command::from_byte(command)? {
        Command::Connect => {}
        Command::Bind => return Err(ProxyError::NotSupported(Unsupported::Bind)),
        Command::UdpAssociate => {
            return Err(ProxyError::NotSupported(Unsupported::UdpAssociate))
        }
    }

    match AddressType::from_byte(atyp)? {
        AddressType::Ipv4 => {
            let ip = codec::read_ipv4(stream).await?;
            let port = codec::read_u16_be(stream, "read destination port").await?;
            Ok(TargetAddr::Ipv4(SocketAddrV4::new(ip, port)))
        }
        AddressType::DomainName => {
            let host = codec::read_domain(stream).await?;
            let port = codec::read_u16_be(stream, "read destination port").await?;
            Ok(TargetAddr::Domain(host, port))
        }
        AddressType::Ipv6 => Err(ProxyError::NotSupported(Unsupported::Ipv6)),
    }
}

async fn connect<S, D>(
    stream: &mut BufReader<S>,
    dialer: &D,
    target: &TargetAddr,
) -> Result<D::Stream>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: Dialer,
{
    let upstream = dialer
        .dial(target)
        .await
        .map_err(|source| ProxyError::Dial {
            target: target.clone(),
            source,
        })?;

    stream
        .write_all(&codec::CONNECT_SUCCESS_REPLY)
        .await
        .map_err(ProxyError::io("write connect reply"))?;

    Ok(upstream)
}
