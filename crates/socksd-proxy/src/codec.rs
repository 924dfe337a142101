//! SOCKS5 wire format.
//!
//! Constants, typed views of the command and address-type bytes, and the
//! small read helpers the session uses on the buffered client stream.
//!
//! # Message Layout
//!
//! ```text
//! Negotiation:  | VER | NMETHODS | METHODS  |
//!               |  1  |    1     | NMETHODS |
//!
//! Request:      | VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT |
//!               |  1  |  1  |  1  |  1   | Variable |    2     |
//!
//! Reply:        | VER | REP | RSV | ATYP | BND.ADDR | BND.PORT |
//!               |  1  |  1  |  1  |  1   | Variable |    2     |
//! ```
//!
//! All multi-byte integers are big-endian.

use crate::{ProxyError, Result};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method.
pub const METHOD_NO_AUTH: u8 = 0x00;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Reply code for a successful CONNECT.
pub const REP_SUCCEEDED: u8 = 0x00;

/// Reply to the negotiation request: version 5, no authentication.
pub const NEGOTIATION_REPLY: [u8; 2] = [SOCKS_VERSION, METHOD_NO_AUTH];

/// Reply to a successful CONNECT.
///
/// The bound address is always reported as `0.0.0.0:0`; BIND is not
/// supported, so clients have no use for the real local address.
pub const CONNECT_SUCCESS_REPLY: [u8; 10] = [
    SOCKS_VERSION,
    REP_SUCCEEDED,
    0x00, // RSV
    ATYP_IPV4,
    0x00, 0x00, 0x00, 0x00, // BND.ADDR
    0x00, 0x00, // BND.PORT
];

/// SOCKS5 request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    /// Decode the `CMD` byte.
    ///
    /// # Errors
    /// * `ProxyError::Protocol` - The byte is not a SOCKS5 command.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            CMD_CONNECT => Ok(Command::Connect),
            CMD_BIND => Ok(Command::Bind),
            CMD_UDP_ASSOCIATE => Ok(Command::UdpAssociate),
            other => Err(ProxyError::Protocol(format!(
                "unsupported command: {other:#04x}"
            ))),
        }
    }
}

/// SOCKS5 destination address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    DomainName,
    Ipv6,
}

impl AddressType {
    /// Decode the `ATYP` byte.
    ///
    /// # Errors
    /// * `ProxyError::Protocol` - The byte is not a SOCKS5 address type.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            ATYP_IPV4 => Ok(AddressType::Ipv4),
            ATYP_DOMAIN => Ok(AddressType::DomainName),
            ATYP_IPV6 => Ok(AddressType::Ipv6),
            other => Err(ProxyError::Protocol(format!(
                "invalid address type: {other:#04x}"
            ))),
        }
    }
}

/// Destination requested by a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4 address and port.
    Ipv4(SocketAddrV4),
    /// Host name (used verbatim, resolved at dial time) and port.
    Domain(String, u16),
}

impl TargetAddr {
    /// Host part, rendered the way it is dialed.
    ///
    /// IPv4 addresses use dotted-decimal notation.
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ipv4(addr) => addr.ip().to_string(),
            TargetAddr::Domain(host, _) => host.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ipv4(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(addr) => write!(f, "{addr}"),
            TargetAddr::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Read a single byte.
pub async fn read_u8<R>(reader: &mut R, op: &'static str) -> Result<u8>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(ProxyError::io(op))
}

/// Read a fixed-size field.
pub async fn read_array<R, const N: usize>(reader: &mut R, op: &'static str) -> Result<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(ProxyError::io(op))?;
    Ok(buf)
}

/// Read exactly `len` bytes.
pub async fn read_vec<R>(reader: &mut R, len: usize, op: &'static str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(ProxyError::io(op))?;
    Ok(buf)
}

/// Read a big-endian `u16`.
pub async fn read_u16_be<R>(reader: &mut R, op: &'static str) -> Result<u16>
where
    R: AsyncRead + Unpin,
{
    let bytes: [u8; 2] = read_array(reader, op).await?;
    Ok(u16::from_be_bytes(bytes))
}

/// Read an IPv4 address (4 raw octets).
pub async fn read_ipv4<R>(reader: &mut R) -> Result<Ipv4Addr>
where
    R: AsyncRead + Unpin,
{
    let octets: [u8; 4] = read_array(reader, "read IPv4 address").await?;
    Ok(Ipv4Addr::from(octets))
}

/// Read a length-prefixed domain name.
///
/// # Errors
/// * `ProxyError::Io` - Stream ended before the name was complete.
/// * `ProxyError::Protocol` - Name is not valid UTF-8.
pub async fn read_domain<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = read_u8(reader, "read domain length").await?;
    let raw = read_vec(reader, usize::from(len), "read domain name").await?;
    String::from_utf8(raw)
        .map_err(|_| ProxyError::Protocol("domain name is not valid UTF-8".to_string()))
}
