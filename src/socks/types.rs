//! SOCKS5 type definitions
//!
//! Typed views of the bytes exchanged during a SOCKS5 handshake.

use super::consts::*;
use crate::error::Socks5ReplyCode;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Authentication methods a client may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    NoAuth,
    /// GSSAPI (recognized, never selected)
    Gssapi,
    /// Username/password (RFC 1929)
    UsernamePassword,
    /// No acceptable method; only ever sent by the server
    NotAcceptable,
}

impl AuthMethod {
    /// Parse a method byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => Some(AuthMethod::NoAuth),
            SOCKS5_AUTH_METHOD_GSSAPI => Some(AuthMethod::Gssapi),
            SOCKS5_AUTH_METHOD_PASSWORD => Some(AuthMethod::UsernamePassword),
            SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => Some(AuthMethod::NotAcceptable),
            _ => None,
        }
    }

    /// Convert to the method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::NoAuth => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Gssapi => SOCKS5_AUTH_METHOD_GSSAPI,
            AuthMethod::UsernamePassword => SOCKS5_AUTH_METHOD_PASSWORD,
            AuthMethod::NotAcceptable => SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::NoAuth => write!(f, "no-auth"),
            AuthMethod::Gssapi => write!(f, "gssapi"),
            AuthMethod::UsernamePassword => write!(f, "username/password"),
            AuthMethod::NotAcceptable => write!(f, "not-acceptable"),
        }
    }
}

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND - not supported, answered with a failure reply
    Bind,
    /// UDP ASSOCIATE - not supported, answered with a failure reply
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Convert SocksCommand to byte
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Address type of a request or reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// IPv4 address
    Ipv4,
    /// Fully-qualified domain name
    DomainName,
    /// IPv6 address
    Ipv6,
}

impl AddressKind {
    /// Parse an address type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_ADDR_TYPE_IPV4 => Some(AddressKind::Ipv4),
            SOCKS5_ADDR_TYPE_DOMAIN => Some(AddressKind::DomainName),
            SOCKS5_ADDR_TYPE_IPV6 => Some(AddressKind::Ipv6),
            _ => None,
        }
    }

    /// Convert to the address type byte
    pub fn to_byte(self) -> u8 {
        match self {
            AddressKind::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddressKind::DomainName => SOCKS5_ADDR_TYPE_DOMAIN,
            AddressKind::Ipv6 => SOCKS5_ADDR_TYPE_IPV6,
        }
    }
}

/// Target address for SOCKS5 requests
///
/// Either a literal socket address or a host name still to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(domain.into(), port)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Address type used on the wire for this target
    pub fn kind(&self) -> AddressKind {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => AddressKind::Ipv4,
            TargetAddr::Ip(SocketAddr::V6(_)) => AddressKind::Ipv6,
            TargetAddr::Domain(_, _) => AddressKind::DomainName,
        }
    }

    /// Whether the target names this host.
    ///
    /// Covers 127.0.0.0/8, `::1`, IPv4-mapped loopback and the host name
    /// `localhost` in any letter case.
    pub fn is_loopback(&self) -> bool {
        match self {
            TargetAddr::Ip(addr) => is_loopback_ip(addr.ip()),
            TargetAddr::Domain(domain, _) => {
                domain.trim_end_matches('.').eq_ignore_ascii_case("localhost")
            }
        }
    }

    /// Resolve the address to a SocketAddr
    ///
    /// For IP addresses, this returns immediately.
    /// For domain names, this performs DNS resolution and takes the first
    /// address returned.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            TargetAddr::Ip(addr) => Ok(*addr),
            TargetAddr::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("No addresses found for domain: {}", domain),
                    )
                }),
        }
    }
}

/// Whether connecting to `ip` reaches this host
///
/// Covers loopback and the unspecified addresses, which the OS routes to
/// the local host, and unwraps IPv4-mapped IPv6 addresses.
pub fn is_loopback_ip(ip: IpAddr) -> bool {
    let local_v4 = |v4: Ipv4Addr| v4.is_loopback() || v4.is_unspecified();
    match ip {
        IpAddr::V4(v4) => local_v4(v4),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || v6.to_ipv4_mapped().is_some_and(local_v4)
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

/// Offered authentication methods, in wire order.
///
/// Borrows the validated method bytes of a greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferedMethods<'a> {
    raw: &'a [u8],
}

impl<'a> OfferedMethods<'a> {
    /// Wrap bytes that are already known to be valid method bytes
    pub(crate) fn new_unchecked(raw: &'a [u8]) -> Self {
        OfferedMethods { raw }
    }

    /// Number of offered methods
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True when the client offered nothing
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Whether `method` was offered
    pub fn contains(&self, method: AuthMethod) -> bool {
        self.raw.contains(&method.to_byte())
    }

    /// Methods in the order the client sent them
    pub fn iter(&self) -> impl Iterator<Item = AuthMethod> + 'a {
        self.raw.iter().filter_map(|&b| AuthMethod::from_byte(b))
    }
}

/// Username/password sub-negotiation request (RFC 1929)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRequest<'a> {
    /// UNAME, 1 to 255 bytes
    pub username: &'a [u8],
    /// PASSWD, 1 to 255 bytes
    pub password: &'a [u8],
}

impl LoginRequest<'_> {
    /// Encoded length of this request
    pub fn wire_len(&self) -> usize {
        3 + self.username.len() + self.password.len()
    }
}

/// Connect request after the header has been validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Requested command
    pub command: SocksCommand,
    /// Destination
    pub target: TargetAddr,
}

/// Connect reply as sent to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReply {
    /// Reply status code
    pub code: Socks5ReplyCode,
    /// Bound address reported to the client
    pub bound: SocketAddr,
}

impl ConnectReply {
    /// Success reply carrying the upstream socket's local endpoint
    pub fn success(bound: SocketAddr) -> Self {
        ConnectReply {
            code: Socks5ReplyCode::Succeeded,
            bound,
        }
    }

    /// Failure reply; the bound address is always 0.0.0.0:0
    pub fn failure(code: Socks5ReplyCode) -> Self {
        ConnectReply {
            code,
            bound: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        }
    }
}
