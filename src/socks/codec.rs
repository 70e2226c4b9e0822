//! SOCKS5 message codec
//!
//! Pure functions over byte spans. Every decoder is handed exactly the
//! bytes that make up one message; reading those bytes off the socket is
//! the handshake's job.

use super::consts::*;
use super::types::{
    AddressKind, AuthMethod, ConnectReply, ConnectRequest, LoginRequest, OfferedMethods,
    SocksCommand, TargetAddr,
};
use crate::error::{ProtocolError, Socks5ReplyCode};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Validated fixed part of a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Requested command
    pub command: SocksCommand,
    /// How the destination address is encoded
    pub kind: AddressKind,
}

fn ensure_len(bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() < expected {
        return Err(ProtocolError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn ensure_version(byte: u8) -> Result<(), ProtocolError> {
    if byte != SOCKS5_VERSION {
        return Err(ProtocolError::UnsupportedVersion(byte));
    }
    Ok(())
}

/// Decode the 2-byte greeting header and return the method count
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub fn decode_auth_header(bytes: &[u8]) -> Result<usize, ProtocolError> {
    ensure_len(bytes, AUTH_HEADER_LEN)?;
    ensure_version(bytes[0])?;
    Ok(bytes[1] as usize)
}

/// Decode a complete greeting: header followed by the method bytes
pub fn decode_auth_request(bytes: &[u8]) -> Result<OfferedMethods<'_>, ProtocolError> {
    let count = decode_auth_header(bytes)?;
    ensure_len(bytes, AUTH_HEADER_LEN + count)?;

    let raw = &bytes[AUTH_HEADER_LEN..AUTH_HEADER_LEN + count];
    if let Some(&undefined) = raw.iter().find(|&&b| AuthMethod::from_byte(b).is_none()) {
        return Err(ProtocolError::UndefinedAuthMethod(undefined));
    }
    Ok(OfferedMethods::new_unchecked(raw))
}

/// Decode the first two bytes of a login and return the username length
pub fn decode_login_header(bytes: &[u8]) -> Result<usize, ProtocolError> {
    ensure_len(bytes, 2)?;
    if bytes[0] != SOCKS5_AUTH_VERSION {
        return Err(ProtocolError::UnsupportedAuthVersion(bytes[0]));
    }
    Ok(bytes[1] as usize)
}

/// Decode a complete username/password request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub fn decode_login_request(bytes: &[u8]) -> Result<LoginRequest<'_>, ProtocolError> {
    let ulen = decode_login_header(bytes)?;
    ensure_len(bytes, 2 + ulen + 1)?;
    let username = &bytes[2..2 + ulen];

    let plen = bytes[2 + ulen] as usize;
    let start = 3 + ulen;
    ensure_len(bytes, start + plen)?;
    let password = &bytes[start..start + plen];

    Ok(LoginRequest { username, password })
}

/// Decode and validate the 4-byte connect request header
pub fn decode_request_header(bytes: &[u8]) -> Result<RequestHeader, ProtocolError> {
    ensure_len(bytes, REQUEST_HEADER_LEN)?;
    ensure_version(bytes[0])?;

    let command = SocksCommand::from_byte(bytes[1]).ok_or(ProtocolError::UndefinedCommand(bytes[1]))?;
    if bytes[2] != SOCKS5_RESERVED {
        return Err(ProtocolError::NonZeroReserved(bytes[2]));
    }
    let kind = AddressKind::from_byte(bytes[3]).ok_or(ProtocolError::UndefinedAddressKind(bytes[3]))?;

    Ok(RequestHeader { command, kind })
}

/// Decode a complete connect request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn decode_connect_request(bytes: &[u8]) -> Result<ConnectRequest, ProtocolError> {
    let header = decode_request_header(bytes)?;
    let (ip_or_domain, rest) = decode_address(header.kind, &bytes[REQUEST_HEADER_LEN..])?;
    let port = decode_port(rest)?;

    let target = match ip_or_domain {
        Address::V4(ip) => TargetAddr::ipv4(ip, port),
        Address::V6(ip) => TargetAddr::ipv6(ip, port),
        Address::Domain(name) => {
            let name = std::str::from_utf8(name).map_err(|_| ProtocolError::InvalidDomainName)?;
            TargetAddr::domain(name, port)
        }
    };

    Ok(ConnectRequest {
        command: header.command,
        target,
    })
}

enum Address<'a> {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(&'a [u8]),
}

/// Split an address of `kind` off the front of `bytes`
fn decode_address(kind: AddressKind, bytes: &[u8]) -> Result<(Address<'_>, &[u8]), ProtocolError> {
    match kind {
        AddressKind::Ipv4 => {
            let (octets, rest) = bytes
                .split_first_chunk::<4>()
                .ok_or_else(|| truncated(4, bytes.len()))?;
            Ok((Address::V4(Ipv4Addr::from(*octets)), rest))
        }
        AddressKind::Ipv6 => {
            let (octets, rest) = bytes
                .split_first_chunk::<16>()
                .ok_or_else(|| truncated(16, bytes.len()))?;
            Ok((Address::V6(Ipv6Addr::from(*octets)), rest))
        }
        AddressKind::DomainName => {
            ensure_len(bytes, 1)?;
            let len = bytes[0] as usize;
            ensure_len(bytes, 1 + len)?;
            Ok((Address::Domain(&bytes[1..1 + len]), &bytes[1 + len..]))
        }
    }
}

fn decode_port(bytes: &[u8]) -> Result<u16, ProtocolError> {
    ensure_len(bytes, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn truncated(expected: usize, actual: usize) -> ProtocolError {
    ProtocolError::Truncated { expected, actual }
}

/// Encode the server's method selection: `{0x05, method}`
pub fn encode_method_selection(method: AuthMethod) -> [u8; 2] {
    [SOCKS5_VERSION, method.to_byte()]
}

/// Encode the login result: `{0x01, 0x00}` on success, `{0x01, 0x01}` otherwise
pub fn encode_login_status(accepted: bool) -> [u8; 2] {
    let status = if accepted {
        SOCKS5_AUTH_STATUS_SUCCESS
    } else {
        SOCKS5_AUTH_STATUS_FAILURE
    };
    [SOCKS5_AUTH_VERSION, status]
}

/// Encode a connect reply into `out` and return the encoded length
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn encode_connect_reply(reply: &ConnectReply, out: &mut [u8; MAX_REPLY_LEN]) -> usize {
    out[0] = SOCKS5_VERSION;
    out[1] = reply.code.into();
    out[2] = SOCKS5_RESERVED;

    let addr_end = match reply.bound {
        SocketAddr::V4(addr) => {
            out[3] = SOCKS5_ADDR_TYPE_IPV4;
            out[4..8].copy_from_slice(&addr.ip().octets());
            8
        }
        SocketAddr::V6(addr) => {
            out[3] = SOCKS5_ADDR_TYPE_IPV6;
            out[4..20].copy_from_slice(&addr.ip().octets());
            20
        }
    };
    out[addr_end..addr_end + 2].copy_from_slice(&reply.bound.port().to_be_bytes());
    addr_end + 2
}

/// Decode a connect reply as a client would
pub fn decode_connect_reply(bytes: &[u8]) -> Result<ConnectReply, ProtocolError> {
    ensure_len(bytes, REQUEST_HEADER_LEN)?;
    ensure_version(bytes[0])?;
    let code = Socks5ReplyCode::try_from(bytes[1])?;
    if bytes[2] != SOCKS5_RESERVED {
        return Err(ProtocolError::NonZeroReserved(bytes[2]));
    }

    let kind = AddressKind::from_byte(bytes[3]).ok_or(ProtocolError::UndefinedAddressKind(bytes[3]))?;
    let (address, rest) = decode_address(kind, &bytes[REQUEST_HEADER_LEN..])?;
    let port = decode_port(rest)?;

    let bound = match address {
        Address::V4(ip) => SocketAddr::from((ip, port)),
        Address::V6(ip) => SocketAddr::from((ip, port)),
        Address::Domain(_) => return Err(ProtocolError::UndefinedAddressKind(bytes[3])),
    };
    Ok(ConnectReply { code, bound })
}
