//! SOCKS5 wire constants (RFC 1928, RFC 1929)

/// SOCKS protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// GSSAPI
pub const SOCKS5_AUTH_METHOD_GSSAPI: u8 = 0x01;
/// Username/password
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

/// CONNECT
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// BIND
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

/// IPv4 address, 4 bytes
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name, length-prefixed
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address, 16 bytes
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

/// Reserved byte, must be zero
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Login accepted
pub const SOCKS5_AUTH_STATUS_SUCCESS: u8 = 0x00;
/// Login rejected
pub const SOCKS5_AUTH_STATUS_FAILURE: u8 = 0x01;

/// VER + NMETHODS
pub const AUTH_HEADER_LEN: usize = 2;
/// VER + CMD + RSV + ATYP
pub const REQUEST_HEADER_LEN: usize = 4;
/// VER + ULEN + UNAME(255) + PLEN + PASSWD(255)
pub const MAX_LOGIN_LEN: usize = 1 + 1 + 255 + 1 + 255;
/// Header + IPv6 address + port
pub const MAX_REPLY_LEN: usize = REQUEST_HEADER_LEN + 16 + 2;
