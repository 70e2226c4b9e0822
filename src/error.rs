//! Error types for Sockrelay
//!
//! Socket outcomes, single-flight contract violations, fatal SOCKS5 wire
//! violations and reply codes all live here so that every layer speaks the
//! same vocabulary.

use crate::net::Direction;
use std::io;
use thiserror::Error;

/// Top-level error type for bootstrap and configuration
#[derive(Error, Debug)]
pub enum SockrelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fatal SOCKS5 protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Single-flight contract violation on a socket
    #[error("Socket contract violation: {0}")]
    Slot(#[from] SlotError),
}

/// Outcome code of a socket operation.
///
/// Socket operations report failures as values rather than errors so that
/// callers which do not care about cancellation still receive a result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// Operation completed
    #[error("success")]
    Success,
    /// Peer sent a reset
    #[error("connection reset by peer")]
    ConnectionReset,
    /// Connection aborted locally or by the network stack
    #[error("connection aborted")]
    ConnectionAborted,
    /// Remote endpoint refused the connection
    #[error("connection refused")]
    ConnectionRefused,
    /// The direction was shut down locally
    #[error("socket has been shut down")]
    Shutdown,
    /// Operation was cancelled or the socket was closed underneath it
    #[error("operation aborted")]
    OperationAborted,
    /// Operation timed out
    #[error("timed out")]
    TimedOut,
    /// No route to host
    #[error("host unreachable")]
    HostUnreachable,
    /// Network unreachable
    #[error("network unreachable")]
    NetworkUnreachable,
    /// Local address unavailable
    #[error("address not available")]
    AddressNotAvailable,
    /// Operation not permitted
    #[error("permission denied")]
    PermissionDenied,
    /// Socket is not connected yet
    #[error("socket is not connected")]
    NotConnected,
    /// Any other OS error
    #[error("socket error: {0:?}")]
    Other(io::ErrorKind),
}

impl SocketError {
    /// Abrupt peer disconnect: the remote side reset or aborted the connection
    pub fn is_abrupt_disconnect(self) -> bool {
        matches!(self, SocketError::ConnectionReset | SocketError::ConnectionAborted)
    }

    /// The operation was stopped locally rather than by the network
    pub fn is_local_stop(self) -> bool {
        matches!(self, SocketError::Shutdown | SocketError::OperationAborted)
    }
}

impl From<&io::Error> for SocketError {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => SocketError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => SocketError::ConnectionAborted,
            io::ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            io::ErrorKind::BrokenPipe => SocketError::Shutdown,
            io::ErrorKind::NotConnected => SocketError::NotConnected,
            io::ErrorKind::TimedOut => SocketError::TimedOut,
            io::ErrorKind::HostUnreachable => SocketError::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => SocketError::NetworkUnreachable,
            io::ErrorKind::AddrNotAvailable => SocketError::AddressNotAvailable,
            io::ErrorKind::PermissionDenied => SocketError::PermissionDenied,
            kind => SocketError::Other(kind),
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        SocketError::from(&err)
    }
}

/// A second operation was started on a slot that is already reserved.
///
/// This is a programming error in the caller, never a network condition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Another operation of the same direction is still outstanding
    #[error("{direction} operation already in progress")]
    OperationInProgress {
        /// Direction whose slot was busy
        direction: Direction,
    },
}

/// Fatal SOCKS5 wire violations.
///
/// A connection that produces one of these is dropped without a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Version byte is not 5
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Username/password sub-negotiation version is not 1
    #[error("Unsupported auth sub-negotiation version: {0}")]
    UnsupportedAuthVersion(u8),

    /// Auth method byte outside the defined set
    #[error("Undefined authentication method: {0:#04x}")]
    UndefinedAuthMethod(u8),

    /// Command byte outside the defined set
    #[error("Undefined command: {0:#04x}")]
    UndefinedCommand(u8),

    /// Reserved byte is not zero
    #[error("Reserved byte must be zero, got {0:#04x}")]
    NonZeroReserved(u8),

    /// Address type byte outside the defined set
    #[error("Undefined address type: {0:#04x}")]
    UndefinedAddressKind(u8),

    /// Reply code byte outside the defined set
    #[error("Undefined reply code: {0:#04x}")]
    UndefinedReplyCode(u8),

    /// Domain name bytes are not valid UTF-8
    #[error("Domain name is not valid UTF-8")]
    InvalidDomainName,

    /// The byte span handed to a decoder is shorter than the message
    #[error("Truncated message: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the message needs
        expected: usize,
        /// Bytes that were supplied
        actual: usize,
    },
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(ProtocolError::UndefinedReplyCode(other)),
        }
    }
}

/// Maps a failed upstream dial onto the closest reply code.
///
/// Anything without a dedicated code is reported as host unreachable.
impl From<SocketError> for Socks5ReplyCode {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Success => Socks5ReplyCode::Succeeded,
            SocketError::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            SocketError::NetworkUnreachable => Socks5ReplyCode::NetworkUnreachable,
            SocketError::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::HostUnreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_round_trip() {
        for byte in 0x00..=0x08u8 {
            let code = Socks5ReplyCode::try_from(byte).unwrap();
            assert_eq!(u8::from(code), byte);
        }
    }

    #[test]
    fn test_socks5_reply_code_from_u8_invalid() {
        assert_eq!(
            Socks5ReplyCode::try_from(0x09),
            Err(ProtocolError::UndefinedReplyCode(0x09))
        );
        assert!(Socks5ReplyCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_reply_code_from_socket_error() {
        assert_eq!(
            Socks5ReplyCode::from(SocketError::ConnectionRefused),
            Socks5ReplyCode::ConnectionRefused
        );
        assert_eq!(
            Socks5ReplyCode::from(SocketError::NetworkUnreachable),
            Socks5ReplyCode::NetworkUnreachable
        );
        assert_eq!(
            Socks5ReplyCode::from(SocketError::PermissionDenied),
            Socks5ReplyCode::ConnectionNotAllowed
        );
        assert_eq!(
            Socks5ReplyCode::from(SocketError::TimedOut),
            Socks5ReplyCode::HostUnreachable
        );
        assert_eq!(
            Socks5ReplyCode::from(SocketError::Other(io::ErrorKind::Other)),
            Socks5ReplyCode::HostUnreachable
        );
    }

    #[test]
    fn test_socket_error_from_io_error() {
        let cases = [
            (io::ErrorKind::ConnectionReset, SocketError::ConnectionReset),
            (io::ErrorKind::ConnectionAborted, SocketError::ConnectionAborted),
            (io::ErrorKind::ConnectionRefused, SocketError::ConnectionRefused),
            (io::ErrorKind::BrokenPipe, SocketError::Shutdown),
            (io::ErrorKind::TimedOut, SocketError::TimedOut),
            (io::ErrorKind::AddrNotAvailable, SocketError::AddressNotAvailable),
            (io::ErrorKind::Other, SocketError::Other(io::ErrorKind::Other)),
        ];

        for (kind, expected) in cases {
            assert_eq!(SocketError::from(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_socket_error_classes() {
        assert!(SocketError::ConnectionReset.is_abrupt_disconnect());
        assert!(SocketError::ConnectionAborted.is_abrupt_disconnect());
        assert!(!SocketError::Shutdown.is_abrupt_disconnect());
        assert!(SocketError::Shutdown.is_local_stop());
        assert!(SocketError::OperationAborted.is_local_stop());
        assert!(!SocketError::Success.is_local_stop());
    }

    #[test]
    fn test_slot_error_display() {
        let err = SlotError::OperationInProgress {
            direction: Direction::Receive,
        };
        assert_eq!(format!("{}", err), "receive operation already in progress");
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            format!("{}", ProtocolError::UnsupportedVersion(4)),
            "Unsupported SOCKS version: 4"
        );
        assert_eq!(
            format!("{}", ProtocolError::NonZeroReserved(1)),
            "Reserved byte must be zero, got 0x01"
        );
        assert_eq!(
            format!(
                "{}",
                ProtocolError::Truncated {
                    expected: 4,
                    actual: 2
                }
            ),
            "Truncated message: expected 4 bytes, got 2"
        );
    }

    #[test]
    fn test_sockrelay_error_from_protocol() {
        let err: SockrelayError = ProtocolError::UndefinedCommand(9).into();
        assert!(matches!(err, SockrelayError::Protocol(_)));
        assert_eq!(format!("{}", err), "Protocol error: Undefined command: 0x09");
    }

    #[test]
    fn test_sockrelay_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: SockrelayError = io_err.into();
        assert!(matches!(err, SockrelayError::Io(_)));
    }
}
