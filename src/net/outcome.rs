//! Receive outcome value

use crate::error::SocketError;

/// Result of a single receive: how many bytes arrived and how it ended.
///
/// Zero bytes with [`SocketError::Success`] means the peer closed its
/// sending side gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Bytes written into the caller's buffer
    pub bytes_received: usize,
    /// How the operation ended
    pub error: SocketError,
}

impl ReceiveOutcome {
    /// Build an outcome from its parts
    pub fn new(bytes_received: usize, error: SocketError) -> Self {
        ReceiveOutcome {
            bytes_received,
            error,
        }
    }

    /// Successful receive of `bytes_received` bytes
    pub fn data(bytes_received: usize) -> Self {
        Self::new(bytes_received, SocketError::Success)
    }

    /// Graceful end of stream from the peer
    pub fn end_of_stream() -> Self {
        Self::new(0, SocketError::Success)
    }

    /// Failed receive with no data
    pub fn failed(error: SocketError) -> Self {
        Self::new(0, error)
    }

    /// True when data arrived and the socket is still healthy
    pub fn is_data(&self) -> bool {
        self.bytes_received > 0 && self.error == SocketError::Success
    }

    /// True when the peer closed its sending side
    pub fn is_end_of_stream(&self) -> bool {
        self.bytes_received == 0 && self.error == SocketError::Success
    }

    /// True when exactly `expected` bytes arrived without error
    pub fn is_complete(&self, expected: usize) -> bool {
        self.bytes_received == expected && self.error == SocketError::Success
    }
}
