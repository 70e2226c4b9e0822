//! Socket primitives for Sockrelay
//!
//! [`AsyncSocket`] wraps a TCP socket and exposes receive, send and connect
//! as futures that report failures as [`SocketError`](crate::error::SocketError)
//! values. Each direction admits at most one outstanding operation.

mod opts;
mod outcome;
mod slot;
mod socket;

pub use opts::SocketOpts;
pub use outcome::ReceiveOutcome;
pub use slot::Direction;
pub use socket::{AsyncSocket, CloseMode};
