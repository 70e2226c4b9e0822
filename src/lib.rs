//! # Sockrelay - SOCKS5 CONNECT Proxy
//!
//! Sockrelay is a small SOCKS5 proxy server. It accepts clients on a TCP
//! listener, runs the RFC 1928 handshake (with optional RFC 1929
//! username/password authentication), dials the requested target and then
//! relays bytes in both directions until either side is done.
//!
//! ## Features
//!
//! - **CONNECT Only**: BIND and UDP ASSOCIATE are answered with "command not supported"
//! - **Loopback Guard**: Targets on the proxy host itself are refused unless allowed
//! - **Half-Close Aware Relay**: EOF on one side is forwarded as a FIN to the other
//! - **Reset Propagation**: A peer reset tears down the opposite side abortively
//! - **Graceful Shutdown**: Open tunnels are cancelled and drained with a grace period
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockrelay::config::load_config;
//! use sockrelay::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let server = Server::bind(&config.server).await?;
//!
//!     server.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Every accepted connection gets its own task. The client socket is wrapped
//! in an [`net::AsyncSocket`], which allows one receive and one send in
//! flight at a time. After a successful handshake a [`relay::Relay`] runs
//! two pumps, one per direction, that share a pooled buffer each.
//!
//! ```text
//! SOCKS5 Client -> Sockrelay (handshake, relay) -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod net;
pub mod relay;
pub mod server;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{ProtocolError, SockrelayError, Socks5ReplyCode, SocketError};
pub use server::Server;

/// Version of the Sockrelay library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
