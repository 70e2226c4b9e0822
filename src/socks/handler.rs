//! Per-connection driver
//!
//! Takes one accepted TCP connection through the handshake and, when a
//! tunnel is established, through the relay.

use super::auth::policy_from_config;
use super::handshake::{negotiate, Handshake, HandshakeSettings};
use crate::config::ServerConfig;
use crate::error::SockrelayError;
use crate::net::{AsyncSocket, CloseMode, SocketOpts};
use crate::relay::{BufferPool, Relay};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Idle relay buffers kept around for reuse
const MAX_IDLE_BUFFERS: usize = 256;

/// State shared by every connection of one server
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// Handshake settings
    pub handshake: HandshakeSettings,
    /// Buffers rented by relay pumps
    pub buffers: BufferPool,
}

impl ProxyContext {
    /// Build the shared context from server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        ProxyContext {
            handshake: HandshakeSettings {
                connect_timeout: Duration::from_secs(config.connect_timeout),
                reject_wait: Duration::from_millis(config.reject_wait_ms),
                allow_loopback: config.allow_loopback,
                socket_opts: SocketOpts::from_tcp_config(&config.tcp),
                credentials: policy_from_config(&config.auth),
            },
            buffers: BufferPool::new(config.buffer_size, MAX_IDLE_BUFFERS),
        }
    }
}

/// Process one accepted connection to completion
///
/// Returns once the handshake failed or the relay it started has fully
/// terminated. Never fails; every outcome is logged.
///
/// # Arguments
///
/// * `stream` - The accepted client connection
/// * `context` - Shared server state
/// * `cancel` - Server shutdown signal
pub async fn handle_connection(stream: TcpStream, context: &ProxyContext, cancel: CancellationToken) {
    if let Err(e) = context.handshake.socket_opts.apply(&stream) {
        debug!(error = %e, "Failed to apply client socket options");
    }
    let client = AsyncSocket::from_stream(stream);

    match negotiate(&client, &context.handshake, &cancel).await {
        Ok(Handshake::Established {
            upstream,
            target,
            bound,
        }) => {
            info!(dst = %target, %bound, "Tunnel established");
            let stats = Relay::new(client, upstream, context.buffers.clone(), cancel)
                .run()
                .await;
            info!(
                dst = %target,
                sent = stats.forwarded,
                received = stats.returned,
                "Tunnel closed"
            );
        }
        Ok(Handshake::Refused(refusal)) => {
            debug!(%refusal, "Handshake ended without a tunnel");
            client.close(CloseMode::Graceful);
        }
        Err(SockrelayError::Protocol(e)) => {
            debug!(error = %e, "Protocol violation, dropping client");
            client.close(CloseMode::Abortive);
        }
        Err(e) => {
            error!(error = %e, "Handshake failed");
            client.close(CloseMode::Abortive);
        }
    }
}
