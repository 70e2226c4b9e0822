//! TCP socket options applied to accepted and dialed connections

use crate::config::TcpConfig;
use std::time::Duration;
use tokio::net::TcpStream;

/// Socket options for proxied connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive idle time in seconds
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive probe interval in seconds
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        Self::from_tcp_config(&TcpConfig::default())
    }
}

impl SocketOpts {
    /// Create socket options from TCP config.
    ///
    /// A zero keepalive time disables keepalive.
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        let keepalive = (config.keepalive_secs > 0).then_some(config.keepalive_secs);
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: keepalive,
            keepalive_interval: keepalive.map(|_| config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(idle), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(idle))
                .with_interval(Duration::from_secs(interval));
            socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}
