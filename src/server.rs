//! SOCKS5 listener
//!
//! Accepts client connections and runs each one on its own task until the
//! shutdown token fires. After that no new connections are accepted and
//! the server waits a bounded time for the open ones to finish.

use crate::config::ServerConfig;
use crate::socks::{handle_connection, ProxyContext};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct ConnectionTracker {
    active: AtomicUsize,
    next_id: AtomicU64,
    idle: Notify,
}

impl ConnectionTracker {
    fn enter(self: &Arc<Self>) -> ActiveConnection {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveConnection(self.clone())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps a connection counted for as long as its task runs
struct ActiveConnection(Arc<ConnectionTracker>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// SOCKS5 proxy server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    context: Arc<ProxyContext>,
    tracker: Arc<ConnectionTracker>,
    shutdown_grace: Duration,
}

impl Server {
    /// Validate `config` and bind the listening socket it describes
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Server {
            listener,
            context: Arc::new(ProxyContext::from_config(config)),
            tracker: Arc::new(ConnectionTracker::default()),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.tracker.active.load(Ordering::Acquire)
    }

    /// Accept connections until `cancel` fires
    ///
    /// # Returns
    ///
    /// `true` when every open connection finished within the shutdown
    /// grace period, `false` when some were still running.
    pub async fn run(&self, cancel: CancellationToken) -> bool {
        match self.local_addr() {
            Ok(addr) => info!("Listening for SOCKS5 clients on {}", addr),
            Err(e) => warn!("Listening on an unknown address: {}", e),
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, cancel.child_token()),
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        let open = self.active_connections();
        info!("Stopped accepting, {} connection(s) still open", open);

        let drained = tokio::time::timeout(self.shutdown_grace, self.tracker.wait_idle())
            .await
            .is_ok();
        if drained {
            info!("All connections closed");
        } else {
            warn!(
                "{} connection(s) still open after {:?}",
                self.active_connections(),
                self.shutdown_grace
            );
        }
        drained
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let id = self.tracker.next_id.fetch_add(1, Ordering::Relaxed);
        let active = self.tracker.enter();
        let context = self.context.clone();

        tokio::spawn(
            async move {
                let _active = active;
                debug!("Accepted connection");
                handle_connection(stream, &context, cancel).await;
                debug!("Connection finished");
            }
            .instrument(info_span!("conn", id, %peer)),
        );
    }
}
