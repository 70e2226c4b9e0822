//! Bidirectional TCP relay
//!
//! A [`Relay`] joins two connected sockets with one pump per direction.
//! Each pump reads from its source and writes to its destination, and
//! translates what it observes on the source (graceful end of stream,
//! reset, local shutdown, other errors) into the matching action on the
//! destination, so half-close and reset propagate across the proxy.
//!
//! Every socket is physically closed exactly once: each pump, when it
//! ends, files a close request against both sockets, and whichever request
//! is the second one for a socket performs the close.

mod buffer;

pub use buffer::{BufferPool, RentedBuffer};

use crate::error::SocketError;
use crate::net::{AsyncSocket, CloseMode, ReceiveOutcome};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Close requests a socket needs before it is physically closed
const CLOSE_REQUESTS_TO_CLOSE: u8 = 2;

/// The socket operations a relay pump needs
pub trait RelaySocket: Send + Sync {
    /// Receive into `buf`, giving up once `cancel` fires
    fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = ReceiveOutcome> + Send;

    /// Send all of `buf`
    fn send(&self, buf: &[u8]) -> impl Future<Output = SocketError> + Send;

    /// Half-close the sending side
    fn shutdown_send(&self);

    /// Stop receiving, releasing a pending receive
    fn shutdown_receive(&self);

    /// Abortive teardown, the peer will observe a reset
    fn disconnect(&self);

    /// Release the OS socket
    fn close(&self, mode: CloseMode);
}

impl RelaySocket for AsyncSocket {
    async fn receive(&self, buf: &mut [u8], cancel: &CancellationToken) -> ReceiveOutcome {
        match AsyncSocket::receive(self, buf, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Relay receive overlapped another receive");
                ReceiveOutcome::failed(SocketError::OperationAborted)
            }
        }
    }

    async fn send(&self, buf: &[u8]) -> SocketError {
        match AsyncSocket::send(self, buf).await {
            Ok(error) => error,
            Err(e) => {
                error!(error = %e, "Relay send overlapped another send");
                SocketError::OperationAborted
            }
        }
    }

    fn shutdown_send(&self) {
        AsyncSocket::shutdown_send(self)
    }

    fn shutdown_receive(&self) {
        AsyncSocket::shutdown_receive(self)
    }

    fn disconnect(&self) {
        AsyncSocket::disconnect(self)
    }

    fn close(&self, mode: CloseMode) {
        AsyncSocket::close(self, mode);
    }
}

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes forwarded from the first socket to the second
    pub forwarded: u64,
    /// Bytes forwarded from the second socket to the first
    pub returned: u64,
}

#[derive(Debug)]
struct RelayEnd<S> {
    socket: S,
    close_requests: AtomicU8,
    aborted: AtomicBool,
}

impl<S> RelayEnd<S> {
    fn new(socket: S) -> Self {
        RelayEnd {
            socket,
            close_requests: AtomicU8::new(0),
            aborted: AtomicBool::new(false),
        }
    }
}

/// Duplex relay between two connected sockets
#[derive(Debug)]
pub struct Relay<S> {
    ends: [RelayEnd<S>; 2],
    buffers: BufferPool,
    cancel: CancellationToken,
}

impl<S: RelaySocket> Relay<S> {
    /// Create a relay between `first` and `second`.
    ///
    /// Once `cancel` fires, pumps stop starting new receives. A chunk that
    /// was already received is still delivered.
    pub fn new(first: S, second: S, buffers: BufferPool, cancel: CancellationToken) -> Self {
        Relay {
            ends: [RelayEnd::new(first), RelayEnd::new(second)],
            buffers,
            cancel,
        }
    }

    /// Run both directions until each has ended and both sockets are closed
    pub async fn run(self) -> RelayStats {
        let (forwarded, returned) = tokio::join!(self.pump(0), self.pump(1));
        RelayStats {
            forwarded,
            returned,
        }
    }

    /// Copy from `ends[from]` to the other end until the source is done.
    ///
    /// Returns the number of bytes delivered.
    async fn pump(&self, from: usize) -> u64 {
        let to = 1 - from;
        let source = &self.ends[from].socket;
        let dest = &self.ends[to].socket;
        let mut buf = self.buffers.rent();
        let mut delivered = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                debug!(from, "Relay cancelled");
                break;
            }

            let outcome = source.receive(&mut buf, &self.cancel).await;
            if outcome.is_data() {
                let error = dest.send(&buf[..outcome.bytes_received]).await;
                if error != SocketError::Success {
                    debug!(from, %error, "Relay send failed");
                    source.shutdown_receive();
                    self.abort(to);
                    break;
                }
                delivered += outcome.bytes_received as u64;
                continue;
            }

            match outcome.error {
                SocketError::Success => {
                    trace!(from, "End of stream, half-closing destination");
                    dest.shutdown_send();
                }
                error if error.is_abrupt_disconnect() => {
                    debug!(from, %error, "Source dropped abruptly");
                    self.ends[to].aborted.store(true, Ordering::Release);
                    dest.disconnect();
                }
                error if error.is_local_stop() => {
                    trace!(from, %error, "Source stopped locally");
                }
                error => {
                    debug!(from, %error, "Relay receive failed");
                    self.abort(to);
                }
            }
            break;
        }

        drop(buf);
        self.request_close(from);
        self.request_close(to);
        delivered
    }

    /// Release the pump reading from `ends[index]` and make its eventual
    /// close abortive
    fn abort(&self, index: usize) {
        self.ends[index].aborted.store(true, Ordering::Release);
        self.ends[index].socket.shutdown_receive();
    }

    fn request_close(&self, index: usize) {
        let end = &self.ends[index];
        let requests = end.close_requests.fetch_add(1, Ordering::AcqRel) + 1;
        if requests == CLOSE_REQUESTS_TO_CLOSE {
            let mode = if end.aborted.load(Ordering::Acquire) {
                CloseMode::Abortive
            } else {
                CloseMode::Graceful
            };
            trace!(index, ?mode, "Closing relay socket");
            end.socket.close(mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct Script {
        receives: Mutex<VecDeque<ReceiveOutcome>>,
        sent: Mutex<Vec<u8>>,
        send_error: Mutex<Option<SocketError>>,
        receive_shut: AtomicBool,
        woken: Notify,
        shutdown_sends: AtomicUsize,
        disconnects: AtomicUsize,
        closes: Mutex<Vec<CloseMode>>,
    }

    #[derive(Debug, Clone, Default)]
    struct MockSocket(Arc<Script>);

    impl MockSocket {
        fn with_receives(outcomes: impl IntoIterator<Item = ReceiveOutcome>) -> Self {
            let socket = MockSocket::default();
            socket.0.receives.lock().unwrap().extend(outcomes);
            socket
        }
    }

    impl RelaySocket for MockSocket {
        async fn receive(&self, buf: &mut [u8], cancel: &CancellationToken) -> ReceiveOutcome {
            loop {
                let notified = self.0.woken.notified();
                if self.0.receive_shut.load(Ordering::Acquire) {
                    return ReceiveOutcome::failed(SocketError::Shutdown);
                }
                if let Some(outcome) = self.0.receives.lock().unwrap().pop_front() {
                    buf[..outcome.bytes_received].fill(b'x');
                    return outcome;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = cancel.cancelled() => {
                        return ReceiveOutcome::failed(SocketError::OperationAborted);
                    }
                }
            }
        }

        async fn send(&self, buf: &[u8]) -> SocketError {
            if let Some(error) = *self.0.send_error.lock().unwrap() {
                return error;
            }
            self.0.sent.lock().unwrap().extend_from_slice(buf);
            SocketError::Success
        }

        fn shutdown_send(&self) {
            self.0.shutdown_sends.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown_receive(&self) {
            self.0.receive_shut.store(true, Ordering::Release);
            self.0.woken.notify_waiters();
        }

        fn disconnect(&self) {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
            self.shutdown_receive();
        }

        fn close(&self, mode: CloseMode) {
            self.0.closes.lock().unwrap().push(mode);
        }
    }

    fn relay(first: &MockSocket, second: &MockSocket) -> Relay<MockSocket> {
        Relay::new(
            first.clone(),
            second.clone(),
            BufferPool::new(64, 2),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_graceful_end_of_stream_half_closes_peer() {
        let client = MockSocket::with_receives([
            ReceiveOutcome::data(5),
            ReceiveOutcome::end_of_stream(),
        ]);
        let upstream = MockSocket::with_receives([
            ReceiveOutcome::data(3),
            ReceiveOutcome::end_of_stream(),
        ]);

        let stats = relay(&client, &upstream).run().await;

        assert_eq!(stats, RelayStats { forwarded: 5, returned: 3 });
        assert_eq!(upstream.0.sent.lock().unwrap().len(), 5);
        assert_eq!(client.0.sent.lock().unwrap().len(), 3);
        assert_eq!(upstream.0.shutdown_sends.load(Ordering::SeqCst), 1);
        assert_eq!(client.0.shutdown_sends.load(Ordering::SeqCst), 1);
        assert_eq!(*client.0.closes.lock().unwrap(), vec![CloseMode::Graceful]);
        assert_eq!(*upstream.0.closes.lock().unwrap(), vec![CloseMode::Graceful]);
    }

    #[tokio::test]
    async fn test_reset_disconnects_peer() {
        let client = MockSocket::with_receives([ReceiveOutcome::failed(
            SocketError::ConnectionReset,
        )]);
        // The upstream never sends; only the disconnect can release it
        let upstream = MockSocket::default();

        relay(&client, &upstream).run().await;

        assert_eq!(upstream.0.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.0.shutdown_sends.load(Ordering::SeqCst), 0);
        assert_eq!(*upstream.0.closes.lock().unwrap(), vec![CloseMode::Abortive]);
        assert_eq!(client.0.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_error_releases_other_direction() {
        let client = MockSocket::with_receives([ReceiveOutcome::failed(SocketError::TimedOut)]);
        let upstream = MockSocket::default();

        relay(&client, &upstream).run().await;

        assert!(upstream.0.receive_shut.load(Ordering::Acquire));
        assert_eq!(upstream.0.disconnects.load(Ordering::SeqCst), 0);
        assert_eq!(*upstream.0.closes.lock().unwrap(), vec![CloseMode::Abortive]);
        assert_eq!(*client.0.closes.lock().unwrap(), vec![CloseMode::Graceful]);
    }

    #[tokio::test]
    async fn test_send_failure_stops_both_directions() {
        let client = MockSocket::with_receives([ReceiveOutcome::data(10)]);
        let upstream = MockSocket::default();
        *upstream.0.send_error.lock().unwrap() = Some(SocketError::ConnectionReset);

        let stats = relay(&client, &upstream).run().await;

        assert_eq!(stats.forwarded, 0);
        assert!(client.0.receive_shut.load(Ordering::Acquire));
        assert!(upstream.0.receive_shut.load(Ordering::Acquire));
        assert_eq!(client.0.closes.lock().unwrap().len(), 1);
        assert_eq!(*upstream.0.closes.lock().unwrap(), vec![CloseMode::Abortive]);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_relay() {
        let client = MockSocket::default();
        let upstream = MockSocket::default();
        let cancel = CancellationToken::new();
        let relay = Relay::new(
            client.clone(),
            upstream.clone(),
            BufferPool::new(64, 2),
            cancel.clone(),
        );

        let task = tokio::spawn(relay.run());
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), RelayStats::default());
        assert_eq!(client.0.closes.lock().unwrap().len(), 1);
        assert_eq!(upstream.0.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_every_socket_closed_once_in_random_scenarios() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let terminals = [
            ReceiveOutcome::end_of_stream(),
            ReceiveOutcome::failed(SocketError::ConnectionReset),
            ReceiveOutcome::failed(SocketError::ConnectionAborted),
            ReceiveOutcome::failed(SocketError::TimedOut),
            ReceiveOutcome::failed(SocketError::OperationAborted),
        ];
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let script = |rng: &mut rand::rngs::ThreadRng| {
                let chunks = rng.gen_range(0..4);
                let mut outcomes: Vec<_> = (0..chunks)
                    .map(|_| ReceiveOutcome::data(rng.gen_range(1..=64)))
                    .collect();
                outcomes.push(*terminals.choose(rng).unwrap());
                outcomes
            };
            let client = MockSocket::with_receives(script(&mut rng));
            let upstream = MockSocket::with_receives(script(&mut rng));
            if rng.gen_bool(0.2) {
                *upstream.0.send_error.lock().unwrap() = Some(SocketError::ConnectionReset);
            }

            tokio::time::timeout(Duration::from_secs(5), relay(&client, &upstream).run())
                .await
                .expect("relay did not terminate");

            assert_eq!(client.0.closes.lock().unwrap().len(), 1);
            assert_eq!(upstream.0.closes.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_buffers_return_to_pool() {
        let client = MockSocket::with_receives([ReceiveOutcome::end_of_stream()]);
        let upstream = MockSocket::with_receives([ReceiveOutcome::end_of_stream()]);
        let pool = BufferPool::new(64, 4);

        Relay::new(client, upstream, pool.clone(), CancellationToken::new())
            .run()
            .await;

        // The pumps may or may not have overlapped
        assert!((1..=2).contains(&pool.idle_count()));
    }
}
