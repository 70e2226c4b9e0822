//! Awaitable TCP socket with single-flight receive and send
//!
//! The socket owns its stream behind a short-lived lock that is only taken
//! inside a poll, never across an await. Receive and send readiness are
//! tracked independently, so one receive and one send may be in flight at
//! the same time from different tasks.

use crate::error::{SlotError, SocketError};
use crate::net::outcome::ReceiveOutcome;
use crate::net::slot::{Direction, OpSlot};
use crate::net::SocketOpts;
use socket2::SockRef;
use std::future::poll_fn;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How [`AsyncSocket::close`] releases the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Release the handle; queued data is flushed and the peer sees FIN
    Graceful,
    /// Zero linger; queued data is discarded and the peer sees RST
    Abortive,
}

#[derive(Debug)]
enum State {
    Unconnected(TcpSocket),
    Connecting,
    Connected(TcpStream),
    Closed,
}

/// TCP socket exposing awaitable receive, send and connect.
///
/// Failures are returned as [`SocketError`] values inside `Ok`. The outer
/// `Err` is reserved for starting a second operation in a direction that
/// already has one outstanding.
#[derive(Debug)]
pub struct AsyncSocket {
    state: Mutex<State>,
    receive_slot: OpSlot,
    send_slot: OpSlot,
    closed: AtomicBool,
    receive_shut: AtomicBool,
    send_shut: AtomicBool,
    abort_on_close: AtomicBool,
}

impl AsyncSocket {
    fn with_state(state: State) -> Self {
        AsyncSocket {
            state: Mutex::new(state),
            receive_slot: OpSlot::new(Direction::Receive),
            send_slot: OpSlot::new(Direction::Send),
            closed: AtomicBool::new(false),
            receive_shut: AtomicBool::new(false),
            send_shut: AtomicBool::new(false),
            abort_on_close: AtomicBool::new(false),
        }
    }

    /// Wrap an already connected stream, typically one returned by accept
    pub fn from_stream(stream: TcpStream) -> Self {
        Self::with_state(State::Connected(stream))
    }

    /// Create an unconnected socket of the right family for `endpoint`
    pub fn for_endpoint(endpoint: &SocketAddr) -> io::Result<Self> {
        let socket = if endpoint.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        Ok(Self::with_state(State::Unconnected(socket)))
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stream(&self, what: &'static str, op: impl FnOnce(SockRef<'_>) -> io::Result<()>) {
        let state = self.lock_state();
        if let State::Connected(stream) = &*state {
            if let Err(e) = op(SockRef::from(stream)) {
                trace!(error = %e, "{} failed", what);
            }
        }
    }

    /// Connect to `endpoint`.
    ///
    /// Occupies the receive slot for the duration of the attempt. A
    /// cancelled attempt completes with [`SocketError::OperationAborted`].
    pub async fn connect(
        &self,
        endpoint: SocketAddr,
        cancel: &CancellationToken,
    ) -> Result<SocketError, SlotError> {
        let _slot = self.receive_slot.reserve()?;

        if cancel.is_cancelled() {
            return Ok(SocketError::OperationAborted);
        }

        let socket = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, State::Connecting) {
                State::Unconnected(socket) => socket,
                State::Closed => {
                    *state = State::Closed;
                    return Ok(SocketError::OperationAborted);
                }
                other => {
                    *state = other;
                    return Ok(SocketError::Other(io::ErrorKind::AlreadyExists));
                }
            }
        };

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SocketError::OperationAborted),
            result = socket.connect(endpoint) => result.map_err(SocketError::from),
        };

        let mut state = self.lock_state();
        match connected {
            Ok(stream) if !self.closed.load(Ordering::Acquire) => {
                *state = State::Connected(stream);
                Ok(SocketError::Success)
            }
            Ok(_) => Ok(SocketError::OperationAborted),
            Err(err) => {
                *state = State::Closed;
                Ok(err)
            }
        }
    }

    /// Receive at most `buf.len()` bytes.
    ///
    /// Completes with zero bytes and [`SocketError::Success`] when the peer
    /// closed its sending side, and with [`SocketError::Shutdown`] once the
    /// receive direction was shut down locally. A zero-length buffer
    /// completes immediately with zero bytes.
    pub async fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome, SlotError> {
        let _slot = self.receive_slot.reserve()?;

        if buf.is_empty() {
            return Ok(ReceiveOutcome::data(0));
        }
        if cancel.is_cancelled() {
            return Ok(ReceiveOutcome::failed(SocketError::OperationAborted));
        }

        let outcome = tokio::select! {
            biased;
            outcome = poll_fn(|cx| self.poll_receive(cx, &mut *buf)) => outcome,
            _ = cancel.cancelled() => ReceiveOutcome::failed(SocketError::OperationAborted),
        };
        Ok(outcome)
    }

    /// Receive until `buf` is full or a receive comes back without data.
    ///
    /// The returned outcome carries the total number of bytes placed in
    /// `buf` and the error of the last receive.
    pub async fn receive_exact(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome, SlotError> {
        let mut filled = 0;
        while filled < buf.len() {
            let outcome = self.receive(&mut buf[filled..], cancel).await?;
            if !outcome.is_data() {
                return Ok(ReceiveOutcome::new(filled, outcome.error));
            }
            filled += outcome.bytes_received;
        }
        Ok(ReceiveOutcome::data(filled))
    }

    fn poll_receive(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<ReceiveOutcome> {
        let state = self.lock_state();
        let stream = match &*state {
            State::Connected(stream) => stream,
            State::Closed => return Poll::Ready(ReceiveOutcome::failed(SocketError::OperationAborted)),
            _ => return Poll::Ready(ReceiveOutcome::failed(SocketError::NotConnected)),
        };

        loop {
            if let Err(e) = ready!(stream.poll_read_ready(cx)) {
                return Poll::Ready(ReceiveOutcome::failed(SocketError::from(&e)));
            }
            match stream.try_read(buf) {
                Ok(0) => return Poll::Ready(self.end_of_stream()),
                Ok(n) => return Poll::Ready(ReceiveOutcome::data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(ReceiveOutcome::failed(SocketError::from(&e))),
            }
        }
    }

    fn end_of_stream(&self) -> ReceiveOutcome {
        if self.receive_shut.load(Ordering::Acquire) {
            ReceiveOutcome::failed(SocketError::Shutdown)
        } else {
            ReceiveOutcome::end_of_stream()
        }
    }

    /// Send all of `buf`, looping over partial writes.
    ///
    /// A write that accepts zero bytes is reported as
    /// [`SocketError::ConnectionReset`].
    pub async fn send(&self, buf: &[u8]) -> Result<SocketError, SlotError> {
        let _slot = self.send_slot.reserve()?;
        Ok(self.send_all(buf).await)
    }

    async fn send_all(&self, buf: &[u8]) -> SocketError {
        let mut sent = 0;
        poll_fn(|cx| self.poll_send(cx, buf, &mut sent)).await
    }

    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8], sent: &mut usize) -> Poll<SocketError> {
        let state = self.lock_state();
        let stream = match &*state {
            State::Connected(stream) => stream,
            State::Closed => return Poll::Ready(SocketError::OperationAborted),
            _ => return Poll::Ready(SocketError::NotConnected),
        };

        while *sent < buf.len() {
            if let Err(e) = ready!(stream.poll_write_ready(cx)) {
                return Poll::Ready(self.send_error(&e));
            }
            match stream.try_write(&buf[*sent..]) {
                Ok(0) => return Poll::Ready(SocketError::ConnectionReset),
                Ok(n) => *sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(self.send_error(&e)),
            }
        }
        Poll::Ready(SocketError::Success)
    }

    fn send_error(&self, err: &io::Error) -> SocketError {
        match SocketError::from(err) {
            // EPIPE after a peer reset is still a reset
            SocketError::Shutdown if !self.send_shut.load(Ordering::Acquire) => {
                SocketError::ConnectionReset
            }
            other => other,
        }
    }

    /// Stop sending; the peer observes end of stream. Idempotent.
    pub fn shutdown_send(&self) {
        if self.send_shut.swap(true, Ordering::AcqRel) {
            return;
        }
        self.with_stream("shutdown(write)", |sock| sock.shutdown(Shutdown::Write));
    }

    /// Stop receiving. A receive outstanding on this socket completes with
    /// [`SocketError::Shutdown`]. Idempotent.
    pub fn shutdown_receive(&self) {
        if self.receive_shut.swap(true, Ordering::AcqRel) {
            return;
        }
        self.with_stream("shutdown(read)", |sock| sock.shutdown(Shutdown::Read));
    }

    /// Abortive teardown.
    ///
    /// Switches the socket to zero linger so the eventual close resets the
    /// peer, and shuts down the receive side to release a pending receive.
    pub fn disconnect(&self) {
        self.abort_on_close.store(true, Ordering::Release);
        self.with_stream("set_linger(0)", |sock| sock.set_linger(Some(Duration::ZERO)));
        self.shutdown_receive();
    }

    /// Release the underlying OS socket.
    ///
    /// Only the first call has an effect; it returns `true`. Pending
    /// operations complete with [`SocketError::OperationAborted`]. A socket
    /// that went through [`disconnect`](Self::disconnect) always closes
    /// abortively.
    pub fn close(&self, mode: CloseMode) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let previous = std::mem::replace(&mut *self.lock_state(), State::Closed);
        if let State::Connected(stream) = previous {
            let sock = SockRef::from(&stream);
            if mode == CloseMode::Abortive || self.abort_on_close.load(Ordering::Acquire) {
                if let Err(e) = sock.set_linger(Some(Duration::ZERO)) {
                    trace!(error = %e, "set_linger(0) failed");
                }
            }
            // Wakes a receive parked on this socket before the handle goes away
            let _ = sock.shutdown(Shutdown::Read);
            drop(stream);
        }
        true
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Apply TCP options to the connected stream
    pub fn apply_opts(&self, opts: &SocketOpts) -> io::Result<()> {
        match &*self.lock_state() {
            State::Connected(stream) => opts.apply(stream),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Local endpoint of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &*self.lock_state() {
            State::Connected(stream) => stream.local_addr(),
            State::Unconnected(socket) => socket.local_addr(),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Remote endpoint of the socket
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &*self.lock_state() {
            State::Connected(stream) => stream.peer_addr(),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}
