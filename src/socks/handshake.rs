//! SOCKS5 server-side handshake
//!
//! Drives one client from its greeting to an established upstream
//! connection:
//!
//! 1. read the greeting and pick an auth method
//! 2. run the username/password exchange when it was selected
//! 3. read the connect request
//! 4. dial the target and report the outcome
//!
//! The steps only ever move forward. Malformed input ends the handshake
//! with a [`ProtocolError`](crate::error::ProtocolError) and no reply.

use super::auth::{select_method, CredentialPolicy};
use super::codec::*;
use super::consts::*;
use super::types::{is_loopback_ip, AddressKind, AuthMethod, ConnectReply, SocksCommand, TargetAddr};
use crate::error::{SlotError, SockrelayError, Socks5ReplyCode, SocketError};
use crate::net::{AsyncSocket, CloseMode, SocketOpts};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Knobs the handshake needs from the server configuration
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    /// Upper bound for resolving and connecting to the target
    pub connect_timeout: Duration,
    /// How long to wait for the client to hang up after a failure reply
    pub reject_wait: Duration,
    /// Permit targets on this host
    pub allow_loopback: bool,
    /// Options applied to the upstream socket
    pub socket_opts: SocketOpts,
    /// Credential check for username/password logins
    pub credentials: Arc<dyn CredentialPolicy>,
}

/// Result of a handshake that did not hit a protocol violation
#[derive(Debug)]
pub enum Handshake {
    /// Upstream connected and the success reply was delivered
    #[allow(missing_docs)]
    Established {
        upstream: AsyncSocket,
        target: TargetAddr,
        bound: SocketAddr,
    },
    /// The handshake ended without a tunnel
    Refused(Refusal),
}

/// Why a handshake ended without a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The client went away mid-handshake
    Disconnected,
    /// None of the offered auth methods is acceptable
    NoAcceptableMethod,
    /// The credential policy rejected the login
    LoginRejected,
    /// BIND or UDP ASSOCIATE
    CommandNotSupported(SocksCommand),
    /// The target was refused or could not be reached
    TargetFailed(Socks5ReplyCode),
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Disconnected => write!(f, "client disconnected"),
            Refusal::NoAcceptableMethod => write!(f, "no acceptable auth method"),
            Refusal::LoginRejected => write!(f, "login rejected"),
            Refusal::CommandNotSupported(cmd) => write!(f, "command {} not supported", cmd),
            Refusal::TargetFailed(code) => write!(f, "target failed with {:?}", code),
        }
    }
}

/// Fill `buf` completely from the client; false when the client went away
async fn receive_exact(
    client: &AsyncSocket,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<bool, SlotError> {
    let expected = buf.len();
    let outcome = client.receive_exact(buf, cancel).await?;
    if !outcome.is_complete(expected) {
        trace!(
            received = outcome.bytes_received,
            expected,
            error = %outcome.error,
            "Client ended the handshake early"
        );
        return Ok(false);
    }
    Ok(true)
}

async fn send_all(client: &AsyncSocket, bytes: &[u8]) -> Result<bool, SlotError> {
    let error = client.send(bytes).await?;
    if error != SocketError::Success {
        trace!(%error, "Handshake reply not delivered");
        return Ok(false);
    }
    Ok(true)
}

/// Run the server side of a SOCKS5 handshake on `client`
///
/// # Arguments
///
/// * `client` - The accepted client socket
/// * `settings` - Dial and auth settings
/// * `cancel` - Aborts any pending receive or dial
///
/// # Returns
///
/// [`Handshake::Established`] with the connected upstream socket, or
/// [`Handshake::Refused`] once the client has been told (when possible).
/// Protocol violations are returned as errors and get no reply.
pub async fn negotiate(
    client: &AsyncSocket,
    settings: &HandshakeSettings,
    cancel: &CancellationToken,
) -> Result<Handshake, SockrelayError> {
    // Large enough for the biggest client message, a full login
    let mut buf = [0u8; MAX_LOGIN_LEN];

    // Greeting
    if !receive_exact(client, &mut buf[..AUTH_HEADER_LEN], cancel).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }
    let count = decode_auth_header(&buf[..AUTH_HEADER_LEN])?;
    let greeting_len = AUTH_HEADER_LEN + count;
    if !receive_exact(client, &mut buf[AUTH_HEADER_LEN..greeting_len], cancel).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }
    let offered = decode_auth_request(&buf[..greeting_len])?;
    let method = select_method(&offered, settings.credentials.as_ref());
    debug!(%method, offered = offered.len(), "Auth method selected");

    if !send_all(client, &encode_method_selection(method)).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }
    match method {
        AuthMethod::NotAcceptable => return Ok(Handshake::Refused(Refusal::NoAcceptableMethod)),
        AuthMethod::UsernamePassword => {
            if let Some(refusal) =
                authenticate(client, &mut buf, settings.credentials.as_ref(), cancel).await?
            {
                return Ok(Handshake::Refused(refusal));
            }
        }
        _ => {}
    }

    // Connect request
    if !receive_exact(client, &mut buf[..REQUEST_HEADER_LEN], cancel).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }
    let header = decode_request_header(&buf[..REQUEST_HEADER_LEN])?;
    let mut request_len = REQUEST_HEADER_LEN;
    let address_len = match header.kind {
        AddressKind::Ipv4 => 4,
        AddressKind::Ipv6 => 16,
        AddressKind::DomainName => {
            if !receive_exact(client, &mut buf[request_len..request_len + 1], cancel).await? {
                return Ok(Handshake::Refused(Refusal::Disconnected));
            }
            request_len += 1;
            buf[REQUEST_HEADER_LEN] as usize
        }
    };
    let tail = address_len + 2;
    if !receive_exact(client, &mut buf[request_len..request_len + tail], cancel).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }
    request_len += tail;
    let request = decode_connect_request(&buf[..request_len])?;
    debug!(command = %request.command, dst = %request.target, "Connect request");

    if request.command != SocksCommand::Connect {
        reject(client, Socks5ReplyCode::CommandNotSupported, settings, cancel).await?;
        return Ok(Handshake::Refused(Refusal::CommandNotSupported(request.command)));
    }

    if !settings.allow_loopback && request.target.is_loopback() {
        debug!(dst = %request.target, "Refusing loopback target");
        reject(client, Socks5ReplyCode::HostUnreachable, settings, cancel).await?;
        return Ok(Handshake::Refused(Refusal::TargetFailed(
            Socks5ReplyCode::HostUnreachable,
        )));
    }

    // Dial
    let upstream = match dial(&request.target, settings, cancel).await {
        Ok(upstream) => upstream,
        Err(code) => {
            reject(client, code, settings, cancel).await?;
            return Ok(Handshake::Refused(Refusal::TargetFailed(code)));
        }
    };

    let bound = match upstream.local_addr() {
        Ok(bound) => bound,
        Err(e) => {
            warn!(error = %e, "Upstream socket has no local address");
            reject(client, Socks5ReplyCode::GeneralFailure, settings, cancel).await?;
            return Ok(Handshake::Refused(Refusal::TargetFailed(
                Socks5ReplyCode::GeneralFailure,
            )));
        }
    };

    let mut reply = [0u8; MAX_REPLY_LEN];
    let len = encode_connect_reply(&ConnectReply::success(bound), &mut reply);
    if !send_all(client, &reply[..len]).await? {
        return Ok(Handshake::Refused(Refusal::Disconnected));
    }

    Ok(Handshake::Established {
        upstream,
        target: request.target,
        bound,
    })
}

/// Username/password sub-negotiation; `None` when the login was accepted
async fn authenticate(
    client: &AsyncSocket,
    buf: &mut [u8; MAX_LOGIN_LEN],
    policy: &dyn CredentialPolicy,
    cancel: &CancellationToken,
) -> Result<Option<Refusal>, SockrelayError> {
    if !receive_exact(client, &mut buf[..2], cancel).await? {
        return Ok(Some(Refusal::Disconnected));
    }
    let ulen = decode_login_header(&buf[..2])?;

    // Username plus the password length byte
    let plen_at = 2 + ulen;
    if !receive_exact(client, &mut buf[2..plen_at + 1], cancel).await? {
        return Ok(Some(Refusal::Disconnected));
    }
    let login_len = plen_at + 1 + buf[plen_at] as usize;
    if !receive_exact(client, &mut buf[plen_at + 1..login_len], cancel).await? {
        return Ok(Some(Refusal::Disconnected));
    }

    let login = decode_login_request(&buf[..login_len])?;
    let accepted = policy.verify(login.username, login.password);
    debug!(
        username = %String::from_utf8_lossy(login.username),
        accepted,
        "Login"
    );

    if !send_all(client, &encode_login_status(accepted)).await? {
        return Ok(Some(Refusal::Disconnected));
    }
    Ok((!accepted).then_some(Refusal::LoginRejected))
}

/// Resolve and connect to `target` within the configured timeout
async fn dial(
    target: &TargetAddr,
    settings: &HandshakeSettings,
    cancel: &CancellationToken,
) -> Result<AsyncSocket, Socks5ReplyCode> {
    let attempt = async {
        let endpoint = target.resolve().await.map_err(|e| {
            debug!(dst = %target, error = %e, "Failed to resolve target");
            Socks5ReplyCode::HostUnreachable
        })?;

        if !settings.allow_loopback && is_loopback_ip(endpoint.ip()) {
            debug!(dst = %target, %endpoint, "Target resolved to loopback");
            return Err(Socks5ReplyCode::HostUnreachable);
        }

        let upstream = AsyncSocket::for_endpoint(&endpoint).map_err(|e| {
            warn!(%endpoint, error = %e, "Failed to create upstream socket");
            Socks5ReplyCode::ConnectionRefused
        })?;

        let error = upstream.connect(endpoint, cancel).await.map_err(|e| {
            warn!(error = %e, "Upstream connect overlapped another operation");
            Socks5ReplyCode::GeneralFailure
        })?;
        if error != SocketError::Success {
            debug!(%endpoint, %error, "Failed to connect to target");
            return Err(Socks5ReplyCode::from(error));
        }

        if !settings.allow_loopback {
            if let Ok(peer) = upstream.peer_addr() {
                if is_loopback_ip(peer.ip()) {
                    debug!(dst = %target, %peer, "Upstream connection landed on this host");
                    upstream.close(CloseMode::Abortive);
                    return Err(Socks5ReplyCode::HostUnreachable);
                }
            }
        }

        if let Err(e) = upstream.apply_opts(&settings.socket_opts) {
            trace!(error = %e, "Failed to apply upstream socket options");
        }
        debug!(%endpoint, "Connected to target");
        Ok(upstream)
    };

    match tokio::time::timeout(settings.connect_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => {
            debug!(dst = %target, "Connection to target timed out");
            Err(Socks5ReplyCode::from(SocketError::TimedOut))
        }
    }
}

/// Send a failure reply, then give the client a bounded chance to hang up
async fn reject(
    client: &AsyncSocket,
    code: Socks5ReplyCode,
    settings: &HandshakeSettings,
    cancel: &CancellationToken,
) -> Result<(), SlotError> {
    let mut reply = [0u8; MAX_REPLY_LEN];
    let len = encode_connect_reply(&ConnectReply::failure(code), &mut reply);
    if !send_all(client, &reply[..len]).await? {
        return Ok(());
    }

    let mut scratch = [0u8; 64];
    let waited = tokio::time::timeout(settings.reject_wait, async {
        loop {
            let outcome = client.receive(&mut scratch, cancel).await?;
            if !outcome.is_data() {
                return Ok::<_, SlotError>(outcome.error);
            }
        }
    })
    .await;

    match waited {
        Ok(result) => trace!(error = %result?, "Client hung up after failure reply"),
        Err(_) => trace!("Client still connected after failure reply"),
    }
    Ok(())
}
