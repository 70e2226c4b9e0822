//! SOCKS5 module for Sockrelay
//!
//! Server side of RFC 1928 with the RFC 1929 username/password method.
//! Only CONNECT is served; BIND and UDP ASSOCIATE are answered with a
//! command-not-supported reply.

mod auth;
mod codec;
mod consts;
mod handler;
mod handshake;
mod types;

pub use auth::{policy_from_config, select_method, AcceptAll, CredentialPolicy, StaticCredentials};
pub use codec::*;
pub use consts::*;
pub use handler::{handle_connection, ProxyContext};
pub use handshake::{negotiate, Handshake, HandshakeSettings, Refusal};
pub use types::{
    is_loopback_ip, AddressKind, AuthMethod, ConnectReply, ConnectRequest, LoginRequest,
    OfferedMethods, SocksCommand, TargetAddr,
};
