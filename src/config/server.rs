//! Server configuration types
//!
//! Defines the configuration structures for the Sockrelay server.

use super::TcpConfig;
use crate::error::SockrelayError;
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1080
}

/// Default relay buffer size in bytes
fn default_buffer_size() -> usize {
    4096
}

/// Default upstream connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Default wait for the client to hang up after a failure reply
fn default_reject_wait_ms() -> u64 {
    2000
}

/// Default drain period on shutdown
fn default_shutdown_grace_secs() -> u64 {
    7
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// SOCKS5 server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Size of each relay buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Upstream resolve and connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Milliseconds to wait for the client to close after a failure reply
    #[serde(default = "default_reject_wait_ms")]
    pub reject_wait_ms: u64,

    /// Seconds to wait for open connections on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Allow targets that resolve to this host
    #[serde(default)]
    pub allow_loopback: bool,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            connect_timeout: default_connect_timeout(),
            reject_wait_ms: default_reject_wait_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            allow_loopback: false,
            auth: AuthConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Socket address string to bind
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.contains(':') {
            format!("[{}]:{}", self.listen_addr, self.port)
        } else {
            format!("{}:{}", self.listen_addr, self.port)
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SockrelayError> {
        if self.buffer_size == 0 {
            return Err(SockrelayError::Config(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout == 0 {
            return Err(SockrelayError::Config(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        self.auth.validate()
    }
}

/// How username/password logins are checked
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Accept any login, and clients without authentication
    #[default]
    #[serde(rename = "accept_all")]
    AcceptAll,
    /// Require the configured username and password
    #[serde(rename = "static")]
    Static,
}

/// Authentication configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Credential policy
    #[serde(default)]
    pub mode: AuthMode,

    /// Username for static mode
    #[serde(default)]
    pub username: Option<String>,

    /// Password for static mode
    #[serde(default)]
    pub password: Option<String>,
}

impl AuthConfig {
    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty()) && self.password.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SockrelayError> {
        if self.mode == AuthMode::Static && !self.has_credentials() {
            return Err(SockrelayError::Config(
                "Static authentication requires username and password".to_string(),
            ));
        }
        if self.username.as_ref().is_some_and(|u| u.len() > 255)
            || self.password.as_ref().is_some_and(|p| p.len() > 255)
        {
            return Err(SockrelayError::Config(
                "Username and password are limited to 255 bytes".to_string(),
            ));
        }
        Ok(())
    }
}
