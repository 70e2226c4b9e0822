//! Authentication method selection and credential policies
//!
//! The handshake prefers username/password over no-auth whenever the
//! client offers it. What happens to the submitted credentials is up to
//! the configured [`CredentialPolicy`].

use super::types::{AuthMethod, OfferedMethods};
use crate::config::{AuthConfig, AuthMode};
use std::fmt;
use std::sync::Arc;

/// Decides which logins are accepted
pub trait CredentialPolicy: fmt::Debug + Send + Sync {
    /// When true, clients that only offer no-auth are refused
    fn requires_login(&self) -> bool;

    /// Check a submitted username/password pair
    fn verify(&self, username: &[u8], password: &[u8]) -> bool;
}

/// Accept every login, and clients that skip authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CredentialPolicy for AcceptAll {
    fn requires_login(&self) -> bool {
        false
    }

    fn verify(&self, _username: &[u8], _password: &[u8]) -> bool {
        true
    }
}

/// Require one fixed username/password pair
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    /// Accept only `username` with `password`
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticCredentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CredentialPolicy for StaticCredentials {
    fn requires_login(&self) -> bool {
        true
    }

    fn verify(&self, username: &[u8], password: &[u8]) -> bool {
        username == self.username.as_bytes() && password == self.password.as_bytes()
    }
}

/// Build the credential policy described by `config`
///
/// Static mode without both credentials is rejected by config validation;
/// should it get here anyway it falls back to refusing every login.
pub fn policy_from_config(config: &AuthConfig) -> Arc<dyn CredentialPolicy> {
    match config.mode {
        AuthMode::AcceptAll => Arc::new(AcceptAll),
        AuthMode::Static => {
            let username = config.username.clone().unwrap_or_default();
            let password = config.password.clone().unwrap_or_default();
            if username.is_empty() {
                Arc::new(RejectAll)
            } else {
                Arc::new(StaticCredentials::new(username, password))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RejectAll;

impl CredentialPolicy for RejectAll {
    fn requires_login(&self) -> bool {
        true
    }

    fn verify(&self, _username: &[u8], _password: &[u8]) -> bool {
        false
    }
}

/// Pick the method the server answers the greeting with
pub fn select_method(offered: &OfferedMethods<'_>, policy: &dyn CredentialPolicy) -> AuthMethod {
    if offered.contains(AuthMethod::UsernamePassword) {
        AuthMethod::UsernamePassword
    } else if offered.contains(AuthMethod::NoAuth) && !policy.requires_login() {
        AuthMethod::NoAuth
    } else {
        AuthMethod::NotAcceptable
    }
}
