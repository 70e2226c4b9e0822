//! Configuration module for Sockrelay
//!
//! This module provides configuration types and parsing for the server.

mod server;
mod tcp;

pub use server::{AuthConfig, AuthMode, Config, ServerConfig};
pub use tcp::TcpConfig;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 1080);
        assert_eq!(config.server.listen_addr, "0.0.0.0");
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[server]
listen_addr = "127.0.0.1"
port = 1090
buffer_size = 8192
connect_timeout = 5
reject_wait_ms = 500
shutdown_grace_secs = 3
allow_loopback = true

[server.auth]
mode = "static"
username = "user"
password = "pass"

[server.tcp]
nodelay = false
keepalive_secs = 30
keepalive_interval = 10
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.server.port, 1090);
        assert_eq!(config.server.buffer_size, 8192);
        assert_eq!(config.server.reject_wait_ms, 500);
        assert!(config.server.allow_loopback);
        assert_eq!(config.server.auth.mode, AuthMode::Static);
        assert_eq!(config.server.auth.username, Some("user".to_string()));
        assert!(!config.server.tcp.nodelay);
        assert_eq!(config.server.tcp.keepalive_secs, 30);
        assert!(config.server.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_auth_mode() {
        let config_str = r#"
[server.auth]
mode = "ldap"
"#;
        assert!(parse_config(config_str).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 2080").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 2080);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/sockrelay.toml").unwrap_err();
        assert!(format!("{}", err).contains("Failed to read config file"));
    }
}
