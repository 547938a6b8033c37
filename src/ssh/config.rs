//! SSH configuration types
//!
//! Connection parameters for the remote host plus the parser for
//! `user@host[:port]` target strings.

use std::path::PathBuf;

use super::hostkey::TrustMode;
use crate::error::{MigrateError, Result};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH connection configuration (the execution target)
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Explicit private key file, tried after the agent
    pub key_path: Option<PathBuf>,

    /// Host key trust mode
    pub trust_mode: TrustMode,

    /// Trust file; `None` means `~/.ssh/known_hosts`
    pub known_hosts: Option<PathBuf>,
}

impl SshConfig {
    /// Create a new SSH configuration with minimal required fields
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            key_path: None,
            trust_mode: TrustMode::Default,
            known_hosts: None,
        }
    }

    /// Build a configuration from a `user@host[:port]` target string
    pub fn from_target(target: &str, default_port: u16) -> Result<Self> {
        let (user, host, port) = parse_target(target, default_port)?;
        Ok(Self::new(host, user).with_port(port))
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set an explicit private key file
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Set the host key trust mode
    pub fn with_trust_mode(mut self, mode: TrustMode) -> Self {
        self.trust_mode = mode;
        self
    }

    /// Set a non-default trust file
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// `host:port` socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split `user@host[:port]` into its parts.
///
/// The user falls back to the local OS user (`$USER`, then `$USERNAME`) and
/// the port to `default_port`.
pub fn parse_target(target: &str, default_port: u16) -> Result<(String, String, u16)> {
    let target = target.trim();

    let (user, rest) = match target.split_once('@') {
        Some((user, rest)) => (user.trim().to_string(), rest),
        None => (local_username().unwrap_or_default(), target),
    };

    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                MigrateError::config(format!("invalid SSH port '{}' in {}", port, target))
            })?;
            (host.trim().to_string(), port)
        }
        None => (rest.trim().to_string(), default_port),
    };

    if user.is_empty() {
        return Err(MigrateError::config(format!(
            "could not determine username for remote host: {}",
            target
        )));
    }

    if host.is_empty() {
        return Err(MigrateError::config(format!(
            "host cannot be empty in remote host: {}",
            target
        )));
    }

    if port == 0 {
        return Err(MigrateError::config(
            "invalid SSH port 0: must be between 1 and 65535",
        ));
    }

    Ok((user, host, port))
}

/// Name of the user running this process
pub fn local_username() -> Option<String> {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .or_else(|| std::env::var("USERNAME").ok().filter(|u| !u.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_builder() {
        let config = SshConfig::new("192.168.1.1", "admin")
            .with_port(2222)
            .with_key_path("/home/admin/.ssh/deploy")
            .with_trust_mode(TrustMode::Strict);

        assert_eq!(config.host, "192.168.1.1");
        assert_eq!(config.port, 2222);
        assert_eq!(config.username, "admin");
        assert_eq!(config.address(), "192.168.1.1:2222");
        assert_eq!(config.trust_mode, TrustMode::Strict);
        assert!(config.known_hosts.is_none());
    }

    #[test]
    fn test_parse_target_full() {
        let (user, host, port) = parse_target("deploy@10.0.0.5:2200", 22).unwrap();
        assert_eq!(user, "deploy");
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 2200);
    }

    #[test]
    fn test_parse_target_default_port() {
        let (user, host, port) = parse_target("deploy@backup.lan", 2022).unwrap();
        assert_eq!(user, "deploy");
        assert_eq!(host, "backup.lan");
        assert_eq!(port, 2022);
    }

    #[test]
    fn test_parse_target_without_user_uses_local_user() {
        if let Some(local) = local_username() {
            let (user, host, port) = parse_target("backup.lan", 22).unwrap();
            assert_eq!(user, local);
            assert_eq!(host, "backup.lan");
            assert_eq!(port, 22);
        }
    }

    #[test]
    fn test_parse_target_errors() {
        assert!(parse_target("deploy@", 22).is_err());
        assert!(parse_target("@host", 22).is_err());
        assert!(parse_target("deploy@host:abc", 22).is_err());
        assert!(parse_target("deploy@host:70000", 22).is_err());
        assert!(parse_target("deploy@host:0", 22).is_err());
    }
}
