//! Remote session
//!
//! A [`RemoteSession`] only exists in the connected state: construction
//! gathers authentication material, opens the trust store, connects with a
//! bounded timeout, authenticates and runs remote privilege detection. Any
//! failure along the way is fatal and no session is returned.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::Channel;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::auth::{authenticate, gather_auth_methods};
use super::config::SshConfig;
use super::handler::SshHandler;
use super::hostkey::{host_identifier, HostTrustStore};
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{MigrateError, Result};
use crate::migrator::space::{df_command, parse_df_available};
use crate::privilege::PrivilegeDetector;
use crate::shell::{sanitize_remote_path, CommandLine};

/// Top-level directories that must never be created over or removed
pub const PROTECTED_PATHS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
    "/sbin", "/srv", "/sys", "/usr", "/var",
];

/// Lifecycle of a remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Authenticated, identity-verified SSH session to the remote host
pub struct RemoteSession {
    /// Execution target
    config: SshConfig,

    /// Active SSH session handle, `None` once closed
    session: Mutex<Option<Handle<SshHandler>>>,

    /// Set by `close()`
    closed: AtomicBool,

    /// Remote docker sudo requirement
    pub(crate) privilege: PrivilegeDetector,
}

impl RemoteSession {
    /// Connect, authenticate and detect the remote sudo requirement
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let addr = config.address();
        debug!("Session {} -> {}", addr, SessionState::Connecting);
        info!("Connecting to SSH server {}...", addr);

        let methods = gather_auth_methods(config.key_path.as_deref()).await?;

        let trust = Arc::new(HostTrustStore::open(
            config.trust_mode,
            config.known_hosts.clone(),
        )?);
        let handler = SshHandler::new(trust, host_identifier(&config.host, config.port));

        let connection_timeout = Duration::from_secs(CONNECTION_TIMEOUT_SECS);
        let ssh_config = Arc::new(client::Config::default());

        let connect_result = timeout(
            connection_timeout,
            client::connect(ssh_config, addr.as_str(), handler),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) if e.is_trust_failure() || matches!(e, MigrateError::TrustStore { .. }) => {
                error!("Host key verification failed for {}", addr);
                return Err(e);
            }
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(MigrateError::connection(format!(
                    "failed to connect to {}: {}",
                    addr, e
                )));
            }
            Err(_) => {
                error!("SSH connection timeout after {}s", CONNECTION_TIMEOUT_SECS);
                return Err(MigrateError::connection(format!(
                    "Connection timeout after {}s",
                    CONNECTION_TIMEOUT_SECS
                )));
            }
        };

        authenticate(&mut session, &config.username, methods).await?;

        info!(
            "Successfully connected to {}@{}:{}",
            config.username, config.host, config.port
        );

        let remote = Self {
            config,
            session: Mutex::new(Some(session)),
            closed: AtomicBool::new(false),
            privilege: PrivilegeDetector::new("remote"),
        };

        if let Err(e) = remote.privilege.detect(&remote).await {
            error!("Remote docker detection failed: {}", e);
            remote.close().await;
            return Err(e);
        }

        debug!("Session {} -> {}", addr, SessionState::Connected);
        Ok(remote)
    }

    /// Execution target
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else {
            SessionState::Connected
        }
    }

    /// Whether remote docker commands run behind sudo
    pub fn requires_sudo(&self) -> bool {
        self.privilege.is_required()
    }

    /// Open a new session channel
    pub async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let session_guard = self.session.lock().await;
        let session = session_guard
            .as_ref()
            .ok_or_else(|| MigrateError::connection("SSH connection not established"))?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| MigrateError::connection(format!("Failed to open channel: {}", e)))?;

        Ok(channel)
    }

    /// Create a directory (`mkdir -p`)
    pub async fn create_dir(&self, path: &str) -> Result<()> {
        let cmd = create_dir_command(path)?;
        self.run_command(&cmd).await.map_err(|e| {
            error!("Failed to create directory {} on remote host", path);
            e
        })?;
        Ok(())
    }

    /// Whether `path` is an existing directory (`test -d`)
    pub async fn dir_exists(&self, path: &str) -> Result<bool> {
        let cmd = CommandLine::new("test")
            .arg("-d")
            .arg(sanitize_remote_path(path));
        match self.run_command(&cmd).await {
            Ok(_) => Ok(true),
            Err(MigrateError::CommandFailed { status: 1, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a file (`rm -f`)
    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let cmd = remove_file_command(path)?;
        self.run_command(&cmd).await.map_err(|e| {
            error!("Failed to remove file {} on remote host", path);
            e
        })?;
        Ok(())
    }

    /// Remove a directory tree (`rm -rf`)
    pub async fn remove_dir(&self, path: &str) -> Result<()> {
        let cmd = remove_dir_command(path)?;
        self.run_command(&cmd).await.map_err(|e| {
            error!("Failed to remove directory {} on remote host", path);
            e
        })?;
        Ok(())
    }

    /// Free bytes on the filesystem holding `path` (`df -Pk`)
    pub async fn available_space(&self, path: &str) -> Result<u64> {
        let safe = sanitize_remote_path(path);
        let output = self.run_command(&df_command(&safe)).await?;
        parse_df_available(&output.stdout)
    }

    /// Close the SSH connection
    pub async fn close(&self) {
        {
            let mut session_guard = self.session.lock().await;
            if let Some(session) = session_guard.take() {
                let _ = session
                    .disconnect(russh::Disconnect::ByApplication, "", "")
                    .await;
            }
        }
        self.closed.store(true, Ordering::SeqCst);

        debug!("Session {} -> {}", self.config.address(), SessionState::Closed);
        info!("SSH connection closed");
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("state", &self.state())
            .field("privilege", &self.privilege.state())
            .finish()
    }
}

/// Sanitize `path` and refuse protected system directories.
///
/// The deny-list is checked on the sanitized form, before any escaping, so
/// traversal tricks like `/tmp/../etc` cannot slip past it.
pub fn guard_remote_path(path: &str) -> Result<String> {
    let safe = sanitize_remote_path(path);

    let trimmed = safe.trim_end_matches('/');
    let compared = if trimmed.is_empty() { "/" } else { trimmed };
    if PROTECTED_PATHS.contains(&compared) {
        return Err(MigrateError::UnsafePath(compared.to_string()));
    }

    Ok(safe)
}

/// `mkdir -p <path>` after the path guard
pub fn create_dir_command(path: &str) -> Result<CommandLine> {
    let safe = guard_remote_path(path)?;
    Ok(CommandLine::new("mkdir").arg("-p").arg(safe))
}

/// `rm -f <path>` after the path guard
pub fn remove_file_command(path: &str) -> Result<CommandLine> {
    let safe = guard_remote_path(path)?;
    Ok(CommandLine::new("rm").arg("-f").arg(safe))
}

/// `rm -rf <path>` after the path guard
pub fn remove_dir_command(path: &str) -> Result<CommandLine> {
    let safe = guard_remote_path(path)?;
    Ok(CommandLine::new("rm").arg("-rf").arg(safe))
}
