//! SSH access to the remote host
//!
//! This module provides the authenticated, host-key-verified session the
//! migrator uses to run docker commands, manage the remote staging directory
//! and upload archives.

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
pub mod handler;
pub mod hostkey;
pub mod transfer;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::shell::CommandOutput;

// Re-exports
pub use config::{parse_target, SshConfig};
pub use connection::{guard_remote_path, RemoteSession, SessionState, PROTECTED_PATHS};
pub use handler::SshHandler;
pub use hostkey::{fingerprint, host_identifier, HostTrustStore, TrustMode, TrustRecord};
pub use transfer::ArchiveSender;

/// Remote host operations the migrator depends on
#[async_trait]
pub trait RemoteHost: ArchiveSender {
    /// `user@host:port` for log messages
    fn target(&self) -> String;

    /// Run a docker command, elevated when the host requires it
    async fn run_managed(&self, args: Vec<String>) -> Result<CommandOutput>;

    /// Create a directory and its parents
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// Whether `path` is an existing directory
    async fn dir_exists(&self, path: &str) -> Result<bool>;

    /// Remove a single file
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove a directory tree
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Free bytes on the filesystem holding `path`
    async fn available_space(&self, path: &str) -> Result<u64>;

    /// Disconnect; later calls fail
    async fn close(&self);
}

/// Opens the remote session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteHost>>;
}

#[async_trait]
impl RemoteHost for RemoteSession {
    fn target(&self) -> String {
        let config = self.config();
        format!("{}@{}", config.username, config.address())
    }

    async fn run_managed(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.run_managed_command(args).await
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        RemoteSession::create_dir(self, path).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        RemoteSession::dir_exists(self, path).await
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        RemoteSession::remove_file(self, path).await
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        RemoteSession::remove_dir(self, path).await
    }

    async fn available_space(&self, path: &str) -> Result<u64> {
        RemoteSession::available_space(self, path).await
    }

    async fn close(&self) {
        RemoteSession::close(self).await
    }
}

/// Connects a [`RemoteSession`] for a fixed configuration
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteHost>> {
        let session = RemoteSession::connect(self.config.clone()).await?;
        Ok(Arc::new(session))
    }
}

