//! Error types for the volume migrator

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the volume migrator
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid or conflicting configuration, detected before connecting
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH transport failure
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Every authentication method was rejected or none was available
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH key loading or parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// Host has no record in the trust file
    #[error(
        "Host key verification failed: {host} is not a known host (fingerprint {fingerprint}).\n\
         Add its key to {} or connect once with --accept-host-key",
        path.display()
    )]
    UnknownHost {
        host: String,
        fingerprint: String,
        path: PathBuf,
    },

    /// Host presented a key that differs from every recorded key
    #[error(
        "WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED!\n\
         IT IS POSSIBLE THAT SOMEONE IS DOING SOMETHING NASTY!\n\
         Host key for {host} has changed (offered {fingerprint}).\n\
         Remove the old key from {} and try again.\n\
         Or use ssh-keygen -R {host}",
        path.display()
    )]
    HostKeyChanged {
        host: String,
        fingerprint: String,
        path: PathBuf,
    },

    /// Trust file could not be read, created or written
    #[error("Trust store error ({}): {message}", path.display())]
    TrustStore { path: PathBuf, message: String },

    /// Docker is unreachable even with sudo
    #[error("docker is not accessible on {0} host (not installed or permission denied)")]
    PrivilegeDetection(String),

    /// Resource identifier failed the allow-list
    #[error(
        "invalid volume name '{0}': must contain only alphanumeric characters, dashes, underscores, and dots"
    )]
    InvalidIdentifier(String),

    /// Refused to touch a protected path
    #[error("refusing to delete system directory: {0}")]
    UnsafePath(String),

    /// Free space could not be measured
    #[error("failed to measure disk space: {0}")]
    DiskSpace(String),

    /// Not enough disk space for the staged archives
    #[error(
        "insufficient disk space on {location}: required {required} bytes, available {available} bytes (use --force to override)"
    )]
    InsufficientSpace {
        location: String,
        required: u64,
        available: u64,
    },

    /// A command exited with a non-zero status
    #[error("command `{command}` failed with exit status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: u32,
        stderr: String,
    },

    /// Container does not exist
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Unexpected container runtime output
    #[error("docker error: {0}")]
    Docker(String),

    /// Volume export failed
    #[error("failed to export volume {volume}: {message}")]
    Export { volume: String, message: String },

    /// Archive transfer failed
    #[error("failed to transfer {path}: {message}")]
    Transfer { path: String, message: String },

    /// Volume import failed on the remote host
    #[error("failed to import volume {volume}: {source}")]
    Import {
        volume: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// Interactive selection failed
    #[error("Volume selection failed: {0}")]
    Selection(String),

    /// Run was cancelled by the user or an interrupt
    #[error("Migration cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using MigrateError
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        MigrateError::Config(msg.into())
    }

    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        MigrateError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        MigrateError::Authentication(msg.into())
    }

    /// Create a trust store error
    pub fn trust_store(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        MigrateError::TrustStore {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an export error
    pub fn export(volume: impl Into<String>, msg: impl Into<String>) -> Self {
        MigrateError::Export {
            volume: volume.into(),
            message: msg.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(path: impl Into<String>, msg: impl Into<String>) -> Self {
        MigrateError::Transfer {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error raised while importing `volume`
    pub fn import(volume: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Import {
            volume: volume.into(),
            source: Box::new(source),
        }
    }

    /// True for host identity rejections
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            MigrateError::UnknownHost { .. } | MigrateError::HostKeyChanged { .. }
        )
    }
}

impl From<russh::Error> for MigrateError {
    fn from(err: russh::Error) -> Self {
        MigrateError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::Connection("failed to connect".to_string());
        assert_eq!(err.to_string(), "SSH connection error: failed to connect");

        let err = MigrateError::UnsafePath("/etc".to_string());
        assert_eq!(err.to_string(), "refusing to delete system directory: /etc");
    }

    #[test]
    fn test_host_key_changed_carries_remediation() {
        let err = MigrateError::HostKeyChanged {
            host: "[backup.lan]:2222".to_string(),
            fingerprint: "SHA256:abc".to_string(),
            path: PathBuf::from("/home/u/.ssh/known_hosts"),
        };
        let text = err.to_string();
        assert!(text.contains("HAS CHANGED"));
        assert!(text.contains("[backup.lan]:2222"));
        assert!(text.contains("/home/u/.ssh/known_hosts"));
        assert!(err.is_trust_failure());
    }

    #[test]
    fn test_import_error_keeps_source() {
        let err = MigrateError::import(
            "data",
            MigrateError::CommandFailed {
                command: "docker run".to_string(),
                status: 2,
                stderr: "tar: bad archive".to_string(),
            },
        );
        let text = err.to_string();
        assert!(text.starts_with("failed to import volume data"));
        assert!(text.contains("tar: bad archive"));
    }
}
