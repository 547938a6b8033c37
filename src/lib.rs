//! Volume Migrator - Move Docker named volumes to a remote host over SSH
//!
//! This crate discovers the named volumes mounted by a set of local
//! containers, exports each one to a compressed tar archive, streams the
//! archives over an authenticated SSH session and recreates the volumes on
//! the remote Docker daemon.
//!
//! # Features
//!
//! - Volume discovery from `docker inspect`, deduplicated across containers
//! - Interactive volume selection (`--interactive`)
//! - Local and remote disk space validation with a 10% safety margin
//! - Host key verification against `known_hosts` (strict, accept-new or default)
//! - Automatic `sudo` elevation when the docker socket requires it
//! - Compensating removal of a remote volume whose import failed
//! - Cleanup of everything the run created, even on failure or Ctrl+C
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! volume-migrator web db --remote deploy@backup.lan --dry-run
//! volume-migrator web --remote deploy@backup.lan:2222 --ssh-key ~/.ssh/deploy -i
//! ```

pub mod config;
pub mod docker;
pub mod error;
pub mod migrator;
pub mod privilege;
pub mod shell;
pub mod ssh;
pub mod ui;

// Re-exports for convenience
pub use config::{Args, Config};
pub use docker::{ContainerRuntime, DockerCli, Volume};
pub use error::{MigrateError, Result};
pub use migrator::{
    cancel_pair, MigrationJob, MigrationReport, MigrationSummary, Migrator, Phase,
};
pub use privilege::{CommandRunner, PrivilegeDetector, PrivilegeState};
pub use shell::{escape, CommandLine, CommandOutput};
pub use ssh::{Connector, RemoteHost, RemoteSession, SshConfig, SshConnector};
pub use ui::{DialoguerSelector, Selection, VolumeSelector};
