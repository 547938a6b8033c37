//! Staging cleanup
//!
//! Only what the current job created is removed: a staging directory that
//! already existed is left in place and just the archives written into it
//! are deleted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::job::MigrationJob;
use crate::error::{MigrateError, Result};
use crate::ssh::RemoteHost;

/// Staging artifacts created by a run
#[derive(Debug, Default, Clone)]
pub struct Staging {
    /// The local staging directory was created by this run
    pub local_created: bool,
    /// Archives written locally
    pub local_archives: Vec<PathBuf>,
    /// The remote staging directory was created by this run
    pub remote_created: bool,
    /// Archives uploaded to the remote host
    pub remote_archives: Vec<String>,
}

impl Staging {
    /// Nothing to clean up
    pub fn is_empty(&self) -> bool {
        !self.local_created
            && !self.remote_created
            && self.local_archives.is_empty()
            && self.remote_archives.is_empty()
    }
}

/// Remove a local directory tree; a missing directory is fine
pub async fn cleanup_local(dir: &Path) -> Result<()> {
    debug!(path = %dir.display(), "Cleaning up local staging directory");
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_local_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove everything recorded in `staging`, collecting failures
pub async fn clean_staging(
    job: &MigrationJob,
    staging: &Staging,
    remote: Option<&dyn RemoteHost>,
) -> Vec<MigrateError> {
    let mut errors = Vec::new();

    if staging.local_created {
        if let Err(e) = cleanup_local(&job.local_staging).await {
            errors.push(e);
        }
    } else {
        for archive in &staging.local_archives {
            if let Err(e) = remove_local_file(archive).await {
                errors.push(e);
            }
        }
    }

    if let Some(remote) = remote {
        if staging.remote_created {
            debug!(path = %job.remote_staging, "Cleaning up remote staging directory");
            if let Err(e) = remote.remove_dir(&job.remote_staging).await {
                errors.push(e);
            }
        } else {
            for archive in &staging.remote_archives {
                if let Err(e) = remote.remove_file(archive).await {
                    errors.push(e);
                }
            }
        }
    }

    if errors.is_empty() && !staging.is_empty() {
        info!("Staging files cleaned up");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::job::JobFlags;

    fn job(local: &Path) -> MigrationJob {
        MigrationJob::new(
            vec!["web".to_string()],
            "deploy@backup.lan",
            local,
            "/tmp/volume-migration-1",
            JobFlags::default(),
        )
    }

    #[tokio::test]
    async fn test_cleanup_local_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cleanup_local(&dir.path().join("missing")).await.is_ok());
    }

    #[tokio::test]
    async fn test_created_dir_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let staging_dir = dir.path().join("stage");
        std::fs::create_dir(&staging_dir).unwrap();
        std::fs::write(staging_dir.join("db.tar.gz"), b"archive").unwrap();

        let staging = Staging {
            local_created: true,
            ..Staging::default()
        };
        let errors = clean_staging(&job(&staging_dir), &staging, None).await;
        assert!(errors.is_empty());
        assert!(!staging_dir.exists());
    }

    #[tokio::test]
    async fn test_existing_dir_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join("db.tar.gz");
        let theirs = dir.path().join("notes.txt");
        std::fs::write(&ours, b"archive").unwrap();
        std::fs::write(&theirs, b"keep me").unwrap();

        let staging = Staging {
            local_archives: vec![ours.clone()],
            ..Staging::default()
        };
        let errors = clean_staging(&job(dir.path()), &staging, None).await;
        assert!(errors.is_empty());
        assert!(!ours.exists());
        assert!(theirs.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_staging_is_empty() {
        assert!(Staging::default().is_empty());
        let staging = Staging {
            remote_archives: vec!["/tmp/x.tar.gz".to_string()],
            ..Staging::default()
        };
        assert!(!staging.is_empty());
    }
}
