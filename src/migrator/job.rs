//! Migration job description

use std::path::{Path, PathBuf};

use crate::docker::archive_name;

/// Behaviour switches for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFlags {
    /// Ask which volumes to migrate
    pub interactive: bool,
    /// Stop after space validation
    pub dry_run: bool,
    /// Skip space validation
    pub force: bool,
    /// Leave staging directories in place
    pub keep_staging: bool,
    /// Log upload progress
    pub show_progress: bool,
}

impl Default for JobFlags {
    fn default() -> Self {
        Self {
            interactive: false,
            dry_run: false,
            force: false,
            keep_staging: false,
            show_progress: true,
        }
    }
}

/// Everything one migration needs to know up front
#[derive(Debug, Clone)]
pub struct MigrationJob {
    /// Containers whose volumes are migrated, in order
    pub containers: Vec<String>,
    /// Remote target as given by the user, for messages
    pub remote: String,
    /// Local directory receiving the archives
    pub local_staging: PathBuf,
    /// Remote directory receiving the archives
    pub remote_staging: String,
    pub flags: JobFlags,
}

impl MigrationJob {
    pub fn new(
        containers: Vec<String>,
        remote: impl Into<String>,
        local_staging: impl Into<PathBuf>,
        remote_staging: impl Into<String>,
        flags: JobFlags,
    ) -> Self {
        Self {
            containers,
            remote: remote.into(),
            local_staging: local_staging.into(),
            remote_staging: remote_staging.into(),
            flags,
        }
    }

    /// Remote path an archive of `volume` is uploaded to
    pub fn remote_archive_path(&self, volume: &str) -> String {
        format!(
            "{}/{}",
            self.remote_staging.trim_end_matches('/'),
            archive_name(volume)
        )
    }

    /// Remote directory measured for free space: the parent of the staging
    /// directory, which usually does not exist yet
    pub fn remote_space_probe(&self) -> String {
        Path::new(&self.remote_staging)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(remote_staging: &str) -> MigrationJob {
        MigrationJob::new(
            vec!["web".to_string()],
            "deploy@backup.lan",
            "/tmp/volume-migration-1",
            remote_staging,
            JobFlags::default(),
        )
    }

    #[test]
    fn test_remote_archive_path() {
        assert_eq!(
            job("/tmp/volume-migration-1/").remote_archive_path("db"),
            "/tmp/volume-migration-1/db.tar.gz"
        );
    }

    #[test]
    fn test_remote_space_probe() {
        assert_eq!(job("/tmp/volume-migration-1").remote_space_probe(), "/tmp");
        assert_eq!(job("/staging").remote_space_probe(), "/");
        assert_eq!(job("/").remote_space_probe(), "/");
    }

    #[test]
    fn test_default_flags_show_progress() {
        let flags = JobFlags::default();
        assert!(flags.show_progress);
        assert!(!flags.dry_run && !flags.force && !flags.keep_staging && !flags.interactive);
    }
}
