//! Disk space estimation and measurement

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::privilege::{CommandRunner, LocalRunner};
use crate::shell::CommandLine;

/// Space needed to stage archives of `bytes` of volume data.
///
/// Archives are assumed not to compress at all, plus a flat 10% buffer.
pub fn required_space(bytes: u64) -> u64 {
    bytes.saturating_add(bytes / 10)
}

/// Fail when `available` is below `required`
pub fn check_space(location: &str, required: u64, available: u64) -> Result<()> {
    if available < required {
        return Err(MigrateError::InsufficientSpace {
            location: location.to_string(),
            required,
            available,
        });
    }
    Ok(())
}

/// `df -Pk <path>`: POSIX output, one line per filesystem, KiB blocks
pub fn df_command(path: &str) -> CommandLine {
    CommandLine::new("df").arg("-Pk").arg(path)
}

/// Available bytes from `df -Pk` output.
///
/// ```text
/// Filesystem     1024-blocks      Used Available Capacity Mounted on
/// /dev/sda1         10000000   5000000   4500000      53% /
/// ```
pub fn parse_df_available(output: &str) -> Result<u64> {
    let line = output
        .trim()
        .lines()
        .nth(1)
        .ok_or_else(|| MigrateError::DiskSpace(format!("unexpected df output: {}", output)))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(MigrateError::DiskSpace(format!(
            "unexpected df output format: {}",
            line
        )));
    }

    let kib = fields[3].parse::<u64>().map_err(|e| {
        MigrateError::DiskSpace(format!("failed to parse available size '{}': {}", fields[3], e))
    })?;

    Ok(kib.saturating_mul(1024))
}

/// Free space on the local machine
#[async_trait]
pub trait DiskSpace: Send + Sync {
    async fn available_space(&self, path: &Path) -> Result<u64>;
}

/// Measures local free space with `df`
pub struct LocalDisk {
    runner: Arc<dyn CommandRunner>,
}

impl LocalDisk {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(LocalRunner::new()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Default for LocalDisk {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiskSpace for LocalDisk {
    /// Measured on the nearest existing ancestor, since the staging
    /// directory is only created during export
    async fn available_space(&self, path: &Path) -> Result<u64> {
        let existing = nearest_existing(path);
        debug!("Measuring local disk space on {}", existing.display());

        let output = self
            .runner
            .run(&df_command(&existing.display().to_string()))
            .await?;
        parse_df_available(&output.stdout)
    }
}

/// `path` itself or its closest ancestor that exists
pub fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}
