//! Archive upload over an SSH exec channel
//!
//! The remote side runs `sh -c 'cat > "$1"' sh <path>`; the destination is
//! passed as a positional argument, never spliced into the script.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::command::{check_status, collect_channel_output};
use super::connection::RemoteSession;
use crate::error::{MigrateError, Result};
use crate::shell::{sanitize_remote_path, CommandLine};

/// Bytes read from disk per channel write
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Sends a local file to the remote host
#[async_trait]
pub trait ArchiveSender: Send + Sync {
    async fn send(&self, local: &Path, remote: &str, show_progress: bool) -> Result<()>;
}

/// Remote command writing standard input to `path`
pub fn upload_command(path: &str) -> CommandLine {
    CommandLine::new("sh")
        .arg("-c")
        .arg(r#"cat > "$1""#)
        .arg("sh")
        .arg(path)
}

/// Logs transfer progress at every 10% step
#[derive(Debug)]
pub struct ProgressLog {
    label: String,
    total: u64,
    enabled: bool,
    last_step: u64,
}

impl ProgressLog {
    pub fn new(label: impl Into<String>, total: u64, enabled: bool) -> Self {
        Self {
            label: label.into(),
            total,
            enabled,
            last_step: 0,
        }
    }

    /// Record `sent` bytes; returns the percentage when a new step was logged
    pub fn update(&mut self, sent: u64) -> Option<u64> {
        if !self.enabled || self.total == 0 {
            return None;
        }

        let percent = (sent.saturating_mul(100) / self.total).min(100);
        let step = percent / 10;
        if step <= self.last_step {
            return None;
        }

        self.last_step = step;
        info!("Uploading {}: {}%", self.label, step * 10);
        Some(step * 10)
    }
}

#[async_trait]
impl ArchiveSender for RemoteSession {
    async fn send(&self, local: &Path, remote: &str, show_progress: bool) -> Result<()> {
        let destination = sanitize_remote_path(remote);
        let transfer_err =
            |msg: String| MigrateError::transfer(local.display().to_string(), msg);

        let mut file = File::open(local)
            .await
            .map_err(|e| transfer_err(format!("failed to open local file: {}", e)))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| transfer_err(format!("failed to stat local file: {}", e)))?
            .len();

        let label = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.display().to_string());
        debug!("Uploading {} ({} bytes) to {}", label, total, destination);

        let command = upload_command(&destination);
        let shell = command.to_shell_string();

        let channel = self.open_channel().await?;
        channel
            .exec(true, shell.as_str())
            .await
            .map_err(|e| transfer_err(format!("failed to start remote writer: {}", e)))?;

        let mut progress = ProgressLog::new(label, total, show_progress);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;

        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| transfer_err(format!("failed to read local file: {}", e)))?;
            if n == 0 {
                break;
            }

            channel
                .data(&buffer[..n])
                .await
                .map_err(|e| transfer_err(format!("failed to send data: {}", e)))?;

            sent += n as u64;
            progress.update(sent);
        }

        channel
            .eof()
            .await
            .map_err(|e| transfer_err(format!("failed to finish upload: {}", e)))?;

        let output = collect_channel_output(channel).await?;
        check_status(&shell, output)
            .map_err(|e| transfer_err(format!("remote write to {} failed: {}", destination, e)))?;

        debug!("Uploaded {} bytes to {}", sent, destination);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_command_passes_path_as_argument() {
        let cmd = upload_command("/tmp/stage/my volume.tar.gz");
        assert_eq!(
            cmd.to_shell_string(),
            r#"sh -c 'cat > "$1"' sh '/tmp/stage/my volume.tar.gz'"#
        );
    }

    #[test]
    fn test_progress_logs_each_step_once() {
        let mut progress = ProgressLog::new("data.tar.gz", 1000, true);
        assert_eq!(progress.update(50), None);
        assert_eq!(progress.update(100), Some(10));
        assert_eq!(progress.update(150), None);
        assert_eq!(progress.update(390), Some(30));
        assert_eq!(progress.update(1000), Some(100));
        assert_eq!(progress.update(1000), None);
    }

    #[test]
    fn test_progress_disabled() {
        let mut progress = ProgressLog::new("data.tar.gz", 1000, false);
        assert_eq!(progress.update(1000), None);

        let mut empty = ProgressLog::new("empty.tar.gz", 0, true);
        assert_eq!(empty.update(0), None);
    }
}
