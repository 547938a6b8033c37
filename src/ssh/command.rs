//! Command execution over SSH
//!
//! Every command runs on a fresh exec channel. Standard output and standard
//! error are collected separately until the channel closes; a non-zero exit
//! status becomes [`MigrateError::CommandFailed`].

use async_trait::async_trait;
use russh::ChannelMsg;
use tracing::debug;

use super::connection::RemoteSession;
use crate::error::{MigrateError, Result};
use crate::privilege::CommandRunner;
use crate::shell::{CommandLine, CommandOutput};

impl RemoteSession {
    /// Execute `command` on the remote host.
    ///
    /// The command line is serialized with every token escaped; no raw shell
    /// text reaches the remote side.
    pub async fn run_command(&self, command: &CommandLine) -> Result<CommandOutput> {
        let shell = command.to_shell_string();
        debug!("Running remote command: {}", shell);

        let channel = self.open_channel().await?;
        channel
            .exec(true, shell.as_str())
            .await
            .map_err(|e| MigrateError::connection(format!("Failed to exec command: {}", e)))?;

        let output = collect_channel_output(channel).await?;
        check_status(&shell, output)
    }

    /// Execute a docker command, behind `sudo -n` when the host requires it
    pub async fn run_managed_command<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.privilege.docker(args)?;
        self.run_command(&command).await
    }
}

#[async_trait]
impl CommandRunner for RemoteSession {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.run_command(command).await
    }
}

/// Bytes and status gathered from one exec channel.
///
/// Output is decoded once at the end so multibyte characters split across
/// packets survive.
#[derive(Debug, Default)]
pub(crate) struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
    signal: Option<String>,
}

impl ChannelOutput {
    pub(crate) fn stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    /// Extended data; type 1 is stderr, anything else is folded into stdout
    pub(crate) fn extended(&mut self, data: &[u8], ext: u32) {
        if ext == 1 {
            self.stderr.extend_from_slice(data);
        } else {
            self.stdout.extend_from_slice(data);
        }
    }

    pub(crate) fn exit_status(&mut self, code: u32) {
        self.exit_code = Some(code);
    }

    pub(crate) fn exit_signal(&mut self, signal: String) {
        self.signal = Some(signal);
    }

    /// Decode the collected bytes. A signal leaves no exit code and is noted
    /// in stderr.
    pub(crate) fn finish(self) -> CommandOutput {
        let mut stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if let Some(signal) = &self.signal {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("terminated by signal {}", signal));
        }

        CommandOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr,
            exit_code: if self.signal.is_some() {
                None
            } else {
                self.exit_code
            },
        }
    }
}

/// Collect output from a channel until it closes.
///
/// `Eof` is not a stopping point: the exit status usually follows it.
pub(crate) async fn collect_channel_output(
    mut channel: russh::Channel<russh::client::Msg>,
) -> Result<CommandOutput> {
    let mut collected = ChannelOutput::default();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => collected.stdout(data),
            ChannelMsg::ExtendedData { ref data, ext } => collected.extended(data, ext),
            ChannelMsg::ExitStatus { exit_status } => collected.exit_status(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                collected.exit_signal(format!("{:?}", signal_name))
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    let output = collected.finish();
    debug!(
        "Command completed: exit_code={:?}, stdout_len={}, stderr_len={}",
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );

    Ok(output)
}

/// Require a zero exit status from a remote command.
///
/// A channel that closed without reporting a status (killed by a signal,
/// dropped connection) is a failure too.
pub(crate) fn check_status(command: &str, output: CommandOutput) -> Result<CommandOutput> {
    match output.exit_code {
        Some(0) => Ok(output),
        Some(status) => Err(MigrateError::CommandFailed {
            command: command.to_string(),
            status,
            stderr: output.stderr.trim().to_string(),
        }),
        None => {
            let stderr = output.stderr.trim();
            Err(MigrateError::CommandFailed {
                command: command.to_string(),
                status: u32::MAX,
                stderr: if stderr.is_empty() {
                    "remote command exited without reporting a status".to_string()
                } else {
                    stderr.to_string()
                },
            })
        }
    }
}
