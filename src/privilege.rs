//! Privilege elevation detection for docker commands
//!
//! Each execution context (local machine, remote host) owns one
//! [`PrivilegeDetector`]. Detection probes `docker ps` once without elevation
//! and, if that fails, once more behind `sudo -n`. The outcome is cached for
//! the lifetime of the detector and every later docker command is wrapped
//! accordingly.

use std::fmt;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::shell::{CommandLine, CommandOutput};

/// Program name of the managed subsystem
pub const DOCKER: &str = "docker";

/// Non-interactive elevation prefix
pub const ELEVATION_PREFIX: &[&str] = &["sudo", "-n"];

/// Runs a command and reports its output.
///
/// Implementations must turn a non-zero exit status into
/// [`MigrateError::CommandFailed`] carrying the captured standard error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput>;
}

/// Whether docker commands need elevation in a given context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeState {
    /// Detection has not run yet
    Unknown,
    /// docker works as the current user
    NotRequired,
    /// docker works only behind `sudo -n`
    Required,
}

impl fmt::Display for PrivilegeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeState::Unknown => f.write_str("unknown"),
            PrivilegeState::NotRequired => f.write_str("not required"),
            PrivilegeState::Required => f.write_str("required"),
        }
    }
}

/// One-shot, cached detection of the sudo requirement
#[derive(Debug)]
pub struct PrivilegeDetector {
    /// Context label used in logs and errors ("local" / "remote")
    context: &'static str,

    /// Resolved state, written exactly once
    resolved: OnceLock<PrivilegeState>,

    /// Serialises first-time detection across concurrent callers
    detecting: Mutex<()>,
}

impl PrivilegeDetector {
    /// Create a detector for the given execution context
    pub fn new(context: &'static str) -> Self {
        Self {
            context,
            resolved: OnceLock::new(),
            detecting: Mutex::new(()),
        }
    }

    /// The probe used to test docker access
    pub fn probe() -> CommandLine {
        CommandLine::new(DOCKER).arg("ps")
    }

    /// Context label
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Current state; never blocks
    pub fn state(&self) -> PrivilegeState {
        self.resolved
            .get()
            .copied()
            .unwrap_or(PrivilegeState::Unknown)
    }

    /// True once detection resolved to [`PrivilegeState::Required`]
    pub fn is_required(&self) -> bool {
        self.state() == PrivilegeState::Required
    }

    /// Run detection through `runner` unless it already completed.
    ///
    /// Concurrent callers wait for the first detection and observe its
    /// result; the probe sequence runs at most once per detector.
    pub async fn detect(&self, runner: &dyn CommandRunner) -> Result<PrivilegeState> {
        if let Some(state) = self.resolved.get() {
            return Ok(*state);
        }

        let _guard = self.detecting.lock().await;
        if let Some(state) = self.resolved.get() {
            return Ok(*state);
        }

        let probe = Self::probe();
        let state = match runner.run(&probe).await {
            Ok(_) => PrivilegeState::NotRequired,
            Err(e) => {
                debug!(
                    "{} docker probe failed without elevation: {}",
                    self.context, e
                );
                let elevated = probe.prefixed(ELEVATION_PREFIX);
                match runner.run(&elevated).await {
                    Ok(_) => PrivilegeState::Required,
                    Err(e) => {
                        debug!("{} docker probe failed with sudo: {}", self.context, e);
                        return Err(MigrateError::PrivilegeDetection(self.context.to_string()));
                    }
                }
            }
        };

        // Only this task can reach here while holding the guard
        let _ = self.resolved.set(state);
        info!("{} docker sudo requirement: {}", self.context, state);
        Ok(state)
    }

    /// Prefix `command` with the elevation command when required.
    ///
    /// Calling this before [`detect`](Self::detect) completed is a bug in the
    /// caller and yields an error instead of guessing.
    pub fn wrap_command(&self, command: CommandLine) -> Result<CommandLine> {
        match self.state() {
            PrivilegeState::Required => Ok(command.prefixed(ELEVATION_PREFIX)),
            PrivilegeState::NotRequired => Ok(command),
            PrivilegeState::Unknown => Err(MigrateError::PrivilegeDetection(format!(
                "{} (privilege detection has not run)",
                self.context
            ))),
        }
    }

    /// Build a docker command with the given arguments, wrapped as needed
    pub fn docker<I, S>(&self, args: I) -> Result<CommandLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrap_command(CommandLine::new(DOCKER).args(args))
    }
}

/// Runs commands on the local machine as argv, without a shell
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a new local runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        debug!("Running local command: {}", command);

        let output = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .output()
            .await?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal leaves no code; report it as a failure
            exit_code: Some(output.status.code().map_or(u32::MAX, |c| c as u32)),
        };

        if !result.success() {
            return Err(MigrateError::CommandFailed {
                command: command.to_shell_string(),
                status: result.exit_code.unwrap_or(u32::MAX),
                stderr: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }
}
