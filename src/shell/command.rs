//! Command builder and command output
//!
//! A [`CommandLine`] is an ordered list of tokens. The only way to turn it
//! into a shell string is [`CommandLine::to_shell_string`], which escapes every
//! token, so remote commands are never assembled with `format!`.

use std::fmt;

use super::escape::escape;

/// Ordered token list for a single command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    tokens: Vec<String>,
}

impl CommandLine {
    /// Start a command with its program name
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            tokens: vec![program.into()],
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.tokens.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(args.into_iter().map(Into::into));
        self
    }

    /// Insert tokens in front of the program (e.g. `sudo -n`)
    pub fn prefixed(mut self, prefix: &[&str]) -> Self {
        let mut tokens: Vec<String> = prefix.iter().map(|t| t.to_string()).collect();
        tokens.append(&mut self.tokens);
        self.tokens = tokens;
        self
    }

    /// Program name (first token)
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// Arguments after the program name
    pub fn arguments(&self) -> &[String] {
        &self.tokens[1..]
    }

    /// All tokens including the program name
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Serialise for a POSIX shell, escaping every token
    pub fn to_shell_string(&self) -> String {
        self.tokens
            .iter()
            .map(|token| escape(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Output from a command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the command succeeded (exit code 0 or no exit code available)
    pub fn success(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_plain_tokens() {
        let cmd = CommandLine::new("docker").args(["volume", "create", "data"]);
        assert_eq!(cmd.to_shell_string(), "docker volume create data");
        assert_eq!(cmd.program(), "docker");
        assert_eq!(cmd.arguments(), ["volume", "create", "data"]);
    }

    #[test]
    fn test_command_line_escapes_every_token() {
        let cmd = CommandLine::new("rm").arg("-rf").arg("/tmp/x; reboot");
        assert_eq!(cmd.to_shell_string(), "rm -rf '/tmp/x; reboot'");
    }

    #[test]
    fn test_command_line_prefixed() {
        let cmd = CommandLine::new("docker").arg("ps").prefixed(&["sudo", "-n"]);
        assert_eq!(cmd.tokens(), ["sudo", "-n", "docker", "ps"]);
        assert_eq!(cmd.to_string(), "sudo -n docker ps");
    }

    #[test]
    fn test_command_line_script_argument() {
        let cmd = CommandLine::new("sh")
            .arg("-c")
            .arg("cat > \"$1\"")
            .arg("sh")
            .arg("/tmp/stage/it's.tar.gz");
        assert_eq!(
            cmd.to_shell_string(),
            "sh -c 'cat > \"$1\"' sh '/tmp/stage/it'\\''s.tar.gz'"
        );
    }

    #[test]
    fn test_command_output_success() {
        let output = CommandOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert!(output.success());
    }

    #[test]
    fn test_command_output_failure() {
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "error".to_string(),
            exit_code: Some(1),
        };
        assert!(!output.success());
    }

    #[test]
    fn test_command_output_no_exit_code() {
        let output = CommandOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_code: None,
        };
        // No exit code should be treated as success
        assert!(output.success());
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
            exit_code: Some(0),
        };
        assert_eq!(output.combined_output(), "stdout\nstderr");
    }
}
