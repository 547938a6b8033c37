//! Configuration and CLI argument parsing for the volume migrator

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{ArgAction, Parser};

use crate::error::{MigrateError, Result};
use crate::migrator::{JobFlags, MigrationJob};
use crate::ssh::config::{parse_target, SshConfig, DEFAULT_SSH_PORT};
use crate::ssh::hostkey::TrustMode;

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Prefix of the default staging directory names
pub const STAGING_PREFIX: &str = "volume-migration";

/// Volume migrator CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "volume-migrator")]
#[command(author = "tufantunc")]
#[command(version)]
#[command(about = "Migrate Docker named volumes from this host to a remote host over SSH")]
pub struct Args {
    /// Containers whose volumes are migrated
    #[arg(required = true, num_args = 1..)]
    pub containers: Vec<String>,

    /// Remote host as user@host[:port]
    #[arg(short = 'r', long, env = "VOLUME_MIGRATOR_REMOTE")]
    pub remote: String,

    /// Path to SSH private key (default: agent, then ~/.ssh/id_*)
    #[arg(long, env = "VOLUME_MIGRATOR_SSH_KEY")]
    pub ssh_key: Option<PathBuf>,

    /// SSH port, unless given in --remote
    #[arg(long, default_value_t = DEFAULT_SSH_PORT, env = "VOLUME_MIGRATOR_SSH_PORT")]
    pub ssh_port: u16,

    /// Local staging directory (default: <tmp>/volume-migration-<timestamp>)
    #[arg(long, env = "VOLUME_MIGRATOR_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Remote staging directory (default: /tmp/volume-migration-<timestamp>)
    #[arg(long, env = "VOLUME_MIGRATOR_REMOTE_TEMP_DIR")]
    pub remote_temp_dir: Option<String>,

    /// Choose the volumes to migrate interactively
    #[arg(short = 'i', long, default_value = "false")]
    pub interactive: bool,

    /// Debug logging
    #[arg(short = 'v', long, default_value = "false", env = "VOLUME_MIGRATOR_VERBOSE")]
    pub verbose: bool,

    /// Validate everything, migrate nothing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Check the configuration and exit without connecting
    #[arg(long, default_value = "false")]
    pub validate_only: bool,

    /// Skip disk space validation
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Keep staging files for debugging
    #[arg(long, default_value = "false")]
    pub no_cleanup: bool,

    /// Log transfer progress
    #[arg(
        short = 'p',
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub progress: bool,

    /// Verify host keys against known_hosts
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        env = "VOLUME_MIGRATOR_STRICT_HOST_KEY_CHECKING"
    )]
    pub strict_host_key_checking: bool,

    /// Add unknown host keys to known_hosts (requires --strict-host-key-checking=false)
    #[arg(long, default_value = "false", env = "VOLUME_MIGRATOR_ACCEPT_HOST_KEY")]
    pub accept_host_key: bool,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long, env = "VOLUME_MIGRATOR_KNOWN_HOSTS_FILE")]
    pub known_hosts_file: Option<PathBuf>,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Containers whose volumes are migrated
    pub containers: Vec<String>,

    /// Remote host as given on the command line
    pub remote: String,

    /// SSH connection settings
    pub ssh: SshConfig,

    /// Local staging directory
    pub temp_dir: PathBuf,

    /// Remote staging directory
    pub remote_temp_dir: String,

    /// Job behaviour switches
    pub flags: JobFlags,

    /// Debug logging
    pub verbose: bool,

    /// Stop after validation
    pub validate_only: bool,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let mut ssh = SshConfig::from_target(&args.remote, args.ssh_port)?
            .with_trust_mode(trust_mode(&args));
        if let Some(key) = args.ssh_key {
            ssh = ssh.with_key_path(key);
        }
        if let Some(known_hosts) = args.known_hosts_file {
            ssh = ssh.with_known_hosts(known_hosts);
        }

        let stamp = unix_timestamp();
        let temp_dir = args
            .temp_dir
            .unwrap_or_else(|| std::env::temp_dir().join(staging_name(stamp)));
        let remote_temp_dir = args
            .remote_temp_dir
            .unwrap_or_else(|| format!("/tmp/{}", staging_name(stamp)));

        Ok(Config {
            containers: args.containers,
            remote: args.remote,
            ssh,
            temp_dir,
            remote_temp_dir,
            flags: JobFlags {
                interactive: args.interactive,
                dry_run: args.dry_run,
                force: args.force,
                keep_staging: args.no_cleanup,
                show_progress: args.progress,
            },
            verbose: args.verbose,
            validate_only: args.validate_only,
        })
    }

    /// The migration job this configuration describes
    pub fn job(&self) -> MigrationJob {
        MigrationJob::new(
            self.containers.clone(),
            self.remote.clone(),
            self.temp_dir.clone(),
            self.remote_temp_dir.clone(),
            self.flags,
        )
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Containers:       {}", self.containers.join(", "))?;
        writeln!(
            f,
            "Remote:           {}@{}:{}",
            self.ssh.username, self.ssh.host, self.ssh.port
        )?;
        writeln!(
            f,
            "SSH key:          {}",
            self.ssh
                .key_path
                .as_ref()
                .map_or("auto-detect".to_string(), |p| p.display().to_string())
        )?;
        writeln!(f, "Host key mode:    {:?}", self.ssh.trust_mode)?;
        writeln!(f, "Local staging:    {}", self.temp_dir.display())?;
        writeln!(f, "Remote staging:   {}", self.remote_temp_dir)?;
        write!(
            f,
            "Options:          interactive={} dry_run={} force={} cleanup={} progress={}",
            self.flags.interactive,
            self.flags.dry_run,
            self.flags.force,
            !self.flags.keep_staging,
            self.flags.show_progress
        )
    }
}

/// Host key trust mode selected by the flags
pub fn trust_mode(args: &Args) -> TrustMode {
    if args.strict_host_key_checking {
        TrustMode::Strict
    } else if args.accept_host_key {
        TrustMode::AcceptNew
    } else {
        TrustMode::Default
    }
}

/// Validate CLI arguments, reporting every problem at once
pub fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.containers.is_empty() {
        errors.push("no containers specified".to_string());
    }
    for (i, container) in args.containers.iter().enumerate() {
        if container.trim().is_empty() {
            errors.push(format!("container at index {} is empty", i));
        }
    }

    if args.remote.trim().is_empty() {
        errors.push("remote host not specified".to_string());
    } else if let Err(e) = parse_target(&args.remote, args.ssh_port) {
        errors.push(match e {
            MigrateError::Config(msg) => msg,
            other => other.to_string(),
        });
    }

    if args.ssh_port == 0 {
        errors.push("invalid SSH port 0: must be between 1 and 65535".to_string());
    }

    if let Some(dir) = &args.temp_dir {
        if !dir.is_absolute() {
            errors.push(format!(
                "temp directory must be an absolute path: {}",
                dir.display()
            ));
        }
    }
    if let Some(dir) = &args.remote_temp_dir {
        if !dir.starts_with('/') {
            errors.push(format!(
                "remote temp directory must be an absolute path: {}",
                dir
            ));
        }
    }

    if args.strict_host_key_checking && args.accept_host_key {
        errors.push(
            "conflicting flags: --strict-host-key-checking and --accept-host-key cannot both be enabled"
                .to_string(),
        );
    }

    if let Some(key) = &args.ssh_key {
        if !key.exists() {
            errors.push(format!("SSH key file does not exist: {}", key.display()));
        }
    }

    if let Some(known_hosts) = &args.known_hosts_file {
        if args.strict_host_key_checking && !Path::new(known_hosts).exists() {
            errors.push(format!(
                "known_hosts file does not exist: {} (use --accept-host-key to create it)",
                known_hosts.display()
            ));
        }
    }

    if !errors.is_empty() {
        return Err(MigrateError::Config(errors.join("\n")));
    }

    Ok(())
}

fn staging_name(stamp: u64) -> String {
    format!("{}-{}", STAGING_PREFIX, stamp)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["volume-migrator"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["web", "db", "-r", "deploy@backup.lan"]);
        assert_eq!(args.containers, vec!["web", "db"]);
        assert_eq!(args.ssh_port, 22);
        assert!(args.progress);
        assert!(args.strict_host_key_checking);
        assert!(!args.accept_host_key);

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.ssh.username, "deploy");
        assert_eq!(config.ssh.host, "backup.lan");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.ssh.trust_mode, TrustMode::Strict);
        assert!(config.remote_temp_dir.starts_with("/tmp/volume-migration-"));
        assert!(config
            .temp_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("volume-migration-"));
        assert!(config.flags.show_progress);
        assert!(!config.flags.keep_staging);
    }

    #[test]
    fn test_port_in_remote_wins() {
        let args = parse(&["web", "-r", "deploy@backup.lan:2222", "--ssh-port", "2200"]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.ssh.port, 2222);

        let args = parse(&["web", "-r", "deploy@backup.lan", "--ssh-port", "2200"]);
        assert_eq!(Config::from_args(args).unwrap().ssh.port, 2200);
    }

    #[test]
    fn test_trust_mode_mapping() {
        let args = parse(&["web", "-r", "u@h"]);
        assert_eq!(trust_mode(&args), TrustMode::Strict);

        let args = parse(&["web", "-r", "u@h", "--strict-host-key-checking=false"]);
        assert_eq!(trust_mode(&args), TrustMode::Default);

        let args = parse(&[
            "web",
            "-r",
            "u@h",
            "--strict-host-key-checking=false",
            "--accept-host-key",
        ]);
        assert_eq!(trust_mode(&args), TrustMode::AcceptNew);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_conflicting_trust_flags() {
        let args = parse(&["web", "-r", "u@h", "--accept-host-key"]);
        let err = validate_args(&args).unwrap_err();
        assert!(err.to_string().contains("conflicting flags"));
    }

    #[test]
    fn test_collects_all_errors() {
        let args = parse(&[
            " ",
            "-r",
            "deploy@",
            "--temp-dir",
            "relative/dir",
            "--remote-temp-dir",
            "also/relative",
            "--ssh-key",
            "/nonexistent/key",
        ]);
        let text = validate_args(&args).unwrap_err().to_string();
        assert!(text.contains("container at index 0 is empty"));
        assert!(text.contains("host cannot be empty"));
        assert!(text.contains("temp directory must be an absolute path"));
        assert!(text.contains("remote temp directory must be an absolute path"));
        assert!(text.contains("SSH key file does not exist"));
    }

    #[test]
    fn test_invalid_ports() {
        let args = parse(&["web", "-r", "u@h:notaport"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["web", "-r", "u@h", "--ssh-port", "0"]);
        assert!(validate_args(&args).is_err());

        let result = Args::try_parse_from(["volume-migrator", "web", "-r", "u@h", "--ssh-port", "70000"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_known_hosts_only_matters_when_strict() {
        let args = parse(&["web", "-r", "u@h", "--known-hosts-file", "/nonexistent/known_hosts"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&[
            "web",
            "-r",
            "u@h",
            "--known-hosts-file",
            "/nonexistent/known_hosts",
            "--strict-host-key-checking",
            "false",
        ]);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_requires_containers_and_remote() {
        assert!(Args::try_parse_from(["volume-migrator", "-r", "u@h"]).is_err());
    }

    #[test]
    fn test_flags_map_to_job() {
        let args = parse(&[
            "web",
            "-r",
            "u@h",
            "-i",
            "--dry-run",
            "--force",
            "--no-cleanup",
            "--progress=false",
            "--temp-dir",
            "/var/tmp/stage",
            "--remote-temp-dir",
            "/srv/stage",
        ]);
        let config = Config::from_args(args).unwrap();
        let job = config.job();
        assert!(job.flags.interactive && job.flags.dry_run && job.flags.force);
        assert!(job.flags.keep_staging);
        assert!(!job.flags.show_progress);
        assert_eq!(job.local_staging, PathBuf::from("/var/tmp/stage"));
        assert_eq!(job.remote_staging, "/srv/stage");
        assert!(config.to_string().contains("cleanup=false"));
    }
}
