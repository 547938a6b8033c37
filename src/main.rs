//! Volume Migrator - Entry point
//!
//! Parses CLI arguments, validates configuration, wires the docker CLI, the
//! SSH connector and the terminal selector into a [`Migrator`], and cancels
//! the run on SIGINT/SIGTERM so the cleanup finalizer still executes.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use volume_migrator::config::{Args, Config};
use volume_migrator::docker::DockerCli;
use volume_migrator::error::Result;
use volume_migrator::migrator::{cancel_pair, LocalDisk, Migrator};
use volume_migrator::ssh::SshConnector;
use volume_migrator::ui::DialoguerSelector;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Logging goes to stderr, --verbose overrides RUST_LOG
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Validate and create config
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };

    if config.validate_only {
        println!("Configuration is valid\n{}", config);
        return Ok(());
    }

    info!("Volume Migrator v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Migrating volumes of [{}] to {}@{}:{}",
        config.containers.join(", "),
        config.ssh.username,
        config.ssh.host,
        config.ssh.port
    );
    if config.flags.dry_run {
        info!("Dry run: nothing will be exported or transferred");
    }

    let (cancel, signal) = cancel_pair();

    // Spawn a task to handle shutdown signals
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Received SIGINT (Ctrl+C), cancelling migration...");
            }
            _ = terminate() => {
                warn!("Received SIGTERM, cancelling migration...");
            }
        }
        cancel.cancel();
    });

    let migrator = Migrator::new(
        config.job(),
        Arc::new(DockerCli::local()),
        Arc::new(SshConnector::new(config.ssh.clone())),
        Arc::new(DialoguerSelector::new()),
        Arc::new(LocalDisk::new()),
    )
    .with_cancel(signal);

    let result = migrator.run().await.into_result();

    // Cancel the shutdown handler if we exit normally
    shutdown_handle.abort();

    // Already logged by the migrator; the error only sets the exit status
    result.map(|_| ())
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
