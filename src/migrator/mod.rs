//! Migration orchestrator
//!
//! A run walks through the phases in order:
//!
//! 1. **Init**: local docker privilege detection, remote session
//! 2. **Discover**: volumes of every container, deduplicated by name
//! 3. **Select**: interactive choice, or everything discovered
//! 4. **ValidateSpace**: staged archives must fit on both sides (skipped with
//!    `--force`; a dry run stops after this phase)
//! 5. **Export**: one archive per volume into the local staging directory
//! 6. **Transfer**: upload the archives into the remote staging directory
//! 7. **Import**: create and populate each volume on the remote host
//!
//! Cleanup always runs afterwards, whatever the outcome. Its failures are
//! reported next to the primary outcome, never instead of it.

pub mod cancel;
pub mod cleanup;
pub mod import;
pub mod job;
pub mod space;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::docker::{archive_name, discover_volumes, format_bytes, ContainerRuntime, Volume};
use crate::error::{MigrateError, Result};
use crate::shell::validate_identifier;
use crate::ssh::{Connector, RemoteHost};
use crate::ui::{display_volumes, total_size, Selection, VolumeSelector};

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use cleanup::Staging;
pub use import::import_volume;
pub use job::{JobFlags, MigrationJob};
pub use space::{required_space, DiskSpace, LocalDisk};

/// Workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Discover,
    Select,
    ValidateSpace,
    Export,
    Transfer,
    Import,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "initialization",
            Phase::Discover => "volume discovery",
            Phase::Select => "volume selection",
            Phase::ValidateSpace => "disk space validation",
            Phase::Export => "export",
            Phase::Transfer => "transfer",
            Phase::Import => "import",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a finished run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Volumes migrated (or, in a dry run, that would be)
    pub volumes: Vec<String>,
    /// Sum of their sizes in bytes
    pub total_bytes: u64,
    /// Remote target
    pub remote: String,
    /// Stopped before exporting anything
    pub dry_run: bool,
}

/// Result of [`Migrator::run`]
#[derive(Debug)]
pub struct MigrationReport {
    /// Last phase entered
    pub phase: Phase,
    /// Primary outcome
    pub outcome: Result<MigrationSummary>,
    /// Failures of the cleanup finalizer
    pub cleanup_errors: Vec<MigrateError>,
}

impl MigrationReport {
    /// Log cleanup failures and return the primary outcome
    pub fn into_result(self) -> Result<MigrationSummary> {
        for e in &self.cleanup_errors {
            error!("Cleanup failed: {}", e);
        }
        if let Err(e) = &self.outcome {
            debug!("Migration failed during {}: {}", self.phase, e);
        }
        self.outcome
    }
}

/// Mutable state of one run, consumed by the cleanup finalizer
#[derive(Default)]
struct RunState {
    phase: Option<Phase>,
    remote: Option<Arc<dyn RemoteHost>>,
    staging: Staging,
}

impl RunState {
    fn enter(&mut self, phase: Phase) {
        debug!("Entering phase: {}", phase);
        self.phase = Some(phase);
    }
}

/// Drives one [`MigrationJob`] through its phases
pub struct Migrator {
    job: MigrationJob,
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn Connector>,
    selector: Arc<dyn VolumeSelector>,
    disk: Arc<dyn DiskSpace>,
    cancel: CancelSignal,
}

impl Migrator {
    pub fn new(
        job: MigrationJob,
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn Connector>,
        selector: Arc<dyn VolumeSelector>,
        disk: Arc<dyn DiskSpace>,
    ) -> Self {
        Self {
            job,
            runtime,
            connector,
            selector,
            disk,
            cancel: CancelSignal::never(),
        }
    }

    /// Abort in-flight phases when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job(&self) -> &MigrationJob {
        &self.job
    }

    /// Run every phase, then the cleanup finalizer
    pub async fn run(&self) -> MigrationReport {
        let mut state = RunState::default();

        let outcome = self.execute(&mut state).await;
        if let Err(e) = &outcome {
            error!("Migration failed: {}", e);
        }

        let cleanup_errors = self.finalize(&state).await;

        MigrationReport {
            phase: state.phase.unwrap_or(Phase::Init),
            outcome,
            cleanup_errors,
        }
    }

    async fn execute(&self, state: &mut RunState) -> Result<MigrationSummary> {
        let cancel = &self.cancel;

        // Phase 1
        state.enter(Phase::Init);
        info!("=== Phase 1: Initialization ===");
        let local = cancel.guard(self.runtime.detect_privilege()).await?;
        debug!("Local docker sudo requirement: {}", local);

        info!("Connecting to remote host {}", self.job.remote);
        let remote = cancel.guard(self.connector.connect()).await?;
        state.remote = Some(Arc::clone(&remote));

        // Phase 2
        state.enter(Phase::Discover);
        info!("=== Phase 2: Volume Discovery ===");
        let volumes = cancel
            .guard(discover_volumes(self.runtime.as_ref(), &self.job.containers))
            .await?;
        debug!(
            volumes = volumes.len(),
            containers = self.job.containers.len(),
            "Volume discovery complete"
        );

        if volumes.is_empty() {
            warn!("No volumes found to migrate");
            return Ok(MigrationSummary {
                remote: remote.target(),
                ..MigrationSummary::default()
            });
        }

        // Phase 3
        state.enter(Phase::Select);
        let selected = if self.job.flags.interactive {
            info!("=== Phase 3: Volume Selection ===");
            match cancel.guard(self.selector.select(volumes)).await? {
                Selection::Chosen(chosen) => chosen,
                Selection::Cancelled => {
                    return Err(MigrateError::Cancelled(
                        "selection cancelled by user".to_string(),
                    ))
                }
            }
        } else {
            display_volumes(&volumes);
            volumes
        };

        // Phase 4
        state.enter(Phase::ValidateSpace);
        info!("=== Phase 4: Disk Space Validation ===");
        if self.job.flags.force {
            warn!("Skipping disk space validation (--force enabled)");
        } else {
            cancel
                .guard(self.validate_space(remote.as_ref(), &selected))
                .await?;
        }

        let summary = MigrationSummary {
            volumes: selected.iter().map(|v| v.name.clone()).collect(),
            total_bytes: total_size(&selected),
            remote: remote.target(),
            dry_run: self.job.flags.dry_run,
        };

        if self.job.flags.dry_run {
            info!(
                "Dry run: {} volume(s) validated, no migration performed",
                selected.len()
            );
            return Ok(summary);
        }

        // Phase 5
        state.enter(Phase::Export);
        info!("=== Phase 5: Export Volumes ===");
        let archives = self.export_volumes(state, &selected).await?;

        // Phase 6
        state.enter(Phase::Transfer);
        info!("=== Phase 6: Transfer Archives ===");
        self.transfer_archives(state, remote.as_ref(), &archives)
            .await?;

        // Phase 7
        state.enter(Phase::Import);
        info!("=== Phase 7: Import Volumes ===");
        for volume in &selected {
            info!(volume = %volume.name, "Importing volume");
            cancel
                .guard(import_volume(
                    remote.as_ref(),
                    &volume.name,
                    &self.job.remote_staging,
                    &archive_name(&volume.name),
                ))
                .await?;
        }

        state.enter(Phase::Done);
        info!(
            "Migration completed successfully: {} volume(s), {} to {}",
            summary.volumes.len(),
            format_bytes(summary.total_bytes),
            summary.remote
        );
        Ok(summary)
    }

    /// Compare the estimated archive size with the free space on both sides.
    ///
    /// A side whose free space cannot be measured only produces a warning.
    async fn validate_space(&self, remote: &dyn RemoteHost, volumes: &[Volume]) -> Result<()> {
        let total = total_size(volumes);
        let required = required_space(total);
        debug!(
            total_volume_size = %format_bytes(total),
            estimated_archive = %format_bytes(required),
            "Calculated space requirements"
        );

        match self.disk.available_space(&self.job.local_staging).await {
            Ok(available) => {
                debug!(available = %format_bytes(available), "Local disk space");
                space::check_space("local", required, available)?;
            }
            Err(e) => warn!("Could not check local disk space: {}", e),
        }

        let probe = self.job.remote_space_probe();
        match remote.available_space(&probe).await {
            Ok(available) => {
                debug!(available = %format_bytes(available), "Remote disk space");
                space::check_space("remote", required, available)?;
            }
            Err(e) => warn!("Could not check remote disk space: {}", e),
        }

        debug!("Disk space validation passed");
        Ok(())
    }

    async fn export_volumes(
        &self,
        state: &mut RunState,
        volumes: &[Volume],
    ) -> Result<Vec<(String, PathBuf)>> {
        let dir = &self.job.local_staging;
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to create staging directory {}: {}", dir.display(), e),
                )
            })?;
            state.staging.local_created = true;
        }

        let mut archives = Vec::with_capacity(volumes.len());
        for volume in volumes {
            if !validate_identifier(&volume.name) {
                return Err(MigrateError::InvalidIdentifier(volume.name.clone()));
            }

            info!(volume = %volume.name, "Exporting volume");
            let archive = self
                .cancel
                .guard(self.runtime.export(&volume.name, dir))
                .await?;
            state.staging.local_archives.push(archive.clone());
            archives.push((volume.name.clone(), archive));
        }

        Ok(archives)
    }

    async fn transfer_archives(
        &self,
        state: &mut RunState,
        remote: &dyn RemoteHost,
        archives: &[(String, PathBuf)],
    ) -> Result<()> {
        let dir = &self.job.remote_staging;
        let existed = self.cancel.guard(remote.dir_exists(dir)).await?;
        self.cancel.guard(remote.create_dir(dir)).await?;
        state.staging.remote_created = !existed;

        for (volume, archive) in archives {
            let destination = self.job.remote_archive_path(volume);

            info!(archive = %archive.display(), "Transferring archive");
            // Recorded first so a partial upload is cleaned up too
            state.staging.remote_archives.push(destination.clone());
            self.cancel
                .guard(remote.send(archive, &destination, self.job.flags.show_progress))
                .await?;
        }

        Ok(())
    }

    /// Cleanup finalizer, run on every exit path
    async fn finalize(&self, state: &RunState) -> Vec<MigrateError> {
        let remote = state.remote.as_deref();

        let errors = if self.job.flags.keep_staging {
            if !state.staging.is_empty() {
                info!(
                    "Keeping staging files (local: {}, remote: {})",
                    self.job.local_staging.display(),
                    self.job.remote_staging
                );
            }
            Vec::new()
        } else {
            debug!("=== Cleanup ===");
            cleanup::clean_staging(&self.job, &state.staging, remote).await
        };

        if let Some(remote) = remote {
            remote.close().await;
        }

        errors
    }
}
