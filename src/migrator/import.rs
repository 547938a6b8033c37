//! Volume import on the remote host

use tracing::{debug, warn};

use crate::docker::{import_args, volume_create_args, volume_remove_args};
use crate::error::{MigrateError, Result};
use crate::shell::validate_identifier;
use crate::ssh::RemoteHost;

/// Create `volume` on the remote host and unpack `dir/file` into it.
///
/// When unpacking fails the freshly created volume is removed again. A
/// failing removal is only logged; the unpack error is what is returned.
pub async fn import_volume(
    remote: &dyn RemoteHost,
    volume: &str,
    dir: &str,
    file: &str,
) -> Result<()> {
    if !validate_identifier(volume) {
        return Err(MigrateError::InvalidIdentifier(volume.to_string()));
    }

    debug!(volume = %volume, "Importing volume on remote host");

    remote
        .run_managed(volume_create_args(volume))
        .await
        .map_err(|e| MigrateError::import(volume, e))?;
    debug!(volume = %volume, "Created volume on remote");

    if let Err(e) = remote.run_managed(import_args(volume, dir, file)).await {
        if let Err(cleanup) = remote.run_managed(volume_remove_args(volume)).await {
            warn!(volume = %volume, "Failed to remove volume after import failure: {}", cleanup);
        }
        return Err(MigrateError::import(volume, e));
    }

    debug!(volume = %volume, "Imported volume");
    Ok(())
}
