//! Authentication material discovery
//!
//! Candidates are gathered in priority order:
//! 1. SSH agent (if `SSH_AUTH_SOCK` is set and reachable)
//! 2. The explicitly configured key file, or, when none is configured,
//! 3. the conventional `~/.ssh/id_*` key files.
//!
//! Every key file must pass a permission check first: keys readable or
//! writable by group or others are refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::Handle;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use tracing::{debug, info};

use super::handler::SshHandler;
use crate::error::{MigrateError, Result};

/// Conventional private key file names under `~/.ssh`
pub const DEFAULT_KEY_NAMES: &[&str] = &["id_rsa", "id_ed25519", "id_ecdsa", "id_dsa"];

/// One authentication candidate
pub enum AuthMethod {
    /// Identities offered by a running SSH agent
    #[cfg(unix)]
    Agent(russh::keys::agent::client::AgentClient<tokio::net::UnixStream>),

    /// Unencrypted private key loaded from disk
    Key { path: PathBuf, key: Arc<PrivateKey> },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            AuthMethod::Agent(_) => f.write_str("AuthMethod::Agent"),
            AuthMethod::Key { path, .. } => f
                .debug_struct("AuthMethod::Key")
                .field("path", path)
                .finish(),
        }
    }
}

/// Gather authentication candidates in priority order.
///
/// An explicit key that fails to load is fatal; conventional keys that fail
/// are skipped.
pub async fn gather_auth_methods(key_path: Option<&Path>) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();

    #[cfg(unix)]
    {
        if let Some(agent) = try_agent().await {
            methods.push(AuthMethod::Agent(agent));
        }
    }

    match key_path {
        Some(path) => {
            let key = load_private_key(path).map_err(|e| {
                MigrateError::SshKey(format!(
                    "failed to load custom key {}: {}",
                    path.display(),
                    e
                ))
            })?;
            methods.push(AuthMethod::Key {
                path: path.to_path_buf(),
                key: Arc::new(key),
            });
        }
        None => {
            for path in default_key_paths() {
                if !path.exists() {
                    continue;
                }
                match load_private_key(&path) {
                    Ok(key) => methods.push(AuthMethod::Key {
                        path,
                        key: Arc::new(key),
                    }),
                    Err(e) => debug!("Skipping key {}: {}", path.display(), e),
                }
            }
        }
    }

    if methods.is_empty() {
        return Err(MigrateError::auth(
            "no SSH authentication methods available",
        ));
    }

    Ok(methods)
}

/// Try each candidate until the server accepts one
pub async fn authenticate(
    session: &mut Handle<SshHandler>,
    username: &str,
    methods: Vec<AuthMethod>,
) -> Result<()> {
    for method in methods {
        match method {
            #[cfg(unix)]
            AuthMethod::Agent(mut agent) => {
                let identities = match agent.request_identities().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        debug!("SSH agent did not list identities: {}", e);
                        continue;
                    }
                };

                for identity in identities {
                    debug!("Attempting agent authentication for user '{}'", username);
                    let result = session
                        .authenticate_publickey_with(username, identity, None, &mut agent)
                        .await
                        .map(|r| r.success());

                    if accepted("agent identity", result) {
                        info!("Agent authentication successful");
                        return Ok(());
                    }
                }
            }
            AuthMethod::Key { path, key } => {
                debug!(
                    "Attempting key authentication for user '{}' with {}",
                    username,
                    path.display()
                );
                let key_with_alg = PrivateKeyWithHashAlg::new(key, None);
                let result = session
                    .authenticate_publickey(username, key_with_alg)
                    .await
                    .map(|r| r.success());

                if accepted(&path.display().to_string(), result) {
                    info!("Key authentication successful ({})", path.display());
                    return Ok(());
                }
            }
        }
    }

    Err(MigrateError::auth(format!(
        "all authentication methods were rejected for user '{}'",
        username
    )))
}

/// Whether one attempt was accepted. Errors (agent refusing to sign, key
/// type not negotiated) only skip to the next candidate.
fn accepted<E: std::fmt::Display>(candidate: &str, result: std::result::Result<bool, E>) -> bool {
    match result {
        Ok(success) => success,
        Err(e) => {
            debug!("Authentication with {} failed: {}", candidate, e);
            false
        }
    }
}

/// Load an unencrypted private key after checking its permissions
pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    validate_key_permissions(path)?;

    russh::keys::load_secret_key(path, None)
        .map_err(|e| MigrateError::SshKey(format!("key is encrypted or invalid: {}", e)))
}

/// Refuse private keys accessible by group or others
#[cfg(unix)]
pub fn validate_key_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| {
        MigrateError::SshKey(format!(
            "failed to stat SSH key file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(MigrateError::SshKey(format!(
            "private key file {} has insecure permissions {:o} (should be 600 or 400)",
            path.display(),
            mode
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn validate_key_permissions(path: &Path) -> Result<()> {
    std::fs::metadata(path).map(|_| ()).map_err(|e| {
        MigrateError::SshKey(format!(
            "failed to stat SSH key file {}: {}",
            path.display(),
            e
        ))
    })
}

fn default_key_paths() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    DEFAULT_KEY_NAMES.iter().map(|n| ssh_dir.join(n)).collect()
}

#[cfg(unix)]
async fn try_agent() -> Option<russh::keys::agent::client::AgentClient<tokio::net::UnixStream>> {
    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        return None;
    }

    match russh::keys::agent::client::AgentClient::connect_env().await {
        Ok(agent) => {
            debug!("Connected to SSH agent");
            Some(agent)
        }
        Err(e) => {
            debug!("SSH agent unavailable: {}", e);
            None
        }
    }
}
