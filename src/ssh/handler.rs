//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait; its only job is to check
//! the server's host key against the [`HostTrustStore`].

use std::sync::Arc;

use tracing::debug;

use super::hostkey::{fingerprint, HostTrustStore, Verification};
use crate::error::MigrateError;

/// SSH client handler for russh
///
/// Holds the trust store and the host identifier (`host` or `[host]:port`)
/// the server key is checked against.
#[derive(Debug, Clone)]
pub struct SshHandler {
    trust: Arc<HostTrustStore>,
    host_id: String,
}

impl SshHandler {
    /// Create a new SSH handler
    pub fn new(trust: Arc<HostTrustStore>, host_id: impl Into<String>) -> Self {
        Self {
            trust,
            host_id: host_id.into(),
        }
    }

    /// Host identifier keys are checked against
    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

impl russh::client::Handler for SshHandler {
    type Error = MigrateError;

    /// Verify the server's host key
    ///
    /// Untrusted keys return an error (not `Ok(false)`) so the remediation
    /// message reaches the caller of `client::connect`.
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let encoded = server_public_key
            .to_openssh()
            .map_err(|e| MigrateError::SshKey(format!("failed to encode host key: {}", e)))?;
        let key = ssh_key::PublicKey::from_openssh(&encoded)
            .map_err(|e| MigrateError::SshKey(format!("failed to parse host key: {}", e)))?;

        match self.trust.verify(&self.host_id, &key)? {
            Verification::Trusted => {
                debug!("Host key trusted for {}", self.host_id);
            }
            Verification::Learned => {
                debug!(
                    "Host key learned for {} ({})",
                    self.host_id,
                    fingerprint(&key)
                );
            }
        }

        Ok(true)
    }
}
