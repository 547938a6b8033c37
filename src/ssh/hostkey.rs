//! Host key verification (trust-on-first-use)
//!
//! The trust file uses the OpenSSH `known_hosts` line format
//! (`hosts key-type base64 [comment]`) and is only ever appended to. A host
//! may have several records (key rotation history); a presented key is
//! trusted when it matches any of them.
//!
//! Host fields may hold plain names, `*`/`?` wildcards, `!` negations and
//! hashed `|1|salt|hmac` entries (`HashKnownHosts yes`).
//!
//! Three modes:
//! - [`TrustMode::Strict`]: the file must exist and hold a matching record.
//! - [`TrustMode::AcceptNew`]: unknown hosts are learned and appended; a
//!   changed key for a known host is still rejected.
//! - [`TrustMode::Default`]: like strict, but a missing file is created empty
//!   (owner-only permissions) first.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use ssh_key::{HashAlg, PublicKey};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Prefix of a hashed host entry
const HASHED_PREFIX: &str = "|1|";

/// How unknown hosts are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// Reject anything without a matching record
    Strict,
    /// Learn unknown hosts, reject changed keys
    AcceptNew,
    /// Strict, creating an empty trust file when missing
    Default,
}

/// Outcome of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Key matched an existing record
    Trusted,
    /// Host was unknown and its key has been recorded
    Learned,
}

/// One parsed trust file line
#[derive(Debug, Clone)]
pub struct TrustRecord {
    /// Host field entries as written (names, patterns, hashes)
    pub hosts: Vec<String>,
    /// Recorded public key
    pub key: PublicKey,
    /// `@revoked` marker
    pub revoked: bool,
}

impl TrustRecord {
    /// Key algorithm name, e.g. `ssh-ed25519`
    pub fn algorithm(&self) -> String {
        self.key.algorithm().as_str().to_string()
    }

    /// OpenSSH matching: any positive entry matches and no negated one does
    fn applies_to(&self, host_id: &str) -> bool {
        let host_id = host_id.to_ascii_lowercase();
        let mut matched = false;

        for entry in &self.hosts {
            if let Some(hashed) = entry.strip_prefix(HASHED_PREFIX) {
                matched |= hashed_host_matches(hashed, &host_id);
            } else if let Some(negated) = entry.strip_prefix('!') {
                if wildcard_match(&negated.to_ascii_lowercase(), &host_id) {
                    return false;
                }
            } else {
                matched |= wildcard_match(&entry.to_ascii_lowercase(), &host_id);
            }
        }

        matched
    }

    fn same_key(&self, key: &PublicKey) -> bool {
        self.key.key_data() == key.key_data()
    }
}

/// Persistent trust store backed by a `known_hosts` file
#[derive(Debug, Clone)]
pub struct HostTrustStore {
    path: PathBuf,
    mode: TrustMode,
}

impl HostTrustStore {
    /// Open the trust store for `mode`.
    ///
    /// `path` defaults to `~/.ssh/known_hosts`. Strict mode requires the file
    /// to exist; the other modes create it (directory `0700`, file `0600`).
    /// Failure to create the file is fatal in every mode.
    pub fn open(mode: TrustMode, path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => default_known_hosts()?,
        };

        if !path.exists() {
            match mode {
                TrustMode::Strict => {
                    return Err(MigrateError::trust_store(
                        &path,
                        "known_hosts file does not exist (use --accept-host-key to create it)",
                    ));
                }
                TrustMode::AcceptNew | TrustMode::Default => {
                    create_trust_file(&path)?;
                    info!("Created known_hosts file {}", path.display());
                }
            }
        }

        Ok(Self { path, mode })
    }

    /// Trust file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured mode
    pub fn mode(&self) -> TrustMode {
        self.mode
    }

    /// All parseable records in the trust file
    pub fn records(&self) -> Result<Vec<TrustRecord>> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            MigrateError::trust_store(&self.path, format!("failed to read known_hosts: {}", e))
        })?;

        Ok(content.lines().filter_map(parse_line).collect())
    }

    /// Records that apply to `host_id`
    pub fn records_for(&self, host_id: &str) -> Result<Vec<TrustRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.applies_to(host_id))
            .collect())
    }

    /// Verify `key` presented by `host_id` (see [`host_identifier`]).
    ///
    /// Errors only for untrusted keys or when the trust file cannot be used.
    pub fn verify(&self, host_id: &str, key: &PublicKey) -> Result<Verification> {
        let records = self.records_for(host_id)?;
        let fp = fingerprint(key);

        if records.iter().any(|r| r.revoked && r.same_key(key)) {
            return Err(MigrateError::trust_store(
                &self.path,
                format!("host key {} for {} is marked @revoked", fp, host_id),
            ));
        }

        let known: Vec<&TrustRecord> = records.iter().filter(|r| !r.revoked).collect();

        if known.iter().any(|r| r.same_key(key)) {
            debug!("Host key for {} matches known_hosts ({})", host_id, fp);
            return Ok(Verification::Trusted);
        }

        if !known.is_empty() {
            return Err(MigrateError::HostKeyChanged {
                host: host_id.to_string(),
                fingerprint: fp,
                path: self.path.clone(),
            });
        }

        match self.mode {
            TrustMode::AcceptNew => {
                warn!("Unknown host {}", host_id);
                warn!("Fingerprint: {}", fp);
                warn!("Adding new host key to {}", self.path.display());
                self.append(host_id, key)?;
                Ok(Verification::Learned)
            }
            TrustMode::Strict | TrustMode::Default => Err(MigrateError::UnknownHost {
                host: host_id.to_string(),
                fingerprint: fp,
                path: self.path.clone(),
            }),
        }
    }

    /// Append one `host key-type base64` line with a single write
    fn append(&self, host_id: &str, key: &PublicKey) -> Result<()> {
        let encoded = PublicKey::from(key.key_data().clone())
            .to_openssh()
            .map_err(|e| MigrateError::SshKey(format!("failed to encode host key: {}", e)))?;

        let mut line = String::new();
        if !ends_with_newline(&self.path)? {
            line.push('\n');
        }
        line.push_str(host_id);
        line.push(' ');
        line.push_str(encoded.trim());
        line.push('\n');

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        restrict_file(&mut options);

        let mut file = options.open(&self.path).map_err(|e| {
            MigrateError::trust_store(&self.path, format!("failed to open known_hosts: {}", e))
        })?;
        file.write_all(line.as_bytes()).map_err(|e| {
            MigrateError::trust_store(&self.path, format!("failed to write to known_hosts: {}", e))
        })?;

        Ok(())
    }
}

/// OpenSSH host identifier: `host` on port 22, `[host]:port` otherwise
pub fn host_identifier(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// `SHA256:<base64>` fingerprint, as printed by `ssh-keygen -l`
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

fn parse_line(line: &str) -> Option<TrustRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (revoked, rest) = match line.strip_prefix('@') {
        Some(marked) => {
            let (marker, rest) = marked.split_once(char::is_whitespace)?;
            if marker != "revoked" {
                debug!("Skipping known_hosts @{} line", marker);
                return None;
            }
            (true, rest.trim_start())
        }
        None => (false, line),
    };

    let (hosts, key_text) = rest.split_once(char::is_whitespace)?;

    let key = match PublicKey::from_openssh(key_text.trim()) {
        Ok(key) => key,
        Err(e) => {
            debug!("Skipping unparseable known_hosts entry for {}: {}", hosts, e);
            return None;
        }
    };

    Some(TrustRecord {
        hosts: hosts.split(',').map(str::to_string).collect(),
        key,
        revoked,
    })
}

/// `salt|hmac` (both base64) against HMAC-SHA1(salt, host_id)
fn hashed_host_matches(encoded: &str, host_id: &str) -> bool {
    let Some((salt, hash)) = encoded.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        debug!("Skipping malformed hashed known_hosts entry");
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(&salt) else {
        return false;
    };
    mac.update(host_id.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// Glob match with `*` (any run) and `?` (one character)
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

fn default_known_hosts() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| MigrateError::config("failed to get home directory"))?;
    Ok(PathBuf::from(home).join(".ssh").join("known_hosts"))
}

fn create_trust_file(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        restrict_dir(&mut builder);
        builder.create(dir).map_err(|e| {
            MigrateError::trust_store(path, format!("failed to create .ssh directory: {}", e))
        })?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    restrict_file(&mut options);
    options.open(path).map_err(|e| {
        MigrateError::trust_store(path, format!("failed to create known_hosts file: {}", e))
    })?;
    Ok(())
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut content = Vec::new();
    match fs::File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut content)?;
            Ok(content.is_empty() || content.ends_with(b"\n"))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(MigrateError::trust_store(
            path,
            format!("failed to read known_hosts: {}", e),
        )),
    }
}

#[cfg(unix)]
fn restrict_dir(builder: &mut DirBuilder) {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(0o700);
}

#[cfg(not(unix))]
fn restrict_dir(_builder: &mut DirBuilder) {}

#[cfg(unix)]
fn restrict_file(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn restrict_file(_options: &mut OpenOptions) {}
