//! On-disk SSH host-key store.
//!
//! Maintains a `hostname -> accepted public keys` mapping backed by a
//! known-hosts file in the classic `<host> <key-type> <base64-key>`
//! format (one record per line, `#`-prefixed comments allowed). Used by
//! the worker pool's SSH client as the host-key verification callback.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use base64::Engine;
use helix_common::{Error, Result};
use sha2::{Digest, Sha256};

/// A single accepted host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyRecord {
    pub host: String,
    pub key_type: String,
    pub key_b64: String,
}

impl HostKeyRecord {
    fn to_line(&self) -> String {
        format!("{} {} {}", self.host, self.key_type, self.key_b64)
    }

    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(3, ' ');
        let host = parts.next()?.to_string();
        let key_type = parts.next()?.to_string();
        let key_b64 = parts.next()?.to_string();
        Some(Self {
            host,
            key_type,
            key_b64,
        })
    }
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Host was known and the presented key matched a stored record.
    Accepted,
    /// Store was empty; the key was accepted and recorded (bootstrap trust).
    BootstrapAccepted,
}

/// Known-hosts store, backed by a file on disk.
pub struct HostKeyStore {
    path: PathBuf,
    records: RwLock<HashMap<String, Vec<HostKeyRecord>>>,
}

impl HostKeyStore {
    /// Load the store from `path`, creating an empty file (mode 0600,
    /// parent directory mode 0700) if it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        if !path.exists() {
            std::fs::write(&path, "")?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        let raw = std::fs::read_to_string(&path)?;
        let mut records: HashMap<String, Vec<HostKeyRecord>> = HashMap::new();
        for line in raw.lines() {
            if let Some(record) = HostKeyRecord::parse_line(line) {
                records.entry(record.host.clone()).or_default().push(record);
            }
        }

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Whether the store currently holds any records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Append a `(host, key_type, key_b64)` record to the file and the
    /// in-memory index.
    pub fn add(&self, host: &str, key_type: &str, key_b64: &str) -> Result<()> {
        let record = HostKeyRecord {
            host: host.to_string(),
            key_type: key_type.to_string(),
            key_b64: key_b64.to_string(),
        };

        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            records.entry(host.to_string()).or_default().push(record.clone());
        }

        let mut existing = std::fs::read_to_string(&self.path).unwrap_or_default();
        if !existing.is_empty() && !existing.ends_with('\n') {
            existing.push('\n');
        }
        existing.push_str(&record.to_line());
        existing.push('\n');

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &existing)?;
        std::fs::rename(&tmp_path, &self.path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Verify a presented key for `host`. Follows the four rules:
    /// 1. known host, matching key → accept
    /// 2. known host, no matching key → `HostKeyMismatch`
    /// 3. unknown host, store non-empty → `HostKeyMismatch` (strict checking)
    /// 4. store empty (bootstrap) → accept, record the key, log a warning
    pub fn verify(&self, host: &str, key_type: &str, key_b64: &str) -> Result<VerifyOutcome> {
        let empty = self.is_empty();

        let matched = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records
                .get(host)
                .map(|keys| keys.iter().any(|k| k.key_type == key_type && k.key_b64 == key_b64))
        };

        match matched {
            Some(true) => Ok(VerifyOutcome::Accepted),
            Some(false) => Err(Error::HostKeyMismatch(format!(
                "host key mismatch - possible MITM: {host}"
            ))),
            None if empty => {
                let fingerprint = fingerprint(key_b64);
                tracing::warn!(
                    host,
                    key_type,
                    fingerprint = %fingerprint,
                    "accepting unknown host key on empty store (bootstrap trust)"
                );
                self.add(host, key_type, key_b64)?;
                Ok(VerifyOutcome::BootstrapAccepted)
            },
            None => Err(Error::HostKeyMismatch(format!(
                "unknown host and strict checking enabled: {host}"
            ))),
        }
    }

    /// Path to the on-disk known-hosts file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// SHA-256 fingerprint of a base64-encoded key blob, formatted as the
/// usual colon-separated hex digest.
#[must_use]
pub fn fingerprint(key_b64: &str) -> String {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .unwrap_or_default();
    let digest = Sha256::digest(&raw);
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> HostKeyStore {
        HostKeyStore::load(dir.path().join("known_hosts")).expect("load")
    }

    #[test]
    fn bootstrap_accepts_and_records_first_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        assert!(store.is_empty());

        let outcome = store.verify("host-a", "ssh-ed25519", "AAAA").expect("verify");
        assert_eq!(outcome, VerifyOutcome::BootstrapAccepted);
        assert!(!store.is_empty());
    }

    #[test]
    fn matching_key_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        store.verify("host-a", "ssh-ed25519", "AAAA").expect("bootstrap");

        let outcome = store.verify("host-a", "ssh-ed25519", "AAAA").expect("verify");
        assert_eq!(outcome, VerifyOutcome::Accepted);
    }

    #[test]
    fn mismatched_key_on_known_host_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        store.verify("host-a", "ssh-ed25519", "AAAA").expect("bootstrap");

        let err = store.verify("host-a", "ssh-ed25519", "BBBB").unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch(_)));
    }

    #[test]
    fn unknown_host_rejected_once_store_is_non_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        store.verify("host-a", "ssh-ed25519", "AAAA").expect("bootstrap");

        let err = store.verify("host-b", "ssh-ed25519", "CCCC").unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch(_)));
    }

    #[test]
    fn reloading_preserves_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = store(&dir);
            store.verify("host-a", "ssh-ed25519", "AAAA").expect("bootstrap");
        }

        let reloaded = store(&dir);
        let outcome = reloaded.verify("host-a", "ssh-ed25519", "AAAA").expect("verify");
        assert_eq!(outcome, VerifyOutcome::Accepted);
    }

    #[test]
    #[cfg(unix)]
    fn file_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let perms = std::fs::metadata(store.path()).expect("metadata").permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
