//! Known hosts store for TOFU host key pinning
//!
//! Persists `"host:port" -> fingerprint` as a flat JSON object. Every mutation
//! is written through immediately; the in-memory map and the file are updated
//! under the same lock so concurrent connection attempts see a consistent view.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::storage::{known_hosts_file, JsonFile, StorageError};

/// Compute the SHA-256 fingerprint of raw public key bytes.
///
/// Rendered as colon-separated lowercase hex, e.g. `3f:a0:...`.
pub fn fingerprint_bytes(key_bytes: &[u8]) -> String {
    let hash = Sha256::digest(key_bytes);
    hash.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Fingerprint of a server public key as offered during the handshake
pub fn fingerprint(key: &PublicKey) -> String {
    fingerprint_bytes(&key.public_key_bytes())
}

/// Pinned host keys
pub struct HostKeyStore {
    hosts: Mutex<BTreeMap<String, String>>,
    /// None for in-memory stores
    file: Option<JsonFile<BTreeMap<String, String>>>,
}

impl HostKeyStore {
    /// Open the store at the default location (`~/.sshterm/known_hosts.json`)
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(known_hosts_file()?)
    }

    /// Open a file-backed store, loading existing entries
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let file: JsonFile<BTreeMap<String, String>> = JsonFile::new(path);
        let hosts = file.load()?;
        info!("Loaded {} pinned host keys from {:?}", hosts.len(), file.path());
        Ok(Self {
            hosts: Mutex::new(hosts),
            file: Some(file),
        })
    }

    /// Non-persisted store
    pub fn in_memory() -> Self {
        Self {
            hosts: Mutex::new(BTreeMap::new()),
            file: None,
        }
    }

    fn make_key(host: &str, port: u16) -> String {
        format!("{}:{}", host, port)
    }

    /// Write `next` to disk, then make it current. A failed save leaves the
    /// in-memory pins untouched.
    fn commit(
        &self,
        hosts: &mut BTreeMap<String, String>,
        next: BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        if let Some(file) = &self.file {
            file.save(&next)?;
        }
        *hosts = next;
        Ok(())
    }

    pub fn get(&self, host: &str, port: u16) -> Option<String> {
        self.hosts.lock().get(&Self::make_key(host, port)).cloned()
    }

    /// Pin a fingerprint, replacing any previous one.
    ///
    /// This is the explicit operator path; TOFU goes through `put_if_absent`.
    pub fn put(&self, host: &str, port: u16, fingerprint: &str) -> Result<(), StorageError> {
        let mut hosts = self.hosts.lock();
        let mut next = hosts.clone();
        next.insert(Self::make_key(host, port), fingerprint.to_string());
        self.commit(&mut hosts, next)?;
        debug!("Pinned host key for {}:{}", host, port);
        Ok(())
    }

    /// Pin a fingerprint only if the host has none yet.
    ///
    /// Returns the fingerprint already stored, if any, in which case nothing
    /// is written.
    pub fn put_if_absent(
        &self,
        host: &str,
        port: u16,
        fingerprint: &str,
    ) -> Result<Option<String>, StorageError> {
        let key = Self::make_key(host, port);
        let mut hosts = self.hosts.lock();
        if let Some(existing) = hosts.get(&key) {
            return Ok(Some(existing.clone()));
        }
        let mut next = hosts.clone();
        next.insert(key, fingerprint.to_string());
        self.commit(&mut hosts, next)?;
        debug!("Pinned new host key for {}:{}", host, port);
        Ok(None)
    }

    /// Forget a host. Returns true if it was pinned.
    pub fn remove(&self, host: &str, port: u16) -> Result<bool, StorageError> {
        let mut hosts = self.hosts.lock();
        let mut next = hosts.clone();
        if next.remove(&Self::make_key(host, port)).is_none() {
            return Ok(false);
        }
        self.commit(&mut hosts, next)?;
        info!("Removed pinned host key for {}:{}", host, port);
        Ok(true)
    }

    /// Snapshot of every pinned host
    pub fn all(&self) -> BTreeMap<String, String> {
        self.hosts.lock().clone()
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let mut hosts = self.hosts.lock();
        self.commit(&mut hosts, BTreeMap::new())?;
        info!("Cleared all pinned host keys");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_stable_colon_hex() {
        let fp = fingerprint_bytes(b"ssh-ed25519 key bytes");
        assert_eq!(fp, fingerprint_bytes(b"ssh-ed25519 key bytes"));
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp
            .split(':')
            .all(|b| b.len() == 2 && b.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));
        assert_ne!(fp, fingerprint_bytes(b"other key"));

        // SHA-256 of the empty input
        assert!(fingerprint_bytes(b"").starts_with("e3:b0:c4:42:98:fc"));
    }

    #[test]
    fn test_put_if_absent_never_overwrites() {
        let store = HostKeyStore::in_memory();
        assert_eq!(store.put_if_absent("h", 22, "f1").unwrap(), None);
        assert_eq!(
            store.put_if_absent("h", 22, "f2").unwrap(),
            Some("f1".to_string())
        );
        assert_eq!(store.get("h", 22).as_deref(), Some("f1"));
        assert_eq!(store.get("h", 2222), None);
    }

    #[test]
    fn test_mutations_are_persisted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("known_hosts.json");

        let store = HostKeyStore::open(&path).unwrap();
        store.put("a.example", 22, "f1").unwrap();
        store.put("b.example", 2222, "f2").unwrap();
        assert!(store.remove("a.example", 22).unwrap());
        assert!(!store.remove("a.example", 22).unwrap());

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["b.example:2222"], "f2");

        let reopened = HostKeyStore::open(&path).unwrap();
        assert_eq!(reopened.get("b.example", 2222).as_deref(), Some("f2"));

        reopened.clear().unwrap();
        assert!(HostKeyStore::open(&path).unwrap().all().is_empty());
    }

    #[test]
    fn test_failed_save_leaves_pins_unchanged() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("state");
        let path = dir.join("known_hosts.json");

        let store = HostKeyStore::open(&path).unwrap();
        store.put("kept.example", 22, "f0").unwrap();

        // A regular file where the directory should be makes every save fail
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();

        assert!(store.put_if_absent("new.example", 22, "f1").is_err());
        assert_eq!(store.get("new.example", 22), None);

        assert!(store.put("kept.example", 22, "f2").is_err());
        assert!(store.remove("kept.example", 22).is_err());
        assert!(store.clear().is_err());
        assert_eq!(store.get("kept.example", 22).as_deref(), Some("f0"));
        assert_eq!(store.all().len(), 1);
    }
}
