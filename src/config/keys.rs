//! Imported SSH keys
//!
//! Key metadata lives in `ssh_keys.json`. The PEM text and passphrase go to
//! the secret store under `ssh_key_account(id)` and
//! `ssh_key_passphrase_account(id)`, so a server profile only needs the key
//! id in `private_key_ref`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use russh::keys::{Algorithm, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::keychain::{
    ssh_key_account, ssh_key_passphrase_account, Keychain, KeychainError, SecretStore,
};
use super::storage::{ssh_keys_file, JsonFile, StorageError};
use crate::ssh::{decode_private_key, fingerprint, SshError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshKeyType {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl SshKeyType {
    pub fn display_name(&self) -> &'static str {
        match self {
            SshKeyType::Rsa => "RSA",
            SshKeyType::Ecdsa => "ECDSA",
            SshKeyType::Ed25519 => "Ed25519",
        }
    }

    fn from_algorithm(algorithm: &Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::Rsa { .. } => Some(SshKeyType::Rsa),
            Algorithm::Ecdsa { .. } => Some(SshKeyType::Ecdsa),
            Algorithm::Ed25519 => Some(SshKeyType::Ed25519),
            _ => None,
        }
    }
}

/// Metadata of an imported key. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyInfo {
    /// Also the `private_key_ref` of profiles using this key
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: SshKeyType,
    /// SHA-256 of the public key, colon-separated hex
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub is_encrypted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Passphrase required")]
    PassphraseRequired,

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error(transparent)]
    Secret(#[from] KeychainError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Type, fingerprint and encryption of a PEM.
///
/// OpenSSH keys expose their public half without the passphrase; other
/// encrypted formats need it. A supplied passphrase is always checked.
fn inspect_key(pem: &str, passphrase: Option<&str>) -> Result<(PublicKey, bool), KeyError> {
    let decode = |pem: &str, passphrase: Option<&str>| {
        decode_private_key(pem, passphrase).map_err(|e| match e {
            SshError::KeyDecryptFailed(_) if passphrase.is_none() => KeyError::PassphraseRequired,
            SshError::KeyDecryptFailed(_) => KeyError::InvalidPassphrase,
            other => KeyError::InvalidKeyFormat(other.to_string()),
        })
    };

    if let Ok(key) = PrivateKey::from_openssh(pem.trim()) {
        let encrypted = key.is_encrypted();
        if encrypted && passphrase.is_some() {
            decode(pem, passphrase)?;
        }
        return Ok((key.public_key().clone(), encrypted));
    }

    let encrypted = pem.contains("ENCRYPTED");
    let key = decode(pem, passphrase)?;
    Ok((key.public_key().clone(), encrypted))
}

pub struct KeyManager {
    keys: Mutex<Vec<SshKeyInfo>>,
    /// None for in-memory managers
    file: Option<JsonFile<Vec<SshKeyInfo>>>,
    secrets: Arc<dyn SecretStore>,
}

impl KeyManager {
    /// Open at the default location (`~/.sshterm/ssh_keys.json`)
    pub fn open_default(secrets: Arc<dyn SecretStore>) -> Result<Self, StorageError> {
        Self::open(JsonFile::new(ssh_keys_file()?), secrets)
    }

    pub fn open(
        file: JsonFile<Vec<SshKeyInfo>>,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, StorageError> {
        let keys = file.load()?;
        info!("Loaded {} imported SSH keys", keys.len());
        Ok(Self {
            keys: Mutex::new(keys),
            file: Some(file),
            secrets,
        })
    }

    pub fn in_memory(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            file: None,
            secrets,
        }
    }

    /// Persist `next`, then make it current
    fn commit(
        &self,
        keys: &mut Vec<SshKeyInfo>,
        next: Vec<SshKeyInfo>,
    ) -> Result<(), StorageError> {
        if let Some(file) = &self.file {
            file.save(&next)?;
        }
        *keys = next;
        Ok(())
    }

    pub fn list(&self) -> Vec<SshKeyInfo> {
        self.keys.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<SshKeyInfo> {
        self.keys.lock().iter().find(|k| k.id == id).cloned()
    }

    /// Import a private key under a display name.
    ///
    /// Rejects anything russh cannot parse. An empty passphrase counts as none.
    pub fn import_key(
        &self,
        name: &str,
        pem: &str,
        passphrase: Option<&str>,
    ) -> Result<SshKeyInfo, KeyError> {
        let passphrase = passphrase.filter(|p| !p.is_empty());
        let (public_key, is_encrypted) = inspect_key(pem, passphrase)?;
        let key_type = SshKeyType::from_algorithm(&public_key.algorithm()).ok_or_else(|| {
            KeyError::InvalidKeyFormat(format!("unsupported key type {}", public_key.algorithm()))
        })?;

        let info = SshKeyInfo {
            id: Keychain::generate_id(),
            name: name.to_string(),
            key_type,
            fingerprint: fingerprint(&public_key),
            created_at: Utc::now(),
            is_encrypted,
        };

        self.secrets.save(&ssh_key_account(&info.id), pem)?;
        if let Some(passphrase) = passphrase {
            if let Err(e) = self
                .secrets
                .save(&ssh_key_passphrase_account(&info.id), passphrase)
            {
                let _ = self.secrets.delete(&ssh_key_account(&info.id));
                return Err(e.into());
            }
        }

        let mut keys = self.keys.lock();
        let mut next = keys.clone();
        next.push(info.clone());
        if let Err(e) = self.commit(&mut keys, next) {
            let _ = self.secrets.delete(&ssh_key_account(&info.id));
            let _ = self.secrets.delete(&ssh_key_passphrase_account(&info.id));
            return Err(e.into());
        }

        info!(
            "Imported {} key {} ({})",
            key_type.display_name(),
            info.id,
            info.fingerprint
        );
        Ok(info)
    }

    /// PEM text of an imported key.
    ///
    /// For encrypted keys a passphrase must be available, either supplied
    /// or stored, and a supplied one must match the stored one.
    pub fn load_key_data(
        &self,
        id: &str,
        passphrase: Option<&str>,
    ) -> Result<Zeroizing<String>, KeyError> {
        let info = self.get(id).ok_or_else(|| KeyError::NotFound(id.to_string()))?;
        let pem = match self.secrets.retrieve(&ssh_key_account(id)) {
            Ok(pem) => pem,
            Err(KeychainError::NotFound(_)) => return Err(KeyError::NotFound(id.to_string())),
            Err(e) => return Err(e.into()),
        };

        if info.is_encrypted {
            let stored = match self.secrets.retrieve(&ssh_key_passphrase_account(id)) {
                Ok(stored) => Some(stored),
                Err(KeychainError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            match (passphrase, stored) {
                (Some(given), Some(stored)) if given != stored.as_str() => {
                    return Err(KeyError::InvalidPassphrase)
                }
                (None, None) => return Err(KeyError::PassphraseRequired),
                _ => {}
            }
        }

        Ok(pem)
    }

    /// Returns false if no key has this id
    pub fn rename_key(&self, id: &str, new_name: &str) -> Result<bool, KeyError> {
        let mut keys = self.keys.lock();
        let mut next = keys.clone();
        let Some(info) = next.iter_mut().find(|k| k.id == id) else {
            return Ok(false);
        };
        info.name = new_name.to_string();
        self.commit(&mut keys, next)?;
        Ok(true)
    }

    /// Forget a key and its secrets. Returns false if no key has this id.
    pub fn delete_key(&self, id: &str) -> Result<bool, KeyError> {
        let mut keys = self.keys.lock();
        if !keys.iter().any(|k| k.id == id) {
            return Ok(false);
        }

        self.secrets.delete(&ssh_key_account(id))?;
        if let Err(e) = self.secrets.delete(&ssh_key_passphrase_account(id)) {
            warn!("Failed to delete passphrase of key {}: {}", id, e);
        }

        let next = keys.iter().filter(|k| k.id != id).cloned().collect();
        self.commit(&mut keys, next)?;
        info!("Deleted SSH key {}", id);
        Ok(true)
    }
}
