//! Keychain Integration
//!
//! Securely stores the AI provider credential, imported SSH private keys and
//! their passphrases. `Keychain` goes through the system keychain via the
//! `keyring` crate; `MemorySecretStore` keeps everything in process memory.

use std::collections::HashMap;

use keyring::Entry;
use parking_lot::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Service name for keychain entries
const SERVICE_NAME: &str = "com.sshterminal.secrets";

/// Account key for the AI provider credential
pub const AI_CREDENTIAL_ACCOUNT: &str = "ai_provider_credential";

/// Account key holding the PEM bytes of an imported SSH key
pub fn ssh_key_account(key_ref: &str) -> String {
    format!("ssh_key.{}", key_ref)
}

/// Account key holding the passphrase of an imported SSH key
pub fn ssh_key_passphrase_account(key_ref: &str) -> String {
    format!("ssh_key_passphrase.{}", key_ref)
}

/// Keychain errors
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Secret not found for account: {0}")]
    NotFound(String),
}

/// Secret storage used by the SSH and AI layers.
///
/// Implementations must never log secret values.
pub trait SecretStore: Send + Sync {
    /// Store (or overwrite) a secret
    fn save(&self, account: &str, secret: &str) -> Result<(), KeychainError>;

    /// Retrieve a secret; `NotFound` if absent
    fn retrieve(&self, account: &str) -> Result<Zeroizing<String>, KeychainError>;

    /// Delete a secret; deleting a missing secret succeeds
    fn delete(&self, account: &str) -> Result<(), KeychainError>;

    /// Check if a secret exists
    fn exists(&self, account: &str) -> Result<bool, KeychainError>;
}

/// System keychain backed secret store
pub struct Keychain {
    service: String,
}

impl Keychain {
    /// Create a new keychain manager
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Create with custom service name (for testing)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Generate a new unique reference for an imported key
    pub fn generate_id() -> String {
        format!("sshterm-{}", Uuid::new_v4())
    }

    fn entry(&self, account: &str) -> Result<Entry, KeychainError> {
        // Explicit username keeps the keychain identity stable on macOS
        let username = whoami::username();
        Ok(Entry::new(&self.service, &format!("{}@{}", username, account))?)
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for Keychain {
    fn save(&self, account: &str, secret: &str) -> Result<(), KeychainError> {
        tracing::debug!("Keychain save: service={}, account={}", self.service, account);
        let entry = self.entry(account)?;
        entry.set_password(secret).map_err(|e| {
            tracing::error!("Keychain save failed: account={}, error={:?}", account, e);
            KeychainError::Keyring(e)
        })
    }

    fn retrieve(&self, account: &str) -> Result<Zeroizing<String>, KeychainError> {
        let entry = self.entry(account)?;
        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Keychain retrieve: account={}, len={}", account, secret.len());
                Ok(Zeroizing::new(secret))
            }
            Err(keyring::Error::NoEntry) => Err(KeychainError::NotFound(account.to_string())),
            Err(e) => {
                tracing::error!("Keychain retrieve failed: account={}, error={:?}", account, e);
                Err(KeychainError::Keyring(e))
            }
        }
    }

    fn delete(&self, account: &str) -> Result<(), KeychainError> {
        let entry = self.entry(account)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }

    fn exists(&self, account: &str) -> Result<bool, KeychainError> {
        let entry = self.entry(account)?;
        match entry.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }
}

/// In-process secret store, used by tests and by hosts without a keychain
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn save(&self, account: &str, secret: &str) -> Result<(), KeychainError> {
        self.secrets
            .lock()
            .insert(account.to_string(), Zeroizing::new(secret.to_string()));
        Ok(())
    }

    fn retrieve(&self, account: &str) -> Result<Zeroizing<String>, KeychainError> {
        self.secrets
            .lock()
            .get(account)
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(account.to_string()))
    }

    fn delete(&self, account: &str) -> Result<(), KeychainError> {
        self.secrets.lock().remove(account);
        Ok(())
    }

    fn exists(&self, account: &str) -> Result<bool, KeychainError> {
        Ok(self.secrets.lock().contains_key(account))
    }
}
