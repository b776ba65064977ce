//! Configuration Management Module
//!
//! Handles persistent storage of settings, server profiles, imported SSH
//! keys and JSON state files, and secure credential storage via the system
//! keychain.

pub mod keychain;
pub mod keys;
pub mod servers;
pub mod settings;
pub mod storage;

pub use keychain::{
    ssh_key_account, ssh_key_passphrase_account, Keychain, KeychainError, MemorySecretStore,
    SecretStore, AI_CREDENTIAL_ACCOUNT,
};
pub use keys::{KeyError, KeyManager, SshKeyInfo, SshKeyType};
pub use servers::{AuthType, ServerProfile, ServerRepository};
pub use settings::{AiSettings, AppSettings, SshSettings};
pub use storage::{config_dir, JsonFile, StorageError};
