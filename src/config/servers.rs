//! Server profiles
//!
//! Identity and address of every saved host, persisted as a JSON array.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::storage::{servers_file, JsonFile, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    #[default]
    Password,
    PublicKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Keychain reference of an imported private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

fn default_port() -> u16 {
    22
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth_type: AuthType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            auth_type,
            private_key_ref: None,
            created_at: Utc::now(),
            last_connected_at: None,
        }
    }

    /// Password profile, named after its address
    pub fn with_password(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        let host = host.into();
        Self::new(host.clone(), host, port, username, AuthType::Password)
    }

    /// Public key profile referencing a key stored in the keychain
    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_ref: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let mut profile = Self::new(host.clone(), host, port, username, AuthType::PublicKey);
        profile.private_key_ref = Some(key_ref.into());
        profile
    }

    pub fn display_address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Saved server profiles
pub struct ServerRepository {
    file: JsonFile<Vec<ServerProfile>>,
    servers: Vec<ServerProfile>,
}

impl ServerRepository {
    /// Open the repository at the default location
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(JsonFile::new(servers_file()?))
    }

    pub fn open(file: JsonFile<Vec<ServerProfile>>) -> Result<Self, StorageError> {
        let servers = file.load()?;
        tracing::debug!("Loaded {} server profiles", servers.len());
        Ok(Self { file, servers })
    }

    pub fn list(&self) -> &[ServerProfile] {
        &self.servers
    }

    pub fn get(&self, id: Uuid) -> Option<&ServerProfile> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn add(&mut self, server: ServerProfile) -> Result<(), StorageError> {
        self.servers.push(server);
        self.file.save(&self.servers)
    }

    /// Replace the profile with the same id; returns false if it doesn't exist
    pub fn update(&mut self, server: ServerProfile) -> Result<bool, StorageError> {
        match self.servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => {
                *existing = server;
                self.file.save(&self.servers)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete(&mut self, id: Uuid) -> Result<bool, StorageError> {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        if self.servers.len() == before {
            return Ok(false);
        }
        self.file.save(&self.servers)?;
        Ok(true)
    }

    /// Stamp `last_connected_at` after a successful connection
    pub fn touch(&mut self, id: Uuid) -> Result<(), StorageError> {
        if let Some(server) = self.servers.iter_mut().find(|s| s.id == id) {
            server.last_connected_at = Some(Utc::now());
            self.file.save(&self.servers)?;
        }
        Ok(())
    }
}
