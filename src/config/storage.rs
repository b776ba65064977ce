//! Configuration Storage
//!
//! Handles reading/writing JSON state files to disk.
//! Location: ~/.sshterm on macOS/Linux, %APPDATA%\SSHTerminal on Windows

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("SSHTerminal"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sshterm"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sshterm"))
            .ok_or(StorageError::NoConfigDir)
    }
}

pub fn known_hosts_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("known_hosts.json"))
}

pub fn servers_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("servers.json"))
}

pub fn settings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("settings.json"))
}

pub fn ai_usage_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("ai_usage.json"))
}

pub fn ssh_keys_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("ssh_keys.json"))
}

pub fn recordings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("recordings.json"))
}

/// A single JSON document on disk
///
/// Writes go to a temp file which is then renamed over the target, so a crash
/// never leaves a half-written document behind.
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document
    /// Returns the default value if the file doesn't exist.
    /// A corrupted file is backed up and replaced by the default value.
    pub fn load(&self) -> Result<T, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<T>(&contents) {
                Ok(value) => Ok(value),
                Err(e) => {
                    tracing::warn!("State file {:?} corrupted: {}", self.path, e);
                    match self.backup() {
                        Ok(backup_path) => tracing::warn!(
                            "Corrupted file backed up to {:?}, using defaults",
                            backup_path
                        ),
                        Err(backup_err) => {
                            tracing::error!("Failed to backup corrupted file: {}", backup_err)
                        }
                    }
                    Ok(T::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Save the document atomically
    pub fn save(&self, value: &T) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Copy the current file next to itself with a timestamp suffix
    pub fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.path.exists() {
            fs::copy(&self.path, &backup_path)?;
        }

        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let file: JsonFile<BTreeMap<String, String>> = JsonFile::new(temp.path().join("x.json"));
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let file: JsonFile<BTreeMap<String, String>> =
            JsonFile::new(temp.path().join("nested").join("x.json"));

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), "b".to_string());
        file.save(&map).unwrap();

        assert_eq!(file.load().unwrap(), map);
        assert!(!temp.path().join("nested").join("x.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_file_falls_back_to_default() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("x.json");
        fs::write(&path, "{ not json").unwrap();

        let file: JsonFile<BTreeMap<String, String>> = JsonFile::new(&path);
        assert!(file.load().unwrap().is_empty());

        let backups = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("backup"))
            .count();
        assert_eq!(backups, 1);
    }
}
