//! Application settings
//!
//! Tunables for the SSH and AI layers. Every field has a serde default so an
//! older or partial `settings.json` keeps loading.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::storage::{settings_file, JsonFile, StorageError};
use crate::ai::AiModel;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub ai: AiSettings,
}

impl AppSettings {
    /// Load settings from the default location
    pub fn load() -> Result<Self, StorageError> {
        JsonFile::<Self>::new(settings_file()?).load()
    }

    /// Persist settings to the default location
    pub fn save(&self) -> Result<(), StorageError> {
        JsonFile::<Self>::new(settings_file()?).save(self)
    }
}

/// SSH connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSettings {
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// One-shot command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// SSH keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,

    /// Auto-accept and pin unknown host keys
    #[serde(default)]
    pub trust_on_first_use: bool,

    /// How long an unknown-key prompt may stay unanswered before it counts as denied
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    /// Maximum concurrent sessions in the registry
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_cols")]
    pub default_cols: u32,

    #[serde(default = "default_rows")]
    pub default_rows: u32,
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            keepalive_interval_secs: default_keepalive(),
            trust_on_first_use: false,
            approval_timeout_secs: default_approval_timeout(),
            max_sessions: default_max_sessions(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

/// AI assistant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub model: AiModel,

    /// Local ceiling of requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: usize,

    #[serde(default = "default_window")]
    pub window_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Override for the chat-completions endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_completions_endpoint: Option<String>,

    /// Override for the local inference endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_inference_endpoint: Option<String>,
}

impl AiSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            model: AiModel::default(),
            max_requests_per_window: default_max_requests(),
            window_secs: default_window(),
            request_timeout_secs: default_request_timeout(),
            chat_completions_endpoint: None,
            local_inference_endpoint: None,
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    60
}

fn default_keepalive() -> u64 {
    30
}

fn default_approval_timeout() -> u64 {
    120
}

fn default_max_sessions() -> usize {
    20
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

fn default_max_requests() -> usize {
    20
}

fn default_window() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}
