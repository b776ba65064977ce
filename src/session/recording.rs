//! Session recording
//!
//! Captures PTY output of a session between `start` and `stop`. Finished
//! recordings are kept newest first in `recordings.json`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::storage::{recordings_file, JsonFile, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RecordingState {
    NotRecording,
    #[serde(rename_all = "camelCase")]
    Recording {
        started_at: DateTime<Utc>,
        output_size: usize,
    },
    #[serde(rename_all = "camelCase")]
    Paused {
        started_at: DateTime<Utc>,
        paused_at: DateTime<Utc>,
        output_size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecording {
    pub id: Uuid,
    pub session_id: String,
    pub server_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub output: String,
    pub command_count: usize,
}

impl SessionRecording {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    /// e.g. `3m 7s`
    pub fn display_duration(&self) -> String {
        let secs = self.duration().num_seconds().max(0);
        format!("{}m {}s", secs / 60, secs % 60)
    }

    pub fn size_bytes(&self) -> usize {
        self.output.len()
    }

    /// Suggested file name for `export_text`
    pub fn export_file_name(&self) -> String {
        format!(
            "session-{}-{}.txt",
            self.server_name,
            self.started_at.format("%Y-%m-%d-%H%M%S")
        )
    }

    /// Plain-text transcript with a header
    pub fn export_text(&self) -> String {
        format!(
            "SSH Terminal Session Recording\n\
             Server: {}\n\
             Start: {}\n\
             End: {}\n\
             Duration: {}\n\
             Commands: {}\n\n\
             ==================== OUTPUT ====================\n\n{}",
            self.server_name,
            self.started_at.to_rfc3339(),
            self.ended_at.to_rfc3339(),
            self.display_duration(),
            self.command_count,
            self.output
        )
    }
}

struct ActiveRecording {
    server_name: String,
    started_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    /// Raw bytes; a UTF-8 sequence may span chunks
    output: Vec<u8>,
    command_count: usize,
}

pub struct SessionRecorder {
    active: Mutex<HashMap<String, ActiveRecording>>,
    recordings: Mutex<Vec<SessionRecording>>,
    /// None for in-memory recorders
    file: Option<JsonFile<Vec<SessionRecording>>>,
}

impl SessionRecorder {
    /// Open at the default location (`~/.sshterm/recordings.json`)
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(JsonFile::new(recordings_file()?))
    }

    pub fn open(file: JsonFile<Vec<SessionRecording>>) -> Result<Self, StorageError> {
        let recordings = file.load()?;
        debug!("Loaded {} session recordings", recordings.len());
        Ok(Self {
            active: Mutex::new(HashMap::new()),
            recordings: Mutex::new(recordings),
            file: Some(file),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            recordings: Mutex::new(Vec::new()),
            file: None,
        }
    }

    /// Begin recording; restarting discards what was captured so far
    pub fn start(&self, session_id: &str, server_name: &str) {
        self.active.lock().insert(
            session_id.to_string(),
            ActiveRecording {
                server_name: server_name.to_string(),
                started_at: Utc::now(),
                paused_at: None,
                output: Vec::new(),
                command_count: 0,
            },
        );
        info!("Recording started for session {}", session_id);
    }

    /// Finish and store the recording, paused or not.
    ///
    /// Returns None if the session was not being recorded. If saving fails
    /// the capture is dropped and the stored list is unchanged.
    pub fn stop(&self, session_id: &str) -> Result<Option<SessionRecording>, StorageError> {
        let Some(active) = self.active.lock().remove(session_id) else {
            return Ok(None);
        };

        let recording = SessionRecording {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            server_name: active.server_name,
            started_at: active.started_at,
            ended_at: Utc::now(),
            output: String::from_utf8_lossy(&active.output).into_owned(),
            command_count: active.command_count,
        };

        let mut recordings = self.recordings.lock();
        let mut next = Vec::with_capacity(recordings.len() + 1);
        next.push(recording.clone());
        next.extend(recordings.iter().cloned());
        self.commit(&mut recordings, next)?;

        info!(
            "Recording stopped for session {} ({} bytes)",
            session_id,
            recording.size_bytes()
        );
        Ok(Some(recording))
    }

    /// Returns false unless the session was recording
    pub fn pause(&self, session_id: &str) -> bool {
        match self.active.lock().get_mut(session_id) {
            Some(active) if active.paused_at.is_none() => {
                active.paused_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Returns false unless the session was paused
    pub fn resume(&self, session_id: &str) -> bool {
        match self.active.lock().get_mut(session_id) {
            Some(active) if active.paused_at.is_some() => {
                active.paused_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_recording(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .get(session_id)
            .is_some_and(|a| a.paused_at.is_none())
    }

    pub fn state(&self, session_id: &str) -> RecordingState {
        match self.active.lock().get(session_id) {
            None => RecordingState::NotRecording,
            Some(active) => match active.paused_at {
                None => RecordingState::Recording {
                    started_at: active.started_at,
                    output_size: active.output.len(),
                },
                Some(paused_at) => RecordingState::Paused {
                    started_at: active.started_at,
                    paused_at,
                    output_size: active.output.len(),
                },
            },
        }
    }

    /// Capture output; ignored unless recording
    pub fn append(&self, session_id: &str, data: &[u8]) {
        if let Some(active) = self.active.lock().get_mut(session_id) {
            if active.paused_at.is_none() {
                active.output.extend_from_slice(data);
            }
        }
    }

    /// Count a command; ignored unless recording
    pub fn increment_command_count(&self, session_id: &str) {
        if let Some(active) = self.active.lock().get_mut(session_id) {
            if active.paused_at.is_none() {
                active.command_count += 1;
            }
        }
    }

    /// Finished recordings, newest first
    pub fn recordings(&self) -> Vec<SessionRecording> {
        self.recordings.lock().clone()
    }

    /// Returns false if no recording has this id
    pub fn delete_recording(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut recordings = self.recordings.lock();
        if !recordings.iter().any(|r| r.id == id) {
            return Ok(false);
        }
        let next = recordings.iter().filter(|r| r.id != id).cloned().collect();
        self.commit(&mut recordings, next)?;
        Ok(true)
    }

    fn commit(
        &self,
        recordings: &mut Vec<SessionRecording>,
        next: Vec<SessionRecording>,
    ) -> Result<(), StorageError> {
        if let Some(file) = &self.file {
            file.save(&next)?;
        }
        *recordings = next;
        Ok(())
    }
}
