//! Session Registry
//!
//! Thread-safe session management using DashMap for concurrent access.
//! Owns every live `SshConnection` and its optional `PtySession`, enforces the
//! connection limit, and tracks which session the UI has in front.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::recording::{RecordingState, SessionRecorder, SessionRecording};
use crate::config::servers::ServerProfile;
use crate::config::settings::SshSettings;
use crate::config::storage::StorageError;
use crate::ssh::{
    ConnectionState, Credentials, HostKeyValidator, PtyError, PtySession, PtyState,
    SshConnection, SshConnector, SshError, DEFAULT_COMMAND_TIMEOUT,
};

/// Default maximum concurrent sessions
const DEFAULT_MAX_SESSIONS: usize = 20;

struct SessionEntry {
    connection: Arc<SshConnection>,
    pty: Option<Arc<PtySession>>,
    order: usize,
    created_at: DateTime<Utc>,
}

/// Snapshot of a session for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: ConnectionState,
    pub pty_state: Option<PtyState>,
    pub recording: RecordingState,
    pub order: usize,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    fn from_entry(id: &str, entry: &SessionEntry, recorder: &SessionRecorder) -> Self {
        let profile = entry.connection.profile();
        Self {
            id: id.to_string(),
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            state: entry.connection.state(),
            pty_state: entry.pty.as_ref().map(|p| p.state()),
            recording: recorder.state(id),
            order: entry.order,
            created_at: entry.created_at,
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    connector: Arc<dyn SshConnector>,
    validator: Arc<HostKeyValidator>,
    /// Counter for display ordering
    order_counter: AtomicUsize,
    max_sessions: AtomicUsize,
    command_timeout: Duration,
    active: parking_lot::Mutex<Option<String>>,
    /// Serializes the limit check with the insert
    create_lock: parking_lot::Mutex<()>,
    recorder: Arc<SessionRecorder>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn SshConnector>, validator: Arc<HostKeyValidator>) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
            validator,
            order_counter: AtomicUsize::new(0),
            max_sessions: AtomicUsize::new(DEFAULT_MAX_SESSIONS),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            active: parking_lot::Mutex::new(None),
            create_lock: parking_lot::Mutex::new(()),
            recorder: Arc::new(SessionRecorder::in_memory()),
        }
    }

    /// Use a persistent recorder instead of the in-memory default
    pub fn with_recorder(mut self, recorder: Arc<SessionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn recorder(&self) -> &Arc<SessionRecorder> {
        &self.recorder
    }

    pub fn from_settings(
        settings: &SshSettings,
        connector: Arc<dyn SshConnector>,
        validator: Arc<HostKeyValidator>,
    ) -> Self {
        let mut registry = Self::new(connector, validator);
        registry.command_timeout = settings.command_timeout();
        registry.set_max_sessions(settings.max_sessions);
        registry
    }

    pub fn validator(&self) -> &Arc<HostKeyValidator> {
        &self.validator
    }

    pub fn set_max_sessions(&self, max: usize) {
        self.max_sessions.store(max, Ordering::SeqCst);
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions.load(Ordering::SeqCst)
    }

    /// Register a session and connect it.
    ///
    /// The session is visible (as connecting) while the handshake runs and
    /// is removed again if it fails or the caller stops waiting. A session
    /// disconnected mid-handshake stays gone. Returns the new session id.
    pub async fn connect(
        &self,
        profile: ServerProfile,
        credentials: Credentials,
    ) -> Result<String, RegistryError> {
        let (session_id, connection) = {
            let _guard = self.create_lock.lock();

            let current = self.sessions.len();
            let max = self.max_sessions();
            if current >= max {
                return Err(RegistryError::ConnectionLimitReached { current, max });
            }

            let session_id = uuid::Uuid::new_v4().to_string();
            let order = self.order_counter.fetch_add(1, Ordering::SeqCst);
            let connection = Arc::new(
                SshConnection::new(session_id.clone(), profile)
                    .with_command_timeout(self.command_timeout),
            );

            info!(
                "Creating session {}: {} (order: {})",
                session_id,
                connection.profile().display_address(),
                order
            );

            self.sessions.insert(
                session_id.clone(),
                SessionEntry {
                    connection: connection.clone(),
                    pty: None,
                    order,
                    created_at: Utc::now(),
                },
            );
            (session_id, connection)
        };

        // Dropping this future mid-handshake must not leave a ghost entry
        let pending = PendingSession {
            registry: self,
            session_id: session_id.clone(),
            armed: true,
        };

        connection
            .connect(&credentials, self.connector.as_ref(), self.validator.clone())
            .await?;
        pending.defuse();

        if !self.sessions.contains_key(&session_id) {
            info!(
                "Session {} was disconnected during the handshake, closing transport",
                session_id
            );
            connection.disconnect().await;
            return Err(RegistryError::SessionNotFound(session_id));
        }

        self.active.lock().get_or_insert_with(|| session_id.clone());
        Ok(session_id)
    }

    /// Start an interactive shell on a connected session
    pub async fn open_pty<F>(
        &self,
        session_id: &str,
        cols: u32,
        rows: u32,
        on_output: F,
    ) -> Result<Arc<PtySession>, RegistryError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let connection = {
            let entry = self.entry(session_id)?;
            if entry.pty.as_ref().is_some_and(|p| p.state() != PtyState::Inactive) {
                return Err(RegistryError::PtyAlreadyOpen(session_id.to_string()));
            }
            entry.connection.clone()
        };

        let pty = Arc::new(connection.open_pty(cols, rows)?);
        let recorder = self.recorder.clone();
        let id = session_id.to_string();
        pty.start(move |data: &[u8]| {
            recorder.append(&id, data);
            on_output(data);
        })
        .await?;

        let attached = match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.pty = Some(pty.clone());
                true
            }
            None => false,
        };
        if !attached {
            // Disconnected while the shell was starting
            pty.close().await;
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        }

        debug!("PTY {}x{} attached to session {}", cols, rows, session_id);
        Ok(pty)
    }

    /// Run a one-shot command on a session
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<String, RegistryError> {
        let connection = self.connection(session_id)?;
        self.recorder.increment_command_count(session_id);
        Ok(connection.execute_command(command).await?)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .get(session_id)
            .map(|entry| SessionInfo::from_entry(session_id, &entry, &self.recorder))
    }

    pub fn connection(&self, session_id: &str) -> Result<Arc<SshConnection>, RegistryError> {
        Ok(self.entry(session_id)?.connection.clone())
    }

    pub fn pty(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(session_id).and_then(|e| e.pty.clone())
    }

    /// All sessions, in creation order
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo::from_entry(entry.key(), entry.value(), &self.recorder))
            .collect();
        sessions.sort_by_key(|s| s.order);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Close the PTY, then the connection, then forget the session
    pub async fn disconnect(&self, session_id: &str) -> Result<(), RegistryError> {
        let (connection, pty) = {
            let entry = self.entry(session_id)?;
            (entry.connection.clone(), entry.pty.clone())
        };

        if let Some(pty) = pty {
            pty.close().await;
        }
        connection.disconnect().await;

        if let Err(e) = self.recorder.stop(session_id) {
            warn!("Failed to save recording of session {}: {}", session_id, e);
        }
        self.sessions.remove(session_id);
        self.reassign_active(session_id);
        info!("Session {} disconnected and removed", session_id);
        Ok(())
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!("Closing {} sessions", ids.len());
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                warn!("Failed to close session {}: {}", id, e);
            }
        }
    }

    /// Bring a session to the front
    pub fn set_active(&self, session_id: &str) -> Result<(), RegistryError> {
        if !self.sessions.contains_key(session_id) {
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        }
        *self.active.lock() = Some(session_id.to_string());
        Ok(())
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.lock().clone()
    }

    /// Start capturing the session's PTY output
    pub fn start_recording(&self, session_id: &str) -> Result<(), RegistryError> {
        let entry = self.entry(session_id)?;
        let server_name = entry.connection.profile().name.clone();
        drop(entry);
        self.recorder.start(session_id, &server_name);
        Ok(())
    }

    pub fn stop_recording(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionRecording>, RegistryError> {
        Ok(self.recorder.stop(session_id)?)
    }

    pub fn pause_recording(&self, session_id: &str) -> bool {
        self.recorder.pause(session_id)
    }

    pub fn resume_recording(&self, session_id: &str) -> bool {
        self.recorder.resume(session_id)
    }

    /// After removing `removed`, fall back to the oldest remaining session
    fn reassign_active(&self, removed: &str) {
        let mut active = self.active.lock();
        if active.as_deref() != Some(removed) {
            return;
        }
        *active = self
            .sessions
            .iter()
            .min_by_key(|e| e.order)
            .map(|e| e.key().clone());
    }

    fn entry(
        &self,
        session_id: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, SessionEntry>, RegistryError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))
    }
}

/// Forgets a session created by `connect` unless the handshake completed
struct PendingSession<'a> {
    registry: &'a SessionRegistry,
    session_id: String,
    armed: bool,
}

impl PendingSession<'_> {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSession<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.registry.sessions.remove(&self.session_id).is_some() {
            self.registry.reassign_active(&self.session_id);
            debug!("Removed unfinished session {}", self.session_id);
        }
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection limit reached: {current}/{max} sessions active")]
    ConnectionLimitReached { current: usize, max: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} already has an open PTY")]
    PtyAlreadyOpen(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
