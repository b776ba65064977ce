//! One authenticated SSH connection
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                      \-> Failed(reason)
//! ```
//!
//! A connection that reports the transport gone moves to `Disconnected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::auth::Credentials;
use super::channel::ChannelEvent;
use super::error::SshError;
use super::host_key::HostKeyValidator;
use super::pty::PtySession;
use super::transport::{SshConnector, SshTransport};
use crate::config::servers::ServerProfile;

/// Default bound for `execute_command`
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

pub struct SshConnection {
    session_id: String,
    profile: ServerProfile,
    state: watch::Sender<ConnectionState>,
    transport: Mutex<Option<Arc<dyn SshTransport>>>,
    /// Set once the server accepted our credentials, cleared on teardown
    authenticated: AtomicBool,
    command_timeout: Duration,
}

impl SshConnection {
    pub fn new(session_id: impl Into<String>, profile: ServerProfile) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            session_id: session_id.into(),
            profile,
            state,
            transport: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    /// Current state; a transport that went away is reported as `Disconnected`
    pub fn state(&self) -> ConnectionState {
        let lost = {
            let transport = self.transport.lock();
            *self.state.borrow() == ConnectionState::Connected
                && !transport.as_ref().is_some_and(|t| t.is_connected())
        };
        if lost {
            self.mark_disconnected("transport closed");
        }
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True from a successful login until the transport is closed or lost
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Establish and authenticate the transport.
    ///
    /// The host key goes through `validator` before authentication.
    pub async fn connect(
        &self,
        credentials: &Credentials,
        connector: &dyn SshConnector,
        validator: Arc<HostKeyValidator>,
    ) -> Result<(), SshError> {
        let claimed = self.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            _ => {
                *state = ConnectionState::Connecting;
                true
            }
        });
        if !claimed {
            return Err(SshError::ConnectionFailed(format!(
                "Session {} is already connecting or connected",
                self.session_id
            )));
        }

        info!(
            "Connecting session {} to {}",
            self.session_id,
            self.profile.display_address()
        );

        match connector
            .connect(&self.session_id, &self.profile, credentials, validator)
            .await
        {
            Ok(transport) => {
                *self.transport.lock() = Some(transport);
                self.authenticated.store(true, Ordering::SeqCst);
                self.state.send_replace(ConnectionState::Connected);
                info!("Session {} connected", self.session_id);
                Ok(())
            }
            Err(e) => {
                warn!("Session {} failed to connect: {}", self.session_id, e);
                self.state.send_replace(ConnectionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Transport of a connected session, else `Disconnected`
    pub fn transport(&self) -> Result<Arc<dyn SshTransport>, SshError> {
        if !self.is_connected() {
            return Err(SshError::Disconnected);
        }
        self.transport.lock().clone().ok_or(SshError::Disconnected)
    }

    /// Run a command on a one-shot channel and return stdout and stderr
    /// combined, in the order the server sent them.
    pub async fn execute_command(&self, command: &str) -> Result<String, SshError> {
        let transport = self.transport()?;
        debug!("Executing command on session {}", self.session_id);

        let run = async {
            let mut channel = transport.open_session_channel().await?;
            channel.exec(command).await?;

            let mut output = Vec::new();
            while let Some(event) = channel.next_event().await {
                match event {
                    ChannelEvent::Data(data) | ChannelEvent::ExtendedData { data, .. } => {
                        output.extend_from_slice(&data)
                    }
                    ChannelEvent::ExitStatus(code) => {
                        debug!("Command exited with status {} on {}", code, self.session_id)
                    }
                    ChannelEvent::Eof | ChannelEvent::Close => break,
                }
            }

            let _ = channel.close().await;
            Ok::<_, SshError>(String::from_utf8_lossy(&output).into_owned())
        };

        match tokio::time::timeout(self.command_timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(SshError::Disconnected)) => {
                self.mark_disconnected("transport closed during command");
                Err(SshError::Disconnected)
            }
            Ok(Err(_)) if !transport.is_connected() => {
                self.mark_disconnected("transport closed during command");
                Err(SshError::Disconnected)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SshError::Timeout(format!(
                "Command did not finish within {}s",
                self.command_timeout.as_secs()
            ))),
        }
    }

    /// Create an interactive PTY bound to this connection (not yet started)
    pub fn open_pty(&self, cols: u32, rows: u32) -> Result<PtySession, SshError> {
        let transport = self.transport()?;
        Ok(PtySession::new(self.session_id.clone(), transport, cols, rows))
    }

    /// Close the transport. Always succeeds and is safe to repeat.
    pub async fn disconnect(&self) {
        let transport = self.transport.lock().take();
        self.authenticated.store(false, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);

        if let Some(transport) = transport {
            transport.disconnect().await;
            info!("Session {} disconnected", self.session_id);
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        self.authenticated.store(false, Ordering::SeqCst);
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Session {} disconnected: {}", self.session_id, reason);
        }
    }
}
