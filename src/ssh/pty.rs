//! Interactive PTY session
//!
//! One shell channel over an established connection. After `start`, a single
//! relay task owns the channel and multiplexes:
//!
//! - cancellation from `close()`
//! - input bytes from `write()` (bounded mpsc, so writers are backpressured)
//! - terminal size from `resize()` (watch channel, only the latest size is sent)
//! - inbound data, forwarded to the output sink byte-exact and in order
//!
//! `close()` cancels the relay and waits for it, so the sink is never called
//! after `close()` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelEvent, SessionChannel};
use super::error::SshError;
use super::transport::SshTransport;

pub const TERM: &str = "xterm-256color";

/// Queued input chunks before `write` starts waiting
const INPUT_QUEUE: usize = 256;

const CHANNEL_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const RELAY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Output sink, called from the relay task for every inbound chunk
pub type OutputSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyState {
    Created,
    Active,
    /// Terminal: closed, or the remote stream ended
    Inactive,
}

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY session is not active")]
    NotActive,

    #[error("PTY session already started")]
    AlreadyStarted,

    #[error("Failed to open PTY channel: {0}")]
    ChannelCreationFailed(String),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

pub struct PtySession {
    session_id: String,
    transport: Arc<dyn SshTransport>,
    size: watch::Sender<(u32, u32)>,
    state: Arc<watch::Sender<PtyState>>,
    started: AtomicBool,
    input_tx: parking_lot::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    cancel: CancellationToken,
    relay: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PtySession {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn SshTransport>,
        cols: u32,
        rows: u32,
    ) -> Self {
        let (size, _) = watch::channel((cols, rows));
        let (state, _) = watch::channel(PtyState::Created);
        Self {
            session_id: session_id.into(),
            transport,
            size,
            state: Arc::new(state),
            started: AtomicBool::new(false),
            input_tx: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
            relay: tokio::sync::Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> PtyState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PtyState::Active
    }

    /// Watch state transitions, including the relay ending on EOF
    pub fn subscribe_state(&self) -> watch::Receiver<PtyState> {
        self.state.subscribe()
    }

    /// Current (cols, rows)
    pub fn dimensions(&self) -> (u32, u32) {
        *self.size.borrow()
    }

    /// Open the channel, request a PTY and a shell, then start relaying
    /// output to `on_output`.
    pub async fn start<F>(&self, on_output: F) -> Result<(), PtyError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PtyError::AlreadyStarted);
        }
        if self.state() != PtyState::Created {
            return Err(PtyError::NotActive);
        }

        let mut channel = self
            .transport
            .open_session_channel()
            .await
            .map_err(|e| PtyError::ChannelCreationFailed(e.to_string()))?;

        let (cols, rows) = self.dimensions();
        debug!("Channel opened for {}, requesting PTY {}x{}", self.session_id, cols, rows);

        if let Err(e) = Self::request_shell(channel.as_mut(), cols, rows).await {
            let _ = channel.close().await;
            self.state.send_replace(PtyState::Inactive);
            return Err(e.into());
        }

        let mut relay_slot = self.relay.lock().await;
        // close() ran while the shell was being set up
        if self.cancel.is_cancelled() {
            let _ = channel.close().await;
            return Err(PtyError::NotActive);
        }

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        *self.input_tx.lock() = Some(input_tx);

        let relay = Relay {
            session_id: self.session_id.clone(),
            channel,
            input_rx,
            size_rx: self.size.subscribe(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            sink: Arc::new(on_output),
        };
        self.state.send_replace(PtyState::Active);
        *relay_slot = Some(tokio::spawn(relay.run()));

        info!("Interactive shell started for session {}", self.session_id);
        Ok(())
    }

    async fn request_shell(
        channel: &mut dyn SessionChannel,
        cols: u32,
        rows: u32,
    ) -> Result<(), SshError> {
        channel.request_pty(TERM, cols, rows).await?;
        channel.request_shell().await
    }

    /// Send bytes to the remote shell, in call order
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_active() {
            return Err(PtyError::NotActive);
        }
        let tx = self.input_tx.lock().clone().ok_or(PtyError::NotActive)?;
        tx.send(data.to_vec())
            .await
            .map_err(|_| PtyError::NotActive)
    }

    /// Record a new terminal size; no-op unless active.
    ///
    /// Never blocks. Rapid calls collapse into the latest size.
    pub fn resize(&self, cols: u32, rows: u32) -> Result<(), PtyError> {
        if !self.is_active() {
            return Ok(());
        }
        self.size.send_replace((cols, rows));
        Ok(())
    }

    /// Stop the relay and release the channel. Idempotent.
    pub async fn close(&self) {
        let mut relay_slot = self.relay.lock().await;

        self.cancel.cancel();
        self.state.send_replace(PtyState::Inactive);
        self.input_tx.lock().take();

        if let Some(mut relay) = relay_slot.take() {
            if tokio::time::timeout(RELAY_SHUTDOWN_TIMEOUT, &mut relay)
                .await
                .is_err()
            {
                warn!(
                    "PTY relay for session {} did not stop in {:?}, aborting",
                    self.session_id, RELAY_SHUTDOWN_TIMEOUT
                );
                relay.abort();
                let _ = relay.await;
            }
            info!("PTY session {} closed", self.session_id);
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Relay {
    session_id: String,
    channel: Box<dyn SessionChannel>,
    input_rx: mpsc::Receiver<Vec<u8>>,
    size_rx: watch::Receiver<(u32, u32)>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PtyState>>,
    sink: OutputSink,
}

impl Relay {
    async fn run(mut self) {
        let sid = self.session_id.clone();
        debug!("PTY relay started for session {}", sid);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("PTY relay cancelled for session {}", sid);
                    break;
                }

                input = self.input_rx.recv() => match input {
                    Some(data) => {
                        if let Err(e) = self.channel.send(&data).await {
                            warn!("Failed to write to PTY for session {}: {}", sid, e);
                            break;
                        }
                    }
                    None => break,
                },

                changed = self.size_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let (cols, rows) = *self.size_rx.borrow_and_update();
                    if let Err(e) = self.channel.window_change(cols, rows).await {
                        // Keep the session alive on resize errors
                        warn!("Failed to resize PTY for session {}: {}", sid, e);
                    } else {
                        debug!("PTY resized to {}x{} for session {}", cols, rows, sid);
                    }
                }

                event = self.channel.next_event() => match event {
                    Some(ChannelEvent::Data(data))
                    | Some(ChannelEvent::ExtendedData { data, .. }) => {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        (self.sink)(&data);
                    }
                    Some(ChannelEvent::ExitStatus(code)) => {
                        info!("Shell exited with status {} for session {}", code, sid);
                    }
                    Some(ChannelEvent::Eof) | Some(ChannelEvent::Close) | None => {
                        info!("PTY stream ended for session {}", sid);
                        break;
                    }
                },
            }
        }

        self.state.send_replace(PtyState::Inactive);

        match tokio::time::timeout(CHANNEL_CLOSE_TIMEOUT, self.channel.close()).await {
            Ok(Err(e)) => debug!("Channel close for session {} reported: {}", sid, e),
            Err(_) => debug!("Channel close for session {} timed out", sid),
            Ok(Ok(())) => {}
        }
        debug!("PTY relay terminated for session {}", sid);
    }
}
