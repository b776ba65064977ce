//! Session channel capability
//!
//! `SessionChannel` is what PTY and command execution need from one SSH
//! channel. The channel is owned by exactly one task at a time (the PTY relay
//! or the command collector), so every method takes `&mut self`.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::trace;

use super::error::SshError;

/// Inbound event from the remote side of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// stdout bytes
    Data(Vec<u8>),
    /// Extended stream bytes (ext 1 is stderr)
    ExtendedData { data: Vec<u8>, ext: u32 },
    ExitStatus(u32),
    Eof,
    Close,
}

#[async_trait]
pub trait SessionChannel: Send {
    async fn request_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<(), SshError>;

    async fn request_shell(&mut self) -> Result<(), SshError>;

    async fn exec(&mut self, command: &str) -> Result<(), SshError>;

    /// Send bytes to the remote stdin
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError>;

    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError>;

    /// Next inbound event; `None` once the channel is gone
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Send EOF and close the channel
    async fn close(&mut self) -> Result<(), SshError>;
}

/// russh-backed session channel
pub struct RusshChannel {
    inner: Channel<Msg>,
}

impl RusshChannel {
    pub fn new(inner: Channel<Msg>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionChannel for RusshChannel {
    async fn request_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<(), SshError> {
        self.inner
            .request_pty(false, term, cols, rows, 0, 0, &[])
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))
    }

    async fn request_shell(&mut self) -> Result<(), SshError> {
        self.inner
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))
    }

    async fn exec(&mut self, command: &str) -> Result<(), SshError> {
        self.inner
            .exec(true, command)
            .await
            .map_err(|e| SshError::CommandFailed(format!("exec request failed: {}", e)))
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.inner
            .data(data)
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to send data: {}", e)))
    }

    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.inner
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| SshError::ChannelError(format!("window_change failed: {}", e)))
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.inner.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Data(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } => ChannelEvent::ExtendedData {
                    data: data.to_vec(),
                    ext,
                },
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Close,
                other => {
                    // Window adjustments, signals, request replies
                    trace!("Ignoring channel message: {:?}", other);
                    continue;
                }
            };
            return Some(event);
        }
    }

    async fn close(&mut self) -> Result<(), SshError> {
        let _ = self.inner.eof().await;
        self.inner
            .close()
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to close channel: {}", e)))
    }
}
