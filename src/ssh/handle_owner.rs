//! Handle Owner Task
//!
//! Only one task owns the russh `Handle<ClientHandler>`. Everything else talks
//! to it through a cloneable `HandleController`, which sends commands over an
//! mpsc channel and receives replies on oneshots. This keeps the handle out of
//! `Arc<Mutex<_>>` and never holds a lock across `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::channel::{RusshChannel, SessionChannel};
use super::client::ClientHandler;
use super::error::SshError;
use super::transport::SshTransport;

/// How long `disconnect` waits for the owner task to wind down
const DISCONNECT_WAIT: Duration = Duration::from_secs(5);

/// How often the owner task checks whether russh has closed the session
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (PTY, shell or exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Clones share the same connection; any holder can open channels or
/// disconnect it.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Cleared by the owner task as soon as it stops serving commands
    alive: Arc<AtomicBool>,
}

impl HandleController {
    /// Create a controller over an arbitrary command receiver (tests)
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self {
            cmd_tx,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open a raw russh session channel
    pub async fn open_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| match e {
                russh::Error::Disconnect | russh::Error::SendError | russh::Error::HUP => {
                    SshError::Disconnected
                }
                other => SshError::ChannelError(other.to_string()),
            })
    }

    /// Ask the owner task to disconnect and wait (bounded) for it to exit
    pub async fn shutdown(&self) {
        if self.cmd_tx.send(HandleCommand::Disconnect).await.is_err() {
            return;
        }
        if tokio::time::timeout(DISCONNECT_WAIT, self.cmd_tx.closed())
            .await
            .is_err()
        {
            warn!("Handle owner task did not stop within {:?}", DISCONNECT_WAIT);
        }
    }

    /// Check if the Handle Owner Task is still serving commands
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl SshTransport for HandleController {
    async fn open_session_channel(&self) -> Result<Box<dyn SessionChannel>, SshError> {
        let channel = self.open_channel().await?;
        Ok(Box::new(RusshChannel::new(channel)))
    }

    async fn disconnect(&self) {
        self.shutdown().await;
    }

    fn is_connected(&self) -> bool {
        self.is_alive()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the Handle and returns a controller for sending commands. The
/// task exits on an explicit disconnect, when every controller is dropped,
/// or when russh closes the session underneath it (remote hangup, missed
/// keepalives).
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let controller = HandleController::new(cmd_tx);
    let alive = controller.alive.clone();

    tokio::spawn(async move {
        let handle = handle;
        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Handle owner task started for session {}", session_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        let lost = result.is_err() && handle.is_closed();
                        let result = if lost {
                            Err(russh::Error::Disconnect)
                        } else {
                            result
                        };
                        if reply_tx.send(result).is_err() {
                            // Channel is dropped here and the server closes it
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                        if lost {
                            warn!("SSH session {} closed while opening a channel", session_id);
                            break;
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for session {}", session_id);
                        break;
                    }
                    None => {
                        debug!("All controllers dropped for session {}", session_id);
                        break;
                    }
                },

                _ = health.tick() => {
                    if handle.is_closed() {
                        warn!("SSH session {} closed by the remote side", session_id);
                        break;
                    }
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        drain_pending_commands(&mut cmd_rx);

        if !handle.is_closed() {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
                .await
            {
                debug!("Disconnect for session {} reported: {}", session_id, e);
            }
        }
        info!("Handle owner task terminated for session {}", session_id);
    });

    controller
}

/// Close the queue and answer every command still in it with a disconnect
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_owner_reports_disconnected() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        assert!(controller.is_connected());

        drop(cmd_rx);
        assert!(!controller.is_connected());
        assert!(matches!(
            controller.open_channel().await,
            Err(SshError::Disconnected)
        ));
        // Must return promptly even with no owner
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleared_alive_flag_reports_disconnected() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        let clone = controller.clone();

        controller.alive.store(false, Ordering::SeqCst);
        assert!(!clone.is_connected());
    }

    #[tokio::test]
    async fn test_send_error_maps_to_disconnected() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let HandleCommand::ChannelOpenSession { reply_tx } = cmd {
                    let _ = reply_tx.send(Err(russh::Error::SendError));
                }
            }
        });

        assert!(matches!(
            controller.open_channel().await,
            Err(SshError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_drain_answers_pending_commands() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .unwrap();
        cmd_tx.send(HandleCommand::Disconnect).await.unwrap();

        drain_pending_commands(&mut cmd_rx);

        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(russh::Error::Disconnect)
        ));
        assert!(cmd_tx.is_closed());
    }
}
