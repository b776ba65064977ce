//! Scripted SSH fakes for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::auth::Credentials;
use super::channel::{ChannelEvent, SessionChannel};
use super::error::SshError;
use super::host_key::HostKeyValidator;
use super::known_hosts::fingerprint_bytes;
use super::transport::{SshConnector, SshTransport};
use crate::config::servers::ServerProfile;

pub const FAKE_PASSWORD: &str = "correct";
pub const FAKE_KEY_PEM: &str = "fake-private-key";
pub const FAKE_HOST_KEY: &[u8] = b"ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIfake";

/// Operation recorded by a fake channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    RequestPty { term: String, cols: u32, rows: u32 },
    Shell,
    Exec(String),
    Send(Vec<u8>),
    WindowChange { cols: u32, rows: u32 },
    Close,
}

type Scripts = Arc<HashMap<String, Vec<ChannelEvent>>>;

/// Test-side view of a fake channel
#[derive(Clone)]
pub struct FakeChannelHandle {
    events: mpsc::UnboundedSender<ChannelEvent>,
    ops: Arc<Mutex<Vec<ChannelOp>>>,
}

impl FakeChannelHandle {
    /// Deliver an event as if the remote side sent it
    pub fn push(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub fn ops(&self) -> Vec<ChannelOp> {
        self.ops.lock().clone()
    }

    pub async fn wait_for_op(&self, pred: impl Fn(&ChannelOp) -> bool) {
        let wait = async {
            while !self.ops.lock().iter().any(&pred) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("channel op never recorded");
    }
}

pub struct FakeChannel {
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    ops: Arc<Mutex<Vec<ChannelOp>>>,
    scripts: Scripts,
}

impl FakeChannel {
    fn new(scripts: Scripts) -> (Self, FakeChannelHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ops = Arc::new(Mutex::new(Vec::new()));
        let handle = FakeChannelHandle {
            events: events_tx.clone(),
            ops: ops.clone(),
        };
        (
            Self {
                events_rx,
                events_tx,
                ops,
                scripts,
            },
            handle,
        )
    }

    fn record(&self, op: ChannelOp) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl SessionChannel for FakeChannel {
    async fn request_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<(), SshError> {
        self.record(ChannelOp::RequestPty {
            term: term.to_string(),
            cols,
            rows,
        });
        Ok(())
    }

    async fn request_shell(&mut self) -> Result<(), SshError> {
        self.record(ChannelOp::Shell);
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<(), SshError> {
        self.record(ChannelOp::Exec(command.to_string()));
        let events = self.scripts.get(command).cloned().unwrap_or_else(|| {
            vec![
                ChannelEvent::ExtendedData {
                    data: format!("sh: {}: command not found\n", command).into_bytes(),
                    ext: 1,
                },
                ChannelEvent::ExitStatus(127),
                ChannelEvent::Eof,
            ]
        });
        for event in events {
            let _ = self.events_tx.send(event);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.record(ChannelOp::Send(data.to_vec()));
        Ok(())
    }

    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.record(ChannelOp::WindowChange { cols, rows });
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events_rx.recv().await
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.record(ChannelOp::Close);
        Ok(())
    }
}

pub struct FakeTransport {
    connected: AtomicBool,
    channels: Mutex<Vec<FakeChannelHandle>>,
    scripts: Scripts,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_scripts(HashMap::new())
    }

    /// Commands mapped to the events their exec channel produces
    pub fn with_scripts(scripts: HashMap<String, Vec<ChannelEvent>>) -> Self {
        Self {
            connected: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
            scripts: Arc::new(scripts),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// The n-th channel opened on this transport
    pub fn channel(&self, index: usize) -> FakeChannelHandle {
        self.channels.lock()[index].clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Simulate the remote dropping the connection
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshTransport for FakeTransport {
    async fn open_session_channel(&self) -> Result<Box<dyn SessionChannel>, SshError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SshError::Disconnected);
        }
        let (channel, handle) = FakeChannel::new(self.scripts.clone());
        self.channels.lock().push(handle);
        Ok(Box::new(channel))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Scripts every fake server knows
pub fn default_scripts() -> HashMap<String, Vec<ChannelEvent>> {
    let mut scripts = HashMap::new();
    scripts.insert(
        "echo hi".to_string(),
        vec![
            ChannelEvent::Data(b"hi\n".to_vec()),
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Eof,
            ChannelEvent::Close,
        ],
    );
    scripts.insert(
        "mixed".to_string(),
        vec![
            ChannelEvent::Data(b"out1 ".to_vec()),
            ChannelEvent::ExtendedData {
                data: b"err ".to_vec(),
                ext: 1,
            },
            ChannelEvent::Data(b"out2".to_vec()),
            ChannelEvent::Eof,
        ],
    );
    // Never completes
    scripts.insert("sleep 1000".to_string(), Vec::new());
    scripts
}

/// Connector that accepts `FAKE_PASSWORD` or `FAKE_KEY_PEM` and offers
/// `host_key` for validation
pub struct FakeConnector {
    host_key: Mutex<Vec<u8>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            host_key: Mutex::new(FAKE_HOST_KEY.to_vec()),
            transports: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Offer a different host key from now on
    pub fn set_host_key(&self, key: &[u8]) {
        *self.host_key.lock() = key.to_vec();
    }

    pub fn host_fingerprint(&self) -> String {
        fingerprint_bytes(&self.host_key.lock())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.transports.lock()[index].clone()
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(
        &self,
        _session_id: &str,
        profile: &ServerProfile,
        credentials: &Credentials,
        validator: Arc<HostKeyValidator>,
    ) -> Result<Arc<dyn SshTransport>, SshError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let fp = self.host_fingerprint();
        validator.verify(&profile.host, profile.port, &fp).await?;

        let accepted = match credentials {
            Credentials::Password(p) => p.as_str() == FAKE_PASSWORD,
            Credentials::PrivateKey { pem, .. } => pem.as_str() == FAKE_KEY_PEM,
        };
        if !accepted {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        let transport = Arc::new(FakeTransport::with_scripts(default_scripts()));
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}
