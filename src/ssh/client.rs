//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::auth::{decode_private_key, Credentials};
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::host_key::HostKeyValidator;
use super::known_hosts::fingerprint;
use super::transport::{SshConnector, SshTransport};
use crate::config::servers::ServerProfile;
use crate::config::settings::SshSettings;

/// Client handler for russh callbacks
///
/// Routes the server's host key through the injected validator before the
/// handshake is allowed to finish.
pub struct ClientHandler {
    host: String,
    port: u16,
    validator: Arc<HostKeyValidator>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, validator: Arc<HostKeyValidator>) -> Self {
        Self {
            host,
            port,
            validator,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp = fingerprint(server_public_key);
        debug!("Server {}:{} offered host key {}", self.host, self.port, fp);
        self.validator.verify(&self.host, self.port, &fp).await?;
        Ok(true)
    }
}

/// Secret material ready to hand to russh
enum PreparedAuth<'a> {
    Password(&'a str),
    Key(PrivateKeyWithHashAlg),
}

impl<'a> PreparedAuth<'a> {
    /// Decrypt keys before any network I/O so a bad passphrase never
    /// reaches the server
    fn prepare(credentials: &'a Credentials) -> Result<Self, SshError> {
        match credentials {
            Credentials::Password(password) => Ok(PreparedAuth::Password(password.as_str())),
            Credentials::PrivateKey { pem, passphrase } => {
                let key = decode_private_key(pem, passphrase.as_ref().map(|p| p.as_str()))?;
                Ok(PreparedAuth::Key(PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    None,
                )))
            }
        }
    }
}

/// Production connector over russh
pub struct RusshConnector {
    connect_timeout: Duration,
    keepalive_interval: Duration,
}

impl RusshConnector {
    pub fn new(settings: &SshSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            keepalive_interval: Duration::from_secs(settings.keepalive_interval_secs),
        }
    }

    fn client_config(&self) -> client::Config {
        client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive_interval),
            // Disconnect after 3 missed keepalives
            keepalive_max: 3,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(
        &self,
        session_id: &str,
        profile: &ServerProfile,
        credentials: &Credentials,
        validator: Arc<HostKeyValidator>,
    ) -> Result<Arc<dyn SshTransport>, SshError> {
        let auth = PreparedAuth::prepare(credentials)?;
        let addr = format!("{}:{}", profile.host, profile.port);

        info!("Connecting to SSH server at {}", addr);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
            .map_err(|e| SshError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let handler = ClientHandler::new(profile.host.clone(), profile.port, validator);

        // No outer timeout: the handshake may be parked on a host key approval,
        // which carries its own deadline.
        let mut handle = client::connect_stream(Arc::new(self.client_config()), stream, handler)
            .await
            .map_err(|e| match e {
                e @ (SshError::HostKeyMismatch { .. }
                | SshError::HostKeyRejected(_)
                | SshError::Disconnected) => e,
                other => SshError::ConnectionFailed(other.to_string()),
            })?;

        debug!("SSH handshake completed for {}", addr);

        let result = match auth {
            PreparedAuth::Password(password) => {
                handle
                    .authenticate_password(&profile.username, password)
                    .await
            }
            PreparedAuth::Key(key) => {
                handle
                    .authenticate_publickey(&profile.username, key)
                    .await
            }
        };

        let authenticated = match result {
            Ok(r) => r.success(),
            Err(e) => {
                warn!("Authentication error for {}: {}", addr, e);
                false
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(SshError::AuthenticationFailed(format!(
                "Authentication rejected by {}",
                addr
            )));
        }

        info!("SSH authentication successful for {}@{}", profile.username, addr);

        Ok(Arc::new(spawn_handle_owner_task(
            handle,
            session_id.to_string(),
        )))
    }
}
