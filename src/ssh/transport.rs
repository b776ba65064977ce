//! Transport capability traits
//!
//! `SshConnector` establishes an authenticated transport; `SshTransport` is
//! what an established connection can do. The russh implementation lives in
//! `client` / `handle_owner`; tests substitute scripted fakes.

use std::sync::Arc;

use async_trait::async_trait;

use super::auth::Credentials;
use super::channel::SessionChannel;
use super::error::SshError;
use super::host_key::HostKeyValidator;
use crate::config::servers::ServerProfile;

#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Open a new session channel (shell, PTY or exec)
    async fn open_session_channel(&self) -> Result<Box<dyn SessionChannel>, SshError>;

    /// Close the transport. Never fails; errors are logged.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Connect, validate the host key through `validator` before
    /// authenticating, then authenticate with `credentials`.
    ///
    /// A rejected host key or failed authentication must not leave a live
    /// transport behind.
    async fn connect(
        &self,
        session_id: &str,
        profile: &ServerProfile,
        credentials: &Credentials,
        validator: Arc<HostKeyValidator>,
    ) -> Result<Arc<dyn SshTransport>, SshError>;
}
