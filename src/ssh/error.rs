//! SSH Error types

use thiserror::Error;

/// Shortened fingerprint for operator-facing messages
fn prefix(fingerprint: &str) -> &str {
    fingerprint.get(..16).unwrap_or(fingerprint)
}

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Stored and offered host keys differ. Never auto-resolved.
    #[error(
        "Host key mismatch: stored {}..., received {}...",
        prefix(stored),
        prefix(received)
    )]
    HostKeyMismatch { stored: String, received: String },

    #[error("Host key rejected for {0}")]
    HostKeyRejected(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Private key could not be decrypted (missing or wrong passphrase)
    #[error("Failed to decrypt private key: {0}")]
    KeyDecryptFailed(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    /// Host key failures terminate the attempt and must reach a human
    pub fn is_host_key_error(&self) -> bool {
        matches!(
            self,
            SshError::HostKeyMismatch { .. } | SshError::HostKeyRejected(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::SendError | russh::Error::HUP => {
                SshError::Disconnected
            }
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}
