//! SSH module - connections, PTY sessions and host key trust
//!
//! Built on the russh library.
//!
//! # Features
//! - Password and private key authentication
//! - Trust On First Use host key pinning with operator approval
//! - Single-owner russh handle driven through `HandleController`
//! - Interactive PTY with bounded input, coalesced resize and a cancellable relay
//! - One-shot command execution

mod auth;
mod channel;
mod client;
pub mod connection;
mod error;
mod handle_owner;
pub mod host_key;
pub mod known_hosts;
pub mod pty;
mod transport;

#[cfg(test)]
mod test_server;
#[cfg(test)]
pub(crate) mod testing;

pub use auth::{decode_private_key, Credentials};
pub use channel::{ChannelEvent, RusshChannel, SessionChannel};
pub use client::{ClientHandler, RusshConnector};
pub use connection::{ConnectionState, SshConnection, DEFAULT_COMMAND_TIMEOUT};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use host_key::{HostKeyStatus, HostKeyValidator, PendingHostKeyApproval};
pub use known_hosts::{fingerprint, fingerprint_bytes, HostKeyStore};
pub use pty::{OutputSink, PtyError, PtySession, PtyState, TERM};
pub use transport::{SshConnector, SshTransport};
