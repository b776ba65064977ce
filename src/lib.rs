//! SSHTerminal core - SSH sessions, PTY streaming, host key trust and AI assistance
//!
//! Built on russh and tokio. The UI layer drives everything through
//! `SessionRegistry`, `HostKeyValidator` and the `ai` module.

pub mod ai;
pub mod config;
pub mod session;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
