//! Host key validation (Trust On First Use)
//!
//! Every host key offered during a handshake is routed through
//! [`HostKeyValidator::verify`]:
//!
//! - stored fingerprint equals the offered one: accept
//! - stored fingerprint differs: reject with `HostKeyMismatch`, always
//! - nothing stored: pin automatically when `trust_on_first_use` is set,
//!   otherwise publish a [`PendingHostKeyApproval`] and suspend the handshake
//!   until [`HostKeyValidator::resolve`] is called for it
//!
//! Unanswered approvals count as denied after `approval_timeout`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::SshError;
use super::known_hosts::HostKeyStore;
use crate::config::settings::SshSettings;

/// Default time a human has to answer an unknown-key prompt
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Classification of an offered host key against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// Host never seen before
    FirstUse,
    /// Stored fingerprint equals the offered one
    Match,
    /// Stored fingerprint differs (potential MITM)
    Mismatch { stored: String },
}

/// An unknown host key waiting for an operator decision
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingHostKeyApproval {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub fingerprint: String,
    pub existing_fingerprint: Option<String>,
}

struct PendingEntry {
    approval: PendingHostKeyApproval,
    resolver: oneshot::Sender<bool>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingEntry>>>;

/// Removes a pending approval when the waiting handshake goes away,
/// whether it was resolved, timed out or cancelled.
struct PendingGuard {
    id: Uuid,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

pub struct HostKeyValidator {
    store: Arc<HostKeyStore>,
    trust_on_first_use: bool,
    approval_timeout: Duration,
    pending: PendingMap,
    events: broadcast::Sender<PendingHostKeyApproval>,
}

impl HostKeyValidator {
    pub fn new(store: Arc<HostKeyStore>, trust_on_first_use: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            trust_on_first_use,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn from_settings(store: Arc<HostKeyStore>, settings: &SshSettings) -> Self {
        Self::new(store, settings.trust_on_first_use)
            .with_approval_timeout(settings.approval_timeout())
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<HostKeyStore> {
        &self.store
    }

    pub fn trust_on_first_use(&self) -> bool {
        self.trust_on_first_use
    }

    /// Classify an offered fingerprint without side effects
    pub fn classify(&self, host: &str, port: u16, fingerprint: &str) -> HostKeyStatus {
        match self.store.get(host, port) {
            None => HostKeyStatus::FirstUse,
            Some(stored) if stored == fingerprint => HostKeyStatus::Match,
            Some(stored) => HostKeyStatus::Mismatch { stored },
        }
    }

    /// Decide whether the handshake may continue.
    ///
    /// Returns the classification of an accepted key (`FirstUse` or `Match`).
    /// Fails with `HostKeyMismatch` or `HostKeyRejected`, which must abort
    /// the connection attempt.
    pub async fn verify(
        &self,
        host: &str,
        port: u16,
        fingerprint: &str,
    ) -> Result<HostKeyStatus, SshError> {
        match self.classify(host, port, fingerprint) {
            HostKeyStatus::Match => {
                info!("Host key verified for {}:{}", host, port);
                Ok(HostKeyStatus::Match)
            }
            HostKeyStatus::Mismatch { stored } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Rejecting connection (possible MITM)",
                    host, port
                );
                Err(SshError::HostKeyMismatch {
                    stored,
                    received: fingerprint.to_string(),
                })
            }
            HostKeyStatus::FirstUse => {
                if self.trust_on_first_use {
                    info!(
                        "TOFU: trusting new host key for {}:{} ({})",
                        host, port, fingerprint
                    );
                } else if !self.request_approval(host, port, fingerprint).await {
                    info!("Host key for {}:{} was not approved", host, port);
                    return Err(SshError::HostKeyRejected(format!("{}:{}", host, port)));
                }
                self.pin(host, port, fingerprint)?;
                Ok(HostKeyStatus::FirstUse)
            }
        }
    }

    /// Store a first-use key; a key pinned concurrently by another attempt wins
    fn pin(&self, host: &str, port: u16, fingerprint: &str) -> Result<(), SshError> {
        let existing = self
            .store
            .put_if_absent(host, port, fingerprint)
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to save host key: {}", e)))?;

        match existing {
            None => Ok(()),
            Some(stored) if stored == fingerprint => Ok(()),
            Some(stored) => {
                warn!(
                    "Host key for {}:{} was pinned to a different key while awaiting approval",
                    host, port
                );
                Err(SshError::HostKeyMismatch {
                    stored,
                    received: fingerprint.to_string(),
                })
            }
        }
    }

    async fn request_approval(&self, host: &str, port: u16, fingerprint: &str) -> bool {
        let approval = PendingHostKeyApproval {
            id: Uuid::new_v4(),
            host: host.to_string(),
            port,
            fingerprint: fingerprint.to_string(),
            existing_fingerprint: None,
        };
        let (resolver, decision) = oneshot::channel();

        self.pending.lock().insert(
            approval.id,
            PendingEntry {
                approval: approval.clone(),
                resolver,
            },
        );
        let _guard = PendingGuard {
            id: approval.id,
            pending: self.pending.clone(),
        };

        info!(
            "Awaiting approval {} for unknown host key {}:{}",
            approval.id, host, port
        );
        // No subscribers is fine; `pending()` still lists it
        let _ = self.events.send(approval);

        match tokio::time::timeout(self.approval_timeout, decision).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("Host key approval for {}:{} timed out", host, port);
                false
            }
        }
    }

    /// Complete one pending decision.
    ///
    /// Returns false if the id is unknown or was already resolved.
    pub fn resolve(&self, id: Uuid, approved: bool) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        info!(
            "Host key approval {} for {}:{} resolved: approved={}",
            id, entry.approval.host, entry.approval.port, approved
        );
        entry.resolver.send(approved).is_ok()
    }

    /// Approvals currently waiting for a decision
    pub fn pending(&self) -> Vec<PendingHostKeyApproval> {
        self.pending
            .lock()
            .values()
            .map(|entry| entry.approval.clone())
            .collect()
    }

    /// Receive every new approval request
    pub fn subscribe(&self) -> broadcast::Receiver<PendingHostKeyApproval> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F1: &str = "aa:aa:aa:aa:aa:aa:aa:aa:aa:aa";
    const F2: &str = "bb:bb:bb:bb:bb:bb:bb:bb:bb:bb";

    fn validator(tofu: bool) -> Arc<HostKeyValidator> {
        Arc::new(HostKeyValidator::new(Arc::new(HostKeyStore::in_memory()), tofu))
    }

    #[test]
    fn test_from_settings() {
        let settings = SshSettings {
            trust_on_first_use: true,
            approval_timeout_secs: 30,
            ..Default::default()
        };
        let v = HostKeyValidator::from_settings(Arc::new(HostKeyStore::in_memory()), &settings);
        assert!(v.trust_on_first_use());
        assert_eq!(v.approval_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_tofu_is_idempotent() {
        let v = validator(true);

        assert_eq!(
            v.verify("example.com", 22, F1).await.unwrap(),
            HostKeyStatus::FirstUse
        );
        let after_first = v.store().all();
        assert_eq!(after_first["example.com:22"], F1);

        assert_eq!(
            v.verify("example.com", 22, F1).await.unwrap(),
            HostKeyStatus::Match
        );
        assert_eq!(v.store().all(), after_first);
    }

    #[tokio::test]
    async fn test_mismatch_always_rejected() {
        for tofu in [true, false] {
            let v = validator(tofu);
            v.store().put("example.com", 22, F1).unwrap();

            assert_eq!(
                v.classify("example.com", 22, F2),
                HostKeyStatus::Mismatch {
                    stored: F1.to_string()
                }
            );
            match v.verify("example.com", 22, F2).await {
                Err(SshError::HostKeyMismatch { stored, received }) => {
                    assert_eq!(stored, F1);
                    assert_eq!(received, F2);
                }
                other => panic!("expected mismatch, got {:?}", other),
            }
            assert_eq!(v.store().get("example.com", 22).as_deref(), Some(F1));
        }
    }

    #[tokio::test]
    async fn test_approval_pins_key() {
        let v = validator(false);
        let mut events = v.subscribe();

        let task = {
            let v = v.clone();
            tokio::spawn(async move { v.verify("10.0.0.5", 22, F1).await })
        };

        let approval = events.recv().await.unwrap();
        assert_eq!(approval.host, "10.0.0.5");
        assert_eq!(approval.fingerprint, F1);
        assert_eq!(v.pending().len(), 1);

        assert!(v.resolve(approval.id, true));
        assert!(!v.resolve(approval.id, true));

        assert_eq!(task.await.unwrap().unwrap(), HostKeyStatus::FirstUse);
        assert_eq!(v.store().get("10.0.0.5", 22).as_deref(), Some(F1));
        assert!(v.pending().is_empty());
    }

    #[tokio::test]
    async fn test_denial_rejects_without_storing() {
        let v = validator(false);
        let mut events = v.subscribe();

        let task = {
            let v = v.clone();
            tokio::spawn(async move { v.verify("10.0.0.5", 22, F1).await })
        };

        let approval = events.recv().await.unwrap();
        assert!(v.resolve(approval.id, false));

        assert!(matches!(
            task.await.unwrap(),
            Err(SshError::HostKeyRejected(_))
        ));
        assert_eq!(v.store().get("10.0.0.5", 22), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_approval_times_out() {
        let v = Arc::new(
            HostKeyValidator::new(Arc::new(HostKeyStore::in_memory()), false)
                .with_approval_timeout(Duration::from_secs(5)),
        );

        let result = v.verify("10.0.0.5", 22, F1).await;
        assert!(matches!(result, Err(SshError::HostKeyRejected(_))));
        assert!(v.pending().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_pin_during_approval_is_mismatch() {
        let v = validator(false);
        let mut events = v.subscribe();

        let task = {
            let v = v.clone();
            tokio::spawn(async move { v.verify("10.0.0.5", 22, F2).await })
        };

        let approval = events.recv().await.unwrap();
        v.store().put_if_absent("10.0.0.5", 22, F1).unwrap();
        v.resolve(approval.id, true);

        assert!(matches!(
            task.await.unwrap(),
            Err(SshError::HostKeyMismatch { .. })
        ));
        assert_eq!(v.store().get("10.0.0.5", 22).as_deref(), Some(F1));
    }

    #[test]
    fn test_resolve_unknown_id() {
        assert!(!validator(false).resolve(Uuid::new_v4(), true));
    }
}
