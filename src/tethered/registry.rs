//! Session registry for tethered signers
//!
//! Tracks every session from registration until its connection closes:
//!
//! - `pending`: sessionId -> claimed public key, waiting for an upgrade
//! - `upgrading`: sessionIds whose handshake verified but whose WebSocket
//!   isn't ready yet
//! - `live`: sessionId -> authenticated session
//! - `by_pub_key`: public key -> live sessionId (at most one per key)
//!
//! Only the tethered server mutates the registry; everything else reads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::session::{RemoteSigningSession, SessionState};
use crate::crypto::PublicKey;
use crate::crypto::keys::short_hex;
use crate::types::{CustodyError, Result};

/// Random bytes in a sessionId
const SESSION_ID_BYTES: usize = 32;

/// A registration that hasn't been claimed by an upgrade yet
#[derive(Debug, Clone)]
pub(crate) struct PendingRegistration {
    pub pub_key_hex: String,
    pub registered_at: Instant,
}

/// Registry counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub pending_sessions: usize,
    pub upgrading_sessions: usize,
    pub live_sessions: usize,
}

/// Owned registry of tethered sessions
pub struct SessionRegistry {
    pending: DashMap<String, PendingRegistration>,
    upgrading: DashMap<String, Instant>,
    live: DashMap<String, Arc<RemoteSigningSession>>,
    by_pub_key: DashMap<String, String>,
    activated: Notify,
    registration_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(registration_ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            upgrading: DashMap::new(),
            live: DashMap::new(),
            by_pub_key: DashMap::new(),
            activated: Notify::new(),
            registration_ttl,
        }
    }

    pub fn registration_ttl(&self) -> Duration {
        self.registration_ttl
    }

    // =========================================================================
    // Mutation (server only)
    // =========================================================================

    /// Bind a fresh sessionId to `pub_key_hex`
    pub(crate) fn register(&self, pub_key_hex: &str) -> String {
        let session_id = loop {
            let mut bytes = [0u8; SESSION_ID_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let candidate = hex::encode(bytes);
            if !self.pending.contains_key(&candidate) && !self.live.contains_key(&candidate) {
                break candidate;
            }
        };

        self.pending.insert(
            session_id.clone(),
            PendingRegistration {
                pub_key_hex: pub_key_hex.to_lowercase(),
                registered_at: Instant::now(),
            },
        );
        debug!(session_id = %session_id, pub_key = %short_hex(pub_key_hex), "Session registered");
        session_id
    }

    /// Take the registration for `session_id` out of the registry.
    ///
    /// The removal is the claim: of two concurrent upgrades presenting the same
    /// sessionId only one gets `Some`. A claimed id never returns to `pending`,
    /// whatever the outcome of the handshake.
    pub(crate) fn claim(&self, session_id: &str) -> Option<PendingRegistration> {
        let (_, registration) = self.pending.remove(session_id)?;
        if registration.registered_at.elapsed() >= self.registration_ttl {
            debug!(session_id = %session_id, "Registration expired before upgrade");
            return None;
        }
        self.upgrading.insert(session_id.to_string(), Instant::now());
        Some(registration)
    }

    /// Drop a claimed sessionId whose upgrade never completed
    pub(crate) fn abandon(&self, session_id: &str) {
        self.upgrading.remove(session_id);
    }

    /// Publish an authenticated session; any older session for the same key
    /// is closed.
    pub(crate) fn activate(&self, session: Arc<RemoteSigningSession>) {
        let session_id = session.session_id().to_string();
        self.upgrading.remove(&session_id);
        self.live.insert(session_id.clone(), Arc::clone(&session));

        let previous = self
            .by_pub_key
            .insert(session.public_key_hex().to_string(), session_id.clone());
        if let Some(previous_id) = previous.filter(|id| *id != session_id) {
            if let Some((_, previous)) = self.live.remove(&previous_id) {
                info!(
                    session_id = %previous_id,
                    replaced_by = %session_id,
                    "Closing superseded session"
                );
                previous.close("superseded by a newer session for the same key");
            }
        }

        info!(
            session_id = %session_id,
            pub_key = %short_hex(session.public_key_hex()),
            curve = %session.curve(),
            "Session authenticated"
        );
        self.activated.notify_waiters();
    }

    /// Forget a closed session
    pub(crate) fn remove(&self, session_id: &str) {
        if let Some((_, session)) = self.live.remove(session_id) {
            self.by_pub_key
                .remove_if(session.public_key_hex(), |_, live_id| live_id == session_id);
            debug!(session_id = %session_id, "Session removed");
        }
    }

    /// Purge registrations and upgrades older than the TTL
    pub(crate) fn purge_expired(&self) -> usize {
        let before = self.pending.len() + self.upgrading.len();
        let ttl = self.registration_ttl;
        self.pending.retain(|_, registration| registration.registered_at.elapsed() < ttl);
        self.upgrading.retain(|_, claimed_at| claimed_at.elapsed() < ttl);
        let purged = before.saturating_sub(self.pending.len() + self.upgrading.len());
        if purged > 0 {
            debug!(purged, "Purged expired registrations");
        }
        purged
    }

    /// Remove and return every live session
    pub(crate) fn drain_live(&self) -> Vec<Arc<RemoteSigningSession>> {
        let ids: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        let sessions = ids
            .iter()
            .filter_map(|id| self.live.remove(id).map(|(_, session)| session))
            .collect();
        self.by_pub_key.clear();
        sessions
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, session_id: &str) -> Option<Arc<RemoteSigningSession>> {
        self.live.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Live session authenticated with `public_key`
    pub fn find_by_public_key(&self, public_key: &PublicKey) -> Option<Arc<RemoteSigningSession>> {
        let session_id = self.by_pub_key.get(&public_key.to_sec1_hex())?.value().clone();
        self.get(&session_id)
    }

    /// Wait until a session for `public_key` is live
    pub async fn wait_for_public_key(
        &self,
        public_key: &PublicKey,
        timeout: Duration,
    ) -> Result<Arc<RemoteSigningSession>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.activated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(session) = self.find_by_public_key(public_key) {
                return Ok(session);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(CustodyError::Timeout(format!(
                    "no session for key {} within {:?}",
                    short_hex(&public_key.to_sec1_hex()),
                    timeout
                )));
            }
        }
    }

    /// Where `session_id` is in its lifecycle, if the registry still knows it
    pub fn state_of(&self, session_id: &str) -> Option<SessionState> {
        if self.pending.contains_key(session_id) {
            Some(SessionState::Registered)
        } else if self.upgrading.contains_key(session_id) {
            Some(SessionState::AwaitingUpgrade)
        } else {
            self.get(session_id).map(|session| session.state())
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            pending_sessions: self.pending.len(),
            upgrading_sessions: self.upgrading.len(),
            live_sessions: self.live.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Curve, HolderKey};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(60))
    }

    #[test]
    fn test_session_ids_are_fresh_hex() {
        let registry = registry();
        let first = registry.register("04ab");
        let second = registry.register("04ab");
        assert_ne!(first, second);
        assert_eq!(first.len(), SESSION_ID_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(registry.state_of(&first), Some(SessionState::Registered));
    }

    #[test]
    fn test_claim_is_single_use() {
        let registry = registry();
        let session_id = registry.register("04AB");

        let claimed = registry.claim(&session_id).unwrap();
        assert_eq!(claimed.pub_key_hex, "04ab");
        assert_eq!(registry.state_of(&session_id), Some(SessionState::AwaitingUpgrade));
        assert!(registry.claim(&session_id).is_none());

        registry.abandon(&session_id);
        assert!(registry.state_of(&session_id).is_none());
        assert!(registry.claim(&session_id).is_none());
    }

    #[test]
    fn test_expired_registration_cannot_be_claimed() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let session_id = registry.register("04ab");
        assert!(registry.claim(&session_id).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let registry = SessionRegistry::new(Duration::ZERO);
        registry.register("04aa");
        registry.register("04bb");
        assert_eq!(registry.purge_expired(), 2);
        assert_eq!(registry.stats().pending_sessions, 0);
    }

    #[tokio::test]
    async fn test_wait_for_public_key_times_out() {
        let registry = registry();
        let public_key = HolderKey::generate(Curve::P256).public_key();
        let result = registry
            .wait_for_public_key(&public_key, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(CustodyError::Timeout(_))));
    }
}
