//! Tethered signer server
//!
//! Owns the [`SessionRegistry`] and is the only thing that mutates it:
//! registration, handshake verification on upgrade, activation and teardown.
//! Any HTTP host can attach [`TetheredSignerServer::handle_upgrade`] to a
//! route; see `crate::server` for the bundled one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use tracing::{error, info, warn};

use super::handshake::{self, HandshakeParams};
use super::key::TetheredKey;
use super::registry::{RegistryStats, SessionRegistry};
use super::session::{run_connection, RemoteSigningSession};
use crate::crypto::keys::short_hex;
use crate::crypto::{Curve, PublicKey};
use crate::types::{CustodyError, Result};

/// Tethered signer settings
#[derive(Debug, Clone)]
pub struct TetheredConfig {
    /// How long a registration waits for its upgrade (default: 60 seconds)
    pub registration_ttl: Duration,
    /// Default bound on a holder reply (default: 30 seconds)
    pub sign_timeout: Duration,
    /// Interval of the expired-registration sweep (default: 15 seconds)
    pub cleanup_interval: Duration,
}

impl Default for TetheredConfig {
    fn default() -> Self {
        Self {
            registration_ttl: Duration::from_secs(60),
            sign_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(15),
        }
    }
}

/// Server side of the tethered signer protocol
pub struct TetheredSignerServer {
    config: TetheredConfig,
    registry: Arc<SessionRegistry>,
}

impl TetheredSignerServer {
    pub fn new(config: TetheredConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.registration_ttl)),
            config,
        }
    }

    pub fn config(&self) -> &TetheredConfig {
        &self.config
    }

    /// Read access to the registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Register a claimed public key and hand out the sessionId the holder
    /// must sign.
    pub fn new_session(&self, pub_key_hex: &str) -> Result<String> {
        let pub_key_hex = pub_key_hex.trim();
        if pub_key_hex.is_empty() {
            return Err(CustodyError::InvalidArgument("public key hex is required".into()));
        }
        let on_curve = [Curve::P256, Curve::P384]
            .into_iter()
            .any(|curve| PublicKey::from_sec1_hex(curve, pub_key_hex).is_ok());
        if !on_curve {
            return Err(CustodyError::InvalidArgument(format!(
                "{} is not a P-256 or P-384 public key",
                short_hex(pub_key_hex)
            )));
        }
        Ok(self.registry.register(pub_key_hex))
    }

    /// Verify a handshake and, if it passes, upgrade the connection.
    ///
    /// Rejections answer `401` with `Connection: close` and never upgrade.
    pub fn handle_upgrade<B>(&self, mut req: Request<B>) -> Response<Full<Bytes>> {
        if !hyper_tungstenite::is_upgrade_request(&req) {
            return json_error(StatusCode::BAD_REQUEST, "expected a WebSocket upgrade");
        }

        let params = match HandshakeParams::from_query(req.uri().query()) {
            Ok(params) => params,
            Err(e) => return reject(e),
        };
        let public_key = match handshake::authenticate(&self.registry, &params) {
            Ok(public_key) => public_key,
            Err(e) => return reject(e),
        };

        let session_id = params.session_id;
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => {
                            let (session, outbound_rx) =
                                RemoteSigningSession::new(session_id, public_key);
                            registry.activate(Arc::clone(&session));
                            run_connection(ws, session, outbound_rx, registry).await;
                        }
                        Err(e) => {
                            registry.abandon(&session_id);
                            error!(session_id = %session_id, "WebSocket upgrade failed: {:?}", e);
                        }
                    }
                });
                let (parts, _) = response.into_parts();
                Response::from_parts(parts, Full::new(Bytes::new()))
            }
            Err(e) => {
                self.registry.abandon(&session_id);
                error!(session_id = %session_id, "WebSocket upgrade error: {:?}", e);
                json_error(StatusCode::BAD_REQUEST, &format!("WebSocket upgrade failed: {e}"))
            }
        }
    }

    /// The live session for `public_key`
    pub fn session_for_public_key(&self, public_key: &PublicKey) -> Result<Arc<RemoteSigningSession>> {
        self.registry.find_by_public_key(public_key).ok_or_else(|| {
            CustodyError::SessionNotFound(format!(
                "no open session for key {}",
                short_hex(&public_key.to_sec1_hex())
            ))
        })
    }

    /// Wait up to `timeout` for a holder with `public_key` to connect
    pub async fn wait_for_session(
        &self,
        public_key: &PublicKey,
        timeout: Duration,
    ) -> Result<Arc<RemoteSigningSession>> {
        self.registry.wait_for_public_key(public_key, timeout).await
    }

    /// [`TetheredKey`] over the live session for `public_key`
    pub fn key_for_public_key(&self, public_key: &PublicKey) -> Result<TetheredKey> {
        let session = self.session_for_public_key(public_key)?;
        Ok(TetheredKey::new(session, self.config.sign_timeout))
    }

    /// Periodically purge registrations nobody claimed
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.purge_expired();
            }
        })
    }

    /// Close every live session
    pub fn close_all(&self) {
        let sessions = self.registry.drain_live();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Closing tethered sessions");
        }
        for session in sessions {
            session.close("server shutting down");
        }
    }
}

/// Failed handshakes answer with the error's status; security events also
/// drop the connection.
fn reject(err: CustodyError) -> Response<Full<Bytes>> {
    warn!(error = %err, "Tethered handshake rejected");
    let mut response = json_error(err.status_code(), &err.to_string());
    if err.is_security_event() {
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
