//! Authenticated tethered session
//!
//! A [`RemoteSigningSession`] owns the single digest slot of one holder
//! connection. The transport carries no correlation id, so a second `sign`
//! while a digest is outstanding fails with `Busy` instead of queueing.
//!
//! The slot is tied to the wire, not to the caller: a request that timed out
//! or whose caller went away keeps the slot until the holder's reply for it
//! arrives (and is verified, then discarded) or the connection closes.
//!
//! The WebSocket itself is driven by [`run_connection`], which forwards
//! digests out and feeds replies back into the slot.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::WebSocketStream;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use crate::crypto::{self, normalize_signature, Curve, PublicKey};
use crate::types::{CustodyError, Result};

/// Lifecycle of a tethered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Public key registered, no upgrade seen yet
    Registered,
    /// Handshake verified, WebSocket not yet established
    AwaitingUpgrade,
    Authenticated,
    /// Terminal
    Closed,
}

/// Commands for the connection task
#[derive(Debug)]
pub(crate) enum Outbound {
    Digest(Vec<u8>),
    Close,
}

/// The one outstanding signing request of a session.
///
/// `waiter` is closed once the caller has timed out or dropped its future;
/// the slot then only waits to drain the holder's late reply.
struct DigestSlot {
    request_id: u64,
    digest: Vec<u8>,
    /// Caller supplied the digest itself; only reported in request logs
    pre_hashed: bool,
    waiter: oneshot::Sender<Result<Vec<u8>>>,
}

struct Inner {
    state: SessionState,
    slot: Option<DigestSlot>,
    next_request_id: u64,
}

/// A holder connection that passed the challenge
pub struct RemoteSigningSession {
    session_id: String,
    public_key: PublicKey,
    public_key_hex: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    inner: Mutex<Inner>,
}

impl RemoteSigningSession {
    pub(crate) fn new(
        session_id: String,
        public_key: PublicKey,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            session_id,
            public_key_hex: public_key.to_sec1_hex(),
            public_key,
            outbound,
            inner: Mutex::new(Inner {
                state: SessionState::Authenticated,
                slot: None,
                next_request_id: 0,
            }),
        });
        (session, outbound_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Key verified during the handshake
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Uncompressed SEC1 hex of the session key
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    pub fn curve(&self) -> Curve {
        self.public_key.curve()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Whether a digest is waiting for the holder's reply
    /// Whether a digest is on the wire without a reply yet
    pub fn is_busy(&self) -> bool {
        self.lock().slot.is_some()
    }

    /// Send `digest` to the holder and wait for its signature.
    ///
    /// `digest` is hashed with SHA-256 first unless `pre_hashed`, so callers
    /// holding raw message bytes can pass them directly. The reply is verified
    /// against the session key and returned in low-S DER form.
    ///
    /// After a `Timeout` the session stays `Busy` until the holder answers
    /// the abandoned digest or the connection closes.
    pub async fn sign(&self, digest: &[u8], pre_hashed: bool, timeout: Duration) -> Result<Vec<u8>> {
        let digest = if pre_hashed {
            digest.to_vec()
        } else {
            crypto::digest(digest)
        };

        let (waiter, reply) = oneshot::channel();
        let request_id = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(CustodyError::ConnectionClosed(self.session_id.clone()));
            }
            if let Some(slot) = inner.slot.as_ref() {
                let detail = if slot.waiter.is_closed() {
                    "is still waiting for the reply to an abandoned digest"
                } else {
                    "already has a digest in flight"
                };
                return Err(CustodyError::Busy(format!(
                    "session {} {}",
                    self.session_id, detail
                )));
            }
            inner.next_request_id += 1;
            let request_id = inner.next_request_id;
            inner.slot = Some(DigestSlot {
                request_id,
                digest: digest.clone(),
                pre_hashed,
                waiter,
            });
            request_id
        };

        debug!(session_id = %self.session_id, request_id, pre_hashed, "Sending digest to holder");
        if self.outbound.send(Outbound::Digest(digest)).is_err() {
            self.release_slot(request_id);
            return Err(CustodyError::ConnectionClosed(self.session_id.clone()));
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CustodyError::ConnectionClosed(self.session_id.clone())),
            Err(_) => {
                // The digest is still on the wire; the slot drains on its reply
                warn!(session_id = %self.session_id, request_id, ?timeout, "Holder did not answer in time");
                Err(CustodyError::Timeout(format!(
                    "session {} did not reply within {:?}",
                    self.session_id, timeout
                )))
            }
        }
    }

    /// Feed a reply frame into the slot.
    ///
    /// An `Err` means the connection must be torn down.
    pub(crate) fn complete(&self, reply: &[u8]) -> Result<()> {
        let Some(slot) = self.lock().slot.take() else {
            warn!(session_id = %self.session_id, "Dropping reply with no digest in flight");
            return Ok(());
        };

        let verified = self
            .public_key
            .verify_prehash(&slot.digest, reply)
            .map_err(|e| {
                CustodyError::SignatureVerification(format!(
                    "session {} reply does not verify: {}",
                    self.session_id, e
                ))
            })
            .and_then(|()| normalize_signature(reply, self.curve()));

        match verified {
            Ok(_) if slot.waiter.is_closed() => {
                debug!(
                    session_id = %self.session_id,
                    request_id = slot.request_id,
                    "Discarding late reply to an abandoned digest"
                );
                Ok(())
            }
            Ok(signature) => {
                debug!(
                    session_id = %self.session_id,
                    request_id = slot.request_id,
                    pre_hashed = slot.pre_hashed,
                    "Holder signature verified"
                );
                let _ = slot.waiter.send(Ok(signature));
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Rejecting holder reply");
                let _ = slot.waiter.send(Err(CustodyError::SignatureVerification(format!(
                    "session {} reply rejected",
                    self.session_id
                ))));
                Err(e)
            }
        }
    }

    /// Close the session and ask the connection task to hang up
    pub fn close(&self, reason: &str) {
        if self.mark_closed(reason) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Move to `Closed` and fail any waiter; false if already closed
    pub(crate) fn mark_closed(&self, reason: &str) -> bool {
        let slot = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return false;
            }
            inner.state = SessionState::Closed;
            inner.slot.take()
        };

        if let Some(slot) = slot {
            let _ = slot.waiter.send(Err(CustodyError::ConnectionClosed(format!(
                "session {}: {}",
                self.session_id, reason
            ))));
        }
        info!(session_id = %self.session_id, reason = %reason, "Session closed");
        true
    }

    fn release_slot(&self, request_id: u64) {
        let mut inner = self.lock();
        if inner.slot.as_ref().is_some_and(|slot| slot.request_id == request_id) {
            inner.slot = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RemoteSigningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSigningSession")
            .field("session_id", &self.session_id)
            .field("curve", &self.curve())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Connection task
// =============================================================================

/// Drive one holder WebSocket until either side closes it
pub(crate) async fn run_connection<S>(
    ws: WebSocketStream<S>,
    session: Arc<RemoteSigningSession>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    registry: Arc<SessionRegistry>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws.split();

    let reason = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Digest(digest)) => {
                    if let Err(e) = ws_sink.send(Message::Binary(digest)).await {
                        break format!("send failed: {e}");
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break "closed by server".to_string();
                }
            },
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Binary(reply))) => {
                    match session.complete(&reply) {
                        Err(e) if e.is_security_event() => {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break e.to_string();
                        }
                        Err(e) => warn!(session_id = %session.session_id(), error = %e, "Reply not applied"),
                        Ok(()) => {}
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws_sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break "closed by holder".to_string(),
                Some(Ok(Message::Text(_))) => {
                    warn!(session_id = %session.session_id(), "Ignoring text frame from holder");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("receive failed: {e}"),
            },
        }
    };

    session.mark_closed(&reason);
    registry.remove(session.session_id());
}
