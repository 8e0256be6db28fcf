//! Tethered signer integration tests
//!
//! Runs a gateway on a local port and drives it with real holder
//! connections: registration, handshake, signing and session lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, self_signed_certificate, spawn_gateway};
use fabric_custody::crypto::{digest, inspect_csr, is_low_s, Curve, HolderKey};
use fabric_custody::identity::{Identity, IdentityProvider, Key, TetheredIdentityProvider};
use fabric_custody::tethered::{
    answer_challenge, handshake_url, HandshakeParams, SessionState, TetheredSignerClient,
};
use fabric_custody::CustodyError;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Signing
// =============================================================================

#[tokio::test]
async fn test_sign_through_holder_connection() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let public_key = key.public_key();

    let session_id = gateway.register(&key).await;
    let connection = TetheredSignerClient::new(key)
        .connect(&gateway.ws_url(), &session_id)
        .await
        .unwrap();
    let holder = tokio::spawn(connection.serve());

    let session = gateway
        .state
        .tethered
        .wait_for_session(&public_key, WAIT)
        .await
        .unwrap();
    assert_eq!(session.session_id(), session_id);
    assert_eq!(session.state(), SessionState::Authenticated);

    let signature = session.sign(b"hello", false, WAIT).await.unwrap();
    public_key
        .verify_prehash(&digest(b"hello"), &signature)
        .unwrap();
    assert!(is_low_s(&signature, Curve::P256).unwrap());

    // Sequential requests on the same session
    let second = session.sign(&digest(b"again"), true, WAIT).await.unwrap();
    public_key.verify_prehash(&digest(b"again"), &second).unwrap();

    session.close("test done");
    let signed = tokio::time::timeout(WAIT, holder).await.unwrap().unwrap().unwrap();
    assert_eq!(signed, 2);
}

#[tokio::test]
async fn test_p384_holder() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P384);
    let public_key = key.public_key();

    let session_id = gateway.register(&key).await;
    let connection = TetheredSignerClient::new(key)
        .connect(&gateway.ws_url(), &session_id)
        .await
        .unwrap();
    tokio::spawn(connection.serve());

    let signing_key = {
        let tethered = &gateway.state.tethered;
        tethered.wait_for_session(&public_key, WAIT).await.unwrap();
        tethered.key_for_public_key(&public_key).unwrap()
    };
    assert_eq!(signing_key.handle().curve, Curve::P384);

    let signature = signing_key.sign(&digest(b"p384")).await.unwrap();
    public_key.verify_prehash(&digest(b"p384"), &signature).unwrap();
    assert!(is_low_s(&signature, Curve::P384).unwrap());
}

#[tokio::test]
async fn test_tethered_identity_builds_csr() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let public_key = key.public_key();
    let certificate = self_signed_certificate(&key, "device-owner");

    let session_id = gateway.register(&key).await;
    let connection = TetheredSignerClient::new(key)
        .connect(&gateway.ws_url(), &session_id)
        .await
        .unwrap();
    tokio::spawn(connection.serve());
    gateway
        .state
        .tethered
        .wait_for_session(&public_key, WAIT)
        .await
        .unwrap();

    let provider = TetheredIdentityProvider::new(Arc::clone(&gateway.state.tethered));
    let identity = Identity::tethered("Org1MSP", None).with_certificate(certificate);

    let context = provider
        .get_user_context(&identity, "device-owner")
        .await
        .unwrap();
    let signature = context.sign(&digest(b"proposal")).await.unwrap();
    public_key
        .verify_prehash(&digest(b"proposal"), &signature)
        .unwrap();

    let key = provider.key_for(&identity).await.unwrap();
    let csr = inspect_csr(&key.generate_csr("device-owner").await.unwrap()).unwrap();
    assert_eq!(csr.common_name.as_deref(), Some("device-owner"));
    assert_eq!(csr.public_key, public_key);
    csr.verify().unwrap();
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_wrong_key_rejected_and_session_id_burned() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let impostor = HolderKey::generate(Curve::P256);

    let session_id = gateway.register(&key).await;
    let result = TetheredSignerClient::new(impostor)
        .connect(&gateway.ws_url(), &session_id)
        .await;
    assert!(matches!(result, Err(CustodyError::Authentication(_))));

    // The failed attempt consumed the id; the rightful holder must register again
    let result = TetheredSignerClient::new(key.clone())
        .connect(&gateway.ws_url(), &session_id)
        .await;
    assert!(matches!(result, Err(CustodyError::Authentication(_))));

    let stats = gateway.state.tethered.stats();
    assert_eq!(stats.pending_sessions, 0);
    assert_eq!(stats.live_sessions, 0);
    assert!(gateway
        .state
        .tethered
        .session_for_public_key(&key.public_key())
        .is_err());
}

#[tokio::test]
async fn test_rejection_is_plain_401() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let params = answer_challenge(&key, &"5a".repeat(32)).unwrap();
    let url = handshake_url(&gateway.ws_url(), &params).unwrap();

    match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(_) => panic!("handshake with an unknown sessionId was accepted"),
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
            assert_eq!(
                response.headers().get("connection").unwrap(),
                "close"
            );
        }
        Err(other) => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_curve_mismatch_rejected() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let session_id = gateway.register(&key).await;

    let mut params = answer_challenge(&key, &session_id).unwrap();
    params.crv = Curve::P384;
    let url = handshake_url(&gateway.ws_url(), &params).unwrap();
    assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
    assert!(gateway.state.tethered.registry().get(&session_id).is_none());
}

#[tokio::test]
async fn test_concurrent_claims_admit_one() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let session_id = gateway.register(&key).await;
    let params: HandshakeParams = answer_challenge(&key, &session_id).unwrap();
    let url = handshake_url(&gateway.ws_url(), &params).unwrap();

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move { tokio_tungstenite::connect_async(url.as_str()).await })
        })
        .collect();

    let mut accepted = Vec::new();
    for attempt in attempts {
        if let Ok((ws, _)) = attempt.await.unwrap() {
            accepted.push(ws);
        }
    }
    assert_eq!(accepted.len(), 1);
}

#[tokio::test]
async fn test_expired_registration_rejected() {
    let gateway = spawn_gateway(&["--registration-ttl-secs", "1"]).await;
    let key = HolderKey::generate(Curve::P256);
    let session_id = gateway.register(&key).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let result = TetheredSignerClient::new(key)
        .connect(&gateway.ws_url(), &session_id)
        .await;
    assert!(matches!(result, Err(CustodyError::Authentication(_))));
}

// =============================================================================
// Session lifecycle
// =============================================================================

/// Authenticated connection that never answers digests
async fn silent_holder(
    gateway: &common::TestGateway,
    key: &HolderKey,
) -> (
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Arc<fabric_custody::tethered::RemoteSigningSession>,
) {
    let session_id = gateway.register(key).await;
    let params = answer_challenge(key, &session_id).unwrap();
    let url = handshake_url(&gateway.ws_url(), &params).unwrap();
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let session = gateway
        .state
        .tethered
        .wait_for_session(&key.public_key(), WAIT)
        .await
        .unwrap();
    (ws, session)
}

#[tokio::test]
async fn test_second_request_while_in_flight_is_busy() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let (ws, session) = silent_holder(&gateway, &key).await;

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.sign(b"first", false, WAIT).await })
    };
    assert!(eventually(|| session.is_busy()).await);

    let second = session.sign(b"second", false, WAIT).await;
    assert!(matches!(second, Err(CustodyError::Busy(_))));

    // Holder hangs up: the pending request fails instead of waiting out the timeout
    drop(ws);
    let first = tokio::time::timeout(WAIT, first).await.unwrap().unwrap();
    assert!(matches!(first, Err(CustodyError::ConnectionClosed(_))));
    assert!(eventually(|| gateway.state.tethered.registry().get(session.session_id()).is_none()).await);
}

#[tokio::test]
async fn test_timeout_holds_slot_until_holder_answers() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let (mut ws, session) = silent_holder(&gateway, &key).await;

    let result = session
        .sign(b"slow", false, Duration::from_millis(150))
        .await;
    assert!(matches!(result, Err(CustodyError::Timeout(_))));
    assert!(session.is_open());

    // The abandoned digest is still on the wire, so a new request must not go out
    assert!(session.is_busy());
    assert!(matches!(
        session.sign(b"next", false, WAIT).await,
        Err(CustodyError::Busy(_))
    ));

    let Some(Ok(Message::Binary(abandoned))) = ws.next().await else {
        panic!("expected the abandoned digest");
    };
    ws.send(Message::Binary(key.sign_prehash(&abandoned).unwrap()))
        .await
        .unwrap();
    assert!(eventually(|| !session.is_busy()).await);
    assert!(session.is_open());

    let holder = tokio::spawn(async move {
        let Some(Ok(Message::Binary(next_digest))) = ws.next().await else {
            panic!("expected a digest");
        };
        ws.send(Message::Binary(key.sign_prehash(&next_digest).unwrap()))
            .await
            .unwrap();
        ws
    });
    let signature = session.sign(b"next", false, WAIT).await.unwrap();
    let _ws = holder.await.unwrap();
    session
        .public_key()
        .verify_prehash(&digest(b"next"), &signature)
        .unwrap();
}

#[tokio::test]
async fn test_server_close_fails_pending_request() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let (_ws, session) = silent_holder(&gateway, &key).await;

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.sign(b"doomed", false, WAIT).await })
    };
    assert!(eventually(|| session.is_busy()).await);

    session.close("operator request");
    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(CustodyError::ConnectionClosed(_))));

    let after = session.sign(b"late", false, WAIT).await;
    assert!(matches!(after, Err(CustodyError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_newer_session_supersedes_older() {
    let gateway = spawn_gateway(&[]).await;
    let key = HolderKey::generate(Curve::P256);
    let public_key = key.public_key();
    let (_old_ws, old) = silent_holder(&gateway, &key).await;

    let session_id = gateway.register(&key).await;
    let connection = TetheredSignerClient::new(key)
        .connect(&gateway.ws_url(), &session_id)
        .await
        .unwrap();
    tokio::spawn(connection.serve());

    let registry = gateway.state.tethered.registry();
    assert!(eventually(|| registry.get(&session_id).is_some()).await);
    assert_eq!(old.state(), SessionState::Closed);

    let current = gateway
        .state
        .tethered
        .session_for_public_key(&public_key)
        .unwrap();
    assert_eq!(current.session_id(), session_id);
    let signature = current.sign(b"fresh", false, WAIT).await.unwrap();
    public_key.verify_prehash(&digest(b"fresh"), &signature).unwrap();
}

// =============================================================================
// HTTP surface
// =============================================================================

#[tokio::test]
async fn test_http_routes() {
    let gateway = spawn_gateway(&[]).await;
    let http = reqwest::Client::new();

    let health: serde_json::Value = http
        .get(format!("{}/health", gateway.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["liveSessions"], 0);

    let bad_key = http
        .post(format!("{}/sessions", gateway.http_url()))
        .json(&serde_json::json!({ "pubKeyHex": "04deadbeef" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_key.status(), 400);

    let not_json = http
        .post(format!("{}/sessions", gateway.http_url()))
        .body("pubKeyHex=04")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), 400);

    let plain_get = http
        .get(format!("{}/signer", gateway.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(plain_get.status(), 400);

    let missing = http
        .get(format!("{}/nowhere", gateway.http_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let key = HolderKey::generate(Curve::P384);
    gateway.register(&key).await;
    assert_eq!(gateway.state.tethered.stats().pending_sessions, 1);
}
