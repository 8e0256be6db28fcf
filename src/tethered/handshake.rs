//! Challenge-response handshake
//!
//! The holder proves possession of the registered key by signing the
//! hex-decoded sessionId bytes as the prehash (no further hashing) and
//! presenting the hex DER signature in the upgrade query:
//! `?sessionId=<id>&signature=<hex>&crv=p256|p384`.

use serde::{Deserialize, Serialize};

use super::registry::SessionRegistry;
use crate::crypto::keys::short_hex;
use crate::crypto::{Curve, HolderKey, PublicKey};
use crate::types::{CustodyError, Result};

/// Query parameters of an upgrade request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub signature: String,
    pub crv: Curve,
}

impl HandshakeParams {
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let query = query
            .ok_or_else(|| CustodyError::Authentication("missing handshake parameters".into()))?;
        serde_urlencoded::from_str(query)
            .map_err(|e| CustodyError::Authentication(format!("bad handshake parameters: {e}")))
    }

    pub fn to_query(&self) -> Result<String> {
        serde_urlencoded::to_string(self)
            .map_err(|e| CustodyError::Internal(format!("encode handshake parameters: {e}")))
    }
}

/// Prehash the holder signs for `session_id`: its raw random bytes
pub fn challenge_digest(session_id: &str) -> Result<Vec<u8>> {
    hex::decode(session_id)
        .map_err(|e| CustodyError::Authentication(format!("sessionId is not hex: {e}")))
}

/// Holder side: answer the challenge for `session_id`
pub fn answer_challenge(key: &HolderKey, session_id: &str) -> Result<HandshakeParams> {
    let signature = key.sign_prehash(&challenge_digest(session_id)?)?;
    Ok(HandshakeParams {
        session_id: session_id.to_string(),
        signature: hex::encode(signature),
        crv: key.curve(),
    })
}

/// `<ws_url>?sessionId=..&signature=..&crv=..`
pub fn handshake_url(ws_url: &str, params: &HandshakeParams) -> Result<String> {
    let separator = if ws_url.contains('?') { '&' } else { '?' };
    Ok(format!("{}{}{}", ws_url, separator, params.to_query()?))
}

/// Server side: claim the registration and check the challenge signature.
///
/// Every failure is an `Authentication` error; the sessionId is spent either way.
pub(crate) fn authenticate(registry: &SessionRegistry, params: &HandshakeParams) -> Result<PublicKey> {
    let registration = registry.claim(&params.session_id).ok_or_else(|| {
        CustodyError::Authentication(format!(
            "session {} is unknown, expired or already used",
            params.session_id
        ))
    })?;

    let verified = verify_challenge(&registration.pub_key_hex, params);
    if verified.is_err() {
        registry.abandon(&params.session_id);
    }
    verified
}

fn verify_challenge(pub_key_hex: &str, params: &HandshakeParams) -> Result<PublicKey> {
    let public_key = PublicKey::from_sec1_hex(params.crv, pub_key_hex).map_err(|e| {
        CustodyError::Authentication(format!(
            "registered key {} is not a {} key: {}",
            short_hex(pub_key_hex),
            params.crv,
            e
        ))
    })?;

    let signature = hex::decode(&params.signature)
        .map_err(|e| CustodyError::Authentication(format!("signature is not hex: {e}")))?;

    let challenge = challenge_digest(&params.session_id)?;
    public_key
        .verify_prehash(&challenge, &signature)
        .map_err(|_| {
            CustodyError::Authentication(format!(
                "challenge signature for session {} does not verify",
                params.session_id
            ))
        })?;

    Ok(public_key)
}
