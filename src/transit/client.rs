//! HTTP client for a Vault-style transit secrets engine
//!
//! The engine holds the private key material; this client only ever sees
//! public keys and signatures. Every call is a stateless round trip: there is
//! no caching of key metadata, so a rotation on the backend is picked up by the
//! very next call.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::crypto::{normalize_signature, Curve, PublicKey};
use crate::types::{CustodyError, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Connection settings for the transit backend
#[derive(Clone)]
pub struct TransitConfig {
    /// Base URL, e.g. `http://127.0.0.1:8200`
    pub endpoint: String,
    /// Mount path of the transit engine (default: `transit`)
    pub mount_path: String,
    /// Bearer credential sent with every request
    pub token: String,
    /// Per-request timeout (default: 10 seconds)
    pub request_timeout: Duration,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8200".to_string(),
            mount_path: "transit".to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TransitConfig {
    pub fn new(endpoint: impl Into<String>, mount_path: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mount_path: mount_path.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(CustodyError::Config("transit endpoint is required".into()));
        }
        if self.mount_path.trim_matches('/').is_empty() {
            return Err(CustodyError::Config("transit mount path is required".into()));
        }
        if self.token.is_empty() {
            return Err(CustodyError::Config("transit token is required".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for TransitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitConfig")
            .field("endpoint", &self.endpoint)
            .field("mount_path", &self.mount_path)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    input: String,
    prehashed: bool,
    marshaling_algorithm: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    #[serde(rename = "type")]
    key_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SignData {
    signature: Option<String>,
}

/// `keys` stays untyped until the key type is known: symmetric keys map
/// versions to creation timestamps rather than objects.
#[derive(Debug, Deserialize)]
struct KeyData {
    latest_version: u64,
    #[serde(rename = "type")]
    key_type: String,
    #[serde(default)]
    keys: Value,
}

// =============================================================================
// Client
// =============================================================================

/// Stateless transit engine client
#[derive(Clone)]
pub struct TransitClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl TransitClient {
    pub fn new(config: TransitConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("fabric-custody/0.1")
            .build()
            .map_err(|e| CustodyError::Config(format!("transit HTTP client: {e}")))?;

        let base_url = format!(
            "{}/v1/{}",
            config.endpoint.trim_end_matches('/'),
            config.mount_path.trim_matches('/')
        );

        Ok(Self {
            base_url,
            token: config.token,
            http,
        })
    }

    /// Sign `digest` and return the backend's signature exactly as it decoded,
    /// before low-S canonicalization.
    pub async fn sign_raw(&self, key_name: &str, digest: &[u8], pre_hashed: bool) -> Result<Vec<u8>> {
        check_key_name(key_name)?;
        debug!(key_name = %key_name, pre_hashed, "Transit sign");

        let body = SignRequest {
            input: BASE64.encode(digest),
            prehashed: pre_hashed,
            marshaling_algorithm: "asn1",
        };
        let response = self
            .http
            .post(self.url(&format!("sign/{key_name}")))
            .header(TOKEN_HEADER, &self.token)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, key_name).await?;

        let envelope: Envelope<SignData> = response.json().await?;
        let signature = envelope
            .data
            .and_then(|data| data.signature)
            .ok_or_else(|| {
                CustodyError::Protocol(format!("sign response for {key_name} has no data.signature"))
            })?;
        decode_signature_field(&signature)
    }

    /// Sign `digest` and return a canonical low-S DER signature
    pub async fn sign(
        &self,
        key_name: &str,
        digest: &[u8],
        pre_hashed: bool,
        curve: Curve,
    ) -> Result<Vec<u8>> {
        let raw = self.sign_raw(key_name, digest, pre_hashed).await?;
        normalize_signature(&raw, curve)
    }

    /// Public key of the latest version of `key_name`
    pub async fn get_public_key(&self, key_name: &str) -> Result<PublicKey> {
        check_key_name(key_name)?;
        debug!(key_name = %key_name, "Transit read key");

        let response = self
            .http
            .get(self.url(&format!("keys/{key_name}")))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        let response = check_status(response, key_name).await?;

        let envelope: Envelope<KeyData> = response.json().await?;
        let data = envelope.data.ok_or_else(|| {
            CustodyError::Protocol(format!("key response for {key_name} has no data"))
        })?;
        public_key_from_metadata(key_name, &data)
    }

    /// Ask the backend to create `key_name`. What happens when the name
    /// already exists is up to the backend.
    pub async fn create_key(&self, key_name: &str, curve: Curve) -> Result<()> {
        check_key_name(key_name)?;

        let response = self
            .http
            .post(self.url(&format!("keys/{key_name}")))
            .header(TOKEN_HEADER, &self.token)
            .json(&CreateKeyRequest {
                key_type: curve.transit_type(),
            })
            .send()
            .await?;
        check_status(response, key_name).await?;

        info!(key_name = %key_name, curve = %curve, "Transit key created");
        Ok(())
    }

    /// Add a new version under `key_name`; later calls use it
    pub async fn rotate_key(&self, key_name: &str) -> Result<()> {
        check_key_name(key_name)?;

        let response = self
            .http
            .post(self.url(&format!("keys/{key_name}/rotate")))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        check_status(response, key_name).await?;

        info!(key_name = %key_name, "Transit key rotated");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl fmt::Debug for TransitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn check_key_name(key_name: &str) -> Result<()> {
    if key_name.is_empty() || key_name.contains(&['/', '?', '#'][..]) {
        return Err(CustodyError::InvalidArgument(format!(
            "invalid transit key name {key_name:?}"
        )));
    }
    Ok(())
}

async fn check_status(response: reqwest::Response, key_name: &str) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(CustodyError::KeyNotFound(key_name.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CustodyError::Unauthorized(
            format!("transit backend refused access to key {key_name}"),
        )),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(CustodyError::Http(format!(
                "transit backend returned {status} for key {key_name}: {body}"
            )))
        }
    }
}

/// Split `"<prefix>:<version>:<base64>"` and decode the trailing segment
fn decode_signature_field(field: &str) -> Result<Vec<u8>> {
    let mut parts = field.splitn(3, ':');
    let (Some(_prefix), Some(_version), Some(encoded)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(CustodyError::Protocol(format!(
            "signature {field:?} is not <prefix>:<version>:<base64>"
        )));
    };
    BASE64
        .decode(encoded)
        .map_err(|e| CustodyError::Protocol(format!("signature payload is not base64: {e}")))
}

fn public_key_from_metadata(key_name: &str, data: &KeyData) -> Result<PublicKey> {
    let curve = Curve::from_transit_type(&data.key_type)?;

    let pem = data
        .keys
        .get(data.latest_version.to_string())
        .and_then(|version| version.get("public_key"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CustodyError::Protocol(format!(
                "key {key_name} has no public key for version {}",
                data.latest_version
            ))
        })?;

    let public_key = PublicKey::from_public_key_pem(pem)?;
    if public_key.curve() != curve {
        return Err(CustodyError::Protocol(format!(
            "key {key_name} is typed {} but holds a {} key",
            data.key_type,
            public_key.curve()
        )));
    }
    Ok(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HolderKey;
    use serde_json::json;

    #[test]
    fn test_config_requires_fields() {
        let missing_token = TransitConfig::new("http://vault:8200", "transit", "");
        assert!(matches!(
            TransitClient::new(missing_token),
            Err(CustodyError::Config(_))
        ));

        let missing_endpoint = TransitConfig::new("", "transit", "s.token");
        assert!(matches!(
            TransitClient::new(missing_endpoint),
            Err(CustodyError::Config(_))
        ));

        let missing_mount = TransitConfig::new("http://vault:8200", "/", "s.token");
        assert!(matches!(
            TransitClient::new(missing_mount),
            Err(CustodyError::Config(_))
        ));
    }

    #[test]
    fn test_url_layout() {
        let client =
            TransitClient::new(TransitConfig::new("http://vault:8200/", "/transit/", "s.token"))
                .unwrap();
        assert_eq!(client.url("sign/app"), "http://vault:8200/v1/transit/sign/app");
    }

    #[test]
    fn test_debug_hides_token() {
        let config = TransitConfig::new("http://vault:8200", "transit", "s.secret");
        assert!(!format!("{config:?}").contains("s.secret"));
        let client = TransitClient::new(config).unwrap();
        assert!(!format!("{client:?}").contains("s.secret"));
    }

    #[test]
    fn test_decode_signature_field() {
        let encoded = BASE64.encode([0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]);
        let decoded = decode_signature_field(&format!("vault:v3:{encoded}")).unwrap();
        assert_eq!(decoded[0], 0x30);

        assert!(matches!(
            decode_signature_field("vault:v1"),
            Err(CustodyError::Protocol(_))
        ));
        assert!(matches!(
            decode_signature_field("vault:v1:!!!"),
            Err(CustodyError::Protocol(_))
        ));
    }

    #[test]
    fn test_key_name_validation() {
        assert!(check_key_name("app-signer").is_ok());
        assert!(check_key_name("").is_err());
        assert!(check_key_name("../sys").is_err());
    }

    #[test]
    fn test_metadata_uses_latest_version() {
        let old = HolderKey::generate(Curve::P256).public_key();
        let new = HolderKey::generate(Curve::P256).public_key();
        let data: KeyData = serde_json::from_value(json!({
            "latest_version": 2,
            "type": "ecdsa-p256",
            "keys": {
                "1": { "public_key": old.to_public_key_pem().unwrap() },
                "2": { "public_key": new.to_public_key_pem().unwrap() }
            }
        }))
        .unwrap();

        assert_eq!(public_key_from_metadata("k", &data).unwrap(), new);
    }

    #[test]
    fn test_metadata_rejects_symmetric_type() {
        let data: KeyData = serde_json::from_value(json!({
            "latest_version": 1,
            "type": "aes256-gcm96",
            "keys": { "1": 1700000000 }
        }))
        .unwrap();

        assert!(matches!(
            public_key_from_metadata("k", &data),
            Err(CustodyError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn test_metadata_curve_mismatch() {
        let p384 = HolderKey::generate(Curve::P384).public_key();
        let data: KeyData = serde_json::from_value(json!({
            "latest_version": 1,
            "type": "ecdsa-p256",
            "keys": { "1": { "public_key": p384.to_public_key_pem().unwrap() } }
        }))
        .unwrap();

        assert!(matches!(
            public_key_from_metadata("k", &data),
            Err(CustodyError::Protocol(_))
        ));
    }
}
