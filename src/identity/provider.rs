//! Identity providers
//!
//! An [`IdentityProvider`] turns a stored identity into a [`UserContext`]:
//! the certificate, org and a signing key the ledger SDK can use. One provider
//! per custody model.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::key::{Key, SdkKey};
use super::local::LocalKey;
use super::types::{Identity, IdentityType, KeyReference};
use crate::crypto::{certificate_public_key, CertificateInfo, Curve, PublicKey};
use crate::tethered::TetheredSignerServer;
use crate::transit::{TransitClient, TransitConfig, TransitKey};
use crate::types::{CustodyError, Result};

// =============================================================================
// User context
// =============================================================================

/// Signing identity handed to the ledger SDK
#[derive(Debug, Clone)]
pub struct UserContext {
    name: String,
    msp_id: String,
    certificate: String,
    key: SdkKey,
}

impl UserContext {
    pub fn new(
        name: impl Into<String>,
        msp_id: impl Into<String>,
        certificate: impl Into<String>,
        key: Arc<dyn Key>,
    ) -> Self {
        Self {
            name: name.into(),
            msp_id: msp_id.into(),
            certificate: certificate.into(),
            key: SdkKey::new(key),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn key(&self) -> &SdkKey {
        &self.key
    }

    /// Sign a SHA-256 digest with the identity's key
    pub async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.key.sign(digest).await
    }
}

// =============================================================================
// Provider trait
// =============================================================================

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn identity_type(&self) -> IdentityType;

    /// Build the user context for an enrolled identity
    async fn get_user_context(&self, identity: &Identity, name: &str) -> Result<UserContext>;

    /// Signing key of an identity that may not have a certificate yet
    async fn key_for(&self, identity: &Identity) -> Result<Arc<dyn Key>>;
}

/// Checks shared by every provider; returns the certificate's key
fn prepare(
    provider: IdentityType,
    identity: &Identity,
    name: &str,
) -> Result<(CertificateInfo, String)> {
    if name.is_empty() {
        return Err(CustodyError::InvalidArgument("user name is required".into()));
    }
    check_type(provider, identity)?;
    let certificate = identity.require_certificate()?;
    let info = certificate_public_key(certificate)?;
    debug!(
        name = %name,
        identity_type = %provider,
        curve = %info.public_key.curve(),
        "Building user context"
    );
    Ok((info, certificate.to_string()))
}

fn check_type(provider: IdentityType, identity: &Identity) -> Result<()> {
    if identity.identity_type() != provider {
        return Err(CustodyError::UnsupportedIdentityType(format!(
            "{} provider cannot serve a {} identity",
            provider,
            identity.identity_type()
        )));
    }
    Ok(())
}

fn ensure_matches(expected: &PublicKey, actual: &PublicKey, what: &str) -> Result<()> {
    if expected != actual {
        return Err(CustodyError::InvalidArgument(format!(
            "{what} does not match the certificate public key"
        )));
    }
    Ok(())
}

// =============================================================================
// Transit
// =============================================================================

/// Identities whose key is held by the transit backend
#[derive(Debug, Clone)]
pub struct TransitIdentityProvider {
    config: TransitConfig,
}

impl TransitIdentityProvider {
    /// `config.token` is used for identities that carry no token of their own
    pub fn new(config: TransitConfig) -> Self {
        Self { config }
    }

    fn client(&self, token: &str) -> Result<TransitClient> {
        let mut config = self.config.clone();
        if !token.is_empty() {
            config.token = token.to_string();
        }
        TransitClient::new(config)
    }

    fn reference(identity: &Identity) -> Result<(&str, &str)> {
        match &identity.key {
            KeyReference::Transit { key_name, token } => Ok((key_name, token)),
            _ => Err(CustodyError::UnsupportedIdentityType(
                identity.identity_type().to_string(),
            )),
        }
    }
}

#[async_trait]
impl IdentityProvider for TransitIdentityProvider {
    fn identity_type(&self) -> IdentityType {
        IdentityType::Transit
    }

    async fn get_user_context(&self, identity: &Identity, name: &str) -> Result<UserContext> {
        let (info, certificate) = prepare(IdentityType::Transit, identity, name)?;
        let (key_name, token) = Self::reference(identity)?;

        let key = TransitKey::new(self.client(token)?, key_name, info.public_key.curve())?;
        Ok(UserContext::new(name, &identity.msp_id, certificate, Arc::new(key)))
    }

    async fn key_for(&self, identity: &Identity) -> Result<Arc<dyn Key>> {
        check_type(IdentityType::Transit, identity)?;
        let (key_name, token) = Self::reference(identity)?;
        let key = TransitKey::open(self.client(token)?, key_name).await?;
        Ok(Arc::new(key))
    }
}

// =============================================================================
// Tethered
// =============================================================================

/// Identities whose key is held by a connected holder
#[derive(Clone)]
pub struct TetheredIdentityProvider {
    server: Arc<TetheredSignerServer>,
}

impl TetheredIdentityProvider {
    pub fn new(server: Arc<TetheredSignerServer>) -> Self {
        Self { server }
    }

    fn claimed_key(identity: &Identity, curve: Option<Curve>) -> Result<Option<PublicKey>> {
        let KeyReference::Tethered {
            pub_key_hex: Some(pub_key_hex),
        } = &identity.key
        else {
            return Ok(None);
        };

        let curves = match curve {
            Some(curve) => vec![curve],
            None => vec![Curve::P256, Curve::P384],
        };
        curves
            .into_iter()
            .find_map(|curve| PublicKey::from_sec1_hex(curve, pub_key_hex).ok())
            .map(Some)
            .ok_or_else(|| {
                CustodyError::InvalidArgument("claimed public key is not a P-256 or P-384 key".into())
            })
    }
}

impl std::fmt::Debug for TetheredIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetheredIdentityProvider")
            .field("stats", &self.server.stats())
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for TetheredIdentityProvider {
    fn identity_type(&self) -> IdentityType {
        IdentityType::Tethered
    }

    async fn get_user_context(&self, identity: &Identity, name: &str) -> Result<UserContext> {
        let (info, certificate) = prepare(IdentityType::Tethered, identity, name)?;
        if let Some(claimed) = Self::claimed_key(identity, Some(info.public_key.curve()))? {
            ensure_matches(&info.public_key, &claimed, "claimed public key")?;
        }

        let key = self.server.key_for_public_key(&info.public_key)?;
        Ok(UserContext::new(name, &identity.msp_id, certificate, Arc::new(key)))
    }

    async fn key_for(&self, identity: &Identity) -> Result<Arc<dyn Key>> {
        check_type(IdentityType::Tethered, identity)?;
        let public_key = match identity.certificate.as_deref() {
            Some(pem) => certificate_public_key(pem)?.public_key,
            None => Self::claimed_key(identity, None)?.ok_or_else(|| {
                CustodyError::InvalidArgument(
                    "tethered identity needs a certificate or a claimed public key".into(),
                )
            })?,
        };
        Ok(Arc::new(self.server.key_for_public_key(&public_key)?))
    }
}

// =============================================================================
// Local
// =============================================================================

/// Identities that keep their private key next to the certificate
#[derive(Debug, Clone, Default)]
pub struct LocalIdentityProvider;

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self
    }

    fn local_key(identity: &Identity) -> Result<LocalKey> {
        match &identity.key {
            KeyReference::Local { private_key } => LocalKey::from_pem(private_key),
            _ => Err(CustodyError::UnsupportedIdentityType(
                identity.identity_type().to_string(),
            )),
        }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn identity_type(&self) -> IdentityType {
        IdentityType::Local
    }

    async fn get_user_context(&self, identity: &Identity, name: &str) -> Result<UserContext> {
        let (info, certificate) = prepare(IdentityType::Local, identity, name)?;
        let key = Self::local_key(identity)?;
        ensure_matches(&info.public_key, &key.public_key().await?, "private key")?;
        Ok(UserContext::new(name, &identity.msp_id, certificate, Arc::new(key)))
    }

    async fn key_for(&self, identity: &Identity) -> Result<Arc<dyn Key>> {
        check_type(IdentityType::Local, identity)?;
        Ok(Arc::new(Self::local_key(identity)?))
    }
}
