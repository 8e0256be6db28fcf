//! The Key capability
//!
//! Every custody backend (in-process, transit, tethered) is exposed through
//! the same four operations. The ledger SDK additionally expects a handful of
//! introspection methods that mean nothing for a key held elsewhere; those
//! live on [`SdkKey`] and always fail with `UnsupportedOperation`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{assemble_csr, build_csr_tbs, digest, Curve, PublicKey, SignatureAlgorithm};
use crate::types::{CustodyError, Result};

/// Where the private key material lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Local,
    Transit,
    Tethered,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Transit => f.write_str("transit"),
            Self::Tethered => f.write_str("tethered"),
        }
    }
}

/// Immutable description of a signing key, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyHandle {
    /// Transit key name, or public key hex for tethered/local keys
    pub identifier: String,
    pub backend: BackendKind,
    pub curve: Curve,
}

/// Uniform signing capability
#[async_trait]
pub trait Key: Send + Sync {
    fn handle(&self) -> &SigningKeyHandle;

    /// Sign a SHA-256 digest; returns a canonical (low-S) DER signature
    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>>;

    async fn public_key(&self) -> Result<PublicKey>;

    /// Build and sign a PKCS#10 request for `CN=<common_name>`
    async fn generate_csr(&self, common_name: &str) -> Result<String> {
        let public_key = self.public_key().await?;
        if public_key.curve() != self.handle().curve {
            return Err(CustodyError::UnsupportedCurve(format!(
                "key {} reports a {} public key but was opened as {}",
                self.handle().identifier,
                public_key.curve(),
                self.handle().curve
            )));
        }

        let tbs = build_csr_tbs(&public_key, common_name)?;
        let signature = self.sign(&digest(&tbs)).await?;
        assemble_csr(&tbs, &signature, SignatureAlgorithm::EcdsaWithSha256)
    }

    async fn rotate(&self) -> Result<()>;
}

/// Adapter presenting a [`Key`] in the shape the ledger SDK expects
#[derive(Clone)]
pub struct SdkKey {
    inner: Arc<dyn Key>,
}

impl SdkKey {
    pub fn new(inner: Arc<dyn Key>) -> Self {
        Self { inner }
    }

    pub fn key(&self) -> &Arc<dyn Key> {
        &self.inner
    }

    pub async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.inner.sign(digest).await
    }

    pub async fn public_key(&self) -> Result<PublicKey> {
        self.inner.public_key().await
    }

    pub fn ski(&self) -> Result<String> {
        Err(self.unsupported("ski"))
    }

    pub fn raw_handle(&self) -> Result<String> {
        Err(self.unsupported("raw_handle"))
    }

    pub fn is_symmetric(&self) -> Result<bool> {
        Err(self.unsupported("is_symmetric"))
    }

    pub fn is_private(&self) -> Result<bool> {
        Err(self.unsupported("is_private"))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Err(self.unsupported("to_bytes"))
    }

    fn unsupported(&self, method: &str) -> CustodyError {
        let handle = self.inner.handle();
        CustodyError::UnsupportedOperation(format!(
            "{} is not available for {} key {}",
            method, handle.backend, handle.identifier
        ))
    }
}

impl fmt::Debug for SdkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkKey")
            .field("handle", self.inner.handle())
            .finish()
    }
}
