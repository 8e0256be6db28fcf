//! In-process [`Key`]
//!
//! Used for registrar/admin identities whose private key sits next to the
//! certificate.

use async_trait::async_trait;

use super::key::{BackendKind, Key, SigningKeyHandle};
use crate::crypto::{normalize_signature, HolderKey, PublicKey};
use crate::types::{CustodyError, Result};

#[derive(Debug, Clone)]
pub struct LocalKey {
    key: HolderKey,
    handle: SigningKeyHandle,
}

impl LocalKey {
    pub fn new(key: HolderKey) -> Self {
        let handle = SigningKeyHandle {
            identifier: key.public_key().to_sec1_hex(),
            backend: BackendKind::Local,
            curve: key.curve(),
        };
        Self { key, handle }
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self::new(HolderKey::from_pem(pem)?))
    }
}

#[async_trait]
impl Key for LocalKey {
    fn handle(&self) -> &SigningKeyHandle {
        &self.handle
    }

    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let signature = self.key.sign_prehash(digest)?;
        normalize_signature(&signature, self.handle.curve)
    }

    async fn public_key(&self) -> Result<PublicKey> {
        Ok(self.key.public_key())
    }

    async fn rotate(&self) -> Result<()> {
        Err(CustodyError::UnsupportedOperation(
            "local keys are replaced by enrolling again".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{digest, is_low_s, Curve};

    #[tokio::test]
    async fn test_sign_is_low_s_and_verifies() {
        for curve in [Curve::P256, Curve::P384] {
            let key = LocalKey::new(HolderKey::generate(curve));
            let hashed = digest(b"proposal");
            let signature = key.sign(&hashed).await.unwrap();
            assert!(is_low_s(&signature, curve).unwrap());
            key.public_key()
                .await
                .unwrap()
                .verify_prehash(&hashed, &signature)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_pem_roundtrip_and_rotate() {
        let original = HolderKey::generate(Curve::P256);
        let pem = original.to_pkcs8_pem().unwrap();
        let key = LocalKey::from_pem(&pem).unwrap();
        assert_eq!(key.handle().identifier, original.public_key().to_sec1_hex());
        assert_eq!(key.handle().backend, BackendKind::Local);
        assert!(matches!(
            key.rotate().await,
            Err(CustodyError::UnsupportedOperation(_))
        ));
    }
}
