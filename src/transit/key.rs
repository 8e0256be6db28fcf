//! Transit-backed [`Key`]

use async_trait::async_trait;
use tracing::debug;

use super::client::TransitClient;
use crate::crypto::{Curve, PublicKey};
use crate::identity::{BackendKind, Key, SigningKeyHandle};
use crate::types::{CustodyError, Result};

/// A named key held by the transit backend
#[derive(Debug, Clone)]
pub struct TransitKey {
    client: TransitClient,
    handle: SigningKeyHandle,
}

impl TransitKey {
    /// Reference a key whose curve is already known
    pub fn new(client: TransitClient, key_name: impl Into<String>, curve: Curve) -> Result<Self> {
        let key_name = key_name.into();
        if key_name.is_empty() {
            return Err(CustodyError::Config("transit key name is required".into()));
        }

        Ok(Self {
            client,
            handle: SigningKeyHandle {
                identifier: key_name,
                backend: BackendKind::Transit,
                curve,
            },
        })
    }

    /// Reference a key and learn its curve from the backend
    pub async fn open(client: TransitClient, key_name: impl Into<String>) -> Result<Self> {
        let key_name = key_name.into();
        if key_name.is_empty() {
            return Err(CustodyError::Config("transit key name is required".into()));
        }
        let curve = client.get_public_key(&key_name).await?.curve();
        Self::new(client, key_name, curve)
    }

    pub fn key_name(&self) -> &str {
        &self.handle.identifier
    }

    pub fn client(&self) -> &TransitClient {
        &self.client
    }
}

#[async_trait]
impl Key for TransitKey {
    fn handle(&self) -> &SigningKeyHandle {
        &self.handle
    }

    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.client
            .sign(self.key_name(), digest, true, self.handle.curve)
            .await
    }

    async fn public_key(&self) -> Result<PublicKey> {
        let public_key = self.client.get_public_key(self.key_name()).await?;
        if public_key.curve() != self.handle.curve {
            return Err(CustodyError::UnsupportedCurve(format!(
                "transit key {} is now {} but was opened as {}",
                self.key_name(),
                public_key.curve(),
                self.handle.curve
            )));
        }
        Ok(public_key)
    }

    async fn rotate(&self) -> Result<()> {
        debug!(key_name = %self.key_name(), "Rotating transit key");
        self.client.rotate_key(self.key_name()).await
    }
}
