//! Tethered [`Key`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::session::RemoteSigningSession;
use crate::crypto::PublicKey;
use crate::identity::{BackendKind, Key, SigningKeyHandle};
use crate::types::{CustodyError, Result};

/// A key held by a connected holder, reached through its session
#[derive(Debug, Clone)]
pub struct TetheredKey {
    session: Arc<RemoteSigningSession>,
    handle: SigningKeyHandle,
    sign_timeout: Duration,
}

impl TetheredKey {
    pub fn new(session: Arc<RemoteSigningSession>, sign_timeout: Duration) -> Self {
        let handle = SigningKeyHandle {
            identifier: session.public_key_hex().to_string(),
            backend: BackendKind::Tethered,
            curve: session.curve(),
        };
        Self {
            session,
            handle,
            sign_timeout,
        }
    }

    pub fn session(&self) -> &Arc<RemoteSigningSession> {
        &self.session
    }
}

#[async_trait]
impl Key for TetheredKey {
    fn handle(&self) -> &SigningKeyHandle {
        &self.handle
    }

    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.session.sign(digest, true, self.sign_timeout).await
    }

    async fn public_key(&self) -> Result<PublicKey> {
        Ok(self.session.public_key().clone())
    }

    async fn rotate(&self) -> Result<()> {
        Err(CustodyError::UnsupportedOperation(
            "tethered keys are rotated on the holder's device, then registered again".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Curve, HolderKey};

    #[tokio::test]
    async fn test_rotate_unsupported_and_public_key_cached() {
        let holder = HolderKey::generate(Curve::P384);
        let (session, _outbound) = RemoteSigningSession::new("s1".into(), holder.public_key());
        let key = TetheredKey::new(session, Duration::from_secs(1));

        assert_eq!(key.handle().backend, BackendKind::Tethered);
        assert_eq!(key.handle().curve, Curve::P384);
        assert_eq!(key.public_key().await.unwrap(), holder.public_key());
        assert!(matches!(
            key.rotate().await,
            Err(CustodyError::UnsupportedOperation(_))
        ));
    }
}
