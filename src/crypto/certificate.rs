//! X.509 certificate inspection

use der::DecodePem;
use x509_cert::Certificate;

use super::csr::common_name_of;
use super::keys::PublicKey;
use crate::types::{CustodyError, Result};

/// The parts of an enrollment certificate the identity layer cares about
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub public_key: PublicKey,
    pub subject_common_name: Option<String>,
}

/// Parse a PEM certificate and recover its EC public key.
///
/// Fails with `UnsupportedCurve` for anything that isn't a P-256 or P-384 key.
pub fn certificate_public_key(pem: &str) -> Result<CertificateInfo> {
    let certificate = Certificate::from_pem(pem.trim().as_bytes())
        .map_err(|e| CustodyError::InvalidArgument(format!("certificate PEM: {e}")))?;
    let tbs = &certificate.tbs_certificate;

    Ok(CertificateInfo {
        public_key: PublicKey::from_spki(&tbs.subject_public_key_info)?,
        subject_common_name: common_name_of(&tbs.subject),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::self_signed_certificate;
    use super::*;
    use crate::crypto::{Curve, HolderKey};

    #[test]
    fn test_extracts_p256_key() {
        let key = HolderKey::generate(Curve::P256);
        let pem = self_signed_certificate(&key, "user1");
        let info = certificate_public_key(&pem).unwrap();
        assert_eq!(info.public_key, key.public_key());
        assert_eq!(info.subject_common_name.as_deref(), Some("user1"));
    }

    #[test]
    fn test_extracts_p384_key() {
        let key = HolderKey::generate(Curve::P384);
        let info = certificate_public_key(&self_signed_certificate(&key, "admin")).unwrap();
        assert_eq!(info.public_key.curve(), Curve::P384);
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(matches!(
            certificate_public_key("not a certificate"),
            Err(CustodyError::InvalidArgument(_))
        ));
    }
}
