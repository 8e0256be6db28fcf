//! ECDSA signature canonicalization
//!
//! ECDSA signatures are malleable: `(r, s)` and `(r, N - s)` both verify. The
//! ledger only accepts the low-S form, so every signature coming back from a
//! remote signer is rewritten to `s <= N/2` before it is handed to a caller.

use super::curve::Curve;
use crate::types::{CustodyError, Result};

/// Decode a DER `SEQUENCE { r INTEGER, s INTEGER }`, force low-S and re-encode.
///
/// Idempotent on signatures that are already canonical.
pub fn normalize_signature(raw_der: &[u8], curve: Curve) -> Result<Vec<u8>> {
    let der = match curve {
        Curve::P256 => {
            let signature = p256::ecdsa::Signature::from_der(raw_der).map_err(invalid)?;
            let signature = signature.normalize_s().unwrap_or(signature);
            signature.to_der().as_bytes().to_vec()
        }
        Curve::P384 => {
            let signature = p384::ecdsa::Signature::from_der(raw_der).map_err(invalid)?;
            let signature = signature.normalize_s().unwrap_or(signature);
            signature.to_der().as_bytes().to_vec()
        }
    };
    Ok(der)
}

/// Whether a DER signature already has `s <= N/2`
pub fn is_low_s(signature_der: &[u8], curve: Curve) -> Result<bool> {
    let low = match curve {
        Curve::P256 => p256::ecdsa::Signature::from_der(signature_der)
            .map_err(invalid)?
            .normalize_s()
            .is_none(),
        Curve::P384 => p384::ecdsa::Signature::from_der(signature_der)
            .map_err(invalid)?
            .normalize_s()
            .is_none(),
    };
    Ok(low)
}

fn invalid(err: ecdsa::Error) -> CustodyError {
    CustodyError::InvalidSignature(format!("expected DER SEQUENCE {{ r, s }}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{digest, HolderKey};

    /// Flip a P-256 signature to its high-S twin
    fn high_s_p256(der: &[u8]) -> Vec<u8> {
        let signature = p256::ecdsa::Signature::from_der(der).unwrap();
        let signature = signature.normalize_s().unwrap_or(signature);
        let flipped = p256::ecdsa::Signature::from_scalars(signature.r(), -signature.s()).unwrap();
        flipped.to_der().as_bytes().to_vec()
    }

    fn high_s_p384(der: &[u8]) -> Vec<u8> {
        let signature = p384::ecdsa::Signature::from_der(der).unwrap();
        let signature = signature.normalize_s().unwrap_or(signature);
        let flipped = p384::ecdsa::Signature::from_scalars(signature.r(), -signature.s()).unwrap();
        flipped.to_der().as_bytes().to_vec()
    }

    #[test]
    fn test_high_s_is_rewritten() {
        let key = HolderKey::generate(Curve::P256);
        let hashed = digest(b"hello");
        let high = high_s_p256(&key.sign_prehash(&hashed).unwrap());
        assert!(!is_low_s(&high, Curve::P256).unwrap());

        let normalized = normalize_signature(&high, Curve::P256).unwrap();
        assert!(is_low_s(&normalized, Curve::P256).unwrap());
        key.public_key().verify_prehash(&hashed, &normalized).unwrap();
    }

    #[test]
    fn test_low_s_for_all_curves() {
        for curve in [Curve::P256, Curve::P384] {
            let key = HolderKey::generate(curve);
            for message in [&b"a"[..], b"hello", b"transaction proposal"] {
                let raw = key.sign_prehash(&digest(message)).unwrap();
                let normalized = normalize_signature(&raw, curve).unwrap();
                assert!(is_low_s(&normalized, curve).unwrap());
            }
        }
    }

    #[test]
    fn test_p384_high_s() {
        let key = HolderKey::generate(Curve::P384);
        let hashed = digest(b"p384");
        let high = high_s_p384(&key.sign_prehash(&hashed).unwrap());
        let normalized = normalize_signature(&high, Curve::P384).unwrap();
        assert_ne!(high, normalized);
        assert!(is_low_s(&normalized, Curve::P384).unwrap());
    }

    #[test]
    fn test_idempotent() {
        let key = HolderKey::generate(Curve::P256);
        let raw = key.sign_prehash(&digest(b"idempotent")).unwrap();
        let once = normalize_signature(&raw, Curve::P256).unwrap();
        let twice = normalize_signature(&once, Curve::P256).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_components_rejected() {
        // SEQUENCE { INTEGER 1 } - no s
        let only_r = [0x30, 0x03, 0x02, 0x01, 0x01];
        assert!(matches!(
            normalize_signature(&only_r, Curve::P256),
            Err(CustodyError::InvalidSignature(_))
        ));
        assert!(matches!(
            normalize_signature(&[], Curve::P384),
            Err(CustodyError::InvalidSignature(_))
        ));
    }
}
