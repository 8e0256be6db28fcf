//! Curve-tagged EC keys
//!
//! [`PublicKey`] is what every signing backend reports and what signatures are
//! verified against. [`HolderKey`] is a private key that lives in this process:
//! the registrar's local key, or the holder wallet on the tethered side.

use std::fmt;

use const_oid::db::rfc5912::ID_EC_PUBLIC_KEY;
use const_oid::ObjectIdentifier;
use der::{Decode, DecodePem};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use spki::SubjectPublicKeyInfoOwned;
use zeroize::Zeroizing;

use super::curve::Curve;
use crate::types::{CustodyError, Result};

// =============================================================================
// Public keys
// =============================================================================

/// EC public key on one of the supported curves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Parse a SEC1 encoded point (compressed or uncompressed)
    pub fn from_sec1_bytes(curve: Curve, bytes: &[u8]) -> Result<Self> {
        let key = match curve {
            Curve::P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map(Self::P256),
            Curve::P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map(Self::P384),
        };
        key.map_err(|_| {
            CustodyError::InvalidArgument(format!("not a valid {} public key point", curve))
        })
    }

    /// Parse a hex encoded SEC1 point
    pub fn from_sec1_hex(curve: Curve, pub_key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(pub_key_hex.trim())
            .map_err(|e| CustodyError::InvalidArgument(format!("public key hex: {e}")))?;
        Self::from_sec1_bytes(curve, &bytes)
    }

    /// Build from a SubjectPublicKeyInfo; the curve comes from its parameters
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        if spki.algorithm.oid != ID_EC_PUBLIC_KEY {
            return Err(CustodyError::UnsupportedCurve(format!(
                "public key algorithm {} is not EC",
                spki.algorithm.oid
            )));
        }
        let curve_oid = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| CustodyError::UnsupportedCurve("EC key without named curve".into()))?
            .decode_as::<ObjectIdentifier>()?;
        let curve = Curve::from_oid(&curve_oid)?;
        let point = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| CustodyError::InvalidArgument("public key bit string is not octet aligned".into()))?;
        Self::from_sec1_bytes(curve, point)
    }

    /// Parse a DER encoded SubjectPublicKeyInfo
    pub fn from_spki_der(der_bytes: &[u8]) -> Result<Self> {
        Self::from_spki(&SubjectPublicKeyInfoOwned::from_der(der_bytes)?)
    }

    /// Parse a `PUBLIC KEY` PEM block
    pub fn from_public_key_pem(pem: &str) -> Result<Self> {
        let spki = SubjectPublicKeyInfoOwned::from_pem(pem.trim().as_bytes())?;
        Self::from_spki(&spki)
    }

    pub fn curve(&self) -> Curve {
        match self {
            Self::P256(_) => Curve::P256,
            Self::P384(_) => Curve::P384,
        }
    }

    /// Uncompressed SEC1 point (`04 || x || y`)
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        match self {
            Self::P256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            Self::P384(key) => key.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Lowercase hex of the uncompressed SEC1 point
    pub fn to_sec1_hex(&self) -> String {
        hex::encode(self.to_sec1_bytes())
    }

    /// Affine x coordinate as hex
    pub fn x_hex(&self) -> String {
        let size = self.curve().field_size();
        hex::encode(&self.to_sec1_bytes()[1..1 + size])
    }

    /// Affine y coordinate as hex
    pub fn y_hex(&self) -> String {
        let size = self.curve().field_size();
        hex::encode(&self.to_sec1_bytes()[1 + size..])
    }

    /// DER encoded SubjectPublicKeyInfo
    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            Self::P256(key) => key.to_public_key_der(),
            Self::P384(key) => key.to_public_key_der(),
        }
        .map_err(|e| CustodyError::Internal(format!("encode public key: {e}")))?;
        Ok(document.as_bytes().to_vec())
    }

    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        Ok(SubjectPublicKeyInfoOwned::from_der(&self.to_spki_der()?)?)
    }

    /// `PUBLIC KEY` PEM block
    pub fn to_public_key_pem(&self) -> Result<String> {
        match self {
            Self::P256(key) => key.to_public_key_pem(LineEnding::LF),
            Self::P384(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| CustodyError::Internal(format!("encode public key: {e}")))
    }

    /// Verify a DER signature over an already-hashed digest.
    ///
    /// High-S signatures are accepted here; canonicalization happens afterwards.
    pub fn verify_prehash(&self, digest: &[u8], signature_der: &[u8]) -> Result<()> {
        match self {
            Self::P256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| CustodyError::InvalidSignature(e.to_string()))?;
                key.verify_prehash(digest, &signature)
            }
            Self::P384(key) => {
                let signature = p384::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| CustodyError::InvalidSignature(e.to_string()))?;
                key.verify_prehash(digest, &signature)
            }
        }
        .map_err(|_| {
            CustodyError::SignatureVerification(format!(
                "signature does not match {} public key {}...",
                self.curve(),
                short_hex(&self.to_sec1_hex())
            ))
        })
    }
}

// =============================================================================
// Private keys held in-process
// =============================================================================

/// EC private key on one of the supported curves
#[derive(Clone)]
pub enum HolderKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl HolderKey {
    /// Generate a fresh key from the OS random number generator
    pub fn generate(curve: Curve) -> Self {
        match curve {
            Curve::P256 => Self::P256(p256::ecdsa::SigningKey::random(&mut OsRng)),
            Curve::P384 => Self::P384(p384::ecdsa::SigningKey::random(&mut OsRng)),
        }
    }

    /// Parse a PKCS#8 (`PRIVATE KEY`) or SEC1 (`EC PRIVATE KEY`) PEM block.
    ///
    /// The curve is taken from the key itself.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let pem = pem.trim();
        if pem.contains("BEGIN EC PRIVATE KEY") {
            if let Ok(secret) = p256::SecretKey::from_sec1_pem(pem) {
                return Ok(Self::P256(secret.into()));
            }
            if let Ok(secret) = p384::SecretKey::from_sec1_pem(pem) {
                return Ok(Self::P384(secret.into()));
            }
        } else {
            if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
                return Ok(Self::P256(key));
            }
            if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
                return Ok(Self::P384(key));
            }
        }
        Err(CustodyError::UnsupportedCurve(
            "private key is not a P-256 or P-384 EC key".into(),
        ))
    }

    /// PKCS#8 PEM encoding; the buffer is wiped on drop
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        match self {
            Self::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            Self::P384(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| CustodyError::Internal(format!("encode private key: {e}")))
    }

    pub fn curve(&self) -> Curve {
        match self {
            Self::P256(_) => Curve::P256,
            Self::P384(_) => Curve::P384,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::P256(key) => PublicKey::P256(*key.verifying_key()),
            Self::P384(key) => PublicKey::P384(*key.verifying_key()),
        }
    }

    /// Sign an already-hashed digest, returning a DER signature
    pub fn sign_prehash(&self, digest: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::P256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| CustodyError::InvalidArgument(format!("sign digest: {e}")))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            Self::P384(key) => {
                let signature: p384::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| CustodyError::InvalidArgument(format!("sign digest: {e}")))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

impl fmt::Debug for HolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderKey")
            .field("curve", &self.curve())
            .field("public_key", &self.public_key().to_sec1_hex())
            .finish()
    }
}

/// First 12 characters of a hex string, for log lines
pub(crate) fn short_hex(value: &str) -> &str {
    &value[..value.len().min(12)]
}
