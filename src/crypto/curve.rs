//! Curve catalog
//!
//! Exactly two curves are supported: NIST P-256 and NIST P-384. Every other
//! identifier is rejected with [`CustodyError::UnsupportedCurve`].

use std::fmt;
use std::str::FromStr;

use const_oid::db::rfc5912::{SECP_256_R_1, SECP_384_R_1};
use const_oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use crate::types::{CustodyError, Result};

/// A supported elliptic curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    /// Short name used on the wire (`crv` handshake parameter, wallet files)
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::P256 => "p256",
            Self::P384 => "p384",
        }
    }

    /// SEC 2 name, as embedded in certificates and CSRs
    pub fn long_name(&self) -> &'static str {
        match self {
            Self::P256 => "secp256r1",
            Self::P384 => "secp384r1",
        }
    }

    /// Key type string understood by the transit backend
    pub fn transit_type(&self) -> &'static str {
        match self {
            Self::P256 => "ecdsa-p256",
            Self::P384 => "ecdsa-p384",
        }
    }

    /// Map a transit backend key type to a curve
    pub fn from_transit_type(key_type: &str) -> Result<Self> {
        match key_type {
            "ecdsa-p256" => Ok(Self::P256),
            "ecdsa-p384" => Ok(Self::P384),
            other => Err(CustodyError::UnsupportedCurve(format!(
                "transit key type '{}' (only ecdsa-p256 and ecdsa-p384 are supported)",
                other
            ))),
        }
    }

    /// Named-curve OID carried in SubjectPublicKeyInfo parameters
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::P256 => SECP_256_R_1,
            Self::P384 => SECP_384_R_1,
        }
    }

    /// Map a named-curve OID to a curve
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        if *oid == SECP_256_R_1 {
            Ok(Self::P256)
        } else if *oid == SECP_384_R_1 {
            Ok(Self::P384)
        } else {
            Err(CustodyError::UnsupportedCurve(format!("curve OID {}", oid)))
        }
    }

    /// Key size in bits
    pub fn key_bits(&self) -> u32 {
        match self {
            Self::P256 => 256,
            Self::P384 => 384,
        }
    }

    /// Map a key size in bits to a curve
    pub fn from_key_bits(bits: u32) -> Result<Self> {
        match bits {
            256 => Ok(Self::P256),
            384 => Ok(Self::P384),
            other => Err(CustodyError::UnsupportedCurve(format!("{}-bit key", other))),
        }
    }

    /// Size of one field element (and of each affine coordinate) in bytes
    pub fn field_size(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Curve {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "p256" | "p-256" | "secp256r1" | "prime256v1" | "ecdsa-p256" => Ok(Self::P256),
            "p384" | "p-384" | "secp384r1" | "ecdsa-p384" => Ok(Self::P384),
            other => Err(CustodyError::UnsupportedCurve(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("p256".parse::<Curve>().unwrap(), Curve::P256);
        assert_eq!("P-384".parse::<Curve>().unwrap(), Curve::P384);
        assert_eq!("secp256r1".parse::<Curve>().unwrap(), Curve::P256);
        assert!(matches!(
            "secp256k1".parse::<Curve>(),
            Err(CustodyError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn test_transit_types() {
        assert_eq!(Curve::from_transit_type("ecdsa-p384").unwrap(), Curve::P384);
        assert_eq!(Curve::P256.transit_type(), "ecdsa-p256");
        assert!(matches!(
            Curve::from_transit_type("ed25519"),
            Err(CustodyError::UnsupportedCurve(_))
        ));
        assert!(Curve::from_transit_type("rsa-2048").is_err());
    }

    #[test]
    fn test_oid_roundtrip() {
        for curve in [Curve::P256, Curve::P384] {
            assert_eq!(Curve::from_oid(&curve.oid()).unwrap(), curve);
        }
        assert!(Curve::from_oid(&const_oid::db::rfc5912::SECP_521_R_1).is_err());
    }

    #[test]
    fn test_key_bits() {
        assert_eq!(Curve::from_key_bits(384).unwrap(), Curve::P384);
        assert!(Curve::from_key_bits(521).is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Curve::P384).unwrap(), "\"p384\"");
        let curve: Curve = serde_json::from_str("\"p256\"").unwrap();
        assert_eq!(curve, Curve::P256);
    }
}
