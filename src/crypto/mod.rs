//! Crypto utilities shared by every signing backend
//!
//! # Contents
//!
//! - **Curves**: the P-256 / P-384 catalog and its name/OID mappings
//! - **Keys**: curve-tagged public keys (what remote signers expose) and
//!   in-process private keys (local registrar, holder wallet)
//! - **Signatures**: low-S canonicalization of DER ECDSA signatures
//! - **CSRs**: two-phase PKCS#10 construction for keys held elsewhere
//! - **Certificates**: public key recovery from enrollment certificates

pub mod certificate;
pub mod csr;
pub mod curve;
pub mod keys;
pub mod signature;

use sha2::{Digest, Sha256};

pub use certificate::{certificate_public_key, CertificateInfo};
pub use csr::{assemble_csr, build_csr_tbs, inspect_csr, CsrSummary, SignatureAlgorithm};
pub use curve::Curve;
pub use keys::{HolderKey, PublicKey};
pub use signature::{is_low_s, normalize_signature};

/// SHA-256 of `bytes`
pub fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256() {
        assert_eq!(
            hex::encode(digest(b"hello")),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest(b"").len(), 32);
    }
}
