//! PKCS#10 certificate signing requests
//!
//! The private key never lives here, so a CSR is built in two halves: the
//! CertificationRequestInfo (the "TBS" bytes) is encoded first, its SHA-256
//! digest is signed by whichever backend holds the key, and the signature is
//! then wrapped together with the TBS into the final request.

use const_oid::db::rfc4519::CN;
use const_oid::db::rfc5912::ECDSA_WITH_SHA_256;
use const_oid::ObjectIdentifier;
use der::asn1::{BitString, SetOfVec, Utf8StringRef};
use der::{Decode, DecodePem, Encode, EncodePem, Tag, Tagged};
use p256::pkcs8::LineEnding;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::{AttributeTypeAndValue, AttributeValue, Attributes};
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, Version};

use super::curve::Curve;
use super::keys::PublicKey;
use crate::types::{CustodyError, Result};

/// Signature algorithm placed in the outer CSR structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    EcdsaWithSha256,
}

impl SignatureAlgorithm {
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::EcdsaWithSha256 => ECDSA_WITH_SHA_256,
        }
    }

    /// ECDSA algorithm identifiers carry no parameters
    pub fn identifier(&self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: None,
        }
    }
}

/// Encode the CertificationRequestInfo for `CN=<common_name>` and `public_key`.
///
/// These are the bytes that get hashed and signed.
pub fn build_csr_tbs(public_key: &PublicKey, common_name: &str) -> Result<Vec<u8>> {
    if common_name.is_empty() {
        return Err(CustodyError::InvalidArgument(
            "CSR common name must not be empty".into(),
        ));
    }

    let info = CertReqInfo {
        version: Version::V1,
        subject: common_name_subject(common_name)?,
        public_key: public_key.to_spki()?,
        attributes: Attributes::new(),
    };
    Ok(info.to_der()?)
}

/// Wrap `SEQUENCE { tbs, algorithm, BIT STRING(signature) }` and PEM encode it
pub fn assemble_csr(
    tbs_der: &[u8],
    signature_der: &[u8],
    algorithm: SignatureAlgorithm,
) -> Result<String> {
    let request = CertReq {
        info: CertReqInfo::from_der(tbs_der)?,
        algorithm: algorithm.identifier(),
        signature: BitString::from_bytes(signature_der)?,
    };
    Ok(request.to_pem(LineEnding::LF)?)
}

/// Subject and key summary of a PEM encoded CSR
#[derive(Debug, Clone)]
pub struct CsrSummary {
    pub common_name: Option<String>,
    pub public_key: PublicKey,
    pub signature_algorithm: ObjectIdentifier,
    pub signature: Vec<u8>,
    pub tbs_der: Vec<u8>,
}

impl CsrSummary {
    pub fn curve(&self) -> Curve {
        self.public_key.curve()
    }

    /// Check the request's self-signature over its own TBS bytes
    pub fn verify(&self) -> Result<()> {
        if self.signature_algorithm != ECDSA_WITH_SHA_256 {
            return Err(CustodyError::InvalidSignature(format!(
                "unexpected CSR signature algorithm {}",
                self.signature_algorithm
            )));
        }
        self.public_key
            .verify_prehash(&super::digest(&self.tbs_der), &self.signature)
    }
}

/// Parse a PEM encoded PKCS#10 request
pub fn inspect_csr(pem: &str) -> Result<CsrSummary> {
    let request = CertReq::from_pem(pem.trim().as_bytes())?;
    let signature = request
        .signature
        .as_bytes()
        .ok_or_else(|| CustodyError::InvalidSignature("CSR signature is not octet aligned".into()))?
        .to_vec();

    Ok(CsrSummary {
        common_name: common_name_of(&request.info.subject),
        public_key: PublicKey::from_spki(&request.info.public_key)?,
        signature_algorithm: request.algorithm.oid,
        signature,
        tbs_der: request.info.to_der()?,
    })
}

/// Single-RDN subject `CN=<common_name>`
fn common_name_subject(common_name: &str) -> Result<RdnSequence> {
    let value = AttributeValue::new(Tag::Utf8String, common_name.as_bytes())?;
    let attribute = AttributeTypeAndValue { oid: CN, value };
    let rdn = RelativeDistinguishedName(SetOfVec::try_from(vec![attribute])?);
    Ok(RdnSequence(vec![rdn]))
}

/// First CN attribute of a name, if any
pub(crate) fn common_name_of(name: &RdnSequence) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attribute| attribute.oid == CN)
        .and_then(|attribute| match attribute.value.tag() {
            Tag::Utf8String => attribute
                .value
                .decode_as::<Utf8StringRef<'_>>()
                .ok()
                .map(|s| s.as_str().to_string()),
            _ => std::str::from_utf8(attribute.value.value())
                .ok()
                .map(str::to_string),
        })
}
