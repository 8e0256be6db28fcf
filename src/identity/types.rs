//! Identity and certificate record types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{CustodyError, Result};

/// Custody model of an identity, with its wire name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityType {
    /// Private key kept next to the certificate
    #[serde(rename = "Default-X.509")]
    Local,
    /// Private key held by the transit backend
    #[serde(rename = "Vault-X.509")]
    Transit,
    /// Private key held by a tethered holder
    #[serde(rename = "WS-X.509")]
    Tethered,
}

impl IdentityType {
    pub const ALL: [IdentityType; 3] = [Self::Local, Self::Transit, Self::Tethered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "Default-X.509",
            Self::Transit => "Vault-X.509",
            Self::Tethered => "WS-X.509",
        }
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityType {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CustodyError::UnsupportedIdentityType(s.to_string()))
    }
}

/// Where the signing key of an identity is found
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KeyReference {
    /// PKCS#8 or SEC1 private key PEM
    #[serde(rename_all = "camelCase")]
    Local { private_key: String },
    /// Transit key name plus the bearer token allowed to use it
    #[serde(rename_all = "camelCase")]
    Transit { key_name: String, token: String },
    /// Public key the holder registered; the certificate key is used if absent
    #[serde(rename_all = "camelCase")]
    Tethered { pub_key_hex: Option<String> },
}

impl KeyReference {
    pub fn identity_type(&self) -> IdentityType {
        match self {
            Self::Local { .. } => IdentityType::Local,
            Self::Transit { .. } => IdentityType::Transit,
            Self::Tethered { .. } => IdentityType::Tethered,
        }
    }
}

impl fmt::Debug for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { .. } => f.debug_struct("Local").finish_non_exhaustive(),
            Self::Transit { key_name, .. } => f
                .debug_struct("Transit")
                .field("key_name", key_name)
                .finish_non_exhaustive(),
            Self::Tethered { pub_key_hex } => f
                .debug_struct("Tethered")
                .field("pub_key_hex", pub_key_hex)
                .finish(),
        }
    }
}

/// A ledger identity: org, certificate (once enrolled) and key reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub msp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    pub key: KeyReference,
}

impl Identity {
    pub fn local(msp_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate: None,
            key: KeyReference::Local {
                private_key: private_key_pem.into(),
            },
        }
    }

    pub fn transit(
        msp_id: impl Into<String>,
        key_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate: None,
            key: KeyReference::Transit {
                key_name: key_name.into(),
                token: token.into(),
            },
        }
    }

    pub fn tethered(msp_id: impl Into<String>, pub_key_hex: Option<String>) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate: None,
            key: KeyReference::Tethered { pub_key_hex },
        }
    }

    pub fn with_certificate(mut self, certificate_pem: impl Into<String>) -> Self {
        self.certificate = Some(certificate_pem.into());
        self
    }

    pub fn identity_type(&self) -> IdentityType {
        self.key.identity_type()
    }

    /// Certificate PEM, or `InvalidArgument` when the identity isn't enrolled
    pub fn require_certificate(&self) -> Result<&str> {
        match self.certificate.as_deref() {
            Some(pem) if !pem.trim().is_empty() => Ok(pem),
            _ => Err(CustodyError::InvalidArgument(
                "identity has no certificate".into(),
            )),
        }
    }
}

/// Certificate material of a persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// What the orchestrator persists after a successful enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub msp_id: String,
    pub credentials: Credentials,
}

impl CertificateRecord {
    /// Rebuild the identity this record was enrolled for.
    ///
    /// Remote key references are not part of the record, so they are supplied
    /// by the caller; Local records carry their own key.
    pub fn to_identity(&self, key: Option<KeyReference>) -> Result<Identity> {
        let key = match (self.identity_type, key, &self.credentials.private_key) {
            (IdentityType::Local, None, Some(private_key)) => KeyReference::Local {
                private_key: private_key.clone(),
            },
            (_, Some(key), _) if key.identity_type() == self.identity_type => key,
            _ => {
                return Err(CustodyError::InvalidArgument(format!(
                    "record {} needs a {} key reference",
                    self.key, self.identity_type
                )))
            }
        };

        Ok(Identity {
            msp_id: self.msp_id.clone(),
            certificate: Some(self.credentials.certificate.clone()),
            key,
        })
    }
}
