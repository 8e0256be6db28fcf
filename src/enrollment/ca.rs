//! Certificate authority interface
//!
//! The CA's REST client lives outside this crate; the orchestrator only needs
//! enroll and register.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::UserContext;
use crate::types::Result;

/// Caller-facing enrollment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    #[serde(rename = "enrollmentID")]
    pub enrollment_id: String,
    pub enrollment_secret: String,
}

/// What is sent to the CA; `csr` is absent when the CA generates the key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaEnrollRequest {
    #[serde(rename = "enrollmentID")]
    pub enrollment_id: String,
    pub enrollment_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csr: Option<String>,
}

/// Issued certificate, plus the private key PEM if the CA generated one
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    pub certificate: String,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub ecert: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(rename = "enrollmentID")]
    pub enrollment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub affiliation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_enrollments: Option<u32>,
    #[serde(default)]
    pub attrs: Vec<KeyValueAttribute>,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn enroll(&self, request: &CaEnrollRequest) -> Result<EnrollmentResponse>;

    /// Register a new identity; returns its enrollment secret
    async fn register(&self, request: &RegistrationRequest, registrar: &UserContext) -> Result<String>;
}
