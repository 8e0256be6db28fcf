//! Enrollment and registration
//!
//! Enrollment builds a CSR through the identity's own [`Key`] (so remote keys
//! never leave their backend), sends it to the CA and persists the issued
//! certificate. Local identities send no CSR: the CA generates their key and
//! it is stored with the record.
//!
//! [`Key`]: crate::identity::Key

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ca::{CaEnrollRequest, CertificateAuthority, EnrollmentRequest, RegistrationRequest};
use super::store::CertDatastore;
use crate::identity::{
    CertificateRecord, Credentials, Identity, IdentityProvider, IdentityType, KeyReference,
    LocalIdentityProvider, UserContext,
};
use crate::types::{CustodyError, Result};

const REGISTRAR_NAME: &str = "registrar";

pub struct EnrollmentOrchestrator {
    supported: Vec<IdentityType>,
    providers: HashMap<IdentityType, Arc<dyn IdentityProvider>>,
    ca: Arc<dyn CertificateAuthority>,
    store: Arc<dyn CertDatastore>,
    registrar: RwLock<Option<UserContext>>,
}

impl EnrollmentOrchestrator {
    /// `supported` must name at least one identity type
    pub fn new(
        supported: Vec<IdentityType>,
        ca: Arc<dyn CertificateAuthority>,
        store: Arc<dyn CertDatastore>,
    ) -> Result<Self> {
        if supported.is_empty() {
            return Err(CustodyError::Config(
                "at least one supported identity type is required".into(),
            ));
        }

        let mut providers: HashMap<IdentityType, Arc<dyn IdentityProvider>> = HashMap::new();
        providers.insert(IdentityType::Local, Arc::new(LocalIdentityProvider::new()));

        Ok(Self {
            supported,
            providers,
            ca,
            store,
            registrar: RwLock::new(None),
        })
    }

    /// Add (or replace) the provider for its identity type
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.identity_type(), provider);
        self
    }

    pub fn supports(&self, identity_type: IdentityType) -> bool {
        self.supported.contains(&identity_type)
    }

    fn provider(&self, identity_type: IdentityType) -> Result<&Arc<dyn IdentityProvider>> {
        self.providers.get(&identity_type).ok_or_else(|| {
            CustodyError::Config(format!("no identity provider configured for {identity_type}"))
        })
    }

    /// Load the registrar used by [`register`](Self::register).
    ///
    /// The registrar signs with a local private key or a transit key.
    pub async fn initialize(&self, registrar: &Identity) -> Result<()> {
        if registrar.msp_id.is_empty() {
            return Err(CustodyError::InvalidArgument("registrar mspId is required".into()));
        }
        if let KeyReference::Tethered { .. } = registrar.key {
            return Err(CustodyError::Config(
                "registrar must use a local private key or a transit key".into(),
            ));
        }

        let context = self
            .provider(registrar.identity_type())?
            .get_user_context(registrar, REGISTRAR_NAME)
            .await?;
        *self.registrar.write().await = Some(context);

        info!(
            msp_id = %registrar.msp_id,
            identity_type = %registrar.identity_type(),
            "Registrar initialized"
        );
        Ok(())
    }

    pub async fn registrar(&self) -> Option<UserContext> {
        self.registrar.read().await.clone()
    }

    /// Enroll `identity` and persist the issued certificate
    pub async fn enroll(
        &self,
        identity: &Identity,
        request: &EnrollmentRequest,
    ) -> Result<CertificateRecord> {
        if identity.msp_id.is_empty() {
            return Err(CustodyError::InvalidArgument("identity mspId is required".into()));
        }
        if request.enrollment_id.is_empty() {
            return Err(CustodyError::InvalidArgument("enrollmentID is required".into()));
        }
        if request.enrollment_secret.is_empty() {
            return Err(CustodyError::InvalidArgument("enrollmentSecret is required".into()));
        }

        let identity_type = identity.identity_type();
        if !self.supports(identity_type) {
            return Err(CustodyError::UnsupportedIdentityType(format!(
                "{identity_type} is not accepted here"
            )));
        }

        let csr = match identity_type {
            IdentityType::Local => None,
            IdentityType::Transit | IdentityType::Tethered => {
                debug!(enrollment_id = %request.enrollment_id, %identity_type, "Generating CSR");
                let key = self.provider(identity_type)?.key_for(identity).await?;
                Some(key.generate_csr(&request.enrollment_id).await?)
            }
        };

        let response = self
            .ca
            .enroll(&CaEnrollRequest {
                enrollment_id: request.enrollment_id.clone(),
                enrollment_secret: request.enrollment_secret.clone(),
                csr,
            })
            .await?;

        let private_key = match identity_type {
            IdentityType::Local => Some(response.private_key.ok_or_else(|| {
                CustodyError::CertificateAuthority(
                    "CA returned no private key for a local identity".into(),
                )
            })?),
            _ => None,
        };

        let record = CertificateRecord {
            key: request.enrollment_id.clone(),
            identity_type,
            msp_id: identity.msp_id.clone(),
            credentials: Credentials {
                certificate: response.certificate,
                private_key,
            },
        };
        self.store.put(&record).await?;

        info!(
            enrollment_id = %record.key,
            %identity_type,
            msp_id = %record.msp_id,
            "Identity enrolled"
        );
        Ok(record)
    }

    /// Register a new identity with the CA; returns its enrollment secret
    pub async fn register(&self, request: &RegistrationRequest) -> Result<String> {
        if request.enrollment_id.is_empty() {
            return Err(CustodyError::InvalidArgument("enrollmentID is required".into()));
        }
        if request.affiliation.is_empty() {
            return Err(CustodyError::InvalidArgument("affiliation is required".into()));
        }

        let registrar = self.registrar.read().await.clone().ok_or_else(|| {
            CustodyError::Config("registrar is not initialized".into())
        })?;

        let secret = self.ca.register(request, &registrar).await?;
        info!(enrollment_id = %request.enrollment_id, "Identity registered");
        Ok(secret)
    }
}
