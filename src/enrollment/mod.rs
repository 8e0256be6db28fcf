//! Enrollment and registration against the ledger CA
//!
//! The CA client and the certificate datastore are collaborators behind
//! [`CertificateAuthority`] and [`CertDatastore`].

pub mod ca;
pub mod orchestrator;
pub mod store;

pub use ca::{
    CaEnrollRequest, CertificateAuthority, EnrollmentRequest, EnrollmentResponse,
    KeyValueAttribute, RegistrationRequest,
};
pub use orchestrator::EnrollmentOrchestrator;
pub use store::{CertDatastore, FileCertStore, MemoryCertStore};
