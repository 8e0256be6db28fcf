//! fabric-custody - remote-custody signing for permissioned-ledger identities
//!
//! Lets a ledger client sign with an identity whose private key it never
//! holds.
//!
//! ## Backends
//!
//! - **Transit**: key lives in a Vault-style transit engine, signing over HTTPS
//! - **Tethered**: key lives on the holder's device, reachable over an
//!   authenticated WebSocket
//! - **Local**: key kept next to the certificate, for registrars and tests
//!
//! Every backend is exposed as an [`identity::Key`], wrapped for the ledger
//! SDK by [`identity::SdkKey`], and enrolled through
//! [`enrollment::EnrollmentOrchestrator`].

pub mod config;
pub mod crypto;
pub mod enrollment;
pub mod identity;
pub mod logging;
pub mod server;
pub mod tethered;
pub mod transit;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CustodyError, Result};
