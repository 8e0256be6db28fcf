//! Key capability and identity providers
//!
//! [`Key`] is the one signing interface every backend implements.
//! [`IdentityProvider`]s combine a stored [`Identity`] with the right backend
//! key to produce a [`UserContext`] for the ledger SDK.

pub mod key;
pub mod local;
pub mod provider;
pub mod types;

pub use key::{BackendKind, Key, SdkKey, SigningKeyHandle};
pub use local::LocalKey;
pub use provider::{
    IdentityProvider, LocalIdentityProvider, TetheredIdentityProvider, TransitIdentityProvider,
    UserContext,
};
pub use types::{CertificateRecord, Credentials, Identity, IdentityType, KeyReference};
