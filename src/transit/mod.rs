//! Transit secrets engine backend
//!
//! [`TransitClient`] speaks the engine's HTTP API; [`TransitKey`] presents one
//! named key as a [`crate::identity::Key`].

pub mod client;
pub mod key;

pub use client::{TransitClient, TransitConfig};
pub use key::TransitKey;
