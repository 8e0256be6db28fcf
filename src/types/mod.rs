//! Shared types for fabric-custody

pub mod error;

pub use error::{CustodyError, Result};
