//! HTTP host for the tethered signer
//!
//! Serves session registration, the WebSocket upgrade endpoint and a health
//! probe on a single hyper listener.

pub mod http;

pub use http::{run, serve, AppState};
