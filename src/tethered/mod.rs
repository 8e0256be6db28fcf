//! Tethered signer protocol
//!
//! A tethered key lives on the holder's device and is reachable only over an
//! authenticated WebSocket. The flow:
//!
//! 1. The relying party registers the holder's public key with
//!    [`TetheredSignerServer::new_session`] and gets a sessionId.
//! 2. The holder signs the raw sessionId bytes as a prehash and opens the WebSocket with
//!    `sessionId`, `signature` and `crv` in the query.
//! 3. The server claims the registration, verifies the signature and binds the
//!    connection to a [`RemoteSigningSession`].
//! 4. Each `sign` sends one digest frame; the reply must verify against the
//!    registered key. One digest in flight per session.
//!
//! The holder half lives in [`client`] and [`wallet`].

pub mod client;
pub mod handshake;
pub mod key;
pub mod registry;
pub mod server;
pub mod session;
pub mod wallet;

pub use client::{HolderConnection, TetheredSignerClient};
pub use handshake::{answer_challenge, challenge_digest, handshake_url, HandshakeParams};
pub use key::TetheredKey;
pub use registry::{RegistryStats, SessionRegistry};
pub use server::{TetheredConfig, TetheredSignerServer};
pub use session::{RemoteSigningSession, SessionState};
pub use wallet::{KeyWallet, WalletKeyInfo};
