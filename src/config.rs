//! Configuration for the custody gateway
//!
//! CLI arguments and environment variable handling using clap.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::tethered::TetheredConfig;

/// Custody gateway: hosts the tethered signer endpoint
#[derive(Parser, Debug, Clone)]
#[command(name = "custody-gateway")]
#[command(about = "Tethered signer gateway for remote-custody ledger identities")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Path of the WebSocket upgrade endpoint
    #[arg(long, env = "WS_PATH", default_value = "/signer")]
    pub ws_path: String,

    /// Seconds a registered session waits for its upgrade
    #[arg(long, env = "REGISTRATION_TTL_SECS", default_value = "60")]
    pub registration_ttl_secs: u64,

    /// Milliseconds to wait for a holder's signature
    #[arg(long, env = "SIGN_TIMEOUT_MS", default_value = "30000")]
    pub sign_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.ws_path.starts_with('/') {
            return Err("WS_PATH must start with '/'".to_string());
        }
        if matches!(self.ws_path.as_str(), "/sessions" | "/health") {
            return Err(format!("WS_PATH {} collides with a built-in route", self.ws_path));
        }
        if self.registration_ttl_secs == 0 {
            return Err("REGISTRATION_TTL_SECS must be greater than zero".to_string());
        }
        if self.sign_timeout_ms == 0 {
            return Err("SIGN_TIMEOUT_MS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn tethered_config(&self) -> TetheredConfig {
        let registration_ttl = Duration::from_secs(self.registration_ttl_secs);
        TetheredConfig {
            registration_ttl,
            sign_timeout: Duration::from_millis(self.sign_timeout_ms),
            cleanup_interval: (registration_ttl / 4).max(Duration::from_secs(1)),
        }
    }
}
