//! Custody gateway - hosts the tethered signer endpoint

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use fabric_custody::{config::Args, logging, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Custody Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Signer endpoint: {}", args.ws_path);
    info!("Registration TTL: {}s", args.registration_ttl_secs);
    info!("Sign timeout: {}ms", args.sign_timeout_ms);
    info!("======================================");

    let state = Arc::new(AppState::new(args));
    let tethered = Arc::clone(&state.tethered);

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    tethered.close_all();
    info!("Custody gateway stopped");
    Ok(())
}
