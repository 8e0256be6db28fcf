//! Tether client - holder side of the tethered signer
//!
//! Keeps P-256/P-384 keys in a wallet folder and answers signing requests
//! from a custody gateway.
//!
//! Usage:
//!   tether-client new-key phone --curve p256
//!   tether-client get-pkh phone
//!   tether-client register http://localhost:8090 phone
//!   tether-client connect ws://localhost:8090/signer <session-id> --key phone
//!
//! Environment variables:
//!   TETHER_WALLET - wallet folder (default: ./wallet)

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use fabric_custody::crypto::Curve;
use fabric_custody::logging;
use fabric_custody::tethered::{KeyWallet, TetheredSignerClient};

#[derive(Parser, Debug)]
#[command(name = "tether-client")]
#[command(about = "Holder-side key wallet and signer for tethered identities")]
#[command(version)]
struct Args {
    /// Wallet folder
    #[arg(long, env = "TETHER_WALLET", default_value = "./wallet")]
    wallet: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new key
    NewKey {
        name: String,
        #[arg(long, default_value = "p256")]
        curve: Curve,
    },
    /// Print the public key hex of a key
    GetPkh { name: String },
    /// List wallet keys
    List,
    /// Ask a gateway for a sessionId bound to a key
    Register {
        /// Gateway base URL, e.g. http://localhost:8090
        gateway_url: String,
        name: String,
    },
    /// Open the signer connection and answer digests until it closes
    Connect {
        /// Signer endpoint, e.g. ws://localhost:8090/signer
        url: String,
        session_id: String,
        #[arg(long, default_value = "default")]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logging::init(&args.log_level, false);

    let wallet = KeyWallet::open(&args.wallet)
        .await
        .with_context(|| format!("opening wallet {}", args.wallet.display()))?;

    match args.command {
        Command::NewKey { name, curve } => {
            let info = wallet.create(&name, curve).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::GetPkh { name } => {
            println!("{}", wallet.public_key_hex(&name).await?);
        }
        Command::List => {
            for key in wallet.list().await? {
                println!("{}\t{}\t{}", key.name, key.curve, key.pub_key_hex);
            }
        }
        Command::Register { gateway_url, name } => {
            let pub_key_hex = wallet.public_key_hex(&name).await?;
            let url = format!("{}/sessions", gateway_url.trim_end_matches('/'));
            let response = reqwest::Client::new()
                .post(&url)
                .json(&json!({ "pubKeyHex": pub_key_hex }))
                .send()
                .await
                .with_context(|| format!("POST {url}"))?;
            let status = response.status();
            let body: serde_json::Value = response.json().await?;
            if !status.is_success() {
                anyhow::bail!("gateway answered {}: {}", status, body["error"]);
            }
            let session_id = body["sessionId"]
                .as_str()
                .context("gateway response has no sessionId")?;
            println!("{session_id}");
        }
        Command::Connect {
            url,
            session_id,
            key,
        } => {
            let holder_key = wallet.load(&key).await?;
            let client = TetheredSignerClient::new(holder_key);
            let connection = client.connect(&url, &session_id).await?;

            tokio::select! {
                result = connection.serve() => {
                    let signed = result?;
                    info!("Connection closed after {} signature(s)", signed);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                }
            }
        }
    }

    Ok(())
}
