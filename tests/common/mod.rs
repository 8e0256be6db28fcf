//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use der::EncodePem;
use p256::pkcs8::LineEnding;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;

use fabric_custody::config::Args;
use fabric_custody::crypto::HolderKey;
use fabric_custody::server::{self, AppState};

/// A gateway serving on an ephemeral local port
pub struct TestGateway {
    pub state: Arc<AppState>,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestGateway {
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.state.args.ws_path)
    }

    /// Register `key` through `POST /sessions`
    pub async fn register(&self, key: &HolderKey) -> String {
        let response = reqwest::Client::new()
            .post(format!("{}/sessions", self.http_url()))
            .json(&serde_json::json!({ "pubKeyHex": key.public_key().to_sec1_hex() }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        body["sessionId"].as_str().unwrap().to_string()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.state.tethered.close_all();
        self.handle.abort();
    }
}

/// Start a gateway; `extra` is appended to the command line
pub async fn spawn_gateway(extra: &[&str]) -> TestGateway {
    let mut argv = vec!["custody-gateway", "--listen", "127.0.0.1:0"];
    argv.extend_from_slice(extra);
    let args = Args::parse_from(argv);
    args.validate().unwrap();

    let listener = TcpListener::bind(args.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(args));

    let serve_state = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        let _ = server::serve(listener, serve_state).await;
    });

    TestGateway {
        state,
        addr,
        handle,
    }
}

/// Poll `condition` every 10ms for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Self-signed certificate for `key` with subject `CN=<common_name>`
pub fn self_signed_certificate(key: &HolderKey, common_name: &str) -> String {
    let subject = Name::from_str(&format!("CN={common_name}")).unwrap();
    let validity = Validity::from_now(Duration::from_secs(3600)).unwrap();
    let serial = SerialNumber::from(42u32);
    let spki = key.public_key().to_spki().unwrap();

    let certificate = match key {
        HolderKey::P256(signing_key) => {
            CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, signing_key)
                .unwrap()
                .build::<p256::ecdsa::DerSignature>()
                .unwrap()
        }
        HolderKey::P384(signing_key) => {
            CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, signing_key)
                .unwrap()
                .build::<p384::ecdsa::DerSignature>()
                .unwrap()
        }
    };
    certificate.to_pem(LineEnding::LF).unwrap()
}
