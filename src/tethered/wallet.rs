//! Holder key wallet
//!
//! One JSON file per key, `<name>.json`, holding `{key, pubKey, curve}` where
//! `key` is the PKCS#8 private key PEM. Files are created exclusively; an
//! existing key is never overwritten.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{Curve, HolderKey};
use crate::types::{CustodyError, Result};

#[derive(Serialize, Deserialize)]
struct WalletEntry {
    key: String,
    #[serde(rename = "pubKey")]
    pub_key: String,
    curve: Curve,
}

impl Drop for WalletEntry {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.key);
    }
}

/// Public summary of a wallet key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletKeyInfo {
    pub name: String,
    pub curve: Curve,
    pub pub_key_hex: String,
}

/// Folder of holder keys
#[derive(Debug, Clone)]
pub struct KeyWallet {
    dir: PathBuf,
}

impl KeyWallet {
    /// Open (and create if needed) the wallet folder
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate and store a new key under `name`
    pub async fn create(&self, name: &str, curve: Curve) -> Result<WalletKeyInfo> {
        let path = self.path_for(name)?;
        let key = HolderKey::generate(curve);
        let pem = key.to_pkcs8_pem()?;

        let entry = WalletEntry {
            key: pem.as_str().to_string(),
            pub_key: key.public_key().to_sec1_hex(),
            curve,
        };
        let json = Zeroizing::new(serde_json::to_vec_pretty(&entry)?);

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                CustodyError::InvalidArgument(format!("wallet already has a key named {name}"))
            } else {
                CustodyError::from(e)
            }
        })?;
        file.write_all(&json).await?;
        file.flush().await?;

        info!(name = %name, curve = %curve, "Wallet key created");
        Ok(WalletKeyInfo {
            name: name.to_string(),
            curve,
            pub_key_hex: entry.pub_key.clone(),
        })
    }

    /// Private key stored under `name`
    pub async fn load(&self, name: &str) -> Result<HolderKey> {
        let entry = self.read_entry(name).await?;
        let key = HolderKey::from_pem(&entry.key)?;
        if key.curve() != entry.curve {
            return Err(CustodyError::Datastore(format!(
                "wallet key {name} is labelled {} but holds a {} key",
                entry.curve,
                key.curve()
            )));
        }
        Ok(key)
    }

    /// Public key hex the holder registers with a server
    pub async fn public_key_hex(&self, name: &str) -> Result<String> {
        Ok(self.read_entry(name).await?.pub_key.clone())
    }

    /// All keys, sorted by name
    pub async fn list(&self) -> Result<Vec<WalletKeyInfo>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let entry = self.read_entry(name).await?;
            keys.push(WalletKeyInfo {
                name: name.to_string(),
                curve: entry.curve,
                pub_key_hex: entry.pub_key.clone(),
            });
        }
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn read_entry(&self, name: &str) -> Result<WalletEntry> {
        let path = self.path_for(name)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustodyError::KeyNotFound(format!("wallet key {name}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| CustodyError::Datastore(format!("wallet key {name}: {e}")))
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CustodyError::InvalidArgument(format!(
                "invalid wallet key name {name:?}"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}
