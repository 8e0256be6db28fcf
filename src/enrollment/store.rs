//! Certificate datastores
//!
//! [`CertDatastore`] is the has/get/put contract the orchestrator persists
//! enrollment results through. Two implementations ship with the crate: a
//! folder of `<key>.json` files and an in-memory map.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::identity::CertificateRecord;
use crate::types::{CustodyError, Result};

#[async_trait]
pub trait CertDatastore: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool>;

    /// `KeyNotFound` when nothing is stored under `key`
    async fn get(&self, key: &str) -> Result<CertificateRecord>;

    /// Insert or replace the record stored under `record.key`
    async fn put(&self, record: &CertificateRecord) -> Result<()>;
}

// =============================================================================
// File store
// =============================================================================

/// One pretty-printed JSON file per record
#[derive(Debug, Clone)]
pub struct FileCertStore {
    dir: PathBuf,
}

impl FileCertStore {
    /// Open the store, creating the folder if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(CustodyError::Config("certificate store folder is required".into()));
        }
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(&['/', '\\'][..]);
        if !valid {
            return Err(CustodyError::InvalidArgument(format!(
                "invalid certificate record key {key:?}"
            )));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl CertDatastore for FileCertStore {
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)?).await?)
    }

    async fn get(&self, key: &str) -> Result<CertificateRecord> {
        let raw = match fs::read_to_string(self.path_for(key)?).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustodyError::KeyNotFound(format!("certificate record {key}")));
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Err(CustodyError::KeyNotFound(format!("certificate record {key}")));
        }
        serde_json::from_str(&raw)
            .map_err(|e| CustodyError::Datastore(format!("certificate record {key}: {e}")))
    }

    async fn put(&self, record: &CertificateRecord) -> Result<()> {
        let path = self.path_for(&record.key)?;

        let mut raw = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut raw, formatter);
        record.serialize(&mut serializer)?;

        fs::write(&path, raw)
            .await
            .map_err(|e| CustodyError::Datastore(format!("write {}: {e}", path.display())))?;
        debug!(key = %record.key, identity_type = %record.identity_type, "Certificate record stored");
        Ok(())
    }
}

// =============================================================================
// Memory store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCertStore {
    records: DashMap<String, CertificateRecord>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CertDatastore for MemoryCertStore {
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.records.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<CertificateRecord> {
        self.records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CustodyError::KeyNotFound(format!("certificate record {key}")))
    }

    async fn put(&self, record: &CertificateRecord) -> Result<()> {
        self.records.insert(record.key.clone(), record.clone());
        Ok(())
    }
}
