//! services/portal/src/adapters/storage.rs
//!
//! This module contains the storage adapters, the concrete implementations of the
//! `KeyValueStorage` port: a bounded in-memory map and a JSON document on disk.

use async_trait::async_trait;
use clinic_portal_core::ports::{KeyValueStorage, PortError, PortResult};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

//=========================================================================================
// In-Memory Storage
//=========================================================================================

/// A process-local map with an optional byte quota, mirroring the capacity limit
/// of browser storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys and values together may not exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> PortResult<Option<String>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> PortResult<()> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota_bytes {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(PortError::QuotaExceeded(format!(
                    "{} bytes needed, quota is {}",
                    needed, quota
                )));
            }
        }
        items.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> PortResult<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn keys(&self) -> PortResult<Vec<String>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }
}

//=========================================================================================
// File Storage
//=========================================================================================

/// All items in one JSON object on disk. The document is loaded on first use and
/// every mutation rewrites it through a temporary file, so a crash never leaves a
/// half-written store. The async lock makes each read-modify-write a single step.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: tokio::sync::Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> PortResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                PortError::Unexpected(format!("corrupt storage file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }

    async fn persist(&self, items: &BTreeMap<String, String>) -> PortResult<()> {
        let raw = serde_json::to_string(items).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        debug!(path = %self.path.display(), items = items.len(), "Storage file written");
        Ok(())
    }

    /// Applies `change` to a copy of the document and only swaps it in once the
    /// copy is on disk.
    async fn mutate<F>(&self, change: F) -> PortResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut guard = self.items.lock().await;
        let mut next = match guard.as_ref() {
            Some(items) => items.clone(),
            None => self.load().await?,
        };
        change(&mut next);
        self.persist(&next).await?;
        *guard = Some(next);
        Ok(())
    }

    async fn snapshot(&self) -> PortResult<BTreeMap<String, String>> {
        let mut guard = self.items.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.clone().unwrap_or_default())
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.snapshot().await?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> PortResult<()> {
        self.mutate(|items| {
            items.insert(key.to_string(), value);
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> PortResult<()> {
        self.mutate(|items| {
            items.remove(key);
        })
        .await
    }

    async fn keys(&self) -> PortResult<Vec<String>> {
        Ok(self.snapshot().await?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_quota_rejects_oversized_writes_and_keeps_old_value() {
        let storage = MemoryStorage::with_quota(16);
        storage.set_item("k", "small".into()).await.unwrap();

        let result = storage.set_item("k", "x".repeat(64)).await;
        assert!(matches!(result, Err(PortError::QuotaExceeded(_))));
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("small"));
    }

    #[tokio::test]
    async fn memory_quota_counts_replaced_values_once() {
        let storage = MemoryStorage::with_quota(10);
        storage.set_item("k", "12345678".into()).await.unwrap();
        storage.set_item("k", "87654321".into()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let storage = FileStorage::new(&path);
        storage.set_item("a", "1".into()).await.unwrap();
        storage.set_item("b", "2".into()).await.unwrap();
        storage.remove_item("a").await.unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("a").await.unwrap(), None);
        assert_eq!(reopened.get_item("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(reopened.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.get_item("a").await.is_err());
        assert!(storage.set_item("a", "1".into()).await.is_err());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "{not json");
    }
}
