//! services/portal/src/store.rs
//!
//! The persistent local store: a namespaced, JSON-encoding view over a
//! `KeyValueStorage` port. Failures never escape; reads degrade to the caller's
//! default and writes report a boolean.

use clinic_portal_core::ports::KeyValueStorage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LocalStore {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
}

impl LocalStore {
    /// `prefix` isolates this logical domain (e.g. `portal_medico.session`) from
    /// every other user of the same storage.
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    /// The stored value, or `None` when absent or unreadable.
    pub async fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.namespaced(key);
        let raw = match self.storage.get_item(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to read from local storage");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding unparseable local storage value");
                None
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_opt(key).await.unwrap_or(default)
    }

    /// Returns false when the value cannot be encoded or does not fit; the
    /// previous value is left in place.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let full_key = self.namespaced(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to encode value for local storage");
                return false;
            }
        };
        match self.storage.set_item(&full_key, raw).await {
            Ok(()) => {
                debug!(key = %full_key, "Saved to local storage");
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to save to local storage");
                false
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        let full_key = self.namespaced(key);
        match self.storage.remove_item(&full_key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to remove from local storage");
                false
            }
        }
    }

    /// Keys of this namespace, without the prefix. `None` if storage could not be listed.
    pub async fn keys(&self) -> Option<Vec<String>> {
        let marker = format!("{}.", self.prefix);
        match self.storage.keys().await {
            Ok(keys) => Some(
                keys.iter()
                    .filter_map(|k| k.strip_prefix(&marker))
                    .map(str::to_string)
                    .collect(),
            ),
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Failed to list local storage keys");
                None
            }
        }
    }

    /// Removes every key in this namespace and nothing else.
    pub async fn clear(&self) -> bool {
        let Some(keys) = self.keys().await else {
            return false;
        };
        let mut ok = true;
        for key in &keys {
            ok &= self.remove(key).await;
        }
        ok
    }
}
