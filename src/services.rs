//! Host collaborator contracts: storage and dialogs
//!
//! The runtime does not implement persistence or a UI itself; the embedding
//! host supplies implementations of these traits. [`MemoryStorage`] and
//! [`NullDialogs`] are complete reference implementations suitable for tests
//! and headless hosts, and the `Denied*` variants are what a plugin receives
//! when it never asked for the corresponding permission.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Errors surfaced by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage permission not granted to '{owner}'")]
    PermissionDenied { owner: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Key/value persistence namespaced per owner
///
/// Owners (plugin ids) only ever see their own namespace; two plugins can use
/// the same key without colliding.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn get_item(&self, owner: &str, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set_item(&self, owner: &str, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove_item(&self, owner: &str, key: &str) -> Result<(), StorageError>;

    /// Keys present in the owner's namespace, sorted
    async fn keys(&self, owner: &str) -> Result<Vec<String>, StorageError>;
}

/// User-facing prompts
#[async_trait]
pub trait DialogService: Send + Sync {
    /// Ask the user a yes/no question; `false` means declined
    async fn confirm(&self, message: &str, title: &str) -> bool;

    /// Show a notice attributed to `owner`
    async fn alert(&self, owner: &str, message: &str, title: &str);
}

/// In-memory [`StorageService`] with per-owner namespaces
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn get_item(&self, owner: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(owner).and_then(|namespace| namespace.get(key)).cloned())
    }

    async fn set_item(&self, owner: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.entry(owner.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, owner: &str, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        if let Some(namespace) = data.get_mut(owner) {
            namespace.remove(key);
            if namespace.is_empty() {
                data.remove(owner);
            }
        }
        Ok(())
    }

    async fn keys(&self, owner: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .get(owner)
            .map(|namespace| namespace.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

/// Storage stub wired in when the `storage` permission was not granted
///
/// Every call is rejected with [`StorageError::PermissionDenied`] and a
/// warning naming the offending owner.
pub struct DeniedStorage;

#[async_trait]
impl StorageService for DeniedStorage {
    async fn get_item(&self, owner: &str, _key: &str) -> Result<Option<Value>, StorageError> {
        warn!("'{}' attempted storage read without the storage permission", owner);
        Err(StorageError::PermissionDenied {
            owner: owner.to_string(),
        })
    }

    async fn set_item(&self, owner: &str, _key: &str, _value: Value) -> Result<(), StorageError> {
        warn!("'{}' attempted storage write without the storage permission", owner);
        Err(StorageError::PermissionDenied {
            owner: owner.to_string(),
        })
    }

    async fn remove_item(&self, owner: &str, _key: &str) -> Result<(), StorageError> {
        warn!("'{}' attempted storage removal without the storage permission", owner);
        Err(StorageError::PermissionDenied {
            owner: owner.to_string(),
        })
    }

    async fn keys(&self, owner: &str) -> Result<Vec<String>, StorageError> {
        warn!("'{}' attempted storage listing without the storage permission", owner);
        Err(StorageError::PermissionDenied {
            owner: owner.to_string(),
        })
    }
}

/// Dialog stub wired in when the `dialogs` permission was not granted
///
/// Confirmations are declined and alerts are swallowed, each with a warning,
/// so an ungranted plugin cannot block or interrupt the user.
pub struct DeniedDialogs;

#[async_trait]
impl DialogService for DeniedDialogs {
    async fn confirm(&self, message: &str, _title: &str) -> bool {
        warn!("Confirmation declined, dialogs permission not granted: {}", message);
        false
    }

    async fn alert(&self, owner: &str, message: &str, _title: &str) {
        warn!("Alert from '{}' suppressed, dialogs permission not granted: {}", owner, message);
    }
}

/// Dialog service for headless hosts: declines everything quietly
pub struct NullDialogs;

#[async_trait]
impl DialogService for NullDialogs {
    async fn confirm(&self, message: &str, _title: &str) -> bool {
        debug!("Headless host declining confirmation: {}", message);
        false
    }

    async fn alert(&self, owner: &str, message: &str, _title: &str) {
        debug!("Alert from '{}': {}", owner, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_storage_round_trips_values() {
        let storage = MemoryStorage::new();

        storage.set_item("notes", "draft", json!({"text": "hi"})).await.unwrap();
        assert_eq!(
            storage.get_item("notes", "draft").await.unwrap(),
            Some(json!({"text": "hi"}))
        );

        storage.remove_item("notes", "draft").await.unwrap();
        assert_eq!(storage.get_item("notes", "draft").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_storage_namespaces_are_isolated() {
        let storage = MemoryStorage::new();

        storage.set_item("plugin-a", "shared-key", json!(1)).await.unwrap();
        storage.set_item("plugin-b", "shared-key", json!(2)).await.unwrap();

        assert_eq!(storage.get_item("plugin-a", "shared-key").await.unwrap(), Some(json!(1)));
        assert_eq!(storage.get_item("plugin-b", "shared-key").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn memory_storage_lists_keys_sorted() {
        let storage = MemoryStorage::new();
        for key in ["zeta", "alpha", "mid"] {
            storage.set_item("notes", key, json!(true)).await.unwrap();
        }

        assert_eq!(storage.keys("notes").await.unwrap(), vec!["alpha", "mid", "zeta"]);
        assert!(storage.keys("unknown-owner").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_storage_rejects_every_call() {
        let storage = DeniedStorage;

        assert!(matches!(
            storage.get_item("rogue", "key").await,
            Err(StorageError::PermissionDenied { .. })
        ));
        assert!(matches!(
            storage.set_item("rogue", "key", json!(null)).await,
            Err(StorageError::PermissionDenied { .. })
        ));
        assert!(matches!(
            storage.keys("rogue").await,
            Err(StorageError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn denied_and_null_dialogs_decline_confirmations() {
        assert!(!DeniedDialogs.confirm("proceed?", "Question").await);
        assert!(!NullDialogs.confirm("proceed?", "Question").await);

        // Alerts are fire-and-forget for both.
        DeniedDialogs.alert("plugin-a", "hello", "Notice").await;
        NullDialogs.alert("plugin-a", "hello", "Notice").await;
    }
}
