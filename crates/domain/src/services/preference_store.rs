//! Durable key-value storage for per-user preferences.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Key-value store for serialized preference documents.
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// Process-local preference store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw document, bypassing any shape the caller expects.
    pub async fn insert_raw(&self, key: &str, value: Value) {
        self.entries.write().await.insert(key.to_string(), value);
    }
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        tracing::debug!(key = %key, "Saving preference document");
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryPreferenceStore::new();
        assert!(store.load("k").await.unwrap().is_none());

        store.save("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(json!({"a": 1})));

        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
    }
}
