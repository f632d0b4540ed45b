//! In-memory backend. Used by tests and by callers that opt out of
//! persistence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,

    /// When set, every write fails with `StoreError::Unavailable`.
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (reads keep working).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set("entity:recipe:r1", "{}").await.unwrap();
        store.set("entity:recipe:r2", "{}").await.unwrap();
        store.set("entity:collection:c1", "{}").await.unwrap();
        store.set("sync:queue", "[]").await.unwrap();

        let keys = store.list_keys("entity:recipe:").await.unwrap();
        assert_eq!(keys, vec!["entity:recipe:r1", "entity:recipe:r2"]);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();

        store.set_fail_writes(true);
        assert!(matches!(store.set("a", "2").await, Err(StoreError::Unavailable(_))));
        assert!(store.remove("a").await.is_err());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
