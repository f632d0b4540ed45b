//! # Key-Value Contract
//!
//! The storage seam the sync engine is written against.
//!
//! ## Key Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key                         value                      owner           │
//! │  ─────────────────────────   ────────────────────────   ─────────────   │
//! │  sync:queue                  [SyncEntry]                coordinator     │
//! │  sync:conflicts              [ConflictItem]             coordinator     │
//! │  sync:last_sync_at           RFC 3339 timestamp         coordinator     │
//! │  client:request_queue        [QueuedRequest]            request client  │
//! │  auth:access_token           string                     credentials     │
//! │  auth:refresh_token          string                     credentials     │
//! │  entity:{type}:{id}          entity payload             EntityStore     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are JSON text. Lists are always read and written whole.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Well-known keys.
pub mod keys {
    pub const MUTATION_QUEUE: &str = "sync:queue";
    pub const CONFLICT_LOG: &str = "sync:conflicts";
    pub const LAST_SYNC_AT: &str = "sync:last_sync_at";
    pub const REQUEST_QUEUE: &str = "client:request_queue";
    pub const ACCESS_TOKEN: &str = "auth:access_token";
    pub const REFRESH_TOKEN: &str = "auth:refresh_token";
    pub const ENTITY_PREFIX: &str = "entity:";
}

/// Async string-keyed durable storage.
///
/// Every method may fail. Callers in the sync engine log failures and carry
/// on with in-memory state.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Lists every key starting with `prefix`, in key order.
    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Shared handle used across the engine.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Reads and decodes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::serialization(key, e)),
        None => Ok(None),
    }
}

/// Encodes and writes a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::serialization(key, e))?;
    store.set(key, &raw).await
}

/// Reads a JSON list, treating a missing key as empty.
pub async fn get_list<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Vec<T>> {
    Ok(get_json(store, key).await?.unwrap_or_default())
}
