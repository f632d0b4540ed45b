//! # Entity Store
//!
//! Typed access to the locally held recipes and collections.
//!
//! Each entity is one key (`entity:{type}:{id}`) holding its JSON payload.
//! This is the copy the app edits, the copy a push re-reads, and the copy a
//! pull compares remote versions against.

use serde_json::Value;
use tracing::debug;

use larder_core::EntityType;

use crate::error::{StoreError, StoreResult};
use crate::kv::{get_json, keys, set_json, SharedStore};

#[derive(Clone)]
pub struct EntityStore {
    store: SharedStore,
}

impl EntityStore {
    pub fn new(store: SharedStore) -> Self {
        EntityStore { store }
    }

    fn prefix(entity_type: EntityType) -> String {
        format!("{}{}:", keys::ENTITY_PREFIX, entity_type.as_str())
    }

    /// Storage key for one entity.
    pub fn key(entity_type: EntityType, id: &str) -> String {
        format!("{}{}", Self::prefix(entity_type), id)
    }

    pub async fn get(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<Value>> {
        get_json(self.store.as_ref(), &Self::key(entity_type, id)).await
    }

    /// Stores a payload. The payload must carry a string `id`.
    pub async fn put(&self, entity_type: EntityType, payload: &Value) -> StoreResult<()> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::serialization(Self::prefix(entity_type), "payload has no string id")
            })?;

        let key = Self::key(entity_type, id);
        set_json(self.store.as_ref(), &key, payload).await?;
        debug!(entity_type = %entity_type, entity_id = %id, "Stored entity");
        Ok(())
    }

    pub async fn remove(&self, entity_type: EntityType, id: &str) -> StoreResult<()> {
        self.store.remove(&Self::key(entity_type, id)).await
    }

    /// Returns every stored entity of a type, in id order.
    pub async fn list(&self, entity_type: EntityType) -> StoreResult<Vec<Value>> {
        let keys = self.store.list_keys(&Self::prefix(entity_type)).await?;

        let mut entities = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = get_json(self.store.as_ref(), &key).await? {
                entities.push(value);
            }
        }
        Ok(entities)
    }
}
