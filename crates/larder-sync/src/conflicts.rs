//! Conflict log: conflicts parked by the manual policy, persisted under
//! `sync:conflicts` until the caller resolves them.

use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{error, info};

use larder_core::{ConflictItem, EntityType};
use larder_store::{get_list, keys, set_json, SharedStore};

pub struct ConflictLog {
    store: SharedStore,
    items: Mutex<Vec<ConflictItem>>,
}

impl ConflictLog {
    /// Loads the persisted log. A corrupt log starts empty.
    pub async fn load(store: SharedStore) -> Self {
        let items = match get_list::<ConflictItem>(store.as_ref(), keys::CONFLICT_LOG).await {
            Ok(items) => items,
            Err(e) => {
                error!(?e, "Failed to load conflict log, starting empty");
                Vec::new()
            }
        };
        ConflictLog {
            store,
            items: Mutex::new(items),
        }
    }

    async fn persist(&self, items: &[ConflictItem]) {
        if let Err(e) = set_json(self.store.as_ref(), keys::CONFLICT_LOG, items).await {
            error!(?e, "Failed to persist conflict log");
        }
    }

    pub async fn list(&self) -> Vec<ConflictItem> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.items
            .lock()
            .await
            .iter()
            .any(|c| c.targets(entity_type, entity_id))
    }

    /// Entities whose queued changes must not be pushed yet.
    pub async fn held_back(&self) -> HashSet<(EntityType, String)> {
        self.items
            .lock()
            .await
            .iter()
            .map(|c| (c.entity_type, c.entity_id.clone()))
            .collect()
    }

    /// Records a conflict, replacing an older one for the same entity.
    pub async fn record(&self, item: ConflictItem) {
        let mut items = self.items.lock().await;
        info!(
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            "Conflict parked for manual resolution"
        );
        match items
            .iter_mut()
            .find(|c| c.targets(item.entity_type, &item.entity_id))
        {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        self.persist(&items).await;
    }

    /// Entity types with a parked conflict for `entity_id`. A recipe and a
    /// collection may share an id.
    pub async fn types_for(&self, entity_id: &str) -> Vec<EntityType> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|c| c.entity_id == entity_id)
            .map(|c| c.entity_type)
            .collect()
    }

    /// Removes and returns the conflict for one entity.
    pub async fn take(&self, entity_type: EntityType, entity_id: &str) -> Option<ConflictItem> {
        let mut items = self.items.lock().await;
        let index = items
            .iter()
            .position(|c| c.targets(entity_type, entity_id))?;
        let item = items.remove(index);
        self.persist(&items).await;
        Some(item)
    }

    /// Removes and returns every conflict.
    pub async fn take_all(&self) -> Vec<ConflictItem> {
        let mut items = self.items.lock().await;
        let taken = std::mem::take(&mut *items);
        if !taken.is_empty() {
            self.persist(&items).await;
        }
        taken
    }

    /// Forgets conflicts for an entity whose queued change went away.
    pub async fn discard(&self, entity_type: EntityType, entity_id: &str) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|c| !c.targets(entity_type, entity_id));
        let removed = items.len() != before;
        if removed {
            self.persist(&items).await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use larder_store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn conflict(id: &str, remote_title: &str) -> ConflictItem {
        conflict_of(EntityType::Recipe, id, remote_title)
    }

    fn conflict_of(entity_type: EntityType, id: &str, remote_title: &str) -> ConflictItem {
        let now = Utc::now();
        ConflictItem {
            entity_id: id.to_string(),
            entity_type,
            local_version: json!({"id": id, "title": "local"}),
            remote_version: json!({"id": id, "title": remote_title}),
            local_modified: now,
            remote_modified: now,
            detected_at: now,
        }
    }

    #[tokio::test]
    async fn test_record_replaces_and_persists() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let log = ConflictLog::load(Arc::clone(&store)).await;

        log.record(conflict("r1", "v1")).await;
        log.record(conflict("r1", "v2")).await;
        log.record(conflict("r2", "v1")).await;
        assert_eq!(log.len().await, 2);

        let reloaded = ConflictLog::load(store).await;
        let items = reloaded.list().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].remote_version["title"], "v2");
        assert!(reloaded
            .held_back()
            .await
            .contains(&(EntityType::Recipe, "r2".to_string())));
    }

    #[tokio::test]
    async fn test_take() {
        let log = ConflictLog::load(Arc::new(MemoryStore::new())).await;
        log.record(conflict("r1", "v1")).await;

        assert!(log.take(EntityType::Recipe, "missing").await.is_none());
        assert!(log.take(EntityType::Collection, "r1").await.is_none());
        assert_eq!(log.take(EntityType::Recipe, "r1").await.unwrap().entity_id, "r1");
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_shared_id_across_types() {
        let log = ConflictLog::load(Arc::new(MemoryStore::new())).await;
        log.record(conflict_of(EntityType::Recipe, "x1", "recipe")).await;
        log.record(conflict_of(EntityType::Collection, "x1", "collection")).await;

        assert_eq!(log.len().await, 2);
        assert_eq!(
            log.types_for("x1").await,
            vec![EntityType::Recipe, EntityType::Collection]
        );

        let taken = log.take(EntityType::Collection, "x1").await.unwrap();
        assert_eq!(taken.remote_version["title"], "collection");
        assert!(log.contains(EntityType::Recipe, "x1").await);
    }
}
