//! # Inbound Changes
//!
//! The pull phase of a sync cycle: fetch remote changes, then apply them to
//! the local entity store under the configured conflict policy.
//!
//! ## Apply Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  remote version arrives for entity E                                    │
//! │    │                                                                    │
//! │    ├── no queued change for E                                           │
//! │    │     remote newer than local (or no local) ──► store remote        │
//! │    │     otherwise                             ──► ignore              │
//! │    │                                                                    │
//! │    └── queued change for E                                              │
//! │          content equal, or edits within tolerance ──► ignore,          │
//! │                                                    queued change wins  │
//! │          conflict:                                                      │
//! │            LOCAL   keep local, queued change pushes over remote        │
//! │            REMOTE  store remote, drop queued change                    │
//! │            MERGE   store merge(local, remote), queue the merge         │
//! │            MANUAL  park in conflict log, hold queued change back       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A queued delete has no local content to merge, so under MERGE it behaves
//! like LOCAL and the delete goes ahead.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use larder_core::merge::{detect_conflict, merge_versions, modified_at, remote_is_newer};
use larder_core::{ConflictItem, ConflictPolicy, EntityType, SyncAction, SyncEntry};
use larder_store::EntityStore;

use crate::api::RemoteApi;
use crate::conflicts::ConflictLog;
use crate::error::SyncResult;
use crate::outbox::Outbox;

/// One entity version received from the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub entity_type: EntityType,
    pub payload: Value,
}

impl RemoteChange {
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}

/// Fetches changes for every entity type. Any failure aborts the pull.
pub async fn fetch_changes(
    api: &RemoteApi,
    since: Option<DateTime<Utc>>,
) -> SyncResult<Vec<RemoteChange>> {
    let mut changes = Vec::new();
    for entity_type in EntityType::ALL {
        let items = api.changes_since(entity_type, since).await?;
        debug!(entity_type = %entity_type, count = items.len(), "Fetched remote changes");
        changes.extend(items.into_iter().map(|payload| RemoteChange {
            entity_type,
            payload,
        }));
    }
    Ok(changes)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplySummary {
    pub applied: usize,

    /// Changes that could not be applied. The caller must not advance its
    /// `since` cursor past them.
    pub failed: usize,

    /// Every conflict detected, whatever the policy did with it.
    pub conflicts: Vec<ConflictItem>,
}

/// Applies remote changes to local state.
pub struct InboundApplier<'a> {
    pub entities: &'a EntityStore,
    pub outbox: &'a Outbox,
    pub conflicts: &'a ConflictLog,
    pub policy: ConflictPolicy,
    pub tolerance: Duration,
}

impl InboundApplier<'_> {
    pub async fn apply(&self, changes: Vec<RemoteChange>) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for change in changes {
            let Some(entity_id) = change.entity_id().map(str::to_string) else {
                warn!(entity_type = %change.entity_type, "Remote change without id, skipping");
                continue;
            };

            match self.apply_one(&entity_id, &change).await {
                Ok(Applied::Stored) => summary.applied += 1,
                Ok(Applied::Conflict { item, stored }) => {
                    summary.conflicts.push(item);
                    if stored {
                        summary.applied += 1;
                    }
                }
                Ok(Applied::Ignored) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        ?e,
                        entity_type = %change.entity_type,
                        entity_id = %entity_id,
                        "Failed to apply remote change"
                    );
                }
            }
        }

        if !summary.conflicts.is_empty() {
            info!(conflicts = summary.conflicts.len(), policy = %self.policy, "Conflicts resolved");
        }
        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some remote changes were not applied");
        }
        summary
    }

    async fn apply_one(&self, entity_id: &str, change: &RemoteChange) -> SyncResult<Applied> {
        let entity_type = change.entity_type;
        let remote = &change.payload;
        let local = self.entities.get(entity_type, entity_id).await?;

        let Some(entry) = self.outbox.find(entity_type, entity_id).await else {
            if remote_is_newer(local.as_ref(), remote) {
                self.entities.put(entity_type, remote).await?;
                return Ok(Applied::Stored);
            }
            return Ok(Applied::Ignored);
        };

        let local = match entry.action {
            SyncAction::Delete => Value::Null,
            _ => local.or_else(|| entry.payload.clone()).unwrap_or(Value::Null),
        };

        if !detect_conflict(&local, remote, self.tolerance) {
            debug!(entity_id = %entity_id, "Remote version matches queued change");
            return Ok(Applied::Ignored);
        }

        debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            policy = %self.policy,
            "Conflict detected"
        );

        let item = conflict_item(&entry, local, remote.clone());
        let stored = match (self.policy, entry.action) {
            (ConflictPolicy::Local, _) | (ConflictPolicy::Merge, SyncAction::Delete) => false,
            (ConflictPolicy::Remote, _) => {
                self.entities.put(entity_type, remote).await?;
                self.outbox.remove(entity_type, entity_id).await;
                true
            }
            (ConflictPolicy::Merge, _) => {
                let merged = merge_versions(&item.local_version, remote, Utc::now());
                self.entities.put(entity_type, &merged).await?;
                self.outbox.set_payload(entity_type, entity_id, merged).await;
                true
            }
            (ConflictPolicy::Manual, _) => {
                self.conflicts.record(item.clone()).await;
                false
            }
        };
        Ok(Applied::Conflict { item, stored })
    }
}

enum Applied {
    Stored,
    Ignored,
    Conflict { item: ConflictItem, stored: bool },
}

fn conflict_item(entry: &SyncEntry, local: Value, remote: Value) -> ConflictItem {
    let now = Utc::now();
    ConflictItem {
        entity_id: entry.entity_id.clone(),
        entity_type: entry.entity_type,
        local_modified: modified_at(&local).unwrap_or(entry.queued_at),
        remote_modified: modified_at(&remote).unwrap_or(now),
        local_version: local,
        remote_version: remote,
        detected_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_store::{MemoryStore, SharedStore};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        entities: EntityStore,
        outbox: Outbox,
        conflicts: ConflictLog,
    }

    impl Fixture {
        async fn new() -> Self {
            let store: SharedStore = Arc::new(MemoryStore::new());
            Fixture {
                entities: EntityStore::new(Arc::clone(&store)),
                outbox: Outbox::load(Arc::clone(&store)).await,
                conflicts: ConflictLog::load(store).await,
            }
        }

        fn applier(&self, policy: ConflictPolicy) -> InboundApplier<'_> {
            InboundApplier {
                entities: &self.entities,
                outbox: &self.outbox,
                conflicts: &self.conflicts,
                policy,
                tolerance: Duration::from_secs(1),
            }
        }

        async fn queue_local(&self, payload: Value) {
            self.entities
                .put(EntityType::Recipe, &payload)
                .await
                .unwrap();
            let id = payload["id"].as_str().unwrap().to_string();
            self.outbox
                .enqueue(SyncEntry::new(
                    EntityType::Recipe,
                    id,
                    SyncAction::Update,
                    Some(payload),
                ))
                .await
                .unwrap();
        }
    }

    fn recipe(change: Value) -> RemoteChange {
        RemoteChange {
            entity_type: EntityType::Recipe,
            payload: change,
        }
    }

    #[tokio::test]
    async fn test_unqueued_entity_takes_newer_remote() {
        let fx = Fixture::new().await;
        fx.entities
            .put(
                EntityType::Recipe,
                &json!({"id": "r1", "name": "old", "lastModified": "2024-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();

        let summary = fx
            .applier(ConflictPolicy::Merge)
            .apply(vec![
                recipe(json!({"id": "r1", "name": "new", "lastModified": "2024-01-02T00:00:00Z"})),
                recipe(json!({"id": "r2", "name": "fresh"})),
                recipe(json!({"name": "no id"})),
            ])
            .await;

        assert_eq!(summary.applied, 2);
        assert!(summary.conflicts.is_empty());
        let stored = fx.entities.get(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(stored["name"], "new");
    }

    #[tokio::test]
    async fn test_older_remote_is_ignored() {
        let fx = Fixture::new().await;
        fx.entities
            .put(
                EntityType::Recipe,
                &json!({"id": "r1", "name": "mine", "lastModified": "2024-01-02T00:00:00Z"}),
            )
            .await
            .unwrap();

        let summary = fx
            .applier(ConflictPolicy::Remote)
            .apply(vec![recipe(
                json!({"id": "r1", "name": "stale", "lastModified": "2024-01-01T00:00:00Z"}),
            )])
            .await;

        assert_eq!(summary.applied, 0);
        let stored = fx.entities.get(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(stored["name"], "mine");
    }

    #[tokio::test]
    async fn test_edits_within_tolerance_are_not_conflicts() {
        let fx = Fixture::new().await;
        fx.queue_local(json!({"id": "r1", "name": "A", "lastModified": "2024-05-01T10:00:00.000Z"}))
            .await;

        let summary = fx
            .applier(ConflictPolicy::Manual)
            .apply(vec![recipe(
                json!({"id": "r1", "name": "B", "lastModified": "2024-05-01T10:00:00.500Z"}),
            )])
            .await;

        assert!(summary.conflicts.is_empty());
        assert!(fx.conflicts.is_empty().await);
        assert!(fx.outbox.find(EntityType::Recipe, "r1").await.is_some());
    }

    #[tokio::test]
    async fn test_manual_policy_parks_conflict() {
        let fx = Fixture::new().await;
        fx.queue_local(json!({"id": "r1", "name": "A", "lastModified": "2024-05-01T10:00:00Z"}))
            .await;

        let summary = fx
            .applier(ConflictPolicy::Manual)
            .apply(vec![recipe(
                json!({"id": "r1", "name": "B", "lastModified": "2024-05-01T10:00:05Z"}),
            )])
            .await;

        assert_eq!(summary.conflicts.len(), 1);
        let parked = fx.conflicts.list().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].local_version["name"], "A");
        assert_eq!(parked[0].remote_version["name"], "B");
        // Local copy untouched until resolved.
        let stored = fx.entities.get(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(stored["name"], "A");
    }

    #[tokio::test]
    async fn test_queued_delete_under_merge_goes_ahead() {
        let fx = Fixture::new().await;
        fx.outbox
            .enqueue(SyncEntry::new(EntityType::Recipe, "r1", SyncAction::Delete, None))
            .await
            .unwrap();

        let summary = fx
            .applier(ConflictPolicy::Merge)
            .apply(vec![recipe(json!({"id": "r1", "name": "edited remotely"}))])
            .await;

        assert_eq!(summary.conflicts.len(), 1);
        let entry = fx.outbox.find(EntityType::Recipe, "r1").await.unwrap();
        assert_eq!(entry.action, SyncAction::Delete);
        assert!(fx.entities.get(EntityType::Recipe, "r1").await.unwrap().is_none());
    }
}
