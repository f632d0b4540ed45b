//! # Outbox
//!
//! The persisted mutation queue and the push phase of a sync cycle.
//!
//! ## Push Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync:queue  [ r1 update | c4 create | r7 delete | ... ]                │
//! │                     │                                                   │
//! │  1. Batch: first `batch_size` entries not held by the conflict log     │
//! │                     │                                                   │
//! │  2. Send, one entry at a time:                                          │
//! │       create  POST   /recipes        body = current local snapshot     │
//! │       update  PUT    /recipes/{id}   body = current local snapshot     │
//! │       delete  DELETE /recipes/{id}   404 counts as done                │
//! │                     │                                                   │
//! │  3. Record, in one persisted write after the loop:                     │
//! │       success              ──► entry removed                           │
//! │       failure              ──► attempts += 1, last_error set           │
//! │       attempts == maximum  ──► entry dropped                           │
//! │       re-queued mid-push   ──► newer entry kept untouched              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use larder_core::{EnqueueOutcome, EntityType, MutationQueue, SyncAction, SyncEntry};
use larder_store::{get_list, keys, set_json, EntityStore, SharedStore};

use crate::api::RemoteApi;
use crate::error::{SyncError, SyncResult};

/// Counts from one push phase.
#[derive(Debug, Default)]
pub struct PushSummary {
    pub pushed: usize,
    pub failed: usize,
    pub dropped: usize,

    /// First failure of the phase, for callers that surface errors.
    pub first_error: Option<SyncError>,
}

enum PushResult {
    Pushed,
    Failed(SyncError),
}

pub struct Outbox {
    store: SharedStore,
    queue: Mutex<MutationQueue>,
}

impl Outbox {
    /// Loads the persisted queue. A corrupt queue starts empty.
    pub async fn load(store: SharedStore) -> Self {
        let entries = match get_list::<SyncEntry>(store.as_ref(), keys::MUTATION_QUEUE).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(?e, "Failed to load mutation queue, starting empty");
                Vec::new()
            }
        };
        if !entries.is_empty() {
            info!(count = entries.len(), "Restored mutation queue");
        }

        Outbox {
            store,
            queue: Mutex::new(MutationQueue::from_entries(entries)),
        }
    }

    async fn persist(&self, queue: &MutationQueue) {
        if let Err(e) = set_json(self.store.as_ref(), keys::MUTATION_QUEUE, queue.entries()).await
        {
            error!(?e, "Failed to persist mutation queue");
        }
    }

    /// Adds a change, replacing any pending change for the same entity.
    pub async fn enqueue(&self, entry: SyncEntry) -> SyncResult<EnqueueOutcome> {
        let mut queue = self.queue.lock().await;
        let entity_type = entry.entity_type;
        let entity_id = entry.entity_id.clone();
        let action = entry.action;

        let outcome = queue.enqueue(entry)?;
        self.persist(&queue).await;

        debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            action = %action,
            ?outcome,
            pending = queue.len(),
            "Mutation queued"
        );
        Ok(outcome)
    }

    pub async fn entries(&self) -> Vec<SyncEntry> {
        self.queue.lock().await.entries().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    pub async fn find(&self, entity_type: EntityType, entity_id: &str) -> Option<SyncEntry> {
        self.queue
            .lock()
            .await
            .find(entity_type, entity_id)
            .cloned()
    }

    pub async fn remove(&self, entity_type: EntityType, entity_id: &str) -> Option<SyncEntry> {
        let mut queue = self.queue.lock().await;
        let removed = queue.remove(entity_type, entity_id);
        if removed.is_some() {
            self.persist(&queue).await;
        }
        removed
    }

    /// Replaces the snapshot of a pending change.
    pub async fn set_payload(&self, entity_type: EntityType, entity_id: &str, payload: Value) -> bool {
        let mut queue = self.queue.lock().await;
        let updated = queue.set_payload(entity_type, entity_id, payload);
        if updated {
            self.persist(&queue).await;
        }
        updated
    }

    pub async fn failed_entries(&self) -> Vec<SyncEntry> {
        self.queue.lock().await.failed_entries()
    }

    pub async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let count = queue.len();
        queue.clear();
        self.persist(&queue).await;
        info!(count, "Mutation queue cleared");
        count
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Pushes one batch and records the outcome.
    pub async fn push(
        &self,
        api: &RemoteApi,
        entities: &EntityStore,
        batch_size: usize,
        max_attempts: u32,
        held_back: &HashSet<(EntityType, String)>,
    ) -> PushSummary {
        let batch = self.queue.lock().await.take_batch(batch_size, |entry| {
            held_back.contains(&(entry.entity_type, entry.entity_id.clone()))
        });

        let mut summary = PushSummary::default();
        if batch.is_empty() {
            debug!("No pending mutations");
            return summary;
        }

        info!(count = batch.len(), "Pushing mutation batch");

        let mut results = Vec::with_capacity(batch.len());
        for entry in batch {
            let result = match push_entry(api, entities, &entry).await {
                Ok(()) => PushResult::Pushed,
                Err(e) => {
                    warn!(
                        entity_type = %entry.entity_type,
                        entity_id = %entry.entity_id,
                        action = %entry.action,
                        error = %e,
                        "Push failed"
                    );
                    PushResult::Failed(e)
                }
            };
            results.push((entry, result));
        }

        let mut queue = self.queue.lock().await;
        for (entry, result) in results {
            let Some(current) = queue.find_mut(entry.entity_type, &entry.entity_id) else {
                continue;
            };
            if current.queued_at != entry.queued_at {
                // The create landed, so the newer change is an update now.
                if matches!(result, PushResult::Pushed)
                    && entry.action == SyncAction::Create
                    && current.action == SyncAction::Create
                {
                    current.action = SyncAction::Update;
                }
                debug!(entity_id = %entry.entity_id, "Entry replaced during push, keeping newer change");
                continue;
            }

            match result {
                PushResult::Pushed => {
                    queue.remove(entry.entity_type, &entry.entity_id);
                    summary.pushed += 1;
                }
                PushResult::Failed(e) => {
                    let attempts = current.record_failure(e.to_string());
                    summary.failed += 1;
                    if attempts >= max_attempts {
                        warn!(
                            entity_type = %entry.entity_type,
                            entity_id = %entry.entity_id,
                            attempts,
                            "Dropping mutation that exceeded max attempts"
                        );
                        queue.remove(entry.entity_type, &entry.entity_id);
                        summary.dropped += 1;
                    }
                    if summary.first_error.is_none() {
                        summary.first_error = Some(e);
                    }
                }
            }
        }
        self.persist(&queue).await;

        info!(
            pushed = summary.pushed,
            failed = summary.failed,
            dropped = summary.dropped,
            remaining = queue.len(),
            "Push complete"
        );
        summary
    }
}

/// Sends one entry, using the freshest local snapshot for writes.
async fn push_entry(api: &RemoteApi, entities: &EntityStore, entry: &SyncEntry) -> SyncResult<()> {
    match entry.action {
        SyncAction::Delete => {
            match api.delete(entry.entity_type, &entry.entity_id).await {
                Err(SyncError::Api { status: 404, .. }) => {
                    debug!(entity_id = %entry.entity_id, "Already deleted remotely");
                    Ok(())
                }
                other => other,
            }
        }
        SyncAction::Create | SyncAction::Update => {
            let snapshot = match entities.get(entry.entity_type, &entry.entity_id).await {
                Ok(Some(local)) => local,
                Ok(None) => entry.payload.clone().ok_or_else(|| {
                    SyncError::Internal(format!("no snapshot for {}", entry.entity_id))
                })?,
                Err(e) => {
                    warn!(?e, entity_id = %entry.entity_id, "Local read failed, pushing queued snapshot");
                    entry.payload.clone().ok_or(SyncError::Store(e))?
                }
            };

            if entry.action == SyncAction::Create {
                api.create(entry.entity_type, snapshot).await?;
            } else {
                api.update(entry.entity_type, &entry.entity_id, snapshot)
                    .await?;
            }
            Ok(())
        }
    }
}
