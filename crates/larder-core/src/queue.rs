//! # Mutation Queue
//!
//! Ordered list of pending local changes, at most one per entity.
//!
//! ## Replacement Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pending      incoming     result                                       │
//! │  ─────────    ─────────    ──────────────────────────────────────────   │
//! │  (none)       any          appended at the tail            → Added      │
//! │  create       update       stays create, new payload       → Replaced   │
//! │  create       delete       both removed                    → Cancelled  │
//! │  other        any          incoming replaces pending       → Replaced   │
//! │                                                                         │
//! │  A replacing entry keeps the queue position of the entry it replaces.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The queue is a plain value. Persisting it is the caller's job (the sync
//! engine writes the whole list back after every change).

use serde_json::Value;

use crate::error::CoreResult;
use crate::types::{EntityType, SyncAction, SyncEntry};

/// What [`MutationQueue::enqueue`] did with the incoming entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No entry existed for the entity; appended at the tail.
    Added,
    /// An existing entry was overwritten in place.
    Replaced,
    /// A pending create was cancelled by a delete; nothing is queued.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationQueue {
    entries: Vec<SyncEntry>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a queue from a persisted list.
    ///
    /// Later duplicates of the same entity are folded in with the normal
    /// replacement rules, so a hand-edited list still ends up with one entry
    /// per entity.
    pub fn from_entries(entries: Vec<SyncEntry>) -> Self {
        let mut queue = Self::new();
        for entry in entries {
            queue.insert(entry);
        }
        queue
    }

    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SyncEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates and enqueues a change.
    pub fn enqueue(&mut self, entry: SyncEntry) -> CoreResult<EnqueueOutcome> {
        entry.validate()?;
        Ok(self.insert(entry))
    }

    fn insert(&mut self, entry: SyncEntry) -> EnqueueOutcome {
        let position = self
            .entries
            .iter()
            .position(|e| e.targets(entry.entity_type, &entry.entity_id));

        let Some(index) = position else {
            self.entries.push(entry);
            return EnqueueOutcome::Added;
        };

        match (self.entries[index].action, entry.action) {
            (SyncAction::Create, SyncAction::Delete) => {
                self.entries.remove(index);
                EnqueueOutcome::Cancelled
            }
            (SyncAction::Create, SyncAction::Update) => {
                // The remote store has never seen this entity.
                self.entries[index] = SyncEntry {
                    action: SyncAction::Create,
                    ..entry
                };
                EnqueueOutcome::Replaced
            }
            _ => {
                self.entries[index] = entry;
                EnqueueOutcome::Replaced
            }
        }
    }

    pub fn find(&self, entity_type: EntityType, entity_id: &str) -> Option<&SyncEntry> {
        self.entries
            .iter()
            .find(|e| e.targets(entity_type, entity_id))
    }

    pub fn find_mut(&mut self, entity_type: EntityType, entity_id: &str) -> Option<&mut SyncEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.targets(entity_type, entity_id))
    }

    pub fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.find(entity_type, entity_id).is_some()
    }

    /// Removes the entry for an entity, if any.
    pub fn remove(&mut self, entity_type: EntityType, entity_id: &str) -> Option<SyncEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.targets(entity_type, entity_id))?;
        Some(self.entries.remove(index))
    }

    /// Replaces the payload of a queued entry. Returns false if none exists.
    pub fn set_payload(&mut self, entity_type: EntityType, entity_id: &str, payload: Value) -> bool {
        match self.find_mut(entity_type, entity_id) {
            Some(entry) => {
                entry.payload = Some(payload);
                true
            }
            None => false,
        }
    }

    /// Copies up to `limit` entries from the head, skipping held-back ones.
    pub fn take_batch<F>(&self, limit: usize, mut held_back: F) -> Vec<SyncEntry>
    where
        F: FnMut(&SyncEntry) -> bool,
    {
        self.entries
            .iter()
            .filter(|e| !held_back(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries whose most recent push failed.
    pub fn failed_entries(&self) -> Vec<SyncEntry> {
        self.entries
            .iter()
            .filter(|e| e.last_error.is_some())
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
