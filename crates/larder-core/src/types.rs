//! # Sync Domain Types
//!
//! Core types shared by the durable store and the sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Types                                      │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncEntry     │   │  ConflictItem   │   │   SyncStatus    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  entity_id      │   │  entity_id      │   │  is_online      │       │
//! │  │  entity_type    │   │  local_version  │   │  last_sync_at   │       │
//! │  │  action         │   │  remote_version │   │  pending_count  │       │
//! │  │  payload        │   │  *_modified     │   │  is_syncing     │       │
//! │  │  attempts       │   └─────────────────┘   │  failed_entries │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   EntityType    │   │   SyncAction    │   │ ConflictPolicy  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Recipe         │   │  Create         │   │  Local          │       │
//! │  │  Collection     │   │  Update         │   │  Remote         │       │
//! │  └─────────────────┘   │  Delete         │   │  Merge          │       │
//! │                        └─────────────────┘   │  Manual         │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entity payloads stay opaque `serde_json::Value` objects; the engine only
//! reads `id`, `lastModified` and the personal fields (see [`crate::merge`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Entity Type
// =============================================================================

/// The kinds of domain objects the engine keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EntityType {
    /// A single recipe.
    Recipe,
    /// A user-curated collection of recipes.
    Collection,
}

impl EntityType {
    /// Every entity type, in pull order.
    pub const ALL: [EntityType; 2] = [EntityType::Recipe, EntityType::Collection];

    /// Storage tag used in keys (`entity:recipe:<id>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Recipe => "recipe",
            EntityType::Collection => "collection",
        }
    }

    /// Remote collection path for this entity type.
    ///
    /// This is the dispatch table the push loop uses, so the loop itself
    /// stays generic over entity types.
    pub fn collection_path(&self) -> &'static str {
        match self {
            EntityType::Recipe => "/recipes",
            EntityType::Collection => "/collections",
        }
    }

    /// Remote path of a single entity.
    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.collection_path(), id)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recipe" | "recipes" => Ok(EntityType::Recipe),
            "collection" | "collections" => Ok(EntityType::Collection),
            other => Err(CoreError::UnknownEntityType(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Action
// =============================================================================

/// What happened to an entity locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    /// Returns true if the action carries an entity snapshot.
    pub fn requires_payload(&self) -> bool {
        matches!(self, SyncAction::Create | SyncAction::Update)
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Create => write!(f, "create"),
            SyncAction::Update => write!(f, "update"),
            SyncAction::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for SyncAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Entry
// =============================================================================

/// A pending local change waiting to be pushed.
///
/// ## Lifecycle
/// ```text
/// queue_*_change() ──► SyncEntry { attempts: 0 }
///                           │
///            push ok ◄──────┼──────► push failed
///               │           │            │
///               ▼           │            ▼
///           removed         │     attempts += 1, last_error = Some(..)
///                           │            │
///                           │     attempts >= max_attempts ──► dropped
///                           │
///           re-enqueue for same id ──► replaced (or cancelled)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncEntry {
    /// Identity of the target entity.
    pub entity_id: String,

    /// Recipe or collection.
    pub entity_type: EntityType,

    /// What to do remotely.
    pub action: SyncAction,

    /// Snapshot captured when the change was queued (absent for deletes).
    #[ts(type = "unknown")]
    pub payload: Option<Value>,

    /// When the change was queued.
    #[ts(as = "String")]
    pub queued_at: DateTime<Utc>,

    /// Number of failed push attempts.
    pub attempts: u32,

    /// Error from the most recent failed push.
    pub last_error: Option<String>,
}

impl SyncEntry {
    /// Creates a fresh entry queued now.
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: Option<Value>,
    ) -> Self {
        SyncEntry {
            entity_id: entity_id.into(),
            entity_type,
            action,
            payload,
            queued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Checks the entry is well-formed before it enters the queue.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.entity_id.trim().is_empty() {
            return Err(CoreError::MissingEntityId);
        }

        match (&self.payload, self.action.requires_payload()) {
            (None, true) => Err(CoreError::MissingPayload {
                entity_type: self.entity_type.to_string(),
                entity_id: self.entity_id.clone(),
                action: self.action.to_string(),
            }),
            (Some(payload), _) => validate_payload(&self.entity_id, payload),
            (None, false) => Ok(()),
        }
    }

    /// Returns true if this entry targets the given entity.
    pub fn targets(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }

    /// Records a failed push attempt and returns the new attempt count.
    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.attempts
    }
}

/// Checks a snapshot can be stored as entity `entity_id`: it must be an
/// object, and an `id` field, when present, must name the same entity.
pub fn validate_payload(entity_id: &str, payload: &Value) -> Result<(), CoreError> {
    let Some(object) = payload.as_object() else {
        return Err(CoreError::PayloadNotObject {
            entity_id: entity_id.to_string(),
        });
    };

    match object.get("id") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(id)) if id == entity_id => Ok(()),
        Some(other) => Err(CoreError::PayloadIdMismatch {
            entity_id: entity_id.to_string(),
            payload_id: other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
        }),
    }
}

// =============================================================================
// Conflicts
// =============================================================================

/// A divergence between a queued local change and a committed remote version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictItem {
    pub entity_id: String,
    pub entity_type: EntityType,

    /// Local snapshot at detection time.
    #[ts(type = "unknown")]
    pub local_version: Value,

    /// Remote snapshot at detection time.
    #[ts(type = "unknown")]
    pub remote_version: Value,

    #[ts(as = "String")]
    pub local_modified: DateTime<Utc>,

    #[ts(as = "String")]
    pub remote_modified: DateTime<Utc>,

    /// When the coordinator noticed the conflict.
    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

impl ConflictItem {
    /// Returns true if this conflict concerns the given entity.
    pub fn targets(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }
}

/// How conflicts are resolved automatically.
///
/// ## Policy Behavior
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  LOCAL   keep the local copy; the queued change overwrites on push     │
/// │  REMOTE  overwrite the local copy; the queued change is dropped        │
/// │  MERGE   remote as base + local personal fields, fresh lastModified    │
/// │  MANUAL  park in the conflict log until resolve_conflict() is called   │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConflictPolicy {
    Local,
    Remote,
    #[default]
    Merge,
    Manual,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Local => write!(f, "local"),
            ConflictPolicy::Remote => write!(f, "remote"),
            ConflictPolicy::Merge => write!(f, "merge"),
            ConflictPolicy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ConflictPolicy::Local),
            "remote" => Ok(ConflictPolicy::Remote),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(CoreError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Caller's decision for a conflict parked in the conflict log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "payload", rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Keep the local version and push it.
    Local,
    /// Accept the remote version.
    Remote,
    /// Store and push a caller-supplied version.
    Merged(Value),
}

// =============================================================================
// Status & Reports
// =============================================================================

/// Where the coordinator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pulling,
    ResolvingConflicts,
    Pushing,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Pulling => write!(f, "pulling"),
            SyncPhase::ResolvingConflicts => write!(f, "resolving_conflicts"),
            SyncPhase::Pushing => write!(f, "pushing"),
        }
    }
}

/// Derived sync status broadcast to listeners.
///
/// Never persisted; recomputed from the mutation queue, the conflict log and
/// the network monitor every time it is requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    /// Whether the network monitor reports connectivity.
    pub is_online: bool,

    /// Transport reported by the network monitor ("wifi", "cellular", ...).
    pub transport: String,

    /// Last time a pull completed successfully.
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Number of queued mutations.
    pub pending_count: usize,

    /// Whether a cycle is in flight.
    pub is_syncing: bool,

    /// Current cycle phase.
    pub phase: SyncPhase,

    /// Queued mutations whose last push failed.
    pub failed_entries: Vec<SyncEntry>,

    /// Number of conflicts awaiting manual resolution.
    pub conflict_count: usize,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncReport {
    /// True when the cycle did not run: another was in flight or the device
    /// was offline.
    pub skipped: bool,

    /// Remote entities received during pull.
    pub pulled: usize,

    /// Remote entities written to the local store.
    pub applied: usize,

    /// Conflicts detected during pull.
    pub conflicts: usize,

    /// The detected conflicts. Under the manual policy these are also parked
    /// in the conflict log.
    pub conflict_items: Vec<ConflictItem>,

    /// Remote entities that could not be written locally. When non-zero the
    /// last sync time is left alone so the next pull fetches them again.
    pub apply_failed: usize,

    /// Entries pushed successfully.
    pub pushed: usize,

    /// Entries whose push failed this cycle.
    pub failed: usize,

    /// Entries dropped after reaching the attempt limit.
    pub dropped: usize,

    /// Pull failure message, if the pull phase failed.
    pub pull_error: Option<String>,
}

impl SyncReport {
    /// Report for a cycle that never ran.
    pub fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..Default::default()
        }
    }
}
