//! # Error Types
//!
//! Domain-specific error types for larder-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  larder-core errors (this file)                                        │
//! │  └── CoreError        - Parsing and payload validation failures        │
//! │                                                                         │
//! │  larder-store errors (separate crate)                                  │
//! │  └── StoreError       - Key-value store failures                       │
//! │                                                                         │
//! │  larder-sync errors (separate crate)                                   │
//! │  └── SyncError        - What callers of the engine see                 │
//! │                                                                         │
//! │  Flow: CoreError → StoreError → SyncError → ApiError (normalized)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised by the pure sync types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Entity type tag is not one of `recipe` / `collection`.
    #[error("Unknown entity type: '{0}'. Valid options: recipe, collection")]
    UnknownEntityType(String),

    /// Sync action is not one of `create` / `update` / `delete`.
    #[error("Unknown sync action: '{0}'. Valid options: create, update, delete")]
    UnknownAction(String),

    /// Conflict policy is not one of `local` / `remote` / `merge` / `manual`.
    #[error("Unknown conflict policy: '{0}'. Valid options: local, remote, merge, manual")]
    UnknownPolicy(String),

    /// A create/update was queued without a payload snapshot.
    ///
    /// ## When This Occurs
    /// - `queue_recipe_change(id, Update, None)`
    /// - A persisted entry was edited by hand and lost its payload
    #[error("{action} for {entity_type}/{entity_id} requires a payload")]
    MissingPayload {
        entity_type: String,
        entity_id: String,
        action: String,
    },

    /// Entity payload is not a JSON object.
    #[error("Payload for {entity_id} must be a JSON object")]
    PayloadNotObject { entity_id: String },

    /// Entity id is empty.
    #[error("Entity id is required")]
    MissingEntityId,

    /// The payload names a different entity than the change targets.
    #[error("Payload id '{payload_id}' does not match entity '{entity_id}'")]
    PayloadIdMismatch {
        entity_id: String,
        payload_id: String,
    },

    /// Manual resolution choice cannot be applied in bulk.
    #[error("Merged payloads must be resolved one conflict at a time")]
    BulkMergeUnsupported,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
