//! # larder-core: Pure Sync Types & Algorithms
//!
//! Types and decision logic shared by the durable store and the sync engine.
//! Nothing here touches the network, the disk, or a clock it was not handed.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Larder Sync Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    App UI (recipes, collections)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ queue_recipe_change, perform_sync      │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        larder-sync (RequestClient, SyncCoordinator)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ larder-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  request  │  │   queue   │  │   merge   │  │   │
//! │  │   │ SyncEntry │  │ Descriptor│  │ Mutation  │  │ conflicts │  │   │
//! │  │   │ Conflict  │  │ cache key │  │  Queue    │  │  overlay  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 larder-store (durable key-value)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sync entries, conflicts, policies, status
//! - [`request`] - Request descriptors and deferred requests
//! - [`queue`] - Mutation queue replacement rules
//! - [`merge`] - Conflict detection and merge
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use larder_core::{EntityType, MutationQueue, SyncAction, SyncEntry};
//! use serde_json::json;
//!
//! let mut queue = MutationQueue::new();
//! queue.enqueue(SyncEntry::new(EntityType::Recipe, "r1", SyncAction::Create, Some(json!({"id": "r1"})))).unwrap();
//! queue.enqueue(SyncEntry::new(EntityType::Recipe, "r1", SyncAction::Delete, None)).unwrap();
//!
//! // Creating and deleting offline never reaches the server.
//! assert!(queue.is_empty());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod merge;
pub mod queue;
pub mod request;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use queue::{EnqueueOutcome, MutationQueue};
pub use request::{HttpMethod, QueuedRequest, RequestDescriptor, DEFAULT_TIMEOUT, GENERATION_TIMEOUT};
pub use types::*;
