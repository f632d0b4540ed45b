//! # larder-store: Durable Key-Value Store
//!
//! Persistence for the sync engine: the mutation queue, the conflict log,
//! deferred requests, credentials, the last-sync timestamp and the locally
//! held entities.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Larder Data Flow                                 │
//! │                                                                         │
//! │  SyncCoordinator / RequestClient                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   larder-store (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ KeyValueStore │    │  EntityStore  │    │  Migrations  │  │   │
//! │  │   │   (kv.rs)     │◄───│ (entities.rs) │    │  (embedded)  │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │   ┌───────┴───────┐    ┌───────────────┐                       │   │
//! │  │   │  SqliteStore  │    │  MemoryStore  │                       │   │
//! │  │   └───────────────┘    └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use larder_store::{SqliteStore, StoreConfig, EntityStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::new(StoreConfig::new("larder.db")).await?);
//! let entities = EntityStore::new(store.clone());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entities;
pub mod error;
pub mod kv;
pub mod memory;
pub mod migrations;
pub mod sqlite;

// =============================================================================
// Re-exports
// =============================================================================

pub use entities::EntityStore;
pub use error::{StoreError, StoreResult};
pub use kv::{get_json, get_list, keys, set_json, KeyValueStore, SharedStore};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreConfig};
