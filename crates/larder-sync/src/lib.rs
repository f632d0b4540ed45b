//! # larder-sync: Offline-First Sync Engine
//!
//! Keeps the recipe app usable without a network and converges local and
//! remote state when one is available.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         larder-sync Components                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      SyncCoordinator                            │   │
//! │  │                                                                 │   │
//! │  │  queue_recipe_change / queue_collection_change                  │   │
//! │  │  perform_sync: pull ──► resolve conflicts ──► push one batch    │   │
//! │  │  timer, reconnect trigger, status listeners                     │   │
//! │  └───────┬──────────────────────┬─────────────────────┬────────────┘   │
//! │          ▼                      ▼                     ▼                 │
//! │  ┌───────────────┐     ┌─────────────────┐    ┌─────────────────┐      │
//! │  │    Outbox     │     │    Inbound      │    │  ConflictLog    │      │
//! │  │ sync:queue    │     │ changes since   │    │ sync:conflicts  │      │
//! │  │ push + attempts│    │ policy apply    │    │ manual parking  │      │
//! │  └───────┬───────┘     └────────┬────────┘    └─────────────────┘      │
//! │          └──────────┬───────────┘                                       │
//! │                     ▼                                                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 RemoteApi ──► RequestClient                     │   │
//! │  │  mocks, LRU+TTL cache, offline queue, 401 refresh,              │   │
//! │  │  exponential backoff, envelope unwrapping                       │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 ▼                              ▼                        │
//! │  ┌─────────────────────────┐     ┌─────────────────────────────────┐   │
//! │  │ RemoteTransport         │     │ NetworkMonitor                  │   │
//! │  │ (reqwest HttpTransport) │     │ online/offline transitions      │   │
//! │  └─────────────────────────┘     └─────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Request Layer
//! - [`client`] - `RequestClient` pipeline and offline request queue
//! - [`api`] - Typed recipe and collection endpoints
//! - [`auth`] - Persisted access and refresh tokens
//! - [`cache`] - Bounded TTL response cache
//! - [`transport`] - Transport trait and reqwest implementation
//! - [`protocol`] - Response envelopes and refresh payloads
//! - [`network`] - Connectivity monitor
//!
//! ### Sync Layer
//! - [`coordinator`] - `SyncCoordinator` orchestrator
//! - [`outbox`] - Persisted mutation queue and push phase
//! - [`inbound`] - Pull phase and conflict policies
//! - [`conflicts`] - Conflicts awaiting manual resolution
//!
//! ### Shared
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Error types and the uniform `ApiError`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use larder_sync::{HttpTransport, NetworkMonitor, RequestClient, SyncConfig, SyncCoordinator};
//! use larder_core::SyncAction;
//! use std::sync::Arc;
//!
//! let config = SyncConfig::load_or_default(None);
//! let transport = Arc::new(HttpTransport::new(&config.api.base_url)?);
//! let client = RequestClient::open(transport, NetworkMonitor::online(), store.clone(), config.client.clone()).await;
//! let coordinator = SyncCoordinator::open(client.clone(), store, config.sync.clone()).await?;
//!
//! client.start().await;
//! coordinator.start().await;
//!
//! coordinator
//!     .queue_recipe_change("r1", SyncAction::Update, Some(serde_json::json!({"name": "Soup"})))
//!     .await?;
//! println!("Pending: {}", coordinator.status().await.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Request layer
pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod network;
pub mod protocol;
pub mod transport;

// Sync layer
pub mod conflicts;
pub mod coordinator;
pub mod inbound;
pub mod outbox;

pub mod config;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::RemoteApi;
pub use auth::{CredentialStore, Credentials};
pub use cache::{CacheStats, ResponseCache};
pub use client::{DrainReport, RequestClient};
pub use config::{ApiSettings, ClientSettings, SyncConfig, SyncSettings, SyncSettingsUpdate};
pub use coordinator::{ListenerId, StatusListener, SyncCoordinator};
pub use error::{ApiError, SyncError, SyncResult};
pub use network::{ConnectionType, NetworkEvent, NetworkMonitor, NetworkState};
pub use transport::{HttpTransport, RemoteTransport, TransportResponse};
