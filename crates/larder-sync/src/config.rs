//! # Sync Configuration
//!
//! Configuration management for the request client and the coordinator.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LARDER_API_URL=https://api.larder.app/v1                           │
//! │     LARDER_CONFLICT_POLICY=manual                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/larder/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.larder.larder/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     merge policy, 10-entry batches, 5 minute interval                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://api.larder.app/v1"
//! timeout_secs = 15
//!
//! [client]
//! cache_ttl_secs = 300
//! max_retries = 3
//! retry_base_delay_ms = 1000
//!
//! [sync]
//! conflict_policy = "merge"   # local | remote | merge | manual
//! auto_sync = true
//! sync_interval_secs = 300
//! batch_size = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use larder_core::ConflictPolicy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where the remote API lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL; request paths are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for generation-class calls (seconds).
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_timeout() -> u64 {
    15
}

fn default_generation_timeout() -> u64 {
    60
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

// =============================================================================
// Client Settings
// =============================================================================

/// Request client behavior: cache, retries, offline queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// How long a cached read stays valid (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached responses.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Maximum attempts for a transient failure, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay (milliseconds). Attempt n waits `2^(n-1) * base`.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Maximum number of requests held while offline.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Replays of a deferred request before it is dropped.
    #[serde(default = "default_max_replays")]
    pub max_replays: u32,
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_max_entries() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_max_queue_size() -> usize {
    50
}
fn default_max_replays() -> u32 {
    3
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_queue_size: default_max_queue_size(),
            max_replays: default_max_replays(),
        }
    }
}

impl ClientSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Coordinator behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// How conflicts are resolved automatically.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Whether the periodic timer runs.
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Interval between periodic cycles (seconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Entries pushed per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed pushes before an entry is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Modification times closer than this are the same edit (milliseconds).
    #[serde(default = "default_conflict_tolerance")]
    pub conflict_tolerance_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_sync_interval() -> u64 {
    300
}
fn default_batch_size() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_conflict_tolerance() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            conflict_policy: ConflictPolicy::default(),
            auto_sync: default_true(),
            sync_interval_secs: default_sync_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            conflict_tolerance_ms: default_conflict_tolerance(),
        }
    }
}

impl SyncSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn conflict_tolerance(&self) -> Duration {
        Duration::from_millis(self.conflict_tolerance_ms)
    }

    /// Checks the settings can drive a coordinator.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.auto_sync && self.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync_interval_secs must be greater than 0 when auto_sync is on".into(),
            ));
        }
        Ok(())
    }
}

/// Partial update applied by `SyncCoordinator::update_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettingsUpdate {
    pub conflict_policy: Option<ConflictPolicy>,
    pub sync_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub auto_sync: Option<bool>,
}

impl SyncSettingsUpdate {
    /// Returns the settings with this update applied.
    pub fn apply_to(&self, settings: &SyncSettings) -> SyncSettings {
        let mut next = settings.clone();
        if let Some(policy) = self.conflict_policy {
            next.conflict_policy = policy;
        }
        if let Some(interval) = self.sync_interval_secs {
            next.sync_interval_secs = interval;
        }
        if let Some(batch_size) = self.batch_size {
            next.batch_size = batch_size;
        }
        if let Some(auto_sync) = self.auto_sync {
            next.auto_sync = auto_sync;
        }
        next
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SQLite file for the durable store. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.api.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.client.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }

        self.sync.validate()
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LARDER_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Ok(policy) = std::env::var("LARDER_CONFLICT_POLICY") {
            match policy.parse() {
                Ok(parsed) => self.sync.conflict_policy = parsed,
                Err(_) => warn!(policy = %policy, "Unknown conflict policy in environment"),
            }
        }

        if let Ok(interval) = std::env::var("LARDER_SYNC_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.sync.sync_interval_secs = secs;
            }
        }

        if let Ok(batch) = std::env::var("LARDER_BATCH_SIZE") {
            if let Ok(size) = batch.parse::<usize>() {
                self.sync.batch_size = size;
            }
        }

        if let Ok(auto) = std::env::var("LARDER_AUTO_SYNC") {
            self.sync.auto_sync = auto != "false" && auto != "0";
        }

        if let Ok(path) = std::env::var("LARDER_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "larder", "larder")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns the database path, falling back to the platform data dir.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("larder.db")))
    }

    /// Returns the default request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
