//! # Sync Coordinator
//!
//! Orchestrates the mutation queue, the pull and push phases, conflict
//! resolution and status reporting.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncCoordinator Cycle                            │
//! │                                                                         │
//! │   triggers: timer │ reconnect with pending work │ queue_*_change online │
//! │             perform_sync() │ force_pull() │ force_push()                │
//! │                               │                                         │
//! │                     in flight? ──yes──► skipped                         │
//! │                               │ no                                      │
//! │                               ▼                                         │
//! │   ┌──────────┐   ┌─────────────────────┐   ┌──────────┐   ┌──────┐    │
//! │   │ Pulling  │──►│ ResolvingConflicts  │──►│ Pushing  │──►│ Idle │    │
//! │   │ changes  │   │ policy per conflict │   │ 1 batch  │   │      │    │
//! │   │ since    │   │ last_sync_at = start│   │          │   │      │    │
//! │   └──────────┘   └─────────────────────┘   └──────────┘   └──────┘    │
//! │        │ failure: logged, push still runs                              │
//! │                                                                         │
//! │   Every transition notifies status listeners.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use larder_core::{
    validate_payload, ConflictChoice, ConflictItem, CoreError, EnqueueOutcome, EntityType,
    SyncAction, SyncEntry, SyncPhase, SyncReport, SyncStatus,
};
use larder_store::{get_json, keys, set_json, EntityStore, SharedStore};

use crate::api::RemoteApi;
use crate::client::RequestClient;
use crate::config::{SyncSettings, SyncSettingsUpdate};
use crate::conflicts::ConflictLog;
use crate::error::{SyncError, SyncResult};
use crate::inbound::{fetch_changes, ApplySummary, InboundApplier};
use crate::network::{NetworkEvent, NetworkMonitor};
use crate::outbox::{Outbox, PushSummary};

// =============================================================================
// Status Listeners
// =============================================================================

/// Callback invoked with the fresh status after every change.
pub type StatusListener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Handle returned by [`SyncCoordinator::add_status_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Background {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct PullOutcome {
    pulled: usize,
    applied: ApplySummary,
}

impl PullOutcome {
    fn fill(self, report: &mut SyncReport) {
        report.pulled = self.pulled;
        report.applied = self.applied.applied;
        report.apply_failed = self.applied.failed;
        report.conflicts = self.applied.conflicts.len();
        report.conflict_items = self.applied.conflicts;
    }
}

// =============================================================================
// Sync Coordinator
// =============================================================================

pub struct SyncCoordinator {
    api: RemoteApi,
    network: NetworkMonitor,
    store: SharedStore,
    entities: EntityStore,
    outbox: Outbox,
    conflicts: ConflictLog,

    /// Current settings; the timer task watches for changes.
    settings: watch::Sender<SyncSettings>,

    last_sync_at: RwLock<Option<DateTime<Utc>>>,
    in_flight: AtomicBool,
    phase: std::sync::Mutex<SyncPhase>,

    listeners: std::sync::Mutex<Vec<(ListenerId, StatusListener)>>,
    next_listener_id: AtomicU64,

    background: Mutex<Option<Background>>,
}

impl SyncCoordinator {
    /// Builds a coordinator over `client`, restoring the persisted queue,
    /// conflict log and last sync time from `store`.
    pub async fn open(
        client: Arc<RequestClient>,
        store: SharedStore,
        settings: SyncSettings,
    ) -> SyncResult<Arc<Self>> {
        settings.validate()?;

        let last_sync_at = match get_json::<DateTime<Utc>>(store.as_ref(), keys::LAST_SYNC_AT).await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(?e, "Failed to read last sync time, pulling everything");
                None
            }
        };

        let network = client.network().clone();
        let (settings_tx, _) = watch::channel(settings);

        let coordinator = SyncCoordinator {
            api: RemoteApi::background(client),
            network,
            entities: EntityStore::new(Arc::clone(&store)),
            outbox: Outbox::load(Arc::clone(&store)).await,
            conflicts: ConflictLog::load(Arc::clone(&store)).await,
            store,
            settings: settings_tx,
            last_sync_at: RwLock::new(last_sync_at),
            in_flight: AtomicBool::new(false),
            phase: std::sync::Mutex::new(SyncPhase::Idle),
            listeners: std::sync::Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            background: Mutex::new(None),
        };

        info!(
            pending = coordinator.outbox.len().await,
            conflicts = coordinator.conflicts.len().await,
            "Sync coordinator ready"
        );
        Ok(Arc::new(coordinator))
    }

    /// Local copies of recipes and collections.
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings.borrow().clone()
    }

    pub async fn pending_entries(&self) -> Vec<SyncEntry> {
        self.outbox.entries().await
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    pub async fn queue_recipe_change(
        &self,
        entity_id: &str,
        action: SyncAction,
        payload: Option<Value>,
    ) -> SyncResult<EnqueueOutcome> {
        self.queue_change(EntityType::Recipe, entity_id, action, payload)
            .await
    }

    pub async fn queue_collection_change(
        &self,
        entity_id: &str,
        action: SyncAction,
        payload: Option<Value>,
    ) -> SyncResult<EnqueueOutcome> {
        self.queue_change(EntityType::Collection, entity_id, action, payload)
            .await
    }

    /// Applies a local change and queues it for push.
    ///
    /// When online, a sync cycle runs before this returns.
    pub async fn queue_change(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: SyncAction,
        payload: Option<Value>,
    ) -> SyncResult<EnqueueOutcome> {
        let payload = payload.map(|p| with_id(p, entity_id));
        let entry = SyncEntry::new(entity_type, entity_id, action, payload);
        entry.validate()?;

        match (&entry.payload, action) {
            (_, SyncAction::Delete) => self.entities.remove(entity_type, entity_id).await?,
            (Some(payload), _) => self.entities.put(entity_type, payload).await?,
            (None, _) => {}
        }

        let outcome = self.outbox.enqueue(entry).await?;
        if outcome == EnqueueOutcome::Cancelled {
            self.conflicts.discard(entity_type, entity_id).await;
        }
        self.notify().await;

        if self.network.is_connected() {
            self.perform_sync().await;
        }
        Ok(outcome)
    }

    /// Drops every pending change and returns how many were dropped.
    pub async fn clear_queue(&self) -> usize {
        let cleared = self.outbox.clear().await;
        self.notify().await;
        cleared
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    /// Runs one pull-then-push cycle.
    ///
    /// Returns a skipped report when offline or when a cycle is already
    /// running. Pull failures are logged and reported; the push still runs.
    pub async fn perform_sync(&self) -> SyncReport {
        if !self.network.is_connected() {
            debug!("Offline, skipping sync");
            return SyncReport::skipped();
        }
        let Some(flight) = self.try_begin() else {
            debug!("Sync already in progress, skipping");
            return SyncReport::skipped();
        };

        let settings = self.settings();
        let mut report = SyncReport::default();
        info!("Sync cycle starting");

        match self.pull_phase(&settings).await {
            Ok(outcome) => outcome.fill(&mut report),
            Err(e) => {
                error!(?e, "Pull failed");
                report.pull_error = Some(e.to_string());
            }
        }

        let push = self.push_phase(&settings).await;
        report.pushed = push.pushed;
        report.failed = push.failed;
        report.dropped = push.dropped;

        self.finish(flight).await;
        info!(
            pulled = report.pulled,
            apply_failed = report.apply_failed,
            conflicts = report.conflicts,
            pushed = report.pushed,
            failed = report.failed,
            "Sync cycle complete"
        );
        report
    }

    /// Runs only the pull phase.
    pub async fn force_pull(&self) -> SyncResult<SyncReport> {
        if !self.network.is_connected() {
            return Err(SyncError::Offline);
        }
        let Some(flight) = self.try_begin() else {
            return Ok(SyncReport::skipped());
        };

        let settings = self.settings();
        let result = self.pull_phase(&settings).await;
        self.finish(flight).await;

        let mut report = SyncReport::default();
        result?.fill(&mut report);
        Ok(report)
    }

    /// Runs only the push phase.
    ///
    /// Fails with the first push error when nothing could be pushed.
    pub async fn force_push(&self) -> SyncResult<SyncReport> {
        if !self.network.is_connected() {
            return Err(SyncError::Offline);
        }
        let Some(flight) = self.try_begin() else {
            return Ok(SyncReport::skipped());
        };

        let settings = self.settings();
        let push = self.push_phase(&settings).await;
        self.finish(flight).await;

        if push.pushed == 0 {
            if let Some(e) = push.first_error {
                return Err(e);
            }
        }
        Ok(SyncReport {
            pushed: push.pushed,
            failed: push.failed,
            dropped: push.dropped,
            ..Default::default()
        })
    }

    async fn pull_phase(&self, settings: &SyncSettings) -> SyncResult<PullOutcome> {
        self.set_phase(SyncPhase::Pulling).await;

        let since = *self.last_sync_at.read().await;
        let started = Utc::now();
        let changes = fetch_changes(&self.api, since).await?;
        let pulled = changes.len();
        debug!(pulled, ?since, "Remote changes fetched");

        self.set_phase(SyncPhase::ResolvingConflicts).await;
        let applied = InboundApplier {
            entities: &self.entities,
            outbox: &self.outbox,
            conflicts: &self.conflicts,
            policy: settings.conflict_policy,
            tolerance: settings.conflict_tolerance(),
        }
        .apply(changes)
        .await;

        if applied.failed == 0 {
            self.record_last_sync(started).await;
        } else {
            warn!(
                failed = applied.failed,
                "Keeping last sync time so unapplied changes are fetched again"
            );
        }
        Ok(PullOutcome { pulled, applied })
    }

    async fn push_phase(&self, settings: &SyncSettings) -> PushSummary {
        self.set_phase(SyncPhase::Pushing).await;
        let held_back = self.conflicts.held_back().await;
        self.outbox
            .push(
                &self.api,
                &self.entities,
                settings.batch_size,
                settings.max_attempts,
                &held_back,
            )
            .await
    }

    async fn finish(&self, flight: FlightGuard<'_>) {
        *lock(&self.phase) = SyncPhase::Idle;
        drop(flight);
        self.notify().await;
    }

    async fn record_last_sync(&self, at: DateTime<Utc>) {
        *self.last_sync_at.write().await = Some(at);
        if let Err(e) = set_json(self.store.as_ref(), keys::LAST_SYNC_AT, &at).await {
            error!(?e, "Failed to persist last sync time");
        }
    }

    async fn set_phase(&self, phase: SyncPhase) {
        *lock(&self.phase) = phase;
        debug!(phase = %phase, "Sync phase");
        self.notify().await;
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Applies a partial settings update. The timer picks up a new interval.
    pub async fn update_config(&self, update: SyncSettingsUpdate) -> SyncResult<SyncSettings> {
        let next = update.apply_to(&self.settings());
        next.validate()?;
        self.settings.send_replace(next.clone());

        info!(
            policy = %next.conflict_policy,
            interval_secs = next.sync_interval_secs,
            batch_size = next.batch_size,
            auto_sync = next.auto_sync,
            "Sync settings updated"
        );
        self.notify().await;
        Ok(next)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub async fn list_conflicts(&self) -> Vec<ConflictItem> {
        self.conflicts.list().await
    }

    /// Resolves the parked conflict for `entity_id`. Its queued change
    /// becomes pushable.
    ///
    /// Fails with `AmbiguousConflict` when a recipe and a collection with
    /// this id are both parked; use [`Self::resolve_entity_conflict`] then.
    pub async fn resolve_conflict(&self, entity_id: &str, choice: ConflictChoice) -> SyncResult<()> {
        match self.conflicts.types_for(entity_id).await.as_slice() {
            [] => Err(SyncError::ConflictNotFound {
                entity_id: entity_id.to_string(),
            }),
            [entity_type] => {
                self.resolve_entity_conflict(*entity_type, entity_id, choice)
                    .await
            }
            _ => Err(SyncError::AmbiguousConflict {
                entity_id: entity_id.to_string(),
            }),
        }
    }

    /// Resolves the parked conflict for one entity.
    pub async fn resolve_entity_conflict(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        choice: ConflictChoice,
    ) -> SyncResult<()> {
        let item = self
            .conflicts
            .take(entity_type, entity_id)
            .await
            .ok_or_else(|| SyncError::ConflictNotFound {
                entity_id: entity_id.to_string(),
            })?;

        if let Err(e) = self.apply_resolution(&item, &choice).await {
            self.conflicts.record(item).await;
            return Err(e);
        }

        info!(entity_id = %entity_id, "Conflict resolved");
        self.notify().await;
        Ok(())
    }

    /// Resolves every parked conflict the same way.
    ///
    /// A caller-supplied merge cannot apply to many entities at once.
    pub async fn resolve_all_conflicts(&self, choice: ConflictChoice) -> SyncResult<usize> {
        if matches!(choice, ConflictChoice::Merged(_)) {
            return Err(CoreError::BulkMergeUnsupported.into());
        }

        let items = self.conflicts.take_all().await;
        let mut resolved = 0;
        let mut first_error = None;
        for item in items {
            match self.apply_resolution(&item, &choice).await {
                Ok(()) => resolved += 1,
                Err(e) => {
                    error!(?e, entity_id = %item.entity_id, "Failed to resolve conflict");
                    self.conflicts.record(item).await;
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(resolved, "Conflicts resolved");
        self.notify().await;
        match first_error {
            Some(e) => Err(e),
            None => Ok(resolved),
        }
    }

    async fn apply_resolution(&self, item: &ConflictItem, choice: &ConflictChoice) -> SyncResult<()> {
        let entity_type = item.entity_type;
        let entity_id = item.entity_id.as_str();

        match choice {
            ConflictChoice::Local => {
                if self.outbox.find(entity_type, entity_id).await.is_none() {
                    let entry = if item.local_version.is_null() {
                        SyncEntry::new(entity_type, entity_id, SyncAction::Delete, None)
                    } else {
                        SyncEntry::new(
                            entity_type,
                            entity_id,
                            SyncAction::Update,
                            Some(item.local_version.clone()),
                        )
                    };
                    self.outbox.enqueue(entry).await?;
                }
            }
            ConflictChoice::Remote => {
                self.entities.put(entity_type, &item.remote_version).await?;
                self.outbox.remove(entity_type, entity_id).await;
            }
            ConflictChoice::Merged(payload) => {
                let payload = with_id(payload.clone(), entity_id);
                validate_payload(entity_id, &payload)?;
                self.entities.put(entity_type, &payload).await?;

                let pending = self.outbox.find(entity_type, entity_id).await;
                match pending {
                    Some(entry) if entry.action != SyncAction::Delete => {
                        self.outbox.set_payload(entity_type, entity_id, payload).await;
                    }
                    _ => {
                        self.outbox
                            .enqueue(SyncEntry::new(
                                entity_type,
                                entity_id,
                                SyncAction::Update,
                                Some(payload),
                            ))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn status(&self) -> SyncStatus {
        let network = self.network.current_state();
        let phase = *lock(&self.phase);
        SyncStatus {
            is_online: network.connected,
            transport: network.transport.to_string(),
            last_sync_at: *self.last_sync_at.read().await,
            pending_count: self.outbox.len().await,
            is_syncing: self.in_flight.load(Ordering::Acquire),
            phase,
            failed_entries: self.outbox.failed_entries().await,
            conflict_count: self.conflicts.len().await,
        }
    }

    /// Registers a listener. It is called with every status change until
    /// removed.
    pub fn add_status_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    async fn notify(&self) {
        let listeners: Vec<StatusListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }

        let status = self.status().await;
        for listener in listeners {
            listener(&status);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the periodic timer and the reconnect trigger.
    pub async fn start(self: &Arc<Self>) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            warn!("Sync coordinator already started");
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_triggers(
            Arc::downgrade(self),
            self.settings.subscribe(),
            self.network.subscribe(),
            shutdown_rx,
        ));
        *background = Some(Background {
            shutdown_tx,
            handle,
        });

        let settings = self.settings();
        info!(
            auto_sync = settings.auto_sync,
            interval_secs = settings.sync_interval_secs,
            "Sync coordinator started"
        );
    }

    /// Stops background triggers and waits for them to exit.
    pub async fn shutdown(&self) {
        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        let _ = background.shutdown_tx.send(()).await;
        if let Err(e) = background.handle.await {
            error!(?e, "Sync trigger task panicked");
        }
        info!("Sync coordinator stopped");
    }
}

fn new_timer(settings: &SyncSettings) -> tokio::time::Interval {
    let period = settings.sync_interval().max(std::time::Duration::from_millis(1));
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn run_triggers(
    coordinator: Weak<SyncCoordinator>,
    mut settings_rx: watch::Receiver<SyncSettings>,
    mut events: broadcast::Receiver<NetworkEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut settings = settings_rx.borrow_and_update().clone();
    let mut timer = new_timer(&settings);

    loop {
        tokio::select! {
            _ = timer.tick(), if settings.auto_sync => {
                let Some(coordinator) = coordinator.upgrade() else { break };
                debug!("Periodic sync");
                coordinator.perform_sync().await;
            }

            changed = settings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                settings = settings_rx.borrow_and_update().clone();
                timer = new_timer(&settings);
            }

            event = events.recv() => {
                let reconnected = match event {
                    Ok(event) => event.is_reconnect(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed network events");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !reconnected {
                    continue;
                }
                let Some(coordinator) = coordinator.upgrade() else { break };
                if !coordinator.outbox.is_empty().await {
                    info!("Reconnected with pending changes, syncing");
                    coordinator.perform_sync().await;
                }
            }

            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Sync triggers stopped");
}

/// Ensures an object payload carries its entity id.
fn with_id(payload: Value, entity_id: &str) -> Value {
    match payload {
        Value::Object(mut map) => {
            let id = map.entry("id").or_insert(Value::Null);
            if id.is_null() {
                *id = Value::String(entity_id.to_string());
            }
            Value::Object(map)
        }
        other => other,
    }
}
