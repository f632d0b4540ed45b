//! # Request Client
//!
//! Every call to the remote API goes through [`RequestClient::execute`].
//!
//! ## Request Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  execute(descriptor)                                                    │
//! │    │                                                                    │
//! │    ├── 1. mock registered?         ──► mock value                      │
//! │    ├── 2. cacheable read, cache hit ──► cached value                   │
//! │    ├── 3. offline                                                       │
//! │    │      ├── retry-eligible        ──► queue, Err(QueuedForLater)     │
//! │    │      └── otherwise             ──► Err(NoConnectivity)            │
//! │    ├── 4. send with per-request timeout                                 │
//! │    ├── 5. 401 ──► refresh once, replay once                             │
//! │    │            refresh failed ──► clear credentials,                   │
//! │    │                               Err(AuthenticationFailed)           │
//! │    ├── 6. transient ──► wait 2^(n-1) * base, retry up to max_retries   │
//! │    │                    then Err(RetriesExhausted)                     │
//! │    └── 7. success ──► unwrap envelope, cache reads, invalidate on write│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Offline Queue
//! Retry-eligible requests made while offline are persisted under
//! `client:request_queue` (bounded, oldest dropped first) and replayed once
//! per reconnect. A replay failure bumps the item's replay count; items that
//! reach `max_replays` are dropped with a warning.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use larder_core::{QueuedRequest, RequestDescriptor};
use larder_store::{get_list, keys, set_json, SharedStore};

use crate::auth::{CredentialStore, Credentials};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::ClientSettings;
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::protocol::{parse_error, unwrap_success, RefreshRequest, RefreshResponse, REFRESH_PATH};
use crate::transport::{RemoteTransport, TransportResponse};

/// Upper bound on a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Outcome of one offline-queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped: usize,
}

struct Watcher {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RequestClient {
    transport: Arc<dyn RemoteTransport>,
    network: NetworkMonitor,
    store: SharedStore,
    credentials: CredentialStore,
    settings: ClientSettings,
    default_timeout: Duration,

    cache: Mutex<ResponseCache>,
    queue: Mutex<Vec<QueuedRequest>>,
    mocks: RwLock<HashMap<String, Value>>,

    /// Serializes credential refreshes so concurrent 401s refresh once.
    refresh_lock: Mutex<()>,

    /// Held for the duration of a queue drain.
    drain_lock: Mutex<()>,

    watcher: Mutex<Option<Watcher>>,
}

impl RequestClient {
    /// Creates a client with an empty offline queue.
    ///
    /// Use [`RequestClient::open`] to restore requests queued in a previous
    /// session.
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        network: NetworkMonitor,
        store: SharedStore,
        settings: ClientSettings,
    ) -> Self {
        let cache = ResponseCache::new(settings.cache_max_entries, settings.cache_ttl());
        RequestClient {
            transport,
            network,
            credentials: CredentialStore::new(Arc::clone(&store)),
            store,
            settings,
            default_timeout: larder_core::DEFAULT_TIMEOUT,
            cache: Mutex::new(cache),
            queue: Mutex::new(Vec::new()),
            mocks: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
            watcher: Mutex::new(None),
        }
    }

    /// Creates a client and restores the persisted offline queue.
    pub async fn open(
        transport: Arc<dyn RemoteTransport>,
        network: NetworkMonitor,
        store: SharedStore,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let client = Arc::new(Self::new(transport, network, store, settings));
        client.restore_queue().await;
        client
    }

    /// Timeout applied to the credential refresh call.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    async fn restore_queue(&self) {
        match get_list::<QueuedRequest>(self.store.as_ref(), keys::REQUEST_QUEUE).await {
            Ok(items) => {
                if !items.is_empty() {
                    info!(count = items.len(), "Restored offline request queue");
                }
                *self.queue.lock().await = items;
            }
            Err(e) => {
                error!(?e, "Failed to restore offline request queue, starting empty");
            }
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub async fn set_credentials(&self, credentials: &Credentials) -> SyncResult<()> {
        self.credentials.set_credentials(credentials).await
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Performs a request and returns the unwrapped `data` payload.
    pub async fn execute(&self, request: RequestDescriptor) -> SyncResult<Value> {
        let cache_key = request.cache_key();

        if let Some(mock) = self.mocks.read().await.get(&cache_key) {
            debug!(request = %request.label(), "Serving mock response");
            return Ok(mock.clone());
        }

        if request.is_cacheable_read() {
            if let Some(hit) = self.cache.lock().await.get(&cache_key) {
                debug!(request = %request.label(), "Cache hit");
                return Ok(hit);
            }
        }

        if !self.network.is_connected() {
            if request.retryable {
                let request_id = self.enqueue(request).await;
                return Err(SyncError::QueuedForLater { request_id });
            }
            debug!(request = %request.label(), "Offline, request rejected");
            return Err(SyncError::NoConnectivity);
        }

        let data = self.send_with_retry(&request).await?;
        self.record_success(&request, &cache_key, &data).await;
        Ok(data)
    }

    async fn record_success(&self, request: &RequestDescriptor, cache_key: &str, data: &Value) {
        let mut cache = self.cache.lock().await;
        if request.is_cacheable_read() {
            cache.set(cache_key, request.path.clone(), data.clone());
        } else if !request.method.is_read() {
            let root = collection_root(&request.path);
            let invalidated = cache.invalidate_path(&root);
            if invalidated > 0 {
                debug!(path = %root, invalidated, "Invalidated cached reads after write");
            }
        }
    }

    async fn send_with_retry(&self, request: &RequestDescriptor) -> SyncResult<Value> {
        let max_attempts = if request.retryable {
            self.settings.max_retries.max(1)
        } else {
            1
        };
        let mut backoff = self.create_backoff();
        let mut attempt = 1;

        loop {
            match self.send_authorized(request).await {
                Ok(data) => return Ok(data),
                Err(e) if request.retryable && e.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!(
                            request = %request.label(),
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.settings.retry_base_delay());
                    warn!(
                        request = %request.label(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delays of `base`, `2 * base`, `4 * base`, ...
    fn create_backoff(&self) -> ExponentialBackoff {
        let base = self.settings.retry_base_delay();
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: MAX_RETRY_DELAY,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// One attempt, including at most one credential refresh and replay.
    async fn send_authorized(&self, request: &RequestDescriptor) -> SyncResult<Value> {
        let token = self.credentials.access_token().await;
        let response = self.send_once(request, token.as_deref()).await?;

        if response.status != 401 {
            return interpret(response);
        }

        debug!(request = %request.label(), "Access token rejected, refreshing");
        self.refresh_credentials(token.as_deref()).await?;

        let token = self.credentials.access_token().await;
        let response = self.send_once(request, token.as_deref()).await?;
        if response.status == 401 {
            warn!(request = %request.label(), "Rejected again after refresh");
            self.credentials.clear().await;
            return Err(SyncError::AuthenticationFailed(
                "access token rejected after refresh".into(),
            ));
        }
        interpret(response)
    }

    async fn send_once(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> SyncResult<TransportResponse> {
        let timeout = request.timeout_duration();
        tokio::time::timeout(timeout, self.transport.send(request, token))
            .await
            .map_err(|_| SyncError::Timeout(request.timeout_ms))?
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// `stale_token` is the token that was rejected. If another caller has
    /// already replaced it, no second refresh is made.
    async fn refresh_credentials(&self, stale_token: Option<&str>) -> SyncResult<()> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.credentials.access_token().await;
        if current.is_some() && current.as_deref() != stale_token {
            debug!("Credentials already refreshed by a concurrent request");
            return Ok(());
        }

        let Some(refresh_token) = self.credentials.refresh_token().await else {
            self.credentials.clear().await;
            return Err(SyncError::AuthenticationFailed(
                "no refresh token available".into(),
            ));
        };

        let body = serde_json::to_value(RefreshRequest { refresh_token })?;
        let request = RequestDescriptor::post(REFRESH_PATH, body)
            .retryable(false)
            .timeout(self.default_timeout);

        let failure = match self.send_once(&request, None).await {
            Ok(response) if response.is_success() => {
                match serde_json::from_value::<RefreshResponse>(unwrap_success(response.body)) {
                    Ok(refreshed) => {
                        self.credentials
                            .set_credentials(&Credentials::new(
                                refreshed.access_token,
                                refreshed.refresh_token,
                            ))
                            .await?;
                        info!("Access token refreshed");
                        return Ok(());
                    }
                    Err(e) => format!("malformed refresh response: {}", e),
                }
            }
            Ok(response) => format!(
                "refresh rejected: {}",
                parse_error(response.status, &response.body)
            ),
            Err(e) => format!("refresh failed: {}", e),
        };

        warn!(reason = %failure, "Credential refresh failed, signing out");
        self.credentials.clear().await;
        Err(SyncError::AuthenticationFailed(failure))
    }

    // =========================================================================
    // Offline Queue
    // =========================================================================

    async fn enqueue(&self, request: RequestDescriptor) -> String {
        let item = QueuedRequest::new(request);
        let request_id = item.id.clone();
        let label = item.descriptor.label();

        let mut queue = self.queue.lock().await;
        queue.push(item);
        while queue.len() > self.settings.max_queue_size {
            let dropped = queue.remove(0);
            warn!(
                request_id = %dropped.id,
                request = %dropped.descriptor.label(),
                "Offline queue full, dropping oldest request"
            );
        }
        self.persist_queue(&queue).await;

        info!(request_id = %request_id, request = %label, queued = queue.len(), "Request queued for later");
        request_id
    }

    async fn persist_queue(&self, queue: &[QueuedRequest]) {
        if let Err(e) = set_json(self.store.as_ref(), keys::REQUEST_QUEUE, queue).await {
            error!(?e, "Failed to persist offline request queue");
        }
    }

    pub async fn queued_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.queue.lock().await.clone()
    }

    pub async fn clear_queue(&self) {
        let mut queue = self.queue.lock().await;
        queue.clear();
        self.persist_queue(&queue).await;
    }

    /// Replays every queued request once.
    ///
    /// Does nothing while offline or while another drain is running.
    pub async fn process_queue(&self) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.network.is_connected() {
            return report;
        }
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Offline queue drain already in progress");
            return report;
        };

        let items = std::mem::take(&mut *self.queue.lock().await);
        if items.is_empty() {
            return report;
        }
        info!(count = items.len(), "Replaying offline request queue");

        let mut retained = Vec::new();
        for mut item in items {
            report.replayed += 1;
            match self.send_authorized(&item.descriptor).await {
                Ok(data) => {
                    report.succeeded += 1;
                    let key = item.descriptor.cache_key();
                    self.record_success(&item.descriptor, &key, &data).await;
                    debug!(request_id = %item.id, "Queued request replayed");
                }
                Err(e) => {
                    item.retry_count += 1;
                    if item.retry_count >= self.settings.max_replays {
                        report.dropped += 1;
                        warn!(
                            request_id = %item.id,
                            request = %item.descriptor.label(),
                            replays = item.retry_count,
                            error = %e,
                            "Dropping queued request after repeated failures"
                        );
                    } else {
                        report.requeued += 1;
                        debug!(request_id = %item.id, error = %e, "Queued request failed, keeping");
                        retained.push(item);
                    }
                }
            }
        }

        // Requests queued during the drain go after the retained ones.
        let mut queue = self.queue.lock().await;
        retained.append(&mut queue);
        let overflow = retained.len().saturating_sub(self.settings.max_queue_size);
        if overflow > 0 {
            warn!(overflow, "Offline queue full after drain, dropping oldest requests");
            retained.drain(..overflow);
        }
        *queue = retained;
        self.persist_queue(&queue).await;

        info!(
            succeeded = report.succeeded,
            requeued = report.requeued,
            dropped = report.dropped,
            "Offline request queue drained"
        );
        report
    }

    // =========================================================================
    // Reconnect Watcher
    // =========================================================================

    /// Starts draining the offline queue on every reconnect.
    pub async fn start(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            warn!("Request client already started");
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let events = self.network.subscribe();
        let handle = tokio::spawn(run_reconnect_watcher(
            Arc::downgrade(self),
            events,
            shutdown_rx,
        ));

        *watcher = Some(Watcher {
            shutdown_tx,
            handle,
        });
        info!("Request client started");
    }

    /// Stops the reconnect watcher and waits for it to exit.
    pub async fn shutdown(&self) {
        let Some(watcher) = self.watcher.lock().await.take() else {
            return;
        };
        let _ = watcher.shutdown_tx.send(()).await;
        if let Err(e) = watcher.handle.await {
            error!(?e, "Reconnect watcher panicked");
        }
        info!("Request client stopped");
    }

    // =========================================================================
    // Cache And Mocks
    // =========================================================================

    /// Serves `value` for every request matching `request`'s cache key.
    pub async fn set_mock_response(&self, request: &RequestDescriptor, value: Value) {
        self.mocks.write().await.insert(request.cache_key(), value);
    }

    pub async fn clear_mock_responses(&self) {
        self.mocks.write().await.clear();
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Drops cached reads whose path starts with `prefix`.
    pub async fn invalidate_path(&self, prefix: &str) -> usize {
        self.cache.lock().await.invalidate_path(prefix)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }
}

async fn run_reconnect_watcher(
    client: Weak<RequestClient>,
    mut events: tokio::sync::broadcast::Receiver<crate::network::NetworkEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let drain = match event {
                    Ok(event) => event.is_reconnect(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed network events");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !drain {
                    continue;
                }
                match client.upgrade() {
                    Some(client) => {
                        client.process_queue().await;
                    }
                    None => break,
                }
            }

            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Reconnect watcher stopped");
}

fn interpret(response: TransportResponse) -> SyncResult<Value> {
    if response.is_success() {
        return Ok(unwrap_success(response.body));
    }
    Err(SyncError::Api {
        status: response.status,
        error: parse_error(response.status, &response.body),
    })
}

/// `/recipes/r1/items` → `/recipes`.
fn collection_root(path: &str) -> String {
    let first = path
        .trim_start_matches('/')
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    format!("/{}", first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_root() {
        assert_eq!(collection_root("/recipes/r1"), "/recipes");
        assert_eq!(collection_root("/recipes"), "/recipes");
        assert_eq!(collection_root("collections/c1/recipes"), "/collections");
    }

    #[test]
    fn test_interpret_error_status() {
        let err = interpret(TransportResponse::new(404, serde_json::json!({
            "code": "NOT_FOUND",
            "message": "missing"
        })))
        .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_api_error().code, "NOT_FOUND");
    }

    #[test]
    fn test_backoff_doubles() {
        let client = RequestClient::new(
            Arc::new(NoTransport),
            NetworkMonitor::online(),
            Arc::new(larder_store::MemoryStore::new()),
            ClientSettings {
                retry_base_delay_ms: 100,
                ..Default::default()
            },
        );
        let mut backoff = client.create_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
    }

    struct NoTransport;

    #[async_trait::async_trait]
    impl RemoteTransport for NoTransport {
        async fn send(
            &self,
            _request: &RequestDescriptor,
            _access_token: Option<&str>,
        ) -> SyncResult<TransportResponse> {
            Err(SyncError::ConnectionFailed("unreachable".into()))
        }
    }
}
