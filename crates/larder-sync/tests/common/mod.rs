//! Scripted transport and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use larder_core::{HttpMethod, RequestDescriptor};
use larder_store::{MemoryStore, SharedStore};
use larder_sync::{
    ClientSettings, NetworkMonitor, RemoteTransport, RequestClient, SyncError, SyncResult,
    TransportResponse,
};

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, Value),
    ConnectionFailure,
}

impl Reply {
    /// A 200 with the standard success envelope.
    pub fn ok(data: Value) -> Self {
        Reply::Status(200, json!({"data": data, "status": "success"}))
    }

    pub fn error(status: u16, code: &str) -> Self {
        Reply::Status(status, json!({"code": code, "message": code.to_lowercase()}))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: HttpMethod,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub token: Option<String>,
    pub at: Instant,
}

/// Replies are consumed in order; the last one for a route repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(HttpMethod, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: HttpMethod, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Every send waits this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Empty change feeds for both entity types.
    pub fn with_empty_changes(&self) {
        self.on(HttpMethod::Get, "/recipes/changes", Reply::ok(json!([])));
        self.on(HttpMethod::Get, "/collections/changes", Reply::ok(json!([])));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, method: HttpMethod, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }

    fn next_reply(&self, method: HttpMethod, path: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::error(404, "NOT_FOUND"),
        }
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> SyncResult<TransportResponse> {
        self.calls.lock().unwrap().push(Call {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            token: access_token.map(str::to_string),
            at: Instant::now(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(request.method, &request.path) {
            Reply::Status(status, body) => Ok(TransportResponse::new(status, body)),
            Reply::ConnectionFailure => Err(SyncError::ConnectionFailed("connection refused".into())),
        }
    }
}

pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// Client settings with a short, round retry delay.
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        retry_base_delay_ms: 100,
        ..Default::default()
    }
}

pub fn client(
    transport: Arc<ScriptedTransport>,
    network: NetworkMonitor,
    store: SharedStore,
) -> Arc<RequestClient> {
    Arc::new(RequestClient::new(transport, network, store, fast_settings()))
}
