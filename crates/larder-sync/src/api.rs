//! # Remote API
//!
//! Typed endpoints for recipes and collections on top of [`RequestClient`].
//!
//! ## Endpoints
//! ```text
//! list            GET    /recipes
//! get             GET    /recipes/{id}
//! search          GET    /recipes/search?q=...
//! changes_since   GET    /recipes/changes?since=...
//! create          POST   /recipes
//! update          PUT    /recipes/{id}
//! delete          DELETE /recipes/{id}
//! generate        POST   /recipes/generate      (generation timeout)
//! ```
//! Collections use the same shapes under `/collections`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;

use larder_core::{EntityType, RequestDescriptor, GENERATION_TIMEOUT};

use crate::client::RequestClient;
use crate::error::{SyncError, SyncResult};

#[derive(Clone)]
pub struct RemoteApi {
    client: Arc<RequestClient>,

    /// Background calls bypass the cache and are never queued or retried
    /// by the client; the coordinator tracks their attempts itself.
    background: bool,
}

impl RemoteApi {
    /// Endpoints for interactive use: cached reads, retried and queued writes.
    pub fn new(client: Arc<RequestClient>) -> Self {
        RemoteApi {
            client,
            background: false,
        }
    }

    /// Endpoints for the sync coordinator.
    pub fn background(client: Arc<RequestClient>) -> Self {
        RemoteApi {
            client,
            background: true,
        }
    }

    pub fn client(&self) -> &Arc<RequestClient> {
        &self.client
    }

    fn prepare(&self, request: RequestDescriptor) -> RequestDescriptor {
        if self.background {
            request.cacheable(false).retryable(false)
        } else {
            request
        }
    }

    async fn call(&self, request: RequestDescriptor) -> SyncResult<Value> {
        self.client.execute(self.prepare(request)).await
    }

    pub async fn list(&self, entity_type: EntityType) -> SyncResult<Vec<Value>> {
        let data = self
            .call(RequestDescriptor::get(entity_type.collection_path()))
            .await?;
        into_items(data)
    }

    pub async fn get(&self, entity_type: EntityType, id: &str) -> SyncResult<Value> {
        self.call(RequestDescriptor::get(entity_type.item_path(id)))
            .await
    }

    pub async fn search(&self, entity_type: EntityType, query: &str) -> SyncResult<Vec<Value>> {
        let request = RequestDescriptor::get(format!("{}/search", entity_type.collection_path()))
            .with_query("q", query);
        into_items(self.call(request).await?)
    }

    /// Entities modified after `since`, or every entity when `since` is `None`.
    pub async fn changes_since(
        &self,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Value>> {
        let mut request =
            RequestDescriptor::get(format!("{}/changes", entity_type.collection_path()));
        if let Some(since) = since {
            request = request.with_query("since", since.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        into_items(self.call(request).await?)
    }

    pub async fn create(&self, entity_type: EntityType, payload: Value) -> SyncResult<Value> {
        self.call(RequestDescriptor::post(entity_type.collection_path(), payload))
            .await
    }

    pub async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: Value,
    ) -> SyncResult<Value> {
        self.call(RequestDescriptor::put(entity_type.item_path(id), payload))
            .await
    }

    pub async fn delete(&self, entity_type: EntityType, id: &str) -> SyncResult<()> {
        self.call(RequestDescriptor::delete(entity_type.item_path(id)))
            .await?;
        Ok(())
    }

    /// Server-side generation (e.g. a recipe from a prompt). Slow, so it gets
    /// the longer timeout and is never queued while offline.
    pub async fn generate(&self, entity_type: EntityType, input: Value) -> SyncResult<Value> {
        let request =
            RequestDescriptor::post(format!("{}/generate", entity_type.collection_path()), input)
                .timeout(GENERATION_TIMEOUT)
                .retryable(false);
        self.call(request).await
    }
}

/// Accepts a bare array or an `{ "items": [...] }` page.
fn into_items(data: Value) -> SyncResult<Vec<Value>> {
    match data {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(SyncError::InvalidResponse(
                "expected an array or an object with an items array".into(),
            )),
        },
        Value::Null => Ok(Vec::new()),
        other => Err(SyncError::InvalidResponse(format!(
            "expected a list, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_items_shapes() {
        assert_eq!(into_items(json!([{"id": "r1"}])).unwrap().len(), 1);
        assert_eq!(
            into_items(json!({"items": [{"id": "r1"}, {"id": "r2"}], "total": 2}))
                .unwrap()
                .len(),
            2
        );
        assert!(into_items(Value::Null).unwrap().is_empty());
        assert!(into_items(json!({"id": "r1"})).is_err());
    }
}
