//! RequestClient behaviour against a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{client, memory_store, Reply, ScriptedTransport};
use larder_core::{HttpMethod, RequestDescriptor};
use larder_sync::{ClientSettings, NetworkMonitor, RequestClient, SyncError};

// ── Offline behaviour ───────────────────────────────────────────

#[tokio::test]
async fn test_offline_retryable_request_is_queued_without_touching_transport() {
    let transport = ScriptedTransport::new();
    let client = client(transport.clone(), NetworkMonitor::offline(), memory_store());

    let err = client
        .execute(RequestDescriptor::post("/recipes", json!({"id": "r1"})))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::QueuedForLater { .. }));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(client.queued_count().await, 1);
}

#[tokio::test]
async fn test_offline_non_retryable_request_fails_fast() {
    let transport = ScriptedTransport::new();
    let client = client(transport.clone(), NetworkMonitor::offline(), memory_store());

    let err = client
        .execute(RequestDescriptor::get("/recipes").retryable(false))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NoConnectivity));
    assert_eq!(client.queued_count().await, 0);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_offline_queue_drops_oldest_when_full() {
    let transport = ScriptedTransport::new();
    let settings = ClientSettings {
        max_queue_size: 2,
        ..Default::default()
    };
    let client = RequestClient::new(
        transport,
        NetworkMonitor::offline(),
        memory_store(),
        settings,
    );

    for id in ["r1", "r2", "r3"] {
        let _ = client
            .execute(RequestDescriptor::post("/recipes", json!({ "id": id })))
            .await;
    }

    let queued = client.queued_requests().await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].descriptor.body.as_ref().unwrap()["id"], "r2");
    assert_eq!(queued[1].descriptor.body.as_ref().unwrap()["id"], "r3");
}

#[tokio::test]
async fn test_offline_queue_survives_restart() {
    let store = memory_store();
    let transport = ScriptedTransport::new();

    let first = client(transport.clone(), NetworkMonitor::offline(), Arc::clone(&store));
    let _ = first
        .execute(RequestDescriptor::put("/recipes/r1", json!({"id": "r1"})))
        .await;

    let reopened = RequestClient::open(
        transport,
        NetworkMonitor::offline(),
        store,
        ClientSettings::default(),
    )
    .await;
    let queued = reopened.queued_requests().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].descriptor.path, "/recipes/r1");
}

#[tokio::test]
async fn test_reconnect_drains_queue() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Post, "/recipes", Reply::ok(json!({"id": "r1"})));
    let network = NetworkMonitor::offline();
    let client = client(transport.clone(), network.clone(), memory_store());
    client.start().await;

    let _ = client
        .execute(RequestDescriptor::post("/recipes", json!({"id": "r1"})))
        .await;
    assert_eq!(client.queued_count().await, 1);

    network.set_connected(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.queued_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue should drain after reconnect");

    assert_eq!(transport.calls_to(HttpMethod::Post, "/recipes").len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_replay_failures_are_dropped_after_max_replays() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Post, "/recipes", Reply::ConnectionFailure);
    let network = NetworkMonitor::offline();
    let client = client(transport.clone(), network.clone(), memory_store());

    let _ = client
        .execute(RequestDescriptor::post("/recipes", json!({"id": "r1"})))
        .await;
    network.set_connected(true);

    let first = client.process_queue().await;
    assert_eq!(first.requeued, 1);
    assert_eq!(client.queued_requests().await[0].retry_count, 1);

    let second = client.process_queue().await;
    assert_eq!(second.requeued, 1);

    let third = client.process_queue().await;
    assert_eq!(third.dropped, 1);
    assert_eq!(client.queued_count().await, 0);

    // Each replay is a single attempt.
    assert_eq!(transport.call_count(), 3);
}

// ── Retries ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_exponentially() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Get, "/recipes", Reply::error(503, "UNAVAILABLE"));
    transport.on(HttpMethod::Get, "/recipes", Reply::error(503, "UNAVAILABLE"));
    transport.on(HttpMethod::Get, "/recipes", Reply::ok(json!([{"id": "r1"}])));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    let data = client
        .execute(RequestDescriptor::get("/recipes"))
        .await
        .unwrap();
    assert_eq!(data, json!([{"id": "r1"}]));

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(100));
    assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_transient_failure_exhausts_retries() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Get, "/recipes", Reply::ConnectionFailure);
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    let err = client
        .execute(RequestDescriptor::get("/recipes"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Get, "/recipes/r9", Reply::error(404, "NOT_FOUND"));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    let err = client
        .execute(RequestDescriptor::get("/recipes/r9"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_api_error().code, "NOT_FOUND");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_request_surfaces_transient_error() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Put, "/recipes/r1", Reply::error(503, "UNAVAILABLE"));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    let err = client
        .execute(RequestDescriptor::put("/recipes/r1", json!({"id": "r1"})).retryable(false))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_response_times_out() {
    let transport = ScriptedTransport::new();
    transport.set_delay(Duration::from_secs(30));
    transport.on(HttpMethod::Get, "/recipes", Reply::ok(json!([])));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    let err = client
        .execute(
            RequestDescriptor::get("/recipes")
                .retryable(false)
                .timeout(Duration::from_secs(15)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Timeout(15_000)));
}

// ── Cache and mocks ─────────────────────────────────────────────

#[tokio::test]
async fn test_reads_are_cached_and_writes_invalidate() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Get, "/recipes", Reply::ok(json!([{"id": "r1"}])));
    transport.on(HttpMethod::Post, "/recipes", Reply::ok(json!({"id": "r2"})));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    client.execute(RequestDescriptor::get("/recipes")).await.unwrap();
    client.execute(RequestDescriptor::get("/recipes")).await.unwrap();
    assert_eq!(transport.calls_to(HttpMethod::Get, "/recipes").len(), 1);
    assert_eq!(client.cache_stats().await.hits, 1);

    client
        .execute(RequestDescriptor::post("/recipes", json!({"id": "r2"})))
        .await
        .unwrap();
    client.execute(RequestDescriptor::get("/recipes")).await.unwrap();
    assert_eq!(transport.calls_to(HttpMethod::Get, "/recipes").len(), 2);
}

#[tokio::test]
async fn test_uncacheable_reads_always_hit_transport() {
    let transport = ScriptedTransport::new();
    transport.on(HttpMethod::Get, "/recipes", Reply::ok(json!([])));
    let client = client(transport.clone(), NetworkMonitor::online(), memory_store());

    for _ in 0..2 {
        client
            .execute(RequestDescriptor::get("/recipes").cacheable(false))
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_mock_responses_short_circuit_everything() {
    let transport = ScriptedTransport::new();
    let client = client(transport.clone(), NetworkMonitor::offline(), memory_store());
    let request = RequestDescriptor::get("/recipes").with_query("q", "soup");

    client
        .set_mock_response(&request, json!([{"id": "mock"}]))
        .await;
    let data = client.execute(request.clone()).await.unwrap();
    assert_eq!(data, json!([{"id": "mock"}]));
    assert_eq!(transport.call_count(), 0);

    client.clear_mock_responses().await;
    assert!(client.execute(request).await.is_err());
}
