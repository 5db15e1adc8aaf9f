// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tests of the HTTP read protocol: router behavior, the client, and
//! the external sync bus reading from a live server.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use manifest_sync::config::ExternalSyncConfig;
use manifest_sync::cursor::{Cursor, Cursors, PublicSchemaReference};
use manifest_sync::event_store::{EventStore, InMemoryEventStore};
use manifest_sync::external_bus::ExternalSyncMessageBus;
use manifest_sync::http::{router, ReadResponse, StaticResolver, SyncHttpClient};
use manifest_sync::manifest::{SyncManifest, SyncManifestOptions};
use manifest_sync::message_bus::{MessageBusLifecycle, SubscribeMessageBus};
use manifest_sync::operation::{
    SourcePublicSchema, TransformedOperation, TransformedOperationWithSource, Version,
};

fn accounts_op(id: i64) -> TransformedOperationWithSource {
    let mut object = serde_json::Map::new();
    object.insert("id".to_string(), serde_json::json!(id));
    TransformedOperationWithSource {
        operation: TransformedOperation::Insert {
            key_columns: vec!["id".to_string()],
            object,
        },
        source_manifest_slug: "svc-a".to_string(),
        source_data_store_slug: "ds-main".to_string(),
        source_public_schema: SourcePublicSchema {
            name: "accounts".to_string(),
            version: Version::new(1, 0),
        },
    }
}

async fn seeded_store() -> Arc<InMemoryEventStore> {
    common::init_tracing();
    let store = Arc::new(InMemoryEventStore::new());
    store.write("tx-1", &[accounts_op(1)]).await.unwrap();
    store.write("tx-2", &[accounts_op(2)]).await.unwrap();
    store
}

fn read_body(cursors: serde_json::Value, limit: Option<usize>) -> String {
    let mut body = serde_json::json!({ "cursors": cursors });
    if let Some(limit) = limit {
        body["limit"] = serde_json::json!(limit);
    }
    body.to_string()
}

fn accounts_cursor(transaction_id: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "schema": {
            "manifest": { "slug": "svc-a" },
            "schema": { "name": "accounts", "version": { "major": 1 } }
        },
        "transactionId": transaction_id
    })
}

async fn post_read(store: Arc<InMemoryEventStore>, body: String) -> (StatusCode, Vec<u8>) {
    let response = router(store)
        .oneshot(
            Request::post("/read")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

// =============================================================================
// Router Tests
// =============================================================================

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let response = router(Arc::new(InMemoryEventStore::new()))
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn read_returns_transactions_after_cursor() {
    let store = seeded_store().await;
    let body = read_body(serde_json::json!([accounts_cursor(Some("tx-1"))]), None);
    let (status, bytes) = post_read(store, body).await;

    assert_eq!(status, StatusCode::OK);
    let response: ReadResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response.operations.len(), 1);
    assert_eq!(response.operations[0].transaction_id, "tx-2");
}

#[tokio::test]
async fn read_with_null_cursor_starts_from_beginning() {
    let store = seeded_store().await;
    let body = read_body(serde_json::json!([accounts_cursor(None)]), None);
    let (status, bytes) = post_read(store, body).await;

    assert_eq!(status, StatusCode::OK);
    let response: ReadResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response.operations.len(), 2);
}

#[tokio::test]
async fn read_with_unknown_cursor_id_starts_from_beginning() {
    let store = seeded_store().await;
    let body = read_body(
        serde_json::json!([accounts_cursor(Some("never-seen"))]),
        None,
    );
    let (_, bytes) = post_read(store, body).await;
    let response: ReadResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response.operations.len(), 2);
}

#[tokio::test]
async fn read_rejects_malformed_body_with_400() {
    let (status, _) = post_read(seeded_store().await, "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_read(
        seeded_store().await,
        serde_json::json!({ "wrong": true }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_rejects_out_of_range_limits() {
    let store = seeded_store().await;
    let body = read_body(serde_json::json!([accounts_cursor(None)]), Some(0));
    let (status, _) = post_read(store.clone(), body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = read_body(serde_json::json!([accounts_cursor(None)]), Some(1001));
    let (status, _) = post_read(store, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_respects_limit() {
    let store = seeded_store().await;
    let body = read_body(serde_json::json!([accounts_cursor(None)]), Some(1));
    let (status, bytes) = post_read(store, body).await;

    assert_eq!(status, StatusCode::OK);
    let response: ReadResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response.operations.len(), 1);
    assert_eq!(response.operations[0].transaction_id, "tx-1");
}

// =============================================================================
// Client and External Bus Tests
// =============================================================================

/// Serve the router on an ephemeral local port, returning its base URL.
async fn spawn_server(store: Arc<InMemoryEventStore>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(store)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn client_reads_from_live_server() {
    let base_url = spawn_server(seeded_store().await).await;
    let client = SyncHttpClient::new(base_url, Duration::from_secs(5)).unwrap();

    let cursors = vec![Cursor::empty(PublicSchemaReference::new(
        "svc-a", "accounts", 1,
    ))];
    let messages = client.read(&cursors, None).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].transaction_id, "tx-1");
}

#[tokio::test]
async fn external_bus_polls_remote_service() {
    let base_url = spawn_server(seeded_store().await).await;

    let manifest = Arc::new(
        SyncManifest::new(
            vec![common::consumer_manifest()],
            SyncManifestOptions {
                check_public_schema_references: false,
            },
        )
        .unwrap(),
    );
    let mut hosts = HashMap::new();
    hosts.insert("svc-a".to_string(), base_url);
    let bus = ExternalSyncMessageBus::new(
        manifest,
        Arc::new(StaticResolver::new(hosts)),
        &ExternalSyncConfig {
            poll_interval: "10ms".to_string(),
            ..Default::default()
        },
    );

    bus.prepare().await.unwrap();
    bus.set_initial_cursors(Cursors::new()).await.unwrap();

    let batch = bus.poll_next().await.unwrap().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].transaction_id, "tx-1");

    // Cursors advanced; the remote has nothing new.
    let batch = bus.poll_next().await.unwrap().unwrap();
    assert!(batch.is_empty());

    bus.stop().await.unwrap();
    assert!(bus.poll_next().await.unwrap().is_none());
}

#[tokio::test]
async fn external_bus_ends_when_nothing_external_is_consumed() {
    let manifest = Arc::new(
        SyncManifest::new(common::workspace(), SyncManifestOptions::default()).unwrap(),
    );
    let bus = ExternalSyncMessageBus::new(
        manifest,
        Arc::new(StaticResolver::default()),
        &ExternalSyncConfig::default(),
    );
    bus.prepare().await.unwrap();
    bus.set_initial_cursors(Cursors::new()).await.unwrap();
    assert!(bus.poll_next().await.unwrap().is_none());
}
