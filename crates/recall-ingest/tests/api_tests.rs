//! HTTP API tests driven through the router without binding a socket

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::*;
use http_body_util::BodyExt;
use recall_ingest::{
    api,
    models::RawRecord,
    normalize::{FieldMapping, Normalizer},
    store::InMemoryRecallStore,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

async fn app_with(store: Arc<InMemoryRecallStore>, source: &MockServer) -> Router {
    let service = Arc::new(service(&test_config(source, None), store));
    api::router(service, &["*".to_string()])
}

fn seeded_store(range: std::ops::Range<usize>) -> Arc<InMemoryRecallStore> {
    let normalizer = Normalizer::new(FieldMapping::default()).unwrap();
    let records = range.map(|i| normalizer.normalize(&RawRecord(recall_json(i))).unwrap());
    Arc::new(InMemoryRecallStore::with_records(records))
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_reports_store_count() {
    let source = MockServer::start().await;
    let app = app_with(seeded_store(0..3), &source).await;

    let (status, body) = send(app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["recalls"], 3);
    assert_eq!(body["ingest_running"], false);
}

#[tokio::test]
async fn test_trigger_run_returns_summary() {
    let source = MockServer::start().await;
    mount_skip(&source, 0, page_response(recalls(0..4))).await;
    mount_skip(&source, 1000, not_found_response()).await;

    let store = Arc::new(InMemoryRecallStore::new());
    let app = app_with(store.clone(), &source).await;

    let (status, body) = send(app.clone(), "POST", "/api/v1/ingest/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["status"], "completed");
    assert_eq!(body["summary"]["inserted"], 4);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Imported 4 new recall records"));

    let (status, body) = send(app, "GET", "/api/v1/ingest/runs").await;
    assert_eq!(status, StatusCode::OK);
    let runs = body["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["new_recalls_count"], 4);
}

#[tokio::test]
async fn test_failed_run_maps_to_server_error() {
    let source = MockServer::start().await;
    let store = Arc::new(FaultyStore {
        fail_cursor: true,
        ..Default::default()
    });
    let app = api::router(
        Arc::new(service(&test_config(&source, None), store)),
        &["*".to_string()],
    );

    let (status, body) = send(app, "POST", "/api/v1/ingest/run").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["summary"]["status"], "failed");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Recall ingestion failed"));
}

#[tokio::test]
async fn test_list_and_search_recalls() {
    let source = MockServer::start().await;
    let app = app_with(seeded_store(0..20), &source).await;

    let (status, body) = send(app.clone(), "GET", "/api/v1/recalls?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 20);
    let recalls = body["recalls"].as_array().unwrap();
    assert_eq!(recalls.len(), 5);
    // Newest first
    let first = recalls[0]["recall_date"].as_str().unwrap();
    let last = recalls[4]["recall_date"].as_str().unwrap();
    assert!(first >= last);

    let (status, body) = send(app, "GET", "/api/v1/recalls?search=z-0017").await;
    assert_eq!(status, StatusCode::OK);
    let recalls = body["recalls"].as_array().unwrap();
    assert_eq!(recalls.len(), 1);
    assert_eq!(recalls[0]["source_recall_number"], "Z-0017-2024");
}

#[tokio::test]
async fn test_get_recall_by_identifier() {
    let source = MockServer::start().await;
    let app = app_with(seeded_store(0..2), &source).await;

    let (status, body) = send(
        app.clone(),
        "GET",
        "/api/v1/recalls/device_1_infusion_set-Z-0001-2024",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_name"], "Device 1 Infusion Set");
    assert_eq!(body["catalog_number"], "CAT-1");

    let (status, body) = send(app, "GET", "/api/v1/recalls/missing-Z-9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);
}

#[tokio::test]
async fn test_invalid_limit_is_rejected() {
    let source = MockServer::start().await;
    let app = app_with(seeded_store(0..1), &source).await;

    for uri in ["/api/v1/recalls?limit=0", "/api/v1/recalls?limit=501"] {
        let (status, body) = send(app.clone(), "GET", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"]["message"].as_str().unwrap().contains("limit"));
    }
}
