//! Shared helpers for recall-ingest integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use recall_ingest::{
    config::Config,
    error::StoreError,
    models::{RecallCheckHistory, RecallRecord},
    service::IngestionService,
    store::{InMemoryRecallStore, RecallStore},
};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const SOURCE_PATH: &str = "/device/recall.json";
pub const NOTIFY_PATH: &str = "/api/method/recall_checker.api.check_recall_inventory";

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,recall_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
}

/// Posting date of [`recall_json`]`(i)`
pub fn posted_date(i: usize) -> NaiveDate {
    base_date() + Duration::days((i % 60) as i64)
}

/// A source record shaped like the openFDA device recall endpoint
pub fn recall_json(i: usize) -> Value {
    json!({
        "cfres_id": format!("{}", 200_000 + i),
        "product_res_number": format!("Z-{i:04}-2024"),
        "product_description": format!("Device {i} Infusion Set"),
        "event_date_posted": posted_date(i).format("%Y%m%d").to_string(),
        "recall_status": "Open, Classified",
        "recalling_firm": "Acme Medical",
        "reason_for_recall": "Sterility may be compromised.",
        "code_info": format!("Catalog Number: CAT-{i}; Lot 1"),
    })
}

pub fn recalls(range: std::ops::Range<usize>) -> Vec<Value> {
    range.map(recall_json).collect()
}

pub fn page_response(results: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "meta": {"disclaimer": "test"},
        "results": results,
    }))
}

pub fn not_found_response() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {"code": "NOT_FOUND", "message": "No matches found!"}
    }))
}

/// Serve `response` for requests at `skip`
pub async fn mount_skip(server: &MockServer, skip: u32, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .and(query_param("skip", skip.to_string()))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn match_response(matched: u64) -> ResponseTemplate {
    let matches: Vec<Value> = (0..matched)
        .map(|i| {
            json!({
                "recall_number": format!("Z-{i:04}-2024"),
                "item_name": format!("Infusion Set {i}"),
                "item_code": format!("ITEM-{i}"),
                "match_type": "catalog_number",
                "batch_number": null,
            })
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({
        "message": {"matched_count": matched, "matches": matches}
    }))
}

/// Configuration pointing at the mock servers, without backoff delays
pub fn test_config(source: &MockServer, notify: Option<&MockServer>) -> Config {
    let mut config = Config::default();
    config.source.base_url = format!("{}{}", source.uri(), SOURCE_PATH);
    config.source.retry_backoff_ms = 0;
    config.source.request_timeout_secs = 5;
    config.notifier.url = notify.map(|server| format!("{}{}", server.uri(), NOTIFY_PATH));
    config
}

pub fn service(config: &Config, store: Arc<dyn RecallStore>) -> IngestionService {
    IngestionService::from_config(config, store).expect("service should build from test config")
}

/// Delegates to an in-memory store but fails selected operations
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryRecallStore,
    pub fail_cursor: bool,
    pub fail_commit: bool,
    /// Single-record lookups seen
    pub finds: AtomicUsize,
    /// Batched lookups seen
    pub batch_lookups: AtomicUsize,
}

#[async_trait]
impl RecallStore for FaultyStore {
    async fn latest_recall_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        if self.fail_cursor {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.latest_recall_date().await
    }

    async fn find(&self, identifier: &str) -> Result<Option<RecallRecord>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(identifier).await
    }

    async fn find_many(&self, identifiers: &[String]) -> Result<Vec<RecallRecord>, StoreError> {
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_many(identifiers).await
    }

    async fn commit_batch(&self, records: &[RecallRecord]) -> Result<Vec<RecallRecord>, StoreError> {
        if self.fail_commit {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.commit_batch(records).await
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn search(&self, term: &str, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        self.inner.search(term, limit).await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.inner.count().await
    }

    async fn page_by_identifier(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecallRecord>, StoreError> {
        self.inner.page_by_identifier(after, limit).await
    }

    async fn update_catalog_numbers(&self, updates: &[(String, String)]) -> Result<u64, StoreError> {
        if self.fail_commit {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.update_catalog_numbers(updates).await
    }

    async fn record_run(&self, entry: &RecallCheckHistory) -> Result<(), StoreError> {
        self.inner.record_run(entry).await
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RecallCheckHistory>, StoreError> {
        self.inner.recent_runs(limit).await
    }
}
