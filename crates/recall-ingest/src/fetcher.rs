//! Paginated, failure-tolerant fetching from the recall source
//!
//! [`PaginatedFetcher::fetch_since`] returns a [`RecallPages`] cursor over
//! the source window `date > cursor`. Pages are requested lazily, one per
//! [`RecallPages::next_page`] call. A failed request does not repeat its
//! offset; the next offset is tried after a backoff until too many requests
//! in a row have failed.

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::SourceConfig,
    error::FetchError,
    models::{IngestionCursor, RawRecord},
};

/// One page request against the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Full search expression, e.g. `event_date_posted:>20240101`
    pub search: String,
    /// Sort expression, oldest first, e.g. `event_date_posted:asc`. An
    /// early stop then leaves only records newer than everything fetched.
    pub sort: String,
    pub limit: u32,
    pub skip: u32,
}

/// A successfully answered page request
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePage {
    /// Records of this page; empty when the response had none. `total` is
    /// the size of the whole window when the source reports it.
    Records {
        records: Vec<RawRecord>,
        total: Option<u64>,
    },
    /// The source answered "not found": nothing at or beyond this offset
    EndOfData,
}

#[async_trait]
pub trait RecallSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage, FetchError>;
}

#[derive(Debug, Deserialize)]
struct SourceResponse {
    #[serde(default)]
    meta: Option<SourceMeta>,
    #[serde(default)]
    results: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SourceMeta {
    #[serde(default)]
    results: Option<ResultsMeta>,
}

#[derive(Debug, Deserialize)]
struct ResultsMeta {
    #[serde(default)]
    total: Option<u64>,
}

/// openFDA device recall endpoint over HTTP
pub struct OpenFdaSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenFdaSource {
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("recall-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout(),
        })
    }

    async fn request(&self, query: &PageQuery) -> Result<SourcePage, FetchError> {
        let mut params = vec![
            ("search", query.search.clone()),
            ("sort", query.sort.clone()),
            ("limit", query.limit.to_string()),
            ("skip", query.skip.to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(SourcePage::EndOfData);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let parsed: SourceResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(SourcePage::Records {
            records: parsed
                .results
                .unwrap_or_default()
                .into_iter()
                .map(RawRecord)
                .collect(),
            total: parsed.meta.and_then(|m| m.results).and_then(|r| r.total),
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err)
        }
    }
}

#[async_trait]
impl RecallSource for OpenFdaSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage, FetchError> {
        match tokio::time::timeout(self.timeout, self.request(query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

/// Paging and failure limits for one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub page_size: u32,
    pub max_offset: u32,
    pub max_consecutive_failures: u32,
    /// Delay after the first failure; doubles with each further one
    pub backoff_base: Duration,
}

impl FetchPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_offset: config.max_offset,
            max_consecutive_failures: config.max_consecutive_failures,
            backoff_base: config.retry_backoff(),
        }
    }

    /// `backoff_base * 2^(failures - 1)`
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&SourceConfig::default())
    }
}

/// Why a fetch stopped requesting pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTermination {
    /// Empty page or a response without results
    Exhausted,
    /// Not-found response
    EndOfData,
    /// The reported window total was reached
    TotalReached,
    /// The next offset would exceed the configured ceiling
    OffsetCeiling,
    /// Too many consecutive failed requests
    TooManyFailures,
    Cancelled,
}

impl FetchTermination {
    /// Whether the window was read to its end (as far as the source allows)
    pub fn is_complete(self) -> bool {
        !matches!(self, FetchTermination::TooManyFailures | FetchTermination::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchTermination::Exhausted => "exhausted",
            FetchTermination::EndOfData => "end_of_data",
            FetchTermination::TotalReached => "total_reached",
            FetchTermination::OffsetCeiling => "offset_ceiling",
            FetchTermination::TooManyFailures => "too_many_failures",
            FetchTermination::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FetchTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request counters of one fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    pub pages_requested: u32,
    pub records_fetched: u64,
    pub failed_requests: u32,
    /// Failures in a row at the time the fetch stopped
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

pub struct PaginatedFetcher {
    source: Arc<dyn RecallSource>,
    policy: FetchPolicy,
    date_field: String,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn RecallSource>, policy: FetchPolicy, date_field: impl Into<String>) -> Self {
        Self {
            source,
            policy,
            date_field: date_field.into(),
        }
    }

    /// Start a fetch of everything dated after the cursor
    pub fn fetch_since(&self, cursor: &IngestionCursor, cancel: CancellationToken) -> RecallPages {
        RecallPages {
            source: Arc::clone(&self.source),
            policy: self.policy.clone(),
            search: format!("{}:>{}", self.date_field, cursor.search_value()),
            sort: format!("{}:asc", self.date_field),
            offset: 0,
            stats: FetchStats::default(),
            termination: None,
            pending: None,
            cancel,
        }
    }
}

/// Lazy, single-pass sequence of source pages
pub struct RecallPages {
    source: Arc<dyn RecallSource>,
    policy: FetchPolicy,
    search: String,
    sort: String,
    offset: u32,
    stats: FetchStats,
    termination: Option<FetchTermination>,
    /// Termination decided while returning the final page
    pending: Option<FetchTermination>,
    cancel: CancellationToken,
}

impl RecallPages {
    /// Next non-empty page, or `None` once the fetch has terminated.
    pub async fn next_page(&mut self) -> Option<Vec<RawRecord>> {
        loop {
            if self.termination.is_some() {
                return None;
            }
            if let Some(reason) = self.pending.take() {
                return self.finish(reason);
            }
            if self.cancel.is_cancelled() {
                return self.finish(FetchTermination::Cancelled);
            }
            if self.offset >= self.policy.max_offset {
                return self.finish(FetchTermination::OffsetCeiling);
            }

            let query = PageQuery {
                search: self.search.clone(),
                sort: self.sort.clone(),
                limit: self.policy.page_size,
                skip: self.offset,
            };
            self.stats.pages_requested += 1;
            debug!(offset = query.skip, search = %query.search, "Requesting recall page");

            match self.source.fetch_page(&query).await {
                Ok(SourcePage::EndOfData) => {
                    self.stats.consecutive_failures = 0;
                    return self.finish(FetchTermination::EndOfData);
                }
                Ok(SourcePage::Records { records, total }) => {
                    self.stats.consecutive_failures = 0;
                    if records.is_empty() {
                        return self.finish(FetchTermination::Exhausted);
                    }

                    let returned = records.len() as u64;
                    self.stats.records_fetched += returned;
                    if let Some(total) = total {
                        if u64::from(self.offset) + returned >= total {
                            self.pending = Some(FetchTermination::TotalReached);
                        }
                    }
                    self.offset = self.offset.saturating_add(self.policy.page_size);
                    debug!(offset = query.skip, returned, "Received recall page");
                    return Some(records);
                }
                Err(e) => {
                    self.stats.failed_requests += 1;
                    self.stats.consecutive_failures += 1;
                    self.stats.last_error = Some(e.to_string());
                    warn!(
                        offset = query.skip,
                        attempt = self.stats.consecutive_failures,
                        max = self.policy.max_consecutive_failures,
                        transient = e.is_transient(),
                        "Recall page request failed: {}",
                        e
                    );

                    if self.stats.consecutive_failures >= self.policy.max_consecutive_failures {
                        return self.finish(FetchTermination::TooManyFailures);
                    }

                    // The failed offset is skipped, not retried
                    self.offset = self.offset.saturating_add(self.policy.page_size);
                    let backoff = self.policy.backoff(self.stats.consecutive_failures);
                    if !backoff.is_zero() {
                        info!("Waiting {:?} before requesting offset {}", backoff, self.offset);
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = self.cancel.cancelled() => {}
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self, reason: FetchTermination) -> Option<Vec<RawRecord>> {
        info!(
            reason = %reason,
            pages = self.stats.pages_requested,
            records = self.stats.records_fetched,
            failures = self.stats.failed_requests,
            "Recall fetch finished"
        );
        self.termination = Some(reason);
        None
    }

    /// Set once [`Self::next_page`] has returned `None`.
    pub fn termination(&self) -> Option<FetchTermination> {
        self.termination
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Flatten into a stream of individual records
    pub fn into_stream(self) -> impl Stream<Item = RawRecord> + Send {
        stream::unfold(self, |mut pages| async move {
            pages.next_page().await.map(|page| (page, pages))
        })
        .flat_map(stream::iter)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays scripted responses and records every query
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<SourcePage, FetchError>>>,
        queries: Mutex<Vec<PageQuery>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<SourcePage, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            })
        }

        async fn skips(&self) -> Vec<u32> {
            self.queries.lock().await.iter().map(|q| q.skip).collect()
        }
    }

    #[async_trait]
    impl RecallSource for ScriptedSource {
        async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage, FetchError> {
            self.queries.lock().await.push(query.clone());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(SourcePage::EndOfData))
        }
    }

    fn page(n: usize) -> Result<SourcePage, FetchError> {
        Ok(SourcePage::Records {
            records: (0..n).map(|i| RawRecord(json!({"recall_number": i}))).collect(),
            total: None,
        })
    }

    fn policy(page_size: u32) -> FetchPolicy {
        FetchPolicy {
            page_size,
            max_offset: 10_000,
            max_consecutive_failures: 3,
            backoff_base: Duration::ZERO,
        }
    }

    fn cursor() -> IngestionCursor {
        IngestionCursor::from_default(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_stops_on_not_found() {
        let source = ScriptedSource::new(vec![page(2), page(1), Ok(SourcePage::EndOfData)]);
        let fetcher = PaginatedFetcher::new(source.clone(), policy(2), "event_date_posted");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        assert_eq!(pages.next_page().await.unwrap().len(), 2);
        assert_eq!(pages.next_page().await.unwrap().len(), 1);
        assert!(pages.next_page().await.is_none());
        assert!(pages.next_page().await.is_none());

        assert_eq!(pages.termination(), Some(FetchTermination::EndOfData));
        assert_eq!(pages.stats().records_fetched, 3);
        assert_eq!(source.skips().await, vec![0, 2, 4]);

        let queries = source.queries.lock().await;
        assert_eq!(queries[0].search, "event_date_posted:>20240101");
        assert_eq!(queries[0].limit, 2);
        assert!(queries.iter().all(|q| q.sort == "event_date_posted:asc"));
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let source = ScriptedSource::new(vec![page(2), page(0)]);
        let fetcher = PaginatedFetcher::new(source, policy(2), "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        assert!(pages.next_page().await.is_some());
        assert!(pages.next_page().await.is_none());
        assert_eq!(pages.termination(), Some(FetchTermination::Exhausted));
    }

    #[tokio::test]
    async fn test_stops_when_total_reached() {
        let source = ScriptedSource::new(vec![Ok(SourcePage::Records {
            records: vec![RawRecord(json!({})); 2],
            total: Some(2),
        })]);
        let fetcher = PaginatedFetcher::new(source.clone(), policy(2), "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        assert!(pages.next_page().await.is_some());
        assert!(pages.next_page().await.is_none());
        assert_eq!(pages.termination(), Some(FetchTermination::TotalReached));
        assert_eq!(source.skips().await, vec![0]);
    }

    #[tokio::test]
    async fn test_offset_ceiling() {
        let source = ScriptedSource::new(vec![page(2), page(2), page(2)]);
        let mut policy = policy(2);
        policy.max_offset = 4;
        let fetcher = PaginatedFetcher::new(source.clone(), policy, "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        while pages.next_page().await.is_some() {}
        assert_eq!(pages.termination(), Some(FetchTermination::OffsetCeiling));
        assert_eq!(source.skips().await, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_failed_offsets_are_skipped_and_counter_resets() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Status { status: 503 }),
            page(2),
            Err(FetchError::Timeout(Duration::from_secs(30))),
            Err(FetchError::Decode("truncated".to_string())),
            page(1),
            Ok(SourcePage::EndOfData),
        ]);
        let fetcher = PaginatedFetcher::new(source.clone(), policy(2), "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        let mut total = 0;
        while let Some(page) = pages.next_page().await {
            total += page.len();
        }

        assert_eq!(total, 3);
        assert_eq!(pages.termination(), Some(FetchTermination::EndOfData));
        assert_eq!(pages.stats().failed_requests, 3);
        assert_eq!(pages.stats().consecutive_failures, 0);
        assert_eq!(source.skips().await, vec![0, 2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_too_many_consecutive_failures() {
        let source = ScriptedSource::new(vec![
            page(2),
            Err(FetchError::Status { status: 500 }),
            Err(FetchError::Status { status: 502 }),
            Err(FetchError::Status { status: 400 }),
            page(2),
        ]);
        let fetcher = PaginatedFetcher::new(source.clone(), policy(2), "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        assert!(pages.next_page().await.is_some());
        assert!(pages.next_page().await.is_none());
        assert_eq!(pages.termination(), Some(FetchTermination::TooManyFailures));
        assert!(!FetchTermination::TooManyFailures.is_complete());
        assert_eq!(pages.stats().consecutive_failures, 3);
        assert_eq!(source.skips().await, vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn test_cancellation_is_observed_between_pages() {
        let source = ScriptedSource::new(vec![page(2), page(2)]);
        let fetcher = PaginatedFetcher::new(source.clone(), policy(2), "report_date");
        let mut pages = fetcher.fetch_since(&cursor(), CancellationToken::new());

        assert!(pages.next_page().await.is_some());
        pages.cancel();
        assert!(pages.next_page().await.is_none());
        assert_eq!(pages.termination(), Some(FetchTermination::Cancelled));
        assert_eq!(source.skips().await, vec![0]);
    }

    #[tokio::test]
    async fn test_into_stream_yields_records() {
        let source = ScriptedSource::new(vec![page(2), page(2), page(1)]);
        let fetcher = PaginatedFetcher::new(source, policy(2), "report_date");
        let records: Vec<RawRecord> = fetcher
            .fetch_since(&cursor(), CancellationToken::new())
            .into_stream()
            .collect()
            .await;
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = FetchPolicy {
            backoff_base: Duration::from_millis(100),
            ..policy(10)
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }
}
