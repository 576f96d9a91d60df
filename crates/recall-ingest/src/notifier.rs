//! Downstream inventory cross-reference
//!
//! After a run commits, the newly inserted recalls are sent once to an
//! inventory service (an ERPNext `check_recall_inventory` method in the
//! reference deployment) which answers with the stock items they match.
//! Delivery is at-least-once; the receiver is expected to be idempotent.

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{config::NotifierConfig, error::NotifyError, models::RecallRecord};

/// An inventory item matched against a recall
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedItem {
    #[serde(default)]
    pub recall_number: Option<String>,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub item_code: Option<String>,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

/// Cross-reference response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    #[serde(default)]
    pub matched_count: u64,
    #[serde(default)]
    pub matches: Vec<MatchedItem>,
}

impl MatchSummary {
    /// Parse a response body, accepting the summary at the top level or
    /// wrapped in a `message` object.
    pub fn from_response(body: &str) -> Result<Self, NotifyError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| NotifyError::Decode(e.to_string()))?;
        let payload = match value.get("message") {
            Some(message) if message.is_object() => message.clone(),
            _ => value,
        };
        if !payload.is_object() {
            return Err(NotifyError::Decode(format!("expected a JSON object, got {payload}")));
        }

        let mut summary: MatchSummary =
            serde_json::from_value(payload).map_err(|e| NotifyError::Decode(e.to_string()))?;
        summary.matched_count = summary.matched_count.max(summary.matches.len() as u64);
        Ok(summary)
    }
}

#[derive(Debug, Serialize)]
struct NotifiedRecall<'a> {
    identifier: &'a str,
    recall_number: Option<&'a str>,
    device_name: &'a str,
    catalog_number: Option<&'a str>,
    /// Name the inventory side keys its catalog lookups on
    product_code: Option<&'a str>,
    code_info: Option<&'a str>,
    recall_date: Option<String>,
    status: Option<&'a str>,
    reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct NotifyPayload<'a> {
    recalls: Vec<NotifiedRecall<'a>>,
}

impl<'a> NotifyPayload<'a> {
    fn new(batch: &'a [RecallRecord]) -> Self {
        let recalls = batch
            .iter()
            .map(|r| NotifiedRecall {
                identifier: &r.identifier,
                recall_number: r.source_recall_number.as_deref(),
                device_name: &r.device_name,
                catalog_number: r.catalog_number.as_deref(),
                product_code: r.catalog_number.as_deref(),
                code_info: r.code_info.as_deref(),
                recall_date: r.recall_date.map(|d| d.format("%Y-%m-%d").to_string()),
                status: r.status.as_deref(),
                reason: r.reason.as_deref(),
            })
            .collect();
        Self { recalls }
    }
}

#[async_trait]
pub trait DownstreamNotifier: Send + Sync {
    /// `false` for the placeholder used when no endpoint is configured
    fn is_configured(&self) -> bool {
        true
    }

    /// Report newly inserted recalls; an empty batch sends nothing
    async fn notify(&self, batch: &[RecallRecord]) -> Result<MatchSummary, NotifyError>;
}

/// Posts batches to the configured HTTP endpoint
pub struct HttpNotifier {
    client: Client,
    url: String,
    authorization: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, config: &NotifierConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("recall-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;

        let authorization = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some(format!("token {key}:{secret}")),
            _ => None,
        };

        Ok(Self {
            client,
            url: url.into(),
            authorization,
        })
    }
}

#[async_trait]
impl DownstreamNotifier for HttpNotifier {
    async fn notify(&self, batch: &[RecallRecord]) -> Result<MatchSummary, NotifyError> {
        if batch.is_empty() {
            return Ok(MatchSummary::default());
        }

        debug!(url = %self.url, recalls = batch.len(), "Sending recalls for inventory check");
        let mut request = self.client.post(&self.url).json(&NotifyPayload::new(batch));
        if let Some(auth) = &self.authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: recall_common::text::truncate_chars(&body, 200).to_string(),
            });
        }

        let summary = MatchSummary::from_response(&body)?;
        info!(
            recalls = batch.len(),
            matched = summary.matched_count,
            "Inventory cross-reference completed"
        );
        Ok(summary)
    }
}

/// Stand-in when no endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl DownstreamNotifier for NoopNotifier {
    fn is_configured(&self) -> bool {
        false
    }

    async fn notify(&self, _batch: &[RecallRecord]) -> Result<MatchSummary, NotifyError> {
        Ok(MatchSummary::default())
    }
}

/// HTTP notifier when `NOTIFY_URL` is set, otherwise the no-op one
pub fn notifier_from_config(
    config: &NotifierConfig,
) -> Result<Arc<dyn DownstreamNotifier>, NotifyError> {
    match &config.url {
        Some(url) => Ok(Arc::new(HttpNotifier::new(url.clone(), config)?)),
        None => Ok(Arc::new(NoopNotifier)),
    }
}
