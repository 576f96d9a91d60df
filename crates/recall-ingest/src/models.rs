//! Core data types for recall ingestion

use chrono::{DateTime, NaiveDate, Utc};
use recall_common::text::{bounded, truncate_chars};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::summary::{DownstreamOutcome, IngestionRunSummary};

/// Maximum characters kept for `source_recall_number`.
pub const MAX_RECALL_NUMBER_LEN: usize = 200;
/// Maximum characters kept for `device_name`.
pub const MAX_DEVICE_NAME_LEN: usize = 140;
/// Maximum characters kept for `manufacturer` and `recalling_firm`.
pub const MAX_PARTY_NAME_LEN: usize = 140;
/// Maximum characters kept for `catalog_number`.
pub const MAX_CATALOG_NUMBER_LEN: usize = 100;
/// Maximum characters kept for `reason`.
pub const MAX_REASON_LEN: usize = 140;
/// Maximum characters kept for `status`.
pub const MAX_STATUS_LEN: usize = 100;
/// Maximum characters kept for `code_info`.
pub const MAX_CODE_INFO_LEN: usize = 140;
/// Maximum characters kept for audit notes.
pub const MAX_NOTES_LEN: usize = 500;

/// A record as returned by the source API, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub serde_json::Value);

impl From<serde_json::Value> for RawRecord {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Canonical recall stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecallRecord {
    /// Deduplication key; unique and never changed once stored
    pub identifier: String,
    pub source_recall_number: Option<String>,
    pub device_name: String,
    pub manufacturer: Option<String>,
    pub recalling_firm: Option<String>,
    pub catalog_number: Option<String>,
    pub recall_date: Option<NaiveDate>,
    pub reason: Option<String>,
    pub status: Option<String>,
    pub code_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecallRecord {
    /// Truncate every bounded field to its column width.
    pub fn enforce_bounds(self) -> Self {
        Self {
            source_recall_number: bounded(self.source_recall_number, MAX_RECALL_NUMBER_LEN),
            device_name: truncate_chars(&self.device_name, MAX_DEVICE_NAME_LEN).to_string(),
            manufacturer: bounded(self.manufacturer, MAX_PARTY_NAME_LEN),
            recalling_firm: bounded(self.recalling_firm, MAX_PARTY_NAME_LEN),
            catalog_number: bounded(self.catalog_number, MAX_CATALOG_NUMBER_LEN),
            reason: bounded(self.reason, MAX_REASON_LEN),
            status: bounded(self.status, MAX_STATUS_LEN),
            code_info: bounded(self.code_info, MAX_CODE_INFO_LEN),
            ..self
        }
    }
}

/// Where the cursor of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSource {
    /// Latest recall date already in the store
    Store,
    /// Configured start date; the store held no dated recall
    Default,
}

/// Lower bound of one run's fetch window
///
/// Computed once when a run starts and never advanced while it runs. The
/// source filter is exclusive (`date > since`); records dated on the
/// boundary day that are already stored come back as duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCursor {
    pub since: NaiveDate,
    pub source: CursorSource,
}

impl IngestionCursor {
    pub fn from_store(since: NaiveDate) -> Self {
        Self {
            since,
            source: CursorSource::Store,
        }
    }

    pub fn from_default(since: NaiveDate) -> Self {
        Self {
            since,
            source: CursorSource::Default,
        }
    }

    /// Date in the compact `YYYYMMDD` form the source search syntax expects
    pub fn search_value(&self) -> String {
        self.since.format("%Y%m%d").to_string()
    }
}

/// One audit row per ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecallCheckHistory {
    pub run_id: Uuid,
    pub check_date: DateTime<Utc>,
    pub new_recalls_count: i32,
    pub inventory_checked: bool,
    pub matches_found: i32,
    pub notes: Option<String>,
    pub summary: serde_json::Value,
}

impl RecallCheckHistory {
    pub fn from_summary(summary: &IngestionRunSummary) -> Self {
        let (inventory_checked, matches_found) = match &summary.downstream {
            DownstreamOutcome::Matched { matched_count, .. } => (true, *matched_count),
            _ => (false, 0),
        };

        Self {
            run_id: summary.run_id,
            check_date: summary.finished_at.unwrap_or(summary.started_at),
            new_recalls_count: i32::try_from(summary.inserted).unwrap_or(i32::MAX),
            inventory_checked,
            matches_found: i32::try_from(matches_found).unwrap_or(i32::MAX),
            notes: Some(truncate_chars(&summary.to_string(), MAX_NOTES_LEN).to_string()),
            summary: serde_json::to_value(summary).unwrap_or(serde_json::Value::Null),
        }
    }
}
