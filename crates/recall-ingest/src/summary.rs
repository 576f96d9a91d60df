//! Per-run summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{
    fetcher::{FetchStats, FetchTermination},
    models::IngestionCursor,
    notifier::{MatchSummary, MatchedItem},
};

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "completed")]
    Completed,
    /// Committed what was fetched, but the fetch stopped early
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Another run held the lock; nothing was done
    #[serde(rename = "already_running")]
    AlreadyRunning,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::AlreadyRunning => write!(f, "already_running"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "already_running" => Ok(RunStatus::AlreadyRunning),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// What happened with the downstream cross-reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownstreamOutcome {
    /// The run ended before reaching the notify step
    NotAttempted,
    NotConfigured,
    NothingToSend,
    Matched {
        matched_count: u64,
        matches: Vec<MatchedItem>,
    },
    Failed {
        message: String,
    },
}

impl From<MatchSummary> for DownstreamOutcome {
    fn from(summary: MatchSummary) -> Self {
        DownstreamOutcome::Matched {
            matched_count: summary.matched_count,
            matches: summary.matches,
        }
    }
}

impl fmt::Display for DownstreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownstreamOutcome::NotAttempted => write!(f, "inventory check not attempted"),
            DownstreamOutcome::NotConfigured => write!(f, "inventory check not configured"),
            DownstreamOutcome::NothingToSend => write!(f, "no new recalls to check against inventory"),
            DownstreamOutcome::Matched { matched_count, .. } => {
                write!(f, "{matched_count} inventory matches found")
            }
            DownstreamOutcome::Failed { message } => write!(f, "inventory check failed: {message}"),
        }
    }
}

/// Counts, outcome and timing of one ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cursor: Option<IngestionCursor>,
    pub pages_requested: u32,
    pub records_fetched: u64,
    pub inserted: u64,
    /// Duplicates, found in the store, staged earlier, or lost at commit
    pub skipped: u64,
    pub parse_failures: u64,
    pub fetch_failures: u32,
    pub consecutive_fetch_failures: u32,
    pub termination: Option<FetchTermination>,
    pub downstream: DownstreamOutcome,
    pub warnings: Vec<String>,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl IngestionRunSummary {
    pub fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            cursor: None,
            pages_requested: 0,
            records_fetched: 0,
            inserted: 0,
            skipped: 0,
            parse_failures: 0,
            fetch_failures: 0,
            consecutive_fetch_failures: 0,
            termination: None,
            downstream: DownstreamOutcome::NotAttempted,
            warnings: Vec::new(),
            status: RunStatus::Completed,
            error: None,
        }
    }

    /// Summary for a trigger rejected because a run is in progress
    pub fn already_running(run_id: Uuid) -> Self {
        let mut summary = Self::start(run_id);
        summary.status = RunStatus::AlreadyRunning;
        summary.finished_at = Some(summary.started_at);
        summary
    }

    pub fn record_fetch(&mut self, stats: &FetchStats, termination: Option<FetchTermination>) {
        self.pages_requested = stats.pages_requested;
        self.records_fetched = stats.records_fetched;
        self.fetch_failures = stats.failed_requests;
        self.consecutive_fetch_failures = stats.consecutive_failures;
        self.termination = termination;

        match termination {
            Some(FetchTermination::TooManyFailures) => {
                self.status = RunStatus::Partial;
                self.warn(format!(
                    "Fetch stopped after {} consecutive failed requests{}",
                    stats.consecutive_failures,
                    stats
                        .last_error
                        .as_deref()
                        .map(|e| format!(" (last error: {e})"))
                        .unwrap_or_default()
                ));
            }
            Some(FetchTermination::OffsetCeiling) => {
                self.warn("Offset ceiling reached; later records in this window were not fetched");
            }
            _ => {}
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Mark the run cancelled; staged records were discarded
    pub fn cancel(&mut self, discarded: usize) {
        self.status = RunStatus::Cancelled;
        self.inserted = 0;
        if discarded > 0 {
            self.warn(format!("{discarded} staged records discarded on cancellation"));
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.inserted = 0;
        self.error = Some(error.into());
    }

    pub fn complete(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Partial)
    }
}

impl fmt::Display for IngestionRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RunStatus::AlreadyRunning => {
                write!(f, "Recall ingestion already running; trigger ignored")
            }
            RunStatus::Failed => write!(
                f,
                "Recall ingestion failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            RunStatus::Cancelled => write!(
                f,
                "Recall ingestion cancelled after {} pages; nothing committed",
                self.pages_requested
            ),
            RunStatus::Completed | RunStatus::Partial => {
                write!(
                    f,
                    "Imported {} new recall records ({} duplicates skipped, {} unparseable)",
                    self.inserted, self.skipped, self.parse_failures
                )?;
                if let Some(cursor) = &self.cursor {
                    write!(f, " since {}", cursor.since)?;
                }
                write!(f, "; {}", self.downstream)?;
                if self.status == RunStatus::Partial {
                    write!(
                        f,
                        " [partial: fetch stopped after {} failed requests]",
                        self.consecutive_fetch_failures
                    )?;
                }
                Ok(())
            }
        }
    }
}
