//! Recall persistence
//!
//! Writes happen in two steps. During a run, [`RecallBatch::upsert`] checks
//! each record against the store and against everything already staged by
//! the same run. At the end, [`RecallBatch::commit`] writes the staged
//! records in one transaction. Ingestion is insert-only: a known identifier
//! is always skipped, never updated. The catalog backfill is the one writer
//! that changes stored rows, and only their `catalog_number`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRecallStore;
pub use postgres::PgRecallStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use crate::{
    error::StoreError,
    models::{RecallCheckHistory, RecallRecord},
};

/// Storage backend for canonical recalls and run audit rows
#[async_trait]
pub trait RecallStore: Send + Sync {
    /// Maximum `recall_date` across all stored records
    async fn latest_recall_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    async fn find(&self, identifier: &str) -> Result<Option<RecallRecord>, StoreError>;

    /// Stored records among `identifiers`, in no particular order
    async fn find_many(&self, identifiers: &[String]) -> Result<Vec<RecallRecord>, StoreError>;

    /// Insert all records atomically, skipping identifiers that already
    /// exist. Returns the records actually inserted, in input order.
    async fn commit_batch(&self, records: &[RecallRecord]) -> Result<Vec<RecallRecord>, StoreError>;

    /// Most recent recalls by date, newest first
    async fn list_recent(&self, limit: i64) -> Result<Vec<RecallRecord>, StoreError>;

    /// Case-insensitive containment search over device name, manufacturer,
    /// recalling firm and recall number
    async fn search(&self, term: &str, limit: i64) -> Result<Vec<RecallRecord>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Up to `limit` records ordered by identifier, starting after `after`
    async fn page_by_identifier(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecallRecord>, StoreError>;

    /// Overwrite `catalog_number` for the given identifiers in one
    /// transaction. Returns how many rows changed.
    async fn update_catalog_numbers(&self, updates: &[(String, String)]) -> Result<u64, StoreError>;

    async fn record_run(&self, entry: &RecallCheckHistory) -> Result<(), StoreError>;

    /// Latest audit rows, newest first
    async fn recent_runs(&self, limit: i64) -> Result<Vec<RecallCheckHistory>, StoreError>;
}

/// Result of staging one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// The identifier is already stored or staged; carries that record
    Skipped(Box<RecallRecord>),
}

/// Records staged by one run, committed or discarded as a whole
pub struct RecallBatch<'a> {
    store: &'a dyn RecallStore,
    staged: Vec<RecallRecord>,
    index: HashMap<String, usize>,
}

impl<'a> RecallBatch<'a> {
    pub fn new(store: &'a dyn RecallStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub async fn upsert(&mut self, record: RecallRecord) -> Result<UpsertOutcome, StoreError> {
        // One record in, one outcome out
        let mut outcomes = self.upsert_page(vec![record]).await?;
        Ok(outcomes.swap_remove(0))
    }

    /// Stage a page of records with a single store lookup. Outcomes are in
    /// input order; a repeat within the page is skipped like any other.
    pub async fn upsert_page(
        &mut self,
        records: Vec<RecallRecord>,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let unseen: Vec<String> = records
            .iter()
            .map(|r| r.identifier.clone())
            .filter(|id| !self.index.contains_key(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let stored: HashMap<String, RecallRecord> = if unseen.is_empty() {
            HashMap::new()
        } else {
            self.store
                .find_many(&unseen)
                .await?
                .into_iter()
                .map(|r| (r.identifier.clone(), r))
                .collect()
        };

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if let Some(&position) = self.index.get(&record.identifier) {
                outcomes.push(UpsertOutcome::Skipped(Box::new(self.staged[position].clone())));
            } else if let Some(existing) = stored.get(&record.identifier) {
                outcomes.push(UpsertOutcome::Skipped(Box::new(existing.clone())));
            } else {
                self.index.insert(record.identifier.clone(), self.staged.len());
                self.staged.push(record);
                outcomes.push(UpsertOutcome::Inserted);
            }
        }
        Ok(outcomes)
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Write everything staged in one transaction; returns what was
    /// actually inserted
    pub async fn commit(self) -> Result<Vec<RecallRecord>, StoreError> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }
        self.store.commit_batch(&self.staged).await
    }

    /// Drop the staged records; returns how many there were
    pub fn discard(self) -> usize {
        self.staged.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(identifier: &str) -> RecallRecord {
        let now = Utc::now();
        RecallRecord {
            identifier: identifier.to_string(),
            source_recall_number: Some("Z-1".to_string()),
            device_name: "Pump".to_string(),
            manufacturer: None,
            recalling_firm: None,
            catalog_number: None,
            recall_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            reason: None,
            status: None,
            code_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_skips_stored_and_staged() {
        let store = InMemoryRecallStore::with_records([record("pump-Z-1")]);
        let mut batch = RecallBatch::new(&store);

        let stored = batch.upsert(record("pump-Z-1")).await.unwrap();
        assert!(matches!(stored, UpsertOutcome::Skipped(existing) if existing.identifier == "pump-Z-1"));

        assert_eq!(batch.upsert(record("pump-Z-2")).await.unwrap(), UpsertOutcome::Inserted);
        assert!(matches!(
            batch.upsert(record("pump-Z-2")).await.unwrap(),
            UpsertOutcome::Skipped(_)
        ));
        assert_eq!(batch.len(), 1);

        let inserted = batch.commit().await.unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_page_reports_outcomes_in_order() {
        let store = InMemoryRecallStore::with_records([record("pump-Z-1")]);
        let mut batch = RecallBatch::new(&store);
        batch.upsert(record("pump-Z-2")).await.unwrap();

        let outcomes = batch
            .upsert_page(vec![
                record("pump-Z-1"),
                record("pump-Z-3"),
                record("pump-Z-2"),
                record("pump-Z-3"),
            ])
            .await
            .unwrap();

        let skipped: Vec<bool> = outcomes
            .iter()
            .map(|o| matches!(o, UpsertOutcome::Skipped(_)))
            .collect();
        assert_eq!(skipped, vec![true, false, true, true]);
        assert_eq!(batch.len(), 2);
        assert!(batch.upsert_page(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_writes_nothing() {
        let store = InMemoryRecallStore::new();
        let mut batch = RecallBatch::new(&store);
        batch.upsert(record("a")).await.unwrap();
        batch.upsert(record("b")).await.unwrap();

        assert_eq!(batch.discard(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_reports_lost_races_as_not_inserted() {
        let store = InMemoryRecallStore::new();
        let mut batch = RecallBatch::new(&store);
        batch.upsert(record("a")).await.unwrap();
        batch.upsert(record("b")).await.unwrap();

        // Another writer stores "a" between staging and commit
        store.commit_batch(&[record("a")]).await.unwrap();

        let inserted = batch.commit().await.unwrap();
        assert_eq!(
            inserted.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>(),
            vec!["b"]
        );
    }
}
