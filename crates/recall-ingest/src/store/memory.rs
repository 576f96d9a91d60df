//! In-memory recall store for tests and dry runs

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::{cmp::Reverse, collections::BTreeMap, ops::Bound};
use tokio::sync::RwLock;

use super::RecallStore;
use crate::{
    error::StoreError,
    models::{RecallCheckHistory, RecallRecord},
};

#[derive(Default)]
pub struct InMemoryRecallStore {
    records: RwLock<BTreeMap<String, RecallRecord>>,
    runs: RwLock<Vec<RecallCheckHistory>>,
}

impl InMemoryRecallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RecallRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.identifier.clone(), r))
            .collect();
        Self {
            records: RwLock::new(records),
            runs: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every stored record, ordered by identifier
    pub async fn records(&self) -> Vec<RecallRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

fn newest_first(records: &mut [RecallRecord]) {
    records.sort_by_key(|r| (Reverse(r.recall_date), Reverse(r.created_at)));
}

fn clamp_limit(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(usize::MAX)
}

#[async_trait]
impl RecallStore for InMemoryRecallStore {
    async fn latest_recall_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.records.read().await.values().filter_map(|r| r.recall_date).max())
    }

    async fn find(&self, identifier: &str) -> Result<Option<RecallRecord>, StoreError> {
        Ok(self.records.read().await.get(identifier).cloned())
    }

    async fn find_many(&self, identifiers: &[String]) -> Result<Vec<RecallRecord>, StoreError> {
        let stored = self.records.read().await;
        Ok(identifiers
            .iter()
            .filter_map(|id| stored.get(id).cloned())
            .collect())
    }

    async fn commit_batch(&self, records: &[RecallRecord]) -> Result<Vec<RecallRecord>, StoreError> {
        let mut stored = self.records.write().await;
        let mut inserted = Vec::new();
        for record in records {
            if !stored.contains_key(&record.identifier) {
                stored.insert(record.identifier.clone(), record.clone());
                inserted.push(record.clone());
            }
        }
        Ok(inserted)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        newest_first(&mut records);
        records.truncate(clamp_limit(limit));
        Ok(records)
    }

    async fn search(&self, term: &str, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        let needle = term.to_lowercase();
        let contains = |value: Option<&str>| {
            value.is_some_and(|v| v.to_lowercase().contains(&needle))
        };

        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                contains(Some(r.device_name.as_str()))
                    || contains(r.manufacturer.as_deref())
                    || contains(r.recalling_firm.as_deref())
                    || contains(r.source_recall_number.as_deref())
            })
            .cloned()
            .collect();
        newest_first(&mut records);
        records.truncate(clamp_limit(limit));
        Ok(records)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(i64::try_from(self.records.read().await.len()).unwrap_or(i64::MAX))
    }

    async fn page_by_identifier(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecallRecord>, StoreError> {
        let stored = self.records.read().await;
        let start = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        Ok(stored
            .range((start, Bound::Unbounded))
            .take(clamp_limit(limit))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn update_catalog_numbers(&self, updates: &[(String, String)]) -> Result<u64, StoreError> {
        let mut stored = self.records.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for (identifier, catalog_number) in updates {
            if let Some(record) = stored.get_mut(identifier) {
                record.catalog_number = Some(catalog_number.clone());
                record.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn record_run(&self, entry: &RecallCheckHistory) -> Result<(), StoreError> {
        self.runs.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RecallCheckHistory>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.iter().rev().take(clamp_limit(limit)).cloned().collect())
    }
}
