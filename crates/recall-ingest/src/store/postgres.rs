//! PostgreSQL recall store
//!
//! Schema lives in `migrations/`. Batch commits insert in chunks inside a
//! single transaction; `ON CONFLICT (identifier) DO NOTHING RETURNING`
//! reports exactly which rows were new.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use std::{collections::HashSet, time::Duration};
use tracing::{debug, info};

use super::RecallStore;
use crate::{
    config::DatabaseConfig,
    error::StoreError,
    models::{RecallCheckHistory, RecallRecord},
};

/// Rows per INSERT statement (12 binds each, well under the bind limit)
const COMMIT_CHUNK_SIZE: usize = 500;

const RECALL_COLUMNS: &str = "identifier, source_recall_number, device_name, manufacturer, \
     recalling_firm, catalog_number, recall_date, reason, status, code_info, created_at, updated_at";

#[derive(Clone)]
pub struct PgRecallStore {
    pool: PgPool,
}

impl PgRecallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// `%term%` with LIKE wildcards in the term escaped
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl RecallStore for PgRecallStore {
    async fn latest_recall_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let latest: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(recall_date) FROM recalls")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    async fn find(&self, identifier: &str) -> Result<Option<RecallRecord>, StoreError> {
        let record = sqlx::query_as::<_, RecallRecord>(&format!(
            "SELECT {RECALL_COLUMNS} FROM recalls WHERE identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_many(&self, identifiers: &[String]) -> Result<Vec<RecallRecord>, StoreError> {
        let records = sqlx::query_as::<_, RecallRecord>(&format!(
            "SELECT {RECALL_COLUMNS} FROM recalls WHERE identifier = ANY($1)"
        ))
        .bind(identifiers)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn commit_batch(&self, records: &[RecallRecord]) -> Result<Vec<RecallRecord>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: HashSet<String> = HashSet::with_capacity(records.len());

        for chunk in records.chunks(COMMIT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO recalls ({RECALL_COLUMNS}) "));

            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.identifier)
                    .push_bind(&record.source_recall_number)
                    .push_bind(&record.device_name)
                    .push_bind(&record.manufacturer)
                    .push_bind(&record.recalling_firm)
                    .push_bind(&record.catalog_number)
                    .push_bind(record.recall_date)
                    .push_bind(&record.reason)
                    .push_bind(&record.status)
                    .push_bind(&record.code_info)
                    .push_bind(record.created_at)
                    .push_bind(record.updated_at);
            });
            query_builder.push(" ON CONFLICT (identifier) DO NOTHING RETURNING identifier");

            let ids: Vec<String> = query_builder
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await?;
            debug!(chunk = chunk.len(), inserted = ids.len(), "Inserted recall chunk");
            inserted.extend(ids);
        }

        tx.commit().await?;

        Ok(records
            .iter()
            .filter(|r| inserted.contains(&r.identifier))
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        let records = sqlx::query_as::<_, RecallRecord>(&format!(
            "SELECT {RECALL_COLUMNS} FROM recalls \
             ORDER BY recall_date DESC NULLS LAST, created_at DESC LIMIT $1"
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn search(&self, term: &str, limit: i64) -> Result<Vec<RecallRecord>, StoreError> {
        let records = sqlx::query_as::<_, RecallRecord>(&format!(
            "SELECT {RECALL_COLUMNS} FROM recalls \
             WHERE device_name ILIKE $1 \
                OR manufacturer ILIKE $1 \
                OR recalling_firm ILIKE $1 \
                OR source_recall_number ILIKE $1 \
             ORDER BY recall_date DESC NULLS LAST, created_at DESC LIMIT $2"
        ))
        .bind(like_pattern(term))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recalls")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn page_by_identifier(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecallRecord>, StoreError> {
        let records = sqlx::query_as::<_, RecallRecord>(&format!(
            "SELECT {RECALL_COLUMNS} FROM recalls \
             WHERE $1::text IS NULL OR identifier > $1 \
             ORDER BY identifier LIMIT $2"
        ))
        .bind(after)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn update_catalog_numbers(&self, updates: &[(String, String)]) -> Result<u64, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        for chunk in updates.chunks(COMMIT_CHUNK_SIZE) {
            let (identifiers, catalog_numbers): (Vec<String>, Vec<String>) =
                chunk.iter().cloned().unzip();
            let result = sqlx::query(
                "UPDATE recalls AS r \
                 SET catalog_number = u.catalog_number, updated_at = NOW() \
                 FROM UNNEST($1::text[], $2::text[]) AS u(identifier, catalog_number) \
                 WHERE r.identifier = u.identifier",
            )
            .bind(&identifiers)
            .bind(&catalog_numbers)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        debug!(requested = updates.len(), changed, "Updated catalog numbers");
        Ok(changed)
    }

    async fn record_run(&self, entry: &RecallCheckHistory) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO recall_check_history \
             (run_id, check_date, new_recalls_count, inventory_checked, matches_found, notes, summary) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.run_id)
        .bind(entry.check_date)
        .bind(entry.new_recalls_count)
        .bind(entry.inventory_checked)
        .bind(entry.matches_found)
        .bind(&entry.notes)
        .bind(&entry.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RecallCheckHistory>, StoreError> {
        let runs = sqlx::query_as::<_, RecallCheckHistory>(
            "SELECT run_id, check_date, new_recalls_count, inventory_checked, matches_found, notes, summary \
             FROM recall_check_history ORDER BY check_date DESC LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}
