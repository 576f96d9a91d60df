//! PostgreSQL store tests against a throwaway container
//!
//! Requires Docker. Run with `cargo test --test postgres_store_tests -- --ignored`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use common::*;
use recall_ingest::{
    backfill::backfill_catalog_numbers,
    models::{RawRecord, RecallCheckHistory, RecallRecord},
    normalize::{CatalogExtractor, FieldMapping, Normalizer},
    store::{PgRecallStore, RecallBatch, RecallStore, UpsertOutcome},
    summary::{DownstreamOutcome, IngestionRunSummary},
};
use sqlx::postgres::PgPoolOptions;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

async fn start_store() -> Result<(ContainerAsync<Postgres>, PgRecallStore)> {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .context("Failed to start PostgreSQL container")?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432.tcp()).await?;
    let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .context("Failed to connect to test database")?;

    let store = PgRecallStore::new(pool);
    store.migrate().await?;
    Ok((container, store))
}

fn normalized(range: std::ops::Range<usize>) -> Vec<RecallRecord> {
    let normalizer = Normalizer::new(FieldMapping::default()).unwrap();
    range
        .map(|i| normalizer.normalize(&RawRecord(recall_json(i))).unwrap())
        .collect()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_commit_batch_skips_existing_identifiers() -> Result<()> {
    init_tracing();
    let (_container, store) = start_store().await?;

    assert_eq!(store.latest_recall_date().await?, None);

    let first = normalized(0..600);
    let inserted = store.commit_batch(&first).await?;
    assert_eq!(inserted.len(), 600);
    assert_eq!(store.count().await?, 600);

    // Overlapping batch: only the new tail is inserted
    let second = normalized(590..610);
    let inserted = store.commit_batch(&second).await?;
    assert_eq!(inserted.len(), 10);
    assert_eq!(inserted[0].source_recall_number.as_deref(), Some("Z-0600-2024"));
    assert_eq!(store.count().await?, 610);

    assert_eq!(
        store.latest_recall_date().await?,
        NaiveDate::from_ymd_opt(2024, 3, 31)
    );

    let found = store.find(&first[7].identifier).await?.unwrap();
    assert_eq!(found.device_name, first[7].device_name);
    assert_eq!(found.catalog_number, first[7].catalog_number);
    assert_eq!(found.recall_date, first[7].recall_date);
    assert!(store.find("nothing-here").await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_batch_staging_against_postgres() -> Result<()> {
    let (_container, store) = start_store().await?;
    store.commit_batch(&normalized(0..3)).await?;

    let mut batch = RecallBatch::new(&store);
    for record in normalized(2..5) {
        batch.upsert(record).await?;
    }
    assert!(matches!(
        batch.upsert(normalized(4..5).remove(0)).await?,
        UpsertOutcome::Skipped(_)
    ));
    assert_eq!(batch.len(), 2);

    let inserted = batch.commit().await?;
    assert_eq!(inserted.len(), 2);
    assert_eq!(store.count().await?, 5);
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_list_and_search() -> Result<()> {
    let (_container, store) = start_store().await?;
    store.commit_batch(&normalized(0..30)).await?;

    let recent = store.list_recent(5).await?;
    assert_eq!(recent.len(), 5);
    assert!(recent.windows(2).all(|w| w[0].recall_date >= w[1].recall_date));

    let hits = store.search("device 12 infusion", 10).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].catalog_number.as_deref(), Some("CAT-12"));

    // LIKE wildcards in the term match literally
    assert!(store.search("%", 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_run_history_round_trip() -> Result<()> {
    let (_container, store) = start_store().await?;

    for inserted in [3_u64, 0] {
        let mut summary = IngestionRunSummary::start(Uuid::new_v4());
        summary.inserted = inserted;
        summary.downstream = DownstreamOutcome::NothingToSend;
        summary.complete();
        store.record_run(&RecallCheckHistory::from_summary(&summary)).await?;
    }

    let runs = store.recent_runs(10).await?;
    assert_eq!(runs.len(), 2);
    assert!(runs[0].check_date >= runs[1].check_date);
    assert!(runs[0].check_date <= Utc::now());
    assert_eq!(runs[1].new_recalls_count, 3);
    assert_eq!(runs[1].summary["status"], "completed");
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_catalog_backfill_rewrites_stale_rows() -> Result<()> {
    let (_container, store) = start_store().await?;

    // Rows stored with the product code instead of the labelled model number
    let stale: Vec<RecallRecord> = normalized(0..3)
        .into_iter()
        .map(|mut r| {
            r.catalog_number = Some("FNL".to_string());
            r
        })
        .collect();
    store.commit_batch(&stale).await?;

    let first = store.page_by_identifier(None, 2).await?;
    assert_eq!(first.len(), 2);
    assert!(first[0].identifier < first[1].identifier);
    let rest = store
        .page_by_identifier(Some(first[1].identifier.as_str()), 10)
        .await?;
    assert_eq!(rest.len(), 1);

    let report = backfill_catalog_numbers(&store, &CatalogExtractor::new()?, false).await?;
    assert_eq!(report.processed, 3);
    assert_eq!(report.updated, 3);

    let fixed = store.find(&stale[1].identifier).await?.unwrap();
    assert_eq!(fixed.catalog_number.as_deref(), Some("CAT-1"));
    assert!(fixed.updated_at > stale[1].updated_at);
    assert_eq!(store.count().await?, 3);
    Ok(())
}
