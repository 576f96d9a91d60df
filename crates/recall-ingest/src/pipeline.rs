//! One ingestion run, end to end
//!
//! cursor -> paginated fetch -> normalize -> stage -> commit -> notify.
//! A run never returns an error: every outcome, including store failures,
//! ends up in the [`IngestionRunSummary`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    cursor::CursorStore,
    error::StoreError,
    fetcher::{FetchTermination, PaginatedFetcher},
    models::RecallRecord,
    normalize::Normalizer,
    notifier::DownstreamNotifier,
    store::{RecallBatch, RecallStore, UpsertOutcome},
    summary::{DownstreamOutcome, IngestionRunSummary},
};

pub struct IngestionPipeline {
    fetcher: PaginatedFetcher,
    normalizer: Normalizer,
    store: Arc<dyn RecallStore>,
    cursors: CursorStore,
    notifier: Arc<dyn DownstreamNotifier>,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: PaginatedFetcher,
        normalizer: Normalizer,
        store: Arc<dyn RecallStore>,
        cursors: CursorStore,
        notifier: Arc<dyn DownstreamNotifier>,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            store,
            cursors,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecallStore> {
        &self.store
    }

    pub async fn run(&self, run_id: Uuid, cancel: CancellationToken) -> IngestionRunSummary {
        let mut summary = IngestionRunSummary::start(run_id);

        if let Err(e) = self.execute(&mut summary, cancel).await {
            error!(%run_id, "Recall ingestion failed: {}", e);
            summary.fail(e.to_string());
        }

        summary.complete();
        info!(
            %run_id,
            status = %summary.status,
            inserted = summary.inserted,
            skipped = summary.skipped,
            parse_failures = summary.parse_failures,
            "{}",
            summary
        );
        summary
    }

    async fn execute(
        &self,
        summary: &mut IngestionRunSummary,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        let cursor = self.cursors.cursor_for_run().await?;
        info!(cursor = %cursor.since, source = ?cursor.source, "Fetching recalls posted after cursor");
        summary.cursor = Some(cursor.clone());

        let mut pages = self.fetcher.fetch_since(&cursor, cancel);
        let mut batch = RecallBatch::new(self.store.as_ref());

        while let Some(page) = pages.next_page().await {
            let mut records = Vec::with_capacity(page.len());
            for raw in &page {
                match self.normalizer.normalize(raw) {
                    Ok(record) => records.push(record),
                    Err(failure) => {
                        summary.parse_failures += 1;
                        debug!("Discarding unparseable recall: {}", failure);
                    }
                }
            }

            for outcome in batch.upsert_page(records).await? {
                if let UpsertOutcome::Skipped(existing) = outcome {
                    summary.skipped += 1;
                    debug!(identifier = %existing.identifier, "Recall already known");
                }
            }
        }

        let termination = pages.termination();
        summary.record_fetch(pages.stats(), termination);

        if termination == Some(FetchTermination::Cancelled) {
            let discarded = batch.discard();
            warn!(discarded, "Recall ingestion cancelled; staged records discarded");
            summary.cancel(discarded);
            return Ok(());
        }

        let staged = batch.len();
        let inserted = batch.commit().await?;
        let lost = staged - inserted.len();
        if lost > 0 {
            debug!(lost, "Recalls inserted concurrently by another writer");
        }
        summary.inserted = inserted.len() as u64;
        summary.skipped += lost as u64;
        info!(inserted = inserted.len(), staged, "Committed recall batch");

        summary.downstream = self.notify(&inserted, summary).await;
        Ok(())
    }

    async fn notify(
        &self,
        inserted: &[RecallRecord],
        summary: &mut IngestionRunSummary,
    ) -> DownstreamOutcome {
        if !self.notifier.is_configured() {
            return DownstreamOutcome::NotConfigured;
        }
        if inserted.is_empty() {
            return DownstreamOutcome::NothingToSend;
        }

        match self.notifier.notify(inserted).await {
            Ok(matches) => matches.into(),
            Err(e) => {
                warn!(recalls = inserted.len(), "Inventory cross-reference failed: {}", e);
                summary.warn(format!("Inventory cross-reference failed: {e}"));
                DownstreamOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}
