//! Ingestion service
//!
//! Owns the run boundary: at most one run at a time, one cancellation
//! scope per run, an audit row after each run, and the interval scheduler.
//! Manual (`run_now`, HTTP, CLI) and scheduled triggers share one path.

use anyhow::Context;
use std::{future::Future, sync::Arc};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::{Config, ScheduleConfig},
    cursor::CursorStore,
    fetcher::{FetchPolicy, OpenFdaSource, PaginatedFetcher, RecallSource},
    models::RecallCheckHistory,
    normalize::{FieldMapping, Normalizer},
    notifier::{notifier_from_config, DownstreamNotifier},
    pipeline::IngestionPipeline,
    store::RecallStore,
    summary::IngestionRunSummary,
};

pub struct IngestionService {
    pipeline: IngestionPipeline,
    run_lock: Mutex<()>,
    /// Token of the run in progress, if any
    active_run: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl IngestionService {
    pub fn new(pipeline: IngestionPipeline) -> Self {
        Self {
            pipeline,
            run_lock: Mutex::new(()),
            active_run: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the openFDA source, normalizer and notifier from configuration
    pub fn from_config(config: &Config, store: Arc<dyn RecallStore>) -> anyhow::Result<Self> {
        let source: Arc<dyn RecallSource> =
            Arc::new(OpenFdaSource::new(&config.source).context("Failed to build source client")?);
        let notifier =
            notifier_from_config(&config.notifier).context("Failed to build inventory notifier")?;
        Self::with_collaborators(config, store, source, notifier)
    }

    /// Like [`Self::from_config`], with the source and notifier supplied
    pub fn with_collaborators(
        config: &Config,
        store: Arc<dyn RecallStore>,
        source: Arc<dyn RecallSource>,
        notifier: Arc<dyn DownstreamNotifier>,
    ) -> anyhow::Result<Self> {
        let mapping = match &config.source.field_mapping_path {
            Some(path) => FieldMapping::from_file(path)
                .with_context(|| format!("Failed to load field mapping from {}", path.display()))?,
            None => FieldMapping::default(),
        };
        info!(version = %mapping.version, "Using recall field mapping");

        let fetcher = PaginatedFetcher::new(
            source,
            FetchPolicy::from_config(&config.source),
            mapping.date_search_field.clone(),
        );
        let normalizer = Normalizer::new(mapping)?;
        let cursors = CursorStore::new(Arc::clone(&store), config.source.default_start_date);

        Ok(Self::new(IngestionPipeline::new(
            fetcher, normalizer, store, cursors, notifier,
        )))
    }

    pub fn store(&self) -> &Arc<dyn RecallStore> {
        self.pipeline.store()
    }

    /// Whether a run currently holds the lock
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Run one ingestion now, or return an `AlreadyRunning` summary if a
    /// run is in progress. Never queues.
    pub async fn run_now(&self) -> IngestionRunSummary {
        let run_id = Uuid::new_v4();
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!(%run_id, "Recall ingestion already running; trigger ignored");
            return IngestionRunSummary::already_running(run_id);
        };

        let cancel = self.shutdown.child_token();
        *self.active_run.lock().await = Some(cancel.clone());

        let summary = self
            .pipeline
            .run(run_id, cancel)
            .instrument(info_span!("recall_ingest", %run_id))
            .await;

        *self.active_run.lock().await = None;
        self.record(&summary).await;
        summary
    }

    /// Cancel the run in progress; returns false when none is running
    pub async fn cancel_current(&self) -> bool {
        match self.active_run.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel any run in progress and stop the scheduler
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for `signal`, then [`Self::shutdown`]. Used as the server's
    /// graceful-shutdown future so in-flight runs stop before connections
    /// are drained.
    pub async fn shutdown_on<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Cancelling recall ingestion for shutdown");
        self.shutdown();
    }

    async fn record(&self, summary: &IngestionRunSummary) {
        let entry = RecallCheckHistory::from_summary(summary);
        if let Err(e) = self.store().record_run(&entry).await {
            warn!(run_id = %summary.run_id, "Failed to record recall check history: {}", e);
        }
    }

    /// Run on a fixed interval until [`Self::shutdown`]. Ticks missed
    /// while a run is in progress are skipped.
    pub fn spawn_scheduler(self: &Arc<Self>, schedule: &ScheduleConfig) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = schedule.interval();
        let start = Instant::now() + schedule.initial_delay();

        tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                "Recall ingestion scheduler started"
            );
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = service.run_now().await;
                        info!(status = %summary.status, "Scheduled recall ingestion: {}", summary);
                    }
                }
            }

            info!("Recall ingestion scheduler stopped");
        })
    }
}
