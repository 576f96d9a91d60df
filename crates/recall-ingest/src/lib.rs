//! Recall Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental ingestion of openFDA device recalls into a local store, with
//! newly discovered recalls forwarded to an inventory cross-reference
//! service.
//!
//! # Pipeline
//!
//! - **Cursor**: latest stored recall date bounds the next fetch
//! - **Fetcher**: paginated source requests with skip-and-backoff on failure
//! - **Normalizer**: versioned field mapping, catalog number extraction,
//!   deterministic identifiers
//! - **Store**: insert-only staging and single-transaction commit
//! - **Notifier**: one cross-reference call per run with the new records
//! - **Backfill**: re-extracts catalog numbers over already stored records
//!
//! # Example
//!
//! ```no_run
//! use recall_ingest::{config::Config, service::IngestionService, store::PgRecallStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = PgRecallStore::connect(&config.database).await?;
//!     store.migrate().await?;
//!
//!     let service = IngestionService::from_config(&config, Arc::new(store))?;
//!     println!("{}", service.run_now().await);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backfill;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod notifier;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod summary;

pub use error::{FetchError, NotifyError, StoreError};
pub use models::{IngestionCursor, RawRecord, RecallRecord};
pub use service::IngestionService;
pub use summary::{IngestionRunSummary, RunStatus};
