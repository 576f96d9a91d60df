//! Catalog number backfill
//!
//! Re-runs catalog extraction over records already in the store, so rows
//! ingested before an extraction rule existed pick up the labelled model or
//! catalog number. Only `catalog_number` is rewritten, and only when the
//! extractor finds a value that differs from the stored one. A record where
//! nothing matches keeps its current value (often the product code).

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::{error::StoreError, normalize::CatalogExtractor, store::RecallStore};

/// Records read per store round trip
const BACKFILL_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub processed: u64,
    /// Rows whose catalog number was (or, on a dry run, would be) rewritten
    pub updated: u64,
    /// Extraction matched the stored value
    pub unchanged: u64,
    pub no_match: u64,
    pub dry_run: bool,
}

impl fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "Would update" } else { "Updated" };
        write!(
            f,
            "{verb} {} of {} recall catalog numbers ({} already correct, {} without a match)",
            self.updated, self.processed, self.unchanged, self.no_match
        )
    }
}

/// Walk every stored record and rewrite changed catalog numbers in one
/// transaction at the end. With `dry_run` nothing is written.
pub async fn backfill_catalog_numbers(
    store: &dyn RecallStore,
    extractor: &CatalogExtractor,
    dry_run: bool,
) -> Result<BackfillReport, StoreError> {
    let mut report = BackfillReport {
        dry_run,
        ..Default::default()
    };
    let mut updates: Vec<(String, String)> = Vec::new();
    let mut after: Option<String> = None;

    loop {
        let page = store
            .page_by_identifier(after.as_deref(), BACKFILL_PAGE_SIZE)
            .await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.identifier.clone());

        for record in &page {
            report.processed += 1;
            let extracted =
                extractor.extract_from(record.code_info.as_deref(), Some(record.device_name.as_str()));
            match extracted {
                Some(extracted) if record.catalog_number.as_deref() == Some(extracted.as_str()) => {
                    report.unchanged += 1;
                }
                Some(extracted) => {
                    debug!(
                        identifier = %record.identifier,
                        old = record.catalog_number.as_deref().unwrap_or(""),
                        new = %extracted,
                        "Catalog number changed"
                    );
                    updates.push((record.identifier.clone(), extracted));
                }
                None => report.no_match += 1,
            }
        }
        info!(processed = report.processed, pending = updates.len(), "Scanned recall page");
    }

    report.updated = if dry_run || updates.is_empty() {
        updates.len() as u64
    } else {
        store.update_catalog_numbers(&updates).await?
    };

    info!(
        processed = report.processed,
        updated = report.updated,
        dry_run,
        "Catalog backfill finished"
    );
    Ok(report)
}
