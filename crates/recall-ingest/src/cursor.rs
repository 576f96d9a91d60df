//! High-water mark for incremental fetches

use chrono::NaiveDate;
use std::sync::Arc;

use crate::{error::StoreError, models::IngestionCursor, store::RecallStore};

/// Derives the fetch cursor from what is already stored
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn RecallStore>,
    default_start: NaiveDate,
}

impl CursorStore {
    pub fn new(store: Arc<dyn RecallStore>, default_start: NaiveDate) -> Self {
        Self {
            store,
            default_start,
        }
    }

    /// Latest `recall_date` in the store, if any dated record exists.
    pub async fn current_cursor(&self) -> Result<Option<NaiveDate>, StoreError> {
        self.store.latest_recall_date().await
    }

    /// Cursor for a new run, substituting the default start on an empty store
    pub async fn cursor_for_run(&self) -> Result<IngestionCursor, StoreError> {
        Ok(match self.current_cursor().await? {
            Some(latest) => IngestionCursor::from_store(latest),
            None => IngestionCursor::from_default(self.default_start),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CursorSource, RecallRecord};
    use crate::store::InMemoryRecallStore;
    use chrono::Utc;

    fn dated(identifier: &str, date: Option<NaiveDate>) -> RecallRecord {
        let now = Utc::now();
        RecallRecord {
            identifier: identifier.to_string(),
            source_recall_number: None,
            device_name: "Pump".to_string(),
            manufacturer: None,
            recalling_firm: None,
            catalog_number: None,
            recall_date: date,
            reason: None,
            status: None,
            code_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_empty_store_uses_default_start() {
        let default_start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let cursors = CursorStore::new(Arc::new(InMemoryRecallStore::new()), default_start);

        assert_eq!(cursors.current_cursor().await.unwrap(), None);
        let cursor = cursors.cursor_for_run().await.unwrap();
        assert_eq!(cursor.since, default_start);
        assert_eq!(cursor.source, CursorSource::Default);
    }

    #[tokio::test]
    async fn test_cursor_is_latest_dated_record() {
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        let store = InMemoryRecallStore::with_records([
            dated("a", Some(d1)),
            dated("b", Some(d2)),
            dated("c", None),
        ]);
        let cursors = CursorStore::new(Arc::new(store), NaiveDate::MIN);

        let cursor = cursors.cursor_for_run().await.unwrap();
        assert_eq!(cursor, IngestionCursor::from_store(d2));
        // Repeated reads have no side effects
        assert_eq!(cursors.current_cursor().await.unwrap(), Some(d2));
    }
}
