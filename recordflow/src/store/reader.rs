//! Cursor-based full-table retrieval.

use super::{TableRef, TableStore};
use crate::auth::CredentialBroker;
use crate::core::Record;
use crate::errors::{RecordflowError, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for a [`PagedReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Rows requested per page.
    pub page_size: usize,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    /// Rows lacking a non-empty value for this field are dropped.
    pub identity_field: Option<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay: Duration::from_millis(500),
            identity_field: None,
        }
    }
}

/// Reads every record of a table, page by page, in arrival order.
pub struct PagedReader {
    store: Arc<dyn TableStore>,
    broker: Arc<CredentialBroker>,
    config: ReaderConfig,
}

impl PagedReader {
    /// Creates a reader.
    #[must_use]
    pub fn new(store: Arc<dyn TableStore>, broker: Arc<CredentialBroker>, config: ReaderConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Fetches the complete snapshot of `table`.
    ///
    /// # Errors
    ///
    /// Any failed page fails the whole fetch with `Upstream`; no partial
    /// snapshot is returned.
    pub async fn fetch_all(&self, table: &TableRef) -> Result<Vec<Record>, RecordflowError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut dropped = 0usize;

        loop {
            let credential = self.broker.acquire().await?;
            let page = self
                .store
                .list_records(credential.token(), table, self.config.page_size, cursor.as_deref())
                .await
                .map_err(RecordflowError::Upstream)?;
            pages += 1;

            let received = page.items.len();
            for record in page.items {
                if self.has_identity(&record) {
                    records.push(record);
                } else {
                    dropped += 1;
                }
            }
            debug!(page = pages, received, total = records.len(), "Fetched page");

            let next = match (page.has_more, page.next_cursor) {
                (true, Some(next)) if !next.is_empty() => next,
                _ => break,
            };
            if cursor.as_deref() == Some(next.as_str()) {
                warn!(cursor = %next, "Store returned the same cursor twice; stopping pagination");
                return Err(RecordflowError::Upstream(StoreError::Malformed(format!(
                    "pagination cursor '{next}' repeated"
                ))));
            }
            cursor = Some(next);

            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        info!(table = %table, pages, records = records.len(), dropped, "Fetched table snapshot");
        Ok(records)
    }

    fn has_identity(&self, record: &Record) -> bool {
        self.config
            .identity_field
            .as_deref()
            .map_or(true, |field| record.get(field).is_some_and(|v| v.is_filled()))
    }
}
