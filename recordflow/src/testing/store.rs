//! In-memory store and token issuer.

use crate::core::{FieldMap, Record};
use crate::errors::StoreError;
use crate::store::{IssuedToken, Page, TableRef, TableStore, TokenIssuer};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Issues `token-1`, `token-2`, ... and counts successful exchanges.
#[derive(Debug)]
pub struct CountingTokenIssuer {
    validity: Duration,
    latency: Duration,
    failure: Option<StoreError>,
    issued: AtomicUsize,
}

impl CountingTokenIssuer {
    /// Creates an issuer whose tokens are valid for two hours.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validity: Duration::from_secs(7200),
            latency: Duration::ZERO,
            failure: None,
            issued: AtomicUsize::new(0),
        }
    }

    /// Creates an issuer that always fails with `error`.
    #[must_use]
    pub fn failing(error: StoreError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    /// Sets the validity reported with each token.
    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Delays every exchange.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of tokens issued.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl Default for CountingTokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenIssuer for CountingTokenIssuer {
    async fn issue_token(&self, _app_id: &str, _app_secret: &str) -> Result<IssuedToken, StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken {
            token: format!("token-{n}"),
            expires_in: self.validity,
        })
    }
}

/// One accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUpdate {
    /// Record written.
    pub record_id: String,
    /// Fields sent.
    pub fields: FieldMap,
    /// Bearer token used.
    pub token: String,
}

#[derive(Debug, Default)]
struct TableState {
    records: Vec<Record>,
    list_calls: usize,
    list_failures: HashMap<usize, StoreError>,
    next_update_failures: VecDeque<StoreError>,
    record_failures: HashMap<String, StoreError>,
    update_attempts: usize,
    updates: Vec<TableUpdate>,
}

/// A table held in memory, paged by offset.
///
/// Writes merge into the stored records, so a second pass sees the first
/// pass's results.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    state: Mutex<TableState>,
}

impl InMemoryTableStore {
    /// Creates a store holding `records` in order.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            state: Mutex::new(TableState {
                records,
                ..TableState::default()
            }),
        }
    }

    /// The table reference tests pass to the store.
    #[must_use]
    pub fn table() -> TableRef {
        TableRef::new("app_test", "tbl_test")
    }

    /// Fails the `call`-th listing request (1-based).
    pub fn fail_list_on_call(&self, call: usize, error: StoreError) {
        self.state.lock().list_failures.insert(call, error);
    }

    /// Fails the next update, whichever record it targets.
    pub fn fail_next_update(&self, error: StoreError) {
        self.state.lock().next_update_failures.push_back(error);
    }

    /// Fails every update of `record_id`.
    pub fn fail_updates_for(&self, record_id: impl Into<String>, error: StoreError) {
        self.state.lock().record_failures.insert(record_id.into(), error);
    }

    /// Number of listing requests served or failed.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Number of update requests, including failed ones.
    #[must_use]
    pub fn update_attempts(&self) -> usize {
        self.state.lock().update_attempts
    }

    /// Accepted updates in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<TableUpdate> {
        self.state.lock().updates.clone()
    }

    /// Ids of records that received an accepted update.
    #[must_use]
    pub fn updated_ids(&self) -> Vec<String> {
        self.state.lock().updates.iter().map(|u| u.record_id.clone()).collect()
    }

    /// Current contents of the table.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.state.lock().records.clone()
    }

    /// Current contents of one record.
    #[must_use]
    pub fn record(&self, record_id: &str) -> Option<Record> {
        self.state
            .lock()
            .records
            .iter()
            .find(|r| r.id() == record_id)
            .cloned()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn list_records(
        &self,
        _token: &str,
        _table: &TableRef,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        let call = state.list_calls;
        if let Some(error) = state.list_failures.remove(&call) {
            return Err(error);
        }

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| StoreError::api(1_254_000, format!("bad page token {c}")))?,
            None => 0,
        };
        let page_size = page_size.max(1);
        let end = (start + page_size).min(state.records.len());
        let items = state.records.get(start..end).unwrap_or_default().to_vec();
        let has_more = end < state.records.len();
        Ok(Page {
            items,
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }

    async fn update_record(
        &self,
        token: &str,
        _table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.update_attempts += 1;
        if let Some(error) = state.next_update_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.record_failures.get(record_id) {
            return Err(error.clone());
        }

        let Some(record) = state.records.iter_mut().find(|r| r.id() == record_id) else {
            return Err(StoreError::api(1_254_043, format!("record {record_id} not found")));
        };
        record.fields.extend(fields.clone());
        state.updates.push(TableUpdate {
            record_id: record_id.to_string(),
            fields: fields.clone(),
            token: token.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldValue;

    #[tokio::test]
    async fn test_issuer_tokens_are_distinct() {
        let issuer = CountingTokenIssuer::new();
        let a = issuer.issue_token("id", "secret").await.unwrap();
        let b = issuer.issue_token("id", "secret").await.unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(issuer.issued(), 2);
    }

    #[tokio::test]
    async fn test_store_pages_and_writes() {
        let store = InMemoryTableStore::new(vec![
            Record::new("a", FieldMap::new()),
            Record::new("b", FieldMap::new()),
            Record::new("c", FieldMap::new()),
        ]);
        let table = InMemoryTableStore::table();

        let first = store.list_records("t", &table, 2, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);
        let second = store
            .list_records("t", &table, 2, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(!second.has_more);
        assert!(second.next_cursor.is_none());

        let mut fields = FieldMap::new();
        fields.insert("标题".into(), FieldValue::text("x"));
        store.update_record("t", &table, "b", &fields).await.unwrap();
        assert_eq!(store.record("b").unwrap().text("标题"), "x");
        assert_eq!(store.updated_ids(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_update_failure_is_consumed_once() {
        let store = InMemoryTableStore::new(vec![Record::new("a", FieldMap::new())]);
        let table = InMemoryTableStore::table();
        store.fail_next_update(StoreError::status(401, "unauthorized"));

        assert!(store.update_record("t", &table, "a", &FieldMap::new()).await.is_err());
        assert!(store.update_record("t", &table, "a", &FieldMap::new()).await.is_ok());
        assert_eq!(store.update_attempts(), 2);
    }
}
