//! Write-back with a single credential refresh on auth failure.

use crate::auth::{is_auth_failure, Credential, CredentialBroker};
use crate::core::FieldMap;
use crate::errors::{RecordflowError, StoreError, WriteError};
use crate::store::{TableRef, TableStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReceipt {
    /// The first attempt hit an auth failure and the write was retried.
    pub auth_retried: bool,
}

/// Writes enrichment results back to one table.
pub struct RecordWriter {
    store: Arc<dyn TableStore>,
    broker: Arc<CredentialBroker>,
    table: TableRef,
}

impl RecordWriter {
    /// Creates a writer for `table`.
    #[must_use]
    pub fn new(store: Arc<dyn TableStore>, broker: Arc<CredentialBroker>, table: TableRef) -> Self {
        Self {
            store,
            broker,
            table,
        }
    }

    /// Writes `fields` to `record_id`.
    ///
    /// An auth failure invalidates the credential used, acquires a fresh one
    /// and retries exactly once. Any other failure, or a second auth
    /// failure, is returned.
    ///
    /// # Errors
    ///
    /// `WriteError` carrying the last store error.
    pub async fn write(&self, record_id: &str, fields: &FieldMap) -> Result<WriteReceipt, WriteError> {
        let credential = self.credential(record_id).await?;
        let first = self
            .store
            .update_record(credential.token(), &self.table, record_id, fields)
            .await;

        match first {
            Ok(()) => {
                debug!(record_id, fields = fields.len(), "Record written");
                Ok(WriteReceipt::default())
            }
            Err(e) if is_auth_failure(&e) => {
                warn!(record_id, error = %e, "Write rejected credential; refreshing and retrying once");
                self.broker.invalidate_token(credential.token()).await;
                let fresh = self
                    .credential(record_id)
                    .await
                    .map_err(WriteError::after_auth_retry)?;
                self.store
                    .update_record(fresh.token(), &self.table, record_id, fields)
                    .await
                    .map_err(|e| WriteError::new(record_id, e).after_auth_retry())?;
                debug!(record_id, fields = fields.len(), "Record written after refresh");
                Ok(WriteReceipt { auth_retried: true })
            }
            Err(e) => Err(WriteError::new(record_id, e)),
        }
    }

    async fn credential(&self, record_id: &str) -> Result<Credential, WriteError> {
        self.broker.acquire().await.map_err(|e| {
            let source = match e {
                RecordflowError::Upstream(store) => store,
                other => StoreError::Transport(other.to_string()),
            };
            WriteError::new(record_id, source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BrokerSettings;
    use crate::core::{FieldValue, Record};
    use crate::testing::{CountingTokenIssuer, InMemoryTableStore};
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryTableStore>,
        broker: Arc<CredentialBroker>,
        writer: RecordWriter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTableStore::new(vec![Record::new("rec1", FieldMap::new())]));
        let broker = Arc::new(CredentialBroker::new(
            Arc::new(CountingTokenIssuer::new()),
            BrokerSettings {
                app_id: "app".into(),
                app_secret: Some("secret".into()),
                default_validity: Duration::from_secs(7200),
                refresh_buffer: Duration::from_secs(300),
            },
        ));
        let writer = RecordWriter::new(store.clone(), broker.clone(), InMemoryTableStore::table());
        Fixture {
            store,
            broker,
            writer,
        }
    }

    fn fields() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("用户痛点".into(), FieldValue::text("耗时"));
        fields
    }

    #[tokio::test]
    async fn test_write_succeeds_first_time() {
        let f = fixture();
        let receipt = f.writer.write("rec1", &fields()).await.unwrap();
        assert!(!receipt.auth_retried);
        assert_eq!(f.broker.refresh_count(), 1);
        assert_eq!(f.store.record("rec1").unwrap().text("用户痛点"), "耗时");
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_and_retries_once() {
        let f = fixture();
        f.store.fail_next_update(StoreError::api(99_991_663, "Invalid access token"));

        let receipt = f.writer.write("rec1", &fields()).await.unwrap();
        assert!(receipt.auth_retried);
        assert_eq!(f.broker.refresh_count(), 2);
        let updates = f.store.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].token, "token-2");
    }

    #[tokio::test]
    async fn test_second_auth_failure_fails() {
        let f = fixture();
        f.store.fail_next_update(StoreError::status(401, "unauthorized"));
        f.store.fail_next_update(StoreError::status(401, "unauthorized"));

        let err = f.writer.write("rec1", &fields()).await.unwrap_err();
        assert!(err.auth_retried);
        assert_eq!(f.store.update_attempts(), 2);
        assert!(f.store.updates().is_empty());
    }

    #[tokio::test]
    async fn test_other_failure_is_not_retried() {
        let f = fixture();
        f.store.fail_next_update(StoreError::api(1_254_045, "field type mismatch"));

        let err = f.writer.write("rec1", &fields()).await.unwrap_err();
        assert!(!err.auth_retried);
        assert_eq!(err.record_id, "rec1");
        assert_eq!(f.store.update_attempts(), 1);
        assert_eq!(f.broker.refresh_count(), 1);
    }
}
