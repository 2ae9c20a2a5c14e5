//! Tabular data store seam.
//!
//! The core talks to the remote table only through [`TokenIssuer`] and
//! [`TableStore`]. The Feishu Bitable adapter lives in [`feishu`] behind the
//! `http` feature; tests use the in-memory fakes in `crate::testing`.

#[cfg(feature = "http")]
pub mod feishu;
mod reader;

pub use reader::{PagedReader, ReaderConfig};

use crate::core::{FieldMap, Record};
use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies one table inside a store application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Application (base) token.
    pub app_token: String,
    /// Table identifier.
    pub table_id: String,
}

impl TableRef {
    /// Creates a table reference.
    #[must_use]
    pub fn new(app_token: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            app_token: app_token.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_token, self.table_id)
    }
}

/// A freshly issued bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Opaque token string.
    pub token: String,
    /// Lifetime reported by the auth endpoint.
    pub expires_in: Duration,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Rows in arrival order.
    pub items: Vec<Record>,
    /// Cursor for the next page, if the store returned one.
    pub next_cursor: Option<String>,
    /// Whether the store reports more pages.
    pub has_more: bool,
}

/// Exchanges application credentials for a bearer token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Requests a new token.
    async fn issue_token(&self, app_id: &str, app_secret: &str) -> Result<IssuedToken, StoreError>;
}

/// Reads and writes rows of a remote table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Lists one page of records.
    async fn list_records(
        &self,
        token: &str,
        table: &TableRef,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError>;

    /// Overwrites the given fields of one record.
    async fn update_record(
        &self,
        token: &str,
        table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<(), StoreError>;
}
