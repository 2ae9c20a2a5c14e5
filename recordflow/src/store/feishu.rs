//! Feishu Bitable adapter for [`TokenIssuer`] and [`TableStore`].
//!
//! - Token: `POST /open-apis/auth/v3/tenant_access_token/internal`
//! - List: `GET /open-apis/bitable/v1/apps/{app}/tables/{table}/records`
//! - Update: `PUT /open-apis/bitable/v1/apps/{app}/tables/{table}/records/{id}`
//!
//! Every response carries a `{code, msg}` envelope; a non-zero code is an
//! error even when the HTTP status is 200.

use super::{IssuedToken, Page, TableRef, TableStore, TokenIssuer};
use crate::core::{FieldMap, Record};
use crate::errors::{RecordflowError, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Public Feishu Open Platform endpoint.
pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    items: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    has_more: bool,
}

/// HTTP client for the Feishu Open Platform.
#[derive(Debug, Clone)]
pub struct FeishuClient {
    http: Client,
    base_url: String,
}

impl FeishuClient {
    /// Creates a client against `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RecordflowError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RecordflowError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecordflowError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn records_url(&self, table: &TableRef) -> String {
        format!(
            "{}/open-apis/bitable/v1/apps/{}/tables/{}/records",
            self.base_url, table.app_token, table.table_id
        )
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, StoreError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to read response body: {e}")))?;

        let envelope = serde_json::from_str::<Envelope<T>>(&body);
        if status.as_u16() == 401 {
            let message = envelope.map(|e| e.msg).unwrap_or(body);
            return Err(StoreError::status(401, message));
        }
        match envelope {
            Ok(envelope) if envelope.code != 0 => Err(StoreError::api(envelope.code, envelope.msg)),
            Ok(envelope) if status.is_success() => Ok(envelope),
            Ok(envelope) => Err(StoreError::status(status.as_u16(), envelope.msg)),
            Err(_) if !status.is_success() => Err(StoreError::status(status.as_u16(), body)),
            Err(e) => Err(StoreError::Malformed(format!("unexpected response body: {e}"))),
        }
    }
}

/// Decodes rows one by one; a row with an unexpected shape is dropped
/// instead of failing the page.
fn decode_items(items: Vec<serde_json::Value>) -> Vec<Record> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let record_id = item
                .get("record_id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();
            match serde_json::from_value::<Record>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(index, %record_id, error = %e, "Skipping undecodable row");
                    None
                }
            }
        })
        .collect()
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl TokenIssuer for FeishuClient {
    async fn issue_token(&self, app_id: &str, app_secret: &str) -> Result<IssuedToken, StoreError> {
        let url = format!("{}/open-apis/auth/v3/tenant_access_token/internal", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "app_id": app_id, "app_secret": app_secret }))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(format!("token response: {e}")))?;
        if body.code != 0 {
            return Err(StoreError::api(body.code, body.msg));
        }
        if !status.is_success() {
            return Err(StoreError::status(status.as_u16(), body.msg));
        }
        let token = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StoreError::Malformed("token response has no tenant_access_token".into()))?;

        debug!(expire = body.expire, "Issued tenant access token");
        Ok(IssuedToken {
            token,
            expires_in: Duration::from_secs(body.expire),
        })
    }
}

#[async_trait]
impl TableStore for FeishuClient {
    async fn list_records(
        &self,
        token: &str,
        table: &TableRef,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut request = self
            .http
            .get(self.records_url(table))
            .bearer_auth(token)
            .query(&[("page_size", page_size.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("page_token", cursor)]);
        }

        let response = request.send().await.map_err(transport)?;
        let envelope: Envelope<ListData> = Self::decode(response).await?;
        let data = envelope
            .data
            .ok_or_else(|| StoreError::Malformed("list response has no data".into()))?;

        Ok(Page {
            items: decode_items(data.items.unwrap_or_default()),
            next_cursor: data.page_token.filter(|t| !t.is_empty()),
            has_more: data.has_more,
        })
    }

    async fn update_record(
        &self,
        token: &str,
        table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.records_url(table), record_id);
        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(transport)?;

        let _: Envelope<serde_json::Value> = Self::decode(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_url() {
        let client = FeishuClient::new("https://example.test/").unwrap();
        let url = client.records_url(&TableRef::new("bascn1", "tbl1"));
        assert_eq!(
            url,
            "https://example.test/open-apis/bitable/v1/apps/bascn1/tables/tbl1/records"
        );
    }

    #[test]
    fn test_list_data_decodes_null_items() {
        let raw = r#"{"code":0,"msg":"success","data":{"items":null,"has_more":false}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(raw).unwrap();
        let data = envelope.data.unwrap();
        assert!(data.items.is_none());
        assert!(!data.has_more);
    }

    #[test]
    fn test_list_data_decodes_records() {
        let raw = r#"{"code":0,"msg":"success","data":{
            "items":[{"record_id":"rec1","fields":{"Demo名称":"贪吃蛇"}}],
            "page_token":"next","has_more":true}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(raw).unwrap();
        let data = envelope.data.unwrap();
        let items = decode_items(data.items.unwrap());
        assert_eq!(items[0].id(), "rec1");
        assert_eq!(items[0].text("Demo名称"), "贪吃蛇");
        assert_eq!(data.page_token.as_deref(), Some("next"));
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let raw = r#"{"code":0,"msg":"success","data":{
            "items":[
                {"record_id":"rec1","fields":{"Demo名称":"贪吃蛇"}},
                {"fields":{"Demo名称":"无编号"}},
                {"record_id":"rec3","fields":"not an object"},
                {"record_id":"rec4","fields":{"Demo名称":"拼图"}}
            ],
            "has_more":false}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(raw).unwrap();
        let items = decode_items(envelope.data.unwrap().items.unwrap());
        let ids: Vec<&str> = items.iter().map(Record::id).collect();
        assert_eq!(ids, vec!["rec1", "rec4"]);
    }
}
