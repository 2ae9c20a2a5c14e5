//! OpenAI-compatible chat completion transport.

use super::{CompletionRequest, CompletionTransport};
use crate::errors::{RecordflowError, TransportError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Posts chat completion requests with a bearer key.
#[derive(Debug, Clone)]
pub struct OpenAiTransport {
    http: Client,
    url: String,
    api_key: String,
}

impl OpenAiTransport {
    /// Creates a transport posting to `base_url` + `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        endpoint: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RecordflowError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecordflowError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: join_url(base_url, endpoint),
            api_key: api_key.into(),
        })
    }

    /// Full request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn join_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    if endpoint.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{endpoint}")
    }
}

/// Extracts the completion text, falling back to `reasoning_content` when
/// `content` is empty.
fn extract_text(body: &str) -> Result<String, TransportError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("invalid JSON: {e}")))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| TransportError::Malformed(truncate(body, 200)))?;

    message
        .content
        .filter(|c| !c.trim().is_empty())
        .or(message.reasoning_content.filter(|c| !c.trim().is_empty()))
        .ok_or_else(|| TransportError::Malformed("choice has no content".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(0)
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited(truncate(&body, 200)));
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }
        extract_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example.com/", "/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(join_url("https://api.example.com", ""), "https://api.example.com");
    }

    #[test]
    fn test_extract_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"场景"}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "场景");
    }

    #[test]
    fn test_extract_reasoning_fallback() {
        let body = r#"{"choices":[{"message":{"content":"","reasoning_content":"{\"a\":1}"}}]}"#;
        assert_eq!(extract_text(body).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_extract_missing_choices() {
        assert!(matches!(
            extract_text(r#"{"error":{"message":"quota"}}"#),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(extract_text("not json"), Err(TransportError::Malformed(_))));
    }
}
