//! Completion service seam.
//!
//! [`CompletionClient`] owns the retry policy; a [`CompletionTransport`]
//! performs exactly one attempt. The OpenAI-compatible HTTP transport lives
//! in [`openai`] behind the `http` feature.

mod client;
#[cfg(feature = "http")]
pub mod openai;

pub use client::CompletionClient;

use crate::errors::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

/// Sampling parameters sent with each request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Per-stage adjustments to the client's default [`Sampling`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOverride {
    /// Replacement temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Replacement token limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl SamplingOverride {
    /// Creates an override with both values set.
    #[must_use]
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }
}

impl Sampling {
    /// Applies an override on top of these defaults.
    #[must_use]
    pub fn with_override(self, adjust: SamplingOverride) -> Self {
        Self {
            temperature: adjust.temperature.unwrap_or(self.temperature),
            max_tokens: adjust.max_tokens.unwrap_or(self.max_tokens),
        }
    }
}

/// Request body for an OpenAI-compatible chat completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// Performs a single completion attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Sends one request and returns the raw completion text.
    async fn send(&self, request: &CompletionRequest) -> Result<String, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_override() {
        let base = Sampling::default();
        let adjusted = base.with_override(SamplingOverride {
            temperature: Some(0.3),
            max_tokens: None,
        });
        assert!((adjusted.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(adjusted.max_tokens, 2048);
    }

    #[test]
    fn test_request_wire_shape() {
        let request = CompletionRequest {
            model: "gemini-2.5-pro".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.5,
            max_tokens: 100,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 100);
    }
}
