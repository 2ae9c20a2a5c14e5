//! Completion client with bounded, fixed-delay retry.

use super::{CompletionRequest, CompletionTransport, Message, Sampling, SamplingOverride};
use crate::cancellation::CancellationToken;
use crate::errors::{CompletionError, TransportError};
use crate::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Submits prompts to the completion service.
pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
    model: String,
    sampling: Sampling,
    system_prompt: Option<String>,
    retry: RetryConfig,
    timeout: Duration,
}

impl CompletionClient {
    /// Creates a client with the default retry policy and a 120 s attempt timeout.
    #[must_use]
    pub fn new(transport: Arc<dyn CompletionTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            sampling: Sampling::default(),
            system_prompt: None,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the default sampling parameters.
    #[must_use]
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Prepends a system message to every request.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Model identifier sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Builds the request for `prompt`.
    #[must_use]
    pub fn request_for(&self, prompt: &str, adjust: SamplingOverride) -> CompletionRequest {
        let sampling = self.sampling.with_override(adjust);
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));
        CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        }
    }

    /// Returns the completion text for `prompt`.
    ///
    /// Every failure kind (transport, timeout, malformed body, empty text) is
    /// retried up to the configured attempt count with a fixed delay. The
    /// token is checked before each attempt and interrupts the delay.
    ///
    /// # Errors
    ///
    /// `CompletionError` carrying the last underlying message once attempts
    /// are exhausted, or with `cancelled` set if the token fired.
    pub async fn complete(
        &self,
        prompt: &str,
        adjust: SamplingOverride,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let request = self.request_for(prompt, adjust);
        let attempts = self.retry.attempts();
        let mut last_error = TransportError::Malformed("no attempt made".to_string());

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(CompletionError::cancelled(attempt - 1));
            }

            match self.attempt(&request).await {
                Ok(text) => {
                    debug!(attempt, chars = text.chars().count(), "Completion received");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Completion attempt failed");
                    let rate_limited = e.is_rate_limited();
                    last_error = e;
                    if attempt < attempts {
                        let delay = self.retry.delay(rate_limited);
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying completion");
                        if !cancel.sleep(delay).await {
                            return Err(CompletionError::cancelled(attempt));
                        }
                    }
                }
            }
        }

        Err(CompletionError::new(last_error.to_string(), attempts))
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let text = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_millis() as u64))??;
        if text.trim().is_empty() {
            return Err(TransportError::Malformed("completion text is empty".to_string()));
        }
        Ok(text)
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("model", &self.model)
            .field("sampling", &self.sampling)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockCompletionTransport;
    use mockall::Sequence;
    use tokio_test::assert_ok;

    fn client(mock: MockCompletionTransport, attempts: usize) -> CompletionClient {
        CompletionClient::new(Arc::new(mock), "test-model").with_retry(RetryConfig::immediate(attempts))
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let mut mock = MockCompletionTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok("hello".to_string()));

        let text = client(mock, 3)
            .complete("prompt", SamplingOverride::default(), &CancellationToken::new())
            .await;
        assert_eq!(assert_ok!(text), "hello");
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mut mock = MockCompletionTransport::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransportError::Network("connection reset".into())));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("   ".to_string()));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("done".to_string()));

        let text = client(mock, 3)
            .complete("prompt", SamplingOverride::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "done");
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_message() {
        let mut mock = MockCompletionTransport::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransportError::Timeout(120_000)));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(TransportError::Status {
                    status: 503,
                    message: "overloaded".into(),
                })
            });

        let err = client(mock, 3)
            .complete("prompt", SamplingOverride::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(!err.cancelled);
        assert!(err.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let mut mock = MockCompletionTransport::new();
        mock.expect_send().times(0);
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let err = client(mock, 3)
            .complete("prompt", SamplingOverride::default(), &token)
            .await
            .unwrap_err();
        assert!(err.cancelled);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test]
    async fn test_request_uses_override_and_system_prompt() {
        let mut mock = MockCompletionTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.messages.len() == 2
                    && req.messages[0].role == "system"
                    && req.max_tokens == 512
                    && (req.temperature - 0.7).abs() < f32::EPSILON
            })
            .times(1)
            .returning(|_| Ok("ok".to_string()));

        let client = client(mock, 1).with_system_prompt("be terse");
        let adjust = SamplingOverride {
            temperature: None,
            max_tokens: Some(512),
        };
        assert_ok!(client.complete("p", adjust, &CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        struct Slow;

        #[async_trait::async_trait]
        impl CompletionTransport for Slow {
            async fn send(&self, _request: &CompletionRequest) -> Result<String, TransportError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            }
        }

        let client = CompletionClient::new(Arc::new(Slow), "m")
            .with_retry(RetryConfig::immediate(2))
            .with_timeout(Duration::from_millis(10));
        let err = client
            .complete("p", SamplingOverride::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.message.contains("timed out"));
    }
}
