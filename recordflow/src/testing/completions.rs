//! Scripted completion transport.

use crate::cancellation::CancellationToken;
use crate::completion::{CompletionRequest, CompletionTransport};
use crate::errors::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(TransportError),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// Answers each request with the first rule whose needle occurs in the
/// last message. Requests matching no rule fail as malformed.
#[derive(Default)]
pub struct ScriptedCompletions {
    rules: Mutex<Vec<Rule>>,
    prompts: Mutex<Vec<String>>,
    cancel_on: Mutex<Option<(usize, Arc<CancellationToken>)>>,
}

impl ScriptedCompletions {
    /// Creates a transport with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies with `text` to prompts containing `needle`.
    #[must_use]
    pub fn reply_when(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.push(needle.into(), Reply::Text(text.into()), None);
        self
    }

    /// Fails every prompt containing `needle`.
    #[must_use]
    pub fn fail_when(self, needle: impl Into<String>, error: TransportError) -> Self {
        self.push(needle.into(), Reply::Fail(error), None);
        self
    }

    /// Fails the next `times` prompts containing `needle`; later rules still apply.
    #[must_use]
    pub fn fail_times(self, needle: impl Into<String>, times: usize, error: TransportError) -> Self {
        self.push(needle.into(), Reply::Fail(error), Some(times));
        self
    }

    /// Cancels `token` while serving the `call`-th request (1-based).
    #[must_use]
    pub fn cancel_on_call(self, call: usize, token: Arc<CancellationToken>) -> Self {
        *self.cancel_on.lock() = Some((call, token));
        self
    }

    /// Places a rule ahead of the existing ones.
    fn push(&self, needle: String, reply: Reply, remaining: Option<usize>) {
        self.rules.lock().insert(
            0,
            Rule {
                needle,
                reply,
                remaining,
            },
        );
    }

    /// Prompts received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Number of requests whose prompt contained `needle`.
    #[must_use]
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts.lock().iter().filter(|p| p.contains(needle)).count()
    }
}

impl std::fmt::Debug for ScriptedCompletions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCompletions")
            .field("rules", &self.rules.lock().len())
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedCompletions {
    async fn send(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let call = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.clone());
            prompts.len()
        };
        if let Some((at, ref token)) = *self.cancel_on.lock() {
            if at == call {
                token.cancel("scripted cancellation");
            }
        }

        let mut rules = self.rules.lock();
        let Some(rule) = rules.iter_mut().find(|r| {
            prompt.contains(&r.needle) && r.remaining.map_or(true, |n| n > 0)
        }) else {
            return Err(TransportError::Malformed(format!(
                "no scripted reply for prompt of {} chars",
                prompt.chars().count()
            )));
        };
        if let Some(ref mut n) = rule.remaining {
            *n -= 1;
        }
        match rule.reply {
            Reply::Text(ref text) => Ok(text.clone()),
            Reply::Fail(ref error) => Err(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Message;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![Message::user(prompt)],
            temperature: 0.3,
            max_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_later_rules_take_precedence() {
        let script = ScriptedCompletions::new()
            .reply_when("分类", "旧答案")
            .reply_when("分类", "新答案");
        assert_eq!(script.send(&request("请分类")).await.unwrap(), "新答案");
        assert!(script.send(&request("其他")).await.is_err());
        assert_eq!(script.call_count(), 2);
        assert_eq!(script.calls_matching("分类"), 1);
    }

    #[tokio::test]
    async fn test_fail_times_then_falls_through() {
        let script = ScriptedCompletions::new()
            .reply_when("评分", "{}")
            .fail_times("评分", 1, TransportError::Timeout(10));
        assert!(script.send(&request("评分")).await.is_err());
        assert_eq!(script.send(&request("评分")).await.unwrap(), "{}");
    }
}
