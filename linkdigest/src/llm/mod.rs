use async_trait::async_trait;
use common::ProviderFamily;
use serde::{Deserialize, Serialize};

pub mod chunked;
pub mod client;
pub mod error;
pub mod fallback;
pub mod gemini;
pub mod openai;
pub mod parse;
pub mod prompt;
pub mod retry;

pub use client::{LlmClient, SummaryRequest};
pub use error::LlmError;

/// Wire-level capability of one provider family: build the request, call the
/// endpoint, extract text and token usage.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    /// Single-turn generation against `model`.
    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, LlmError>;

    /// Models usable for the generation call made by `complete`, as reported
    /// by the provider (names are not normalized).
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

/// Raw model output of one successful call
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: UsageMetadata,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Combined count when the provider reports one
    pub total_tokens: Option<u64>,
}

impl UsageMetadata {
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.prompt_tokens + self.completion_tokens)
    }
}

/// Result of one summarization call. Failures are values, not errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub brief: String,
    pub summary: String,
    pub model_used: String,
    pub tokens_consumed: u64,
    pub success: bool,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl SummaryOutcome {
    pub fn succeeded(
        brief: String,
        summary: String,
        model_used: impl Into<String>,
        tokens_consumed: u64,
    ) -> Self {
        Self {
            brief,
            summary,
            model_used: model_used.into(),
            tokens_consumed,
            success: true,
            error: None,
            warning: None,
        }
    }

    pub fn failed(model_used: impl Into<String>, tokens_consumed: u64, error: impl Into<String>) -> Self {
        Self {
            model_used: model_used.into(),
            tokens_consumed,
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Truncate `value` to at most `max_chars` characters.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_prefers_reported_total() {
        let usage = UsageMetadata {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: Some(20),
        };
        assert_eq!(usage.total(), 20);

        let usage = UsageMetadata {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: None,
        };
        assert_eq!(usage.total(), 15);
    }

    #[test]
    fn truncate_is_idempotent_below_bound() {
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let long = "总结".repeat(60);
        let cut = truncate_chars(&long, 100);
        assert_eq!(cut.chars().count(), 100);
        assert!(long.starts_with(&cut));
    }
}
