//! Alternate-model discovery for providers that retire or rename models.
//!
//! Only consulted after the provider rejects the current model as
//! unavailable. Transient failures never reach this layer.

use std::collections::HashSet;
use tracing::warn;

use super::{Completion, LlmError, ProviderAdapter};

/// Number of available models quoted in a `ModelUnavailable` error
const AVAILABLE_SAMPLE_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct ModelFallback {
    preferred: Vec<String>,
    prefixes: Vec<String>,
}

impl ModelFallback {
    pub fn new(preferred: &[&str], prefixes: &[&str]) -> Self {
        Self {
            preferred: preferred.iter().map(|m| m.to_string()).collect(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn gemini() -> Self {
        Self::new(
            &[
                "gemini-2.5-flash",
                "gemini-flash-latest",
                "gemini-2.5-pro",
                "gemini-2.0-flash",
            ],
            &["gemini-2.5-flash", "gemini-flash"],
        )
    }

    /// Ordered models to try instead of `exclude`.
    ///
    /// Preferred models that are available come first. When none are, prefix
    /// matches and then every other available model are used. With nothing
    /// available at all the static preference list is the last resort.
    pub fn candidates(&self, available: &[String], exclude: &str) -> Vec<String> {
        let exclude = normalize_model_name(exclude);
        let available_set: HashSet<&str> = available.iter().map(String::as_str).collect();

        let mut candidates: Vec<String> = self
            .preferred
            .iter()
            .filter(|m| m.as_str() != exclude && available_set.contains(m.as_str()))
            .cloned()
            .collect();

        if candidates.is_empty() {
            for model in available {
                if model != exclude && self.prefixes.iter().any(|p| model.starts_with(p.as_str())) {
                    candidates.push(model.clone());
                }
            }
            for model in available {
                if model != exclude && !candidates.contains(model) {
                    candidates.push(model.clone());
                }
            }
        }

        if candidates.is_empty() {
            candidates = self
                .preferred
                .iter()
                .filter(|m| m.as_str() != exclude)
                .cloned()
                .collect();
        }

        candidates
    }

    /// Try candidates after `failed_model` was rejected with `cause`.
    /// Returns the model that answered together with its completion.
    pub async fn recover(
        &self,
        adapter: &dyn ProviderAdapter,
        failed_model: &str,
        prompt: &str,
        cause: LlmError,
    ) -> Result<(String, Completion), LlmError> {
        warn!(
            "Configured model unavailable: {}. Trying fallback models. error={}",
            failed_model, cause
        );

        let available = discover_models(adapter).await;
        let candidates = self.candidates(&available, failed_model);

        let mut last_error = cause.to_string();
        for candidate in candidates {
            match adapter.complete(&candidate, prompt).await {
                Ok(completion) => {
                    warn!("Switched model from {} to {}", failed_model, candidate);
                    return Ok((candidate, completion));
                }
                Err(err) if err.is_model_unavailable() => {
                    warn!("Fallback model {} unavailable: {}", candidate, err);
                    last_error = err.to_string();
                }
                Err(err) => return Err(err),
            }
        }

        let sample = if available.is_empty() {
            "unknown".to_string()
        } else {
            available
                .iter()
                .take(AVAILABLE_SAMPLE_LEN)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        Err(LlmError::ModelUnavailable {
            configured: failed_model.to_string(),
            available_sample: sample,
            last_error,
        })
    }
}

/// Normalized, de-duplicated model names in discovery order. Listing
/// failures degrade to an empty list.
pub async fn discover_models(adapter: &dyn ProviderAdapter) -> Vec<String> {
    match adapter.list_models().await {
        Ok(models) => dedup_normalized(models),
        Err(e) => {
            warn!("Failed to list models: {}", e);
            Vec::new()
        }
    }
}

fn dedup_normalized(models: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    models
        .iter()
        .map(|m| normalize_model_name(m).to_string())
        .filter(|m| !m.is_empty())
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

/// Strip the `models/` namespace prefix some APIs put on model names.
pub fn normalize_model_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix("models/").unwrap_or(name)
}
