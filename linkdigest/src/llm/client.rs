use common::{ProviderConfig, ProviderFamily, ProviderKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

use super::chunked;
use super::fallback::ModelFallback;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiCompatibleAdapter;
use super::parse::parse_summary_payload;
use super::prompt::render_prompt;
use super::retry::RetryPolicy;
use super::{Completion, LlmError, ProviderAdapter, SummaryOutcome};

/// One summarization call: what to summarize and with which template.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub url: String,
    /// Pre-fetched text; without it the model works from the URL alone
    pub content: Option<String>,
    /// Content longer than this many chars is summarized in chunks
    pub chunk_size: Option<usize>,
    pub prompt_template: String,
}

impl SummaryRequest {
    pub fn new(url: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: None,
            chunk_size: None,
            prompt_template: prompt_template.into(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn needs_chunking(&self) -> Option<(&str, usize)> {
        match (self.content.as_deref(), self.chunk_size) {
            (Some(content), Some(size)) if size > 0 && content.chars().count() > size => {
                Some((content, size))
            }
            _ => None,
        }
    }
}

/// LLM client bound to one provider.
///
/// The model actually sent to the provider starts as the configured one and
/// is replaced only when model fallback finds a working alternative. The
/// replacement lives as long as this client.
pub struct LlmClient {
    config: ProviderConfig,
    adapter: Arc<dyn ProviderAdapter>,
    fallback: Option<ModelFallback>,
    effective_model: RwLock<String>,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let adapter: Arc<dyn ProviderAdapter> = match config.provider.family() {
            ProviderFamily::OpenAiCompatible => Arc::new(OpenAiCompatibleAdapter::new(&config)),
            ProviderFamily::Gemini => Arc::new(GeminiAdapter::new(&config)),
        };
        Self::with_adapter(config, adapter)
    }

    pub fn with_adapter(config: ProviderConfig, adapter: Arc<dyn ProviderAdapter>) -> Result<Self, LlmError> {
        config.validate()?;
        let fallback = match adapter.family() {
            ProviderFamily::Gemini => Some(ModelFallback::gemini()),
            ProviderFamily::OpenAiCompatible => None,
        };
        Ok(Self {
            effective_model: RwLock::new(config.model.clone()),
            retry: RetryPolicy::new(config.max_retries),
            config,
            adapter,
            fallback,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.config.provider
    }

    pub fn configured_model(&self) -> &str {
        &self.config.model
    }

    pub fn effective_model(&self) -> String {
        match self.effective_model.read() {
            Ok(model) => model.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_effective_model(&self, model: String) {
        match self.effective_model.write() {
            Ok(mut current) => *current = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }

    /// Summarize `request`, splitting oversized content into chunks.
    pub async fn generate_summary(&self, request: &SummaryRequest) -> SummaryOutcome {
        if let Some((content, chunk_size)) = request.needs_chunking() {
            return chunked::summarize_chunked(
                self,
                &request.url,
                &request.prompt_template,
                content,
                chunk_size,
            )
            .await;
        }
        self.summarize_once(&request.url, &request.prompt_template, request.content.as_deref())
            .await
    }

    /// One prompt through the retrying executor: render, call, parse, truncate.
    pub async fn summarize_once(&self, url: &str, prompt_template: &str, content: Option<&str>) -> SummaryOutcome {
        let prompt = render_prompt(prompt_template, url, content);
        let spent = AtomicU64::new(0);
        let max_attempts = self.retry.max_attempts();

        let result = self
            .retry
            .run(url, |attempt| {
                let prompt = &prompt;
                let spent = &spent;
                async move {
                    info!(
                        "Calling provider={} model={} for URL={} (attempt {}/{})",
                        self.config.provider,
                        self.effective_model(),
                        url,
                        attempt + 1,
                        max_attempts
                    );
                    let completion = self.request(prompt).await?;
                    spent.fetch_add(completion.usage.total(), Ordering::Relaxed);
                    let parsed = parse_summary_payload(&completion.text)?;
                    Ok(parsed.truncated(url))
                }
            })
            .await;

        let tokens = spent.load(Ordering::Relaxed);
        match result {
            Ok(parsed) => SummaryOutcome::succeeded(parsed.brief, parsed.summary, self.effective_model(), tokens),
            Err(err) => SummaryOutcome::failed(self.effective_model(), tokens, err.to_string()),
        }
    }

    /// Single provider call, with model fallback when the provider reports
    /// the current model as unavailable.
    async fn request(&self, prompt: &str) -> Result<Completion, LlmError> {
        let model = self.effective_model();
        match self.adapter.complete(&model, prompt).await {
            Err(err) if err.is_model_unavailable() => {
                let Some(fallback) = &self.fallback else {
                    return Err(err);
                };
                let (resolved, completion) = fallback
                    .recover(self.adapter.as_ref(), &model, prompt, err)
                    .await?;
                self.set_effective_model(resolved);
                Ok(completion)
            }
            other => other,
        }
    }
}
