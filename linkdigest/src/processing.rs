//! Batch summarization: walks every item of a collected batch in order and
//! attaches exactly one outcome to it.

use common::{Config, ConfigError, ProviderKind, YoutubeRoute};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::collection::{Batch, BatchItem, Entry, SummaryRecord};
use crate::content::{
    extract_youtube_video_id, is_youtube_url, ContentFetcher, FetchedContent, SummaryBasis,
    YoutubeMetadataFetcher,
};
use crate::llm::{LlmClient, LlmError, SummaryRequest};

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Counters reported after a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Summarizer {
    config: Config,
    prompt_template: String,
    chunk_size: Option<usize>,
    primary: LlmClient,
    /// Created on the first YouTube item when that route needs Gemini
    youtube_client: Option<LlmClient>,
    content_fetcher: Option<Box<dyn ContentFetcher>>,
    env: EnvLookup,
}

impl Summarizer {
    /// Build from configuration, reading API keys from the process environment.
    pub fn from_config(config: Config) -> Result<Self, LlmError> {
        Self::from_config_with_env(config, Arc::new(common::process_env))
    }

    pub fn from_config_with_env(config: Config, env: EnvLookup) -> Result<Self, LlmError> {
        let provider = config.active_provider()?;
        let provider_config = config.provider_config(provider, |name| env(name))?;
        let primary = LlmClient::new(provider_config)?;

        let fetcher = match config.youtube.route {
            YoutubeRoute::Metadata => {
                let fetcher = YoutubeMetadataFetcher::new(
                    config.youtube.fetch_timeout_seconds,
                    config.youtube.max_input_chars,
                )
                .map_err(|e| LlmError::Transport(format!("{:#}", e)))?;
                Some(Box::new(fetcher) as Box<dyn ContentFetcher>)
            }
            YoutubeRoute::Gemini | YoutubeRoute::Default => None,
        };

        let mut summarizer = Self::new(config, primary)?.with_env_lookup(env);
        summarizer.content_fetcher = fetcher;
        Ok(summarizer)
    }

    /// Build around an existing primary client. Prompt template and chunk
    /// size are validated here.
    pub fn new(config: Config, primary: LlmClient) -> Result<Self, ConfigError> {
        let prompt_template = config.prompt_template()?;
        let chunk_size = config.chunk_size()?;
        Ok(Self {
            config,
            prompt_template,
            chunk_size,
            primary,
            youtube_client: None,
            content_fetcher: None,
            env: Arc::new(common::process_env),
        })
    }

    pub fn with_env_lookup(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn with_youtube_client(mut self, client: LlmClient) -> Self {
        self.youtube_client = Some(client);
        self
    }

    pub fn with_content_fetcher(mut self, fetcher: Box<dyn ContentFetcher>) -> Self {
        self.content_fetcher = Some(fetcher);
        self
    }

    pub fn primary(&self) -> &LlmClient {
        &self.primary
    }

    /// Summarize every item of `batch` in place.
    ///
    /// Groups marked unsuccessful upstream are left untouched and malformed
    /// entries are skipped with a warning. Item failures are recorded on the
    /// item and never stop the run.
    pub async fn summarize_all(&mut self, batch: &mut Batch) -> BatchStats {
        let mut stats = BatchStats {
            total: batch.pending_items(),
            ..Default::default()
        };

        let groups = match batch.results.as_mut() {
            Some(Entry::Valid(groups)) => groups,
            Some(Entry::Invalid(_)) => {
                warn!("Batch `results` is not a list, nothing to summarize");
                return stats;
            }
            None => {
                warn!("Batch has no `results`, nothing to summarize");
                return stats;
            }
        };

        info!(
            "Summarizing {} items with provider={} model={}",
            stats.total,
            self.primary.provider(),
            self.primary.configured_model()
        );

        for group in groups.iter_mut() {
            let Some(group) = group.valid_mut() else {
                warn!("Skipping malformed source group entry");
                continue;
            };
            let source = group.display_title().to_string();
            if group.is_marked_failed() {
                info!("Skipping source marked as failed: {}", source);
                continue;
            }

            let items = match group.items.as_mut() {
                Some(Entry::Valid(items)) => items,
                Some(Entry::Invalid(_)) => {
                    warn!("Skipping source {}: `items` is not a list", source);
                    continue;
                }
                None => continue,
            };

            for entry in items.iter_mut() {
                stats.processed += 1;
                let Some(item) = entry.valid_mut() else {
                    warn!("Skipping malformed item in source {}", source);
                    continue;
                };

                info!("[{}/{}] {} - {}", stats.processed, stats.total, source, item.title());
                let record = self.summarize_item(item).await;
                if record.success {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
                item.record = Some(record);
            }
        }

        info!(
            "Summarization finished: {} processed, {} succeeded, {} failed",
            stats.processed, stats.succeeded, stats.failed
        );
        stats
    }

    /// Summarize one item, choosing the YouTube route when it applies.
    pub async fn summarize_item(&mut self, item: &BatchItem) -> SummaryRecord {
        let url = item.url().into_owned();
        if url.is_empty() {
            warn!("Item `{}` has no URL", item.title());
            return SummaryRecord::rejected(self.primary.effective_model(), "Missing URL");
        }

        if is_youtube_url(&url) && self.config.youtube.route == YoutubeRoute::Gemini {
            return self.summarize_youtube_url(&url).await;
        }

        let mut request = SummaryRequest::new(url.as_str(), self.prompt_template.as_str()).with_chunk_size(self.chunk_size);
        let mut prefetched = None;

        if let Some(fetcher) = self.content_fetcher.as_deref().filter(|f| f.handles(&url)) {
            match fetcher.fetch(&url, &item.title(), &item.published()).await {
                Ok(FetchedContent {
                    content,
                    basis,
                    video_id,
                    warning,
                }) => {
                    request = request.with_content(content);
                    prefetched = Some((basis, video_id, warning));
                }
                Err(e) => warn!("Content pre-fetch failed for {}, using URL only: {:#}", url, e),
            }
        }

        let mut record = summarize_single_url(&self.primary, &request).await;
        if let Some((basis, video_id, warning)) = prefetched {
            record.summary_basis = Some(basis);
            record.youtube_video_id = video_id;
            record.add_warning(warning);
        }
        record
    }

    async fn summarize_youtube_url(&mut self, url: &str) -> SummaryRecord {
        let video_id = extract_youtube_video_id(url);

        if let Err(e) = self.ensure_youtube_client() {
            warn!("Cannot summarize YouTube URL={} with Gemini: {}", url, e);
            let mut record = SummaryRecord::rejected(
                self.primary.configured_model(),
                format!("YouTube summary requires Gemini configuration: {}", e),
            );
            record.summary_basis = Some(SummaryBasis::Unavailable);
            record.youtube_video_id = video_id;
            return record;
        }

        let client = self.youtube_client.as_ref().unwrap_or(&self.primary);
        let request = SummaryRequest::new(url, self.prompt_template.as_str());
        let mut record = summarize_single_url(client, &request).await;
        record.summary_basis = Some(SummaryBasis::GeminiUrl);
        record.youtube_video_id = video_id;
        record
    }

    /// Make sure a Gemini client is available for YouTube URLs. A primary
    /// client that already talks to Gemini is reused.
    fn ensure_youtube_client(&mut self) -> Result<(), LlmError> {
        if self.youtube_client.is_some() || self.primary.provider() == ProviderKind::Gemini {
            return Ok(());
        }

        let env = Arc::clone(&self.env);
        let config = self.config.provider_config(ProviderKind::Gemini, |name| env(name))?;
        info!("Creating Gemini client for YouTube URLs, model={}", config.model);
        self.youtube_client = Some(LlmClient::new(config)?);
        Ok(())
    }
}

/// Run one summary request and record how long it took.
pub async fn summarize_single_url(client: &LlmClient, request: &SummaryRequest) -> SummaryRecord {
    let started = Instant::now();
    let outcome = client.generate_summary(request).await;
    let record = SummaryRecord::from_outcome(outcome, started.elapsed());

    if record.success {
        info!(
            "Summary done for URL={} model={} tokens={} time={}",
            request.url, record.model_used, record.tokens_consumed, record.processing_time
        );
    } else {
        warn!(
            "Summary failed for URL={} error={}",
            request.url,
            record.error.as_deref().unwrap_or("unknown")
        );
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::retry::RetryPolicy;
    use crate::llm::testing::{ScriptedAdapter, Step};
    use anyhow::Result;
    use async_trait::async_trait;
    use common::ProviderConfig;
    use serde_json::json;
    use std::time::Duration;

    fn scripted_client(adapter: Arc<ScriptedAdapter>, provider: ProviderKind, model: &str) -> LlmClient {
        LlmClient::with_adapter(ProviderConfig::new(provider, "key", model), adapter)
            .unwrap()
            .with_retry_policy(RetryPolicy::new(1).with_base_delay(Duration::ZERO))
    }

    fn summarizer(config: Config, adapter: Arc<ScriptedAdapter>) -> Summarizer {
        let primary = scripted_client(adapter, ProviderKind::DeepSeek, "deepseek-chat");
        Summarizer::new(config, primary)
            .unwrap()
            .with_env_lookup(Arc::new(|_: &str| None::<String>))
    }

    fn batch(items: serde_json::Value) -> Batch {
        serde_json::from_value(json!({
            "results": [{"source_title": "Feed", "success": true, "items": items}]
        }))
        .unwrap()
    }

    fn record(batch: &Batch, index: usize) -> SummaryRecord {
        let group = batch.groups().next().unwrap();
        let items = group.items.as_ref().and_then(Entry::valid).unwrap();
        items[index].valid().unwrap().record.clone().unwrap()
    }

    fn route(route: YoutubeRoute) -> Config {
        let mut config = Config::default();
        config.youtube.route = route;
        config
    }

    #[tokio::test]
    async fn missing_url_fails_only_that_item() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            Step::reply("one", "first", 11),
            Step::reply("three", "third", 13),
        ]));
        let mut summarizer = summarizer(Config::default(), adapter.clone());
        let mut batch = batch(json!([
            {"title": "A", "url": "https://a.example/1"},
            {"title": "B", "url": "  "},
            {"title": "C", "url": "https://c.example/3"}
        ]));

        let stats = summarizer.summarize_all(&mut batch).await;

        assert_eq!(
            stats,
            BatchStats {
                total: 3,
                processed: 3,
                succeeded: 2,
                failed: 1
            }
        );

        let missing = record(&batch, 1);
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Missing URL"));
        assert_eq!(missing.tokens_consumed, 0);
        assert_eq!(missing.processing_time, "0.0s");
        assert_eq!(missing.model_used, "deepseek-chat");

        assert_eq!(record(&batch, 0).brief, "one");
        assert_eq!(record(&batch, 2).tokens_consumed, 13);

        let prompts = adapter.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("https://a.example/1"));
        assert!(prompts[1].contains("https://c.example/3"));
    }

    #[tokio::test]
    async fn item_failure_does_not_stop_the_batch() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            Step::Fail(LlmError::Provider {
                status: 500,
                message: "boom".into(),
            }),
            Step::reply("ok", "fine", 2),
        ]));
        let mut summarizer = summarizer(Config::default(), adapter);
        let mut batch = batch(json!([
            {"title": "A", "url": "https://a.example"},
            {"title": "B", "url": "https://b.example"}
        ]));

        let stats = summarizer.summarize_all(&mut batch).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(record(&batch, 0).error.as_deref(), Some("ProviderError: status 500: boom"));
        assert!(record(&batch, 1).success);
    }

    #[tokio::test]
    async fn failed_groups_and_malformed_entries_are_left_alone() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![Step::reply("b", "s", 1)]));
        let mut summarizer = summarizer(Config::default(), adapter.clone());
        let input = json!({
            "collection_date": "2026-02-20",
            "results": [
                {"source_title": "Down", "success": false, "items": [{"title": "X", "url": "https://x.example"}]},
                "garbage",
                {"source_title": "Up", "items": [7, {"title": "Y", "url": "https://y.example", "lang": "en"}]}
            ]
        });
        let mut batch: Batch = serde_json::from_value(input.clone()).unwrap();

        let stats = summarizer.summarize_all(&mut batch).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(adapter.prompts().len(), 1);

        let output = serde_json::to_value(&batch).unwrap();
        assert_eq!(output["collection_date"], input["collection_date"]);
        assert_eq!(output["results"][0], input["results"][0]);
        assert_eq!(output["results"][1], "garbage");
        assert_eq!(output["results"][2]["items"][0], 7);
        let item = &output["results"][2]["items"][1];
        assert_eq!(item["lang"], "en");
        assert_eq!(item["success"], true);
        assert_eq!(item["brief"], "b");
    }

    #[tokio::test]
    async fn loosely_typed_items_still_get_an_outcome() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            Step::reply("a", "first", 1),
            Step::reply("b", "second", 1),
            Step::reply("c", "third", 1),
        ]));
        let mut summarizer = summarizer(Config::default(), adapter.clone());
        let mut batch = batch(json!([
            {"title": "A", "url": "https://a.example"},
            {"title": 2024, "url": "https://b.example"},
            {"title": "C", "url": "https://c.example", "published": 1700000000}
        ]));

        let stats = summarizer.summarize_all(&mut batch).await;

        assert_eq!(
            stats,
            BatchStats {
                total: 3,
                processed: 3,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(adapter.prompts().len(), 3);
        assert!(adapter.prompts()[1].contains("https://b.example"));
        assert_eq!(record(&batch, 2).brief, "c");

        let output = serde_json::to_value(&batch).unwrap();
        let items = &output["results"][0]["items"];
        assert_eq!(items[1]["title"], 2024);
        assert_eq!(items[1]["success"], true);
        assert_eq!(items[2]["published"], 1700000000);
    }

    #[tokio::test]
    async fn skipped_group_keeps_upstream_summary_keys() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        let mut summarizer = summarizer(Config::default(), adapter.clone());
        let input = json!({
            "results": [{
                "success": false,
                "items": [{"title": "A", "url": "https://a.example", "summary": "feed excerpt", "error": null}]
            }]
        });
        let mut batch: Batch = serde_json::from_value(input.clone()).unwrap();

        let stats = summarizer.summarize_all(&mut batch).await;

        assert_eq!(stats.processed, 0);
        assert!(adapter.prompts().is_empty());
        assert_eq!(serde_json::to_value(&batch).unwrap(), input);
    }

    #[tokio::test]
    async fn youtube_urls_go_to_gemini_client() {
        let primary = Arc::new(ScriptedAdapter::new(vec![]));
        let gemini = Arc::new(ScriptedAdapter::gemini(vec![Step::reply("video", "talk", 21)], &[]));
        let mut summarizer = summarizer(route(YoutubeRoute::Gemini), primary.clone()).with_youtube_client(
            scripted_client(gemini.clone(), ProviderKind::Gemini, "gemini-2.5-flash"),
        );

        let item = BatchItem::new("Talk", "https://www.youtube.com/watch?v=abc123");
        let record = summarizer.summarize_item(&item).await;

        assert!(record.success);
        assert_eq!(record.model_used, "gemini-2.5-flash");
        assert_eq!(record.summary_basis, Some(SummaryBasis::GeminiUrl));
        assert_eq!(record.youtube_video_id.as_deref(), Some("abc123"));
        assert!(primary.prompts().is_empty());
        assert!(gemini.prompts()[0].contains("https://www.youtube.com/watch?v=abc123"));
    }

    #[tokio::test]
    async fn youtube_without_gemini_config_fails_the_item() {
        let primary = Arc::new(ScriptedAdapter::new(vec![]));
        let mut summarizer = summarizer(route(YoutubeRoute::Gemini), primary.clone());

        let record = summarizer
            .summarize_item(&BatchItem::new("Talk", "https://youtu.be/xyz"))
            .await;

        assert!(!record.success);
        let error = record.error.unwrap();
        assert!(error.starts_with("YouTube summary requires Gemini configuration:"));
        assert!(error.contains("LLM_GEMINI_API_KEY"));
        assert_eq!(record.summary_basis, Some(SummaryBasis::Unavailable));
        assert_eq!(record.youtube_video_id.as_deref(), Some("xyz"));
        assert_eq!(record.model_used, "deepseek-chat");
        assert!(primary.prompts().is_empty());
    }

    #[tokio::test]
    async fn default_route_treats_youtube_like_any_url() {
        let primary = Arc::new(ScriptedAdapter::new(vec![Step::reply("b", "s", 1)]));
        let mut summarizer = summarizer(route(YoutubeRoute::Default), primary.clone());

        let record = summarizer
            .summarize_item(&BatchItem::new("Talk", "https://youtu.be/xyz"))
            .await;

        assert!(record.success);
        assert_eq!(record.summary_basis, None);
        assert_eq!(primary.prompts().len(), 1);
    }

    struct StubFetcher {
        content: String,
    }

    #[async_trait]
    impl ContentFetcher for StubFetcher {
        fn handles(&self, url: &str) -> bool {
            is_youtube_url(url)
        }

        async fn fetch(&self, _url: &str, title: &str, _published: &str) -> Result<FetchedContent> {
            Ok(FetchedContent {
                content: format!("{}: {}", title, self.content),
                basis: SummaryBasis::Metadata,
                video_id: Some("xyz".into()),
                warning: Some("metadata only".into()),
            })
        }
    }

    #[tokio::test]
    async fn prefetched_content_is_chunked_and_annotated() {
        let mut config = route(YoutubeRoute::Metadata);
        config.summarize.chunk_size = Some(10);
        let primary = Arc::new(ScriptedAdapter::new(vec![
            Step::reply("c1", "part one", 1),
            Step::Fail(LlmError::parse("no json")),
            Step::reply("final", "merged", 5),
        ]));
        let mut summarizer = summarizer(config, primary.clone()).with_content_fetcher(Box::new(StubFetcher {
            content: "0123456789abc".into(),
        }));

        let record = summarizer
            .summarize_item(&BatchItem::new("T", "https://youtu.be/xyz"))
            .await;

        assert!(record.success);
        assert_eq!(record.tokens_consumed, 6);
        assert_eq!(record.summary_basis, Some(SummaryBasis::Metadata));
        assert_eq!(record.youtube_video_id.as_deref(), Some("xyz"));
        assert_eq!(
            record.warning.as_deref(),
            Some("metadata only; 1/2 chunks failed during chunk summarization")
        );
        assert!(primary.prompts()[0].contains("T: 0123456"));
        assert!(primary.prompts()[1].contains("789abc"));
    }

    #[test]
    fn rejects_template_without_url_placeholder() {
        let mut config = Config::default();
        config.summarize.prompt_template = Some("Summarize this".into());
        let primary = scripted_client(Arc::new(ScriptedAdapter::new(vec![])), ProviderKind::OpenAi, "m");
        assert_eq!(
            Summarizer::new(config, primary).err(),
            Some(ConfigError::MissingUrlPlaceholder)
        );
    }

    #[test]
    fn from_config_requires_primary_key() {
        let err = Summarizer::from_config_with_env(Config::default(), Arc::new(|_: &str| None::<String>))
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::Config(ConfigError::MissingApiKey { .. })));

        let summarizer =
            Summarizer::from_config_with_env(Config::default(), Arc::new(|_: &str| Some("sk-test".to_string()))).unwrap();
        assert_eq!(summarizer.primary().provider(), ProviderKind::OpenAi);
        assert_eq!(summarizer.primary().configured_model(), "gpt-3.5-turbo");
    }
}
