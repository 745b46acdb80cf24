//! Content pre-fetch for items that cannot be summarized from the URL alone.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::llm::truncate_chars;

pub const YOUTUBE_OEMBED_URL: &str = "https://www.youtube.com/oembed";

const YOUTUBE_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

const METADATA_ONLY_WARNING: &str =
    "Transcript unavailable; summary is generated from metadata only. transcript_error=transcript fetch not attempted";

/// What a summary was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryBasis {
    Transcript,
    Metadata,
    GeminiUrl,
    #[serde(rename = "none")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub content: String,
    pub basis: SummaryBasis,
    pub video_id: Option<String>,
    pub warning: Option<String>,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Whether this fetcher knows how to pre-fetch `url`.
    fn handles(&self, url: &str) -> bool;

    async fn fetch(&self, url: &str, title: &str, published: &str) -> Result<FetchedContent>;
}

pub fn is_youtube_url(url: &str) -> bool {
    youtube_host(url).is_some()
}

fn youtube_host(url: &str) -> Option<(Url, String)> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    YOUTUBE_HOSTS.contains(&host.as_str()).then_some((parsed, host))
}

/// Video id from watch, short-link, embed, shorts and live URLs.
pub fn extract_youtube_video_id(url: &str) -> Option<String> {
    let (parsed, host) = youtube_host(url)?;

    if host == "youtu.be" {
        let id = parsed.path().trim_matches('/');
        return (!id.is_empty()).then(|| id.to_string());
    }

    if parsed.path() == "/watch" {
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty());
    }

    let mut segments = parsed.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("embed" | "shorts" | "live"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}

/// RFC 3339 timestamps are shown as `YYYY-MM-DD HH:MM UTC`, anything else verbatim.
pub fn format_published(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => ts.naive_utc().format("%Y-%m-%d %H:%M UTC").to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct OEmbed {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    provider_name: Option<String>,
}

/// Builds summary input for YouTube videos from their oEmbed metadata.
pub struct YoutubeMetadataFetcher {
    client: Client,
    endpoint: String,
    max_input_chars: usize,
}

impl YoutubeMetadataFetcher {
    pub fn new(timeout_secs: u64, max_input_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Linkdigest/0.1.0")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            endpoint: YOUTUBE_OEMBED_URL.to_string(),
            max_input_chars,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch_oembed(&self, url: &str) -> Result<OEmbed> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url), ("format", "json")])
            .send()
            .await
            .context("failed to fetch oEmbed metadata")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("oEmbed fetch failed with status: {}", status));
        }

        response.json::<OEmbed>().await.context("failed to decode oEmbed response")
    }
}

#[async_trait]
impl ContentFetcher for YoutubeMetadataFetcher {
    fn handles(&self, url: &str) -> bool {
        is_youtube_url(url)
    }

    async fn fetch(&self, url: &str, title: &str, published: &str) -> Result<FetchedContent> {
        let video_id = extract_youtube_video_id(url)
            .with_context(|| format!("invalid YouTube URL, failed to extract video id: {}", url))?;

        let metadata = match self.fetch_oembed(url).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("content: oEmbed metadata unavailable for {}: {:#}", url, e);
                OEmbed::default()
            }
        };

        let content = build_metadata_content(url, &video_id, title, published, &metadata);
        info!("content: built {} chars of metadata input for {}", content.chars().count(), url);

        Ok(FetchedContent {
            content: truncate_chars(&content, self.max_input_chars),
            basis: SummaryBasis::Metadata,
            video_id: Some(video_id),
            warning: Some(METADATA_ONLY_WARNING.to_string()),
        })
    }
}

fn build_metadata_content(url: &str, video_id: &str, title: &str, published: &str, metadata: &OEmbed) -> String {
    let mut lines = vec![
        "以下是 YouTube 视频的元数据（无字幕可用）。请基于这些信息生成总结，并在内容中说明信息有限：".to_string(),
        format!("URL: {}", url),
        format!("Video ID: {}", video_id),
    ];

    let title = title.trim();
    let published = published.trim();
    if !title.is_empty() {
        lines.push(format!("采集标题: {}", title));
    }
    if !published.is_empty() {
        lines.push(format!("发布时间: {}", format_published(published)));
    }

    let field = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or_default().to_string();
    let oembed_title = field(&metadata.title);
    let author = field(&metadata.author_name);
    let provider = field(&metadata.provider_name);

    if !oembed_title.is_empty() {
        lines.push(format!("oEmbed 标题: {}", oembed_title));
    }
    if !author.is_empty() {
        lines.push(format!("作者: {}", author));
    }
    if !provider.is_empty() {
        lines.push(format!("平台: {}", provider));
    }

    if [title, published, oembed_title.as_str(), author.as_str(), provider.as_str()]
        .iter()
        .all(|v| v.is_empty())
    {
        lines.push("可用元数据非常有限。".to_string());
    }

    lines.join("\n")
}
