/*!
common/src/lib.rs

Shared configuration types for linkdigest.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override merging
- `ProviderConfig`, the validated per-provider settings handed to the LLM client
- `ConfigError`, raised before any network call when settings are out of bounds
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Prompt used when the configuration does not provide one.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You are an AI analyst.
Read and analyze the following URL, then return your result in Chinese.

Requirements:
1. brief: within 100 Chinese characters.
2. summary: within 1000 Chinese characters.
3. Return strict JSON only, with this shape:
{
  "brief": "brief text",
  "summary": "detailed summary text"
}

URL: {url}"#;

/// Configuration failures. All of them are detected before the first request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported provider `{provider}`. Supported: {supported}")]
    UnsupportedProvider { provider: String, supported: String },

    #[error("Missing API key for provider `{provider}`. Please set `{env_var}`.")]
    MissingApiKey { provider: String, env_var: String },

    #[error("`{field}` {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("`prompt_template` must include `{{url}}` placeholder.")]
    MissingUrlPlaceholder,
}

/// LLM providers the client knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Gemini,
    Glm,
}

/// Wire format shared by a group of providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// Chat-completions API (openai, deepseek, glm)
    OpenAiCompatible,
    /// Google generative language API
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::DeepSeek,
        ProviderKind::Gemini,
        ProviderKind::Glm,
        ProviderKind::OpenAi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Glm => "glm",
        }
    }

    pub fn family(self) -> ProviderFamily {
        match self {
            ProviderKind::Gemini => ProviderFamily::Gemini,
            _ => ProviderFamily::OpenAiCompatible,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Glm => "https://open.bigmodel.cn/api/paas/v4",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-3.5-turbo",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::Glm => "glm-4",
        }
    }

    /// Conventional env var holding the API key, e.g. `LLM_OPENAI_API_KEY`.
    pub fn api_key_env(self) -> String {
        format!("LLM_{}_API_KEY", self.as_str().to_uppercase())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnsupportedProvider {
                provider: normalized,
                supported: ProviderKind::ALL
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Validated settings for one provider. Built by `Config::provider_config`.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Overrides the provider's default endpoint root
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey {
                provider: self.provider.to_string(),
                env_var: self.provider.api_key_env(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "model",
                reason: "must not be empty.".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::OutOfRange {
                field: "temperature",
                reason: "must be between 0 and 1.".to_string(),
            });
        }
        if self.max_tokens == 0 {
            return Err(greater_than_zero("max_tokens"));
        }
        if self.timeout.is_zero() {
            return Err(greater_than_zero("timeout"));
        }
        if self.max_retries == 0 {
            return Err(greater_than_zero("max_retries"));
        }
        Ok(())
    }
}

// The API key never ends up in logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

fn greater_than_zero(field: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        reason: "must be greater than 0.".to_string(),
    }
}

/// `[summarize]` section: settings shared by every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeConfig {
    pub provider: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub prompt_template: Option<String>,
    /// Pre-fetched content longer than this (in chars) is summarized in chunks
    pub chunk_size: Option<usize>,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            provider: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            prompt_template: None,
            chunk_size: None,
        }
    }
}

/// `[providers.<name>]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Inline key; takes precedence over the environment
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// How YouTube links are summarized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YoutubeRoute {
    /// Hand the video URL to a Gemini client
    #[default]
    Gemini,
    /// Pre-fetch oEmbed metadata and summarize it with the primary client
    Metadata,
    /// No special handling
    Default,
}

/// `[youtube]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub route: YoutubeRoute,
    pub max_input_chars: usize,
    pub fetch_timeout_seconds: u64,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            route: YoutubeRoute::Gemini,
            max_input_chars: 20_000,
            fetch_timeout_seconds: 30,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub summarize: SummarizeConfig,
    pub providers: BTreeMap<String, ProviderSection>,
    pub youtube: YoutubeConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Provider selected in `[summarize]`, `openai` when unset.
    pub fn active_provider(&self) -> Result<ProviderKind, ConfigError> {
        self.summarize
            .provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(ProviderKind::OpenAi.as_str())
            .parse()
    }

    pub fn provider_section_mut(&mut self, provider: ProviderKind) -> &mut ProviderSection {
        self.providers.entry(provider.as_str().to_string()).or_default()
    }

    /// Resolve the validated settings for `provider`, reading the API key via `env`.
    pub fn provider_config<F>(&self, provider: ProviderKind, env: F) -> Result<ProviderConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = self.providers.get(provider.as_str()).cloned().unwrap_or_default();
        let env_var = section.api_key_env.clone().unwrap_or_else(|| provider.api_key_env());

        let api_key = non_blank(section.api_key)
            .or_else(|| non_blank(env(&env_var)))
            .ok_or_else(|| ConfigError::MissingApiKey {
                provider: provider.to_string(),
                env_var: env_var.clone(),
            })?;

        let model = non_blank(section.model).unwrap_or_else(|| provider.default_model().to_string());

        let cfg = ProviderConfig {
            provider,
            api_key,
            model,
            base_url: non_blank(section.base_url),
            temperature: self.summarize.temperature,
            max_tokens: self.summarize.max_tokens,
            timeout: Duration::from_secs(self.summarize.timeout_seconds),
            max_retries: self.summarize.max_retries,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Prompt template to use for full summaries. Must reference `{url}`.
    pub fn prompt_template(&self) -> Result<String, ConfigError> {
        let template = non_blank(self.summarize.prompt_template.clone())
            .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string());
        if !template.contains("{url}") {
            return Err(ConfigError::MissingUrlPlaceholder);
        }
        Ok(template)
    }

    pub fn chunk_size(&self) -> Result<Option<usize>, ConfigError> {
        match self.summarize.chunk_size {
            Some(0) => Err(greater_than_zero("chunk_size")),
            other => Ok(other),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Convenience lookup into the process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
