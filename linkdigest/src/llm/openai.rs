use async_trait::async_trait;
use common::{ProviderConfig, ProviderFamily};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, LlmError, ProviderAdapter, UsageMetadata};

const SYSTEM_PROMPT: &str = "You are a Chinese summarization assistant. \
Always return strict JSON with keys `brief` and `summary`.";

/// Adapter for OpenAI-compatible chat-completion APIs (openai, deepseek, glm)
pub struct OpenAiCompatibleAdapter {
    endpoint: String,
    api_key: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: chat_completions_url(config.base_url()),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn render(&self, model: &str, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
                },
                Message {
                    role: "user".to_string(),
                    content: MessageContent::Text(prompt.to_string()),
                },
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        }
    }
}

/// Accepts either an API root (`https://api.openai.com/v1`) or the full
/// chat-completions URL.
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAiCompatible
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, LlmError> {
        let req_body = self.render(model, prompt);

        let call = async {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            Ok::<_, LlmError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| LlmError::transport(format!("LLM request timed out after {:?}", self.timeout)))??;

        if !status.is_success() {
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: body,
            });
        }

        let resp_body: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse(format!("Failed to parse LLM response: {}", e)))?;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse("LLM response has no choices"))?;

        Ok(Completion {
            text: choice.message.content.into_text().trim().to_string(),
            usage: extract_usage(resp_body.usage),
        })
    }
}

fn extract_usage(usage: Option<Usage>) -> UsageMetadata {
    let usage = usage.unwrap_or_default();
    UsageMetadata {
        prompt_tokens: usage.prompt_tokens.unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0),
        total_tokens: usage.total_tokens,
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: MessageContent,
}

/// Some compatible servers return content as a list of typed parts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Null,
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Null
    }
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts.into_iter().filter_map(|p| p.text).collect(),
            MessageContent::Null => String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}
