use async_trait::async_trait;
use common::{ProviderConfig, ProviderFamily};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Completion, LlmError, ProviderAdapter, UsageMetadata};

/// Generation method the adapter calls; listed models must support it.
pub const GENERATE_CONTENT: &str = "generateContent";

// Guard against a server that keeps handing out page tokens.
const MAX_MODEL_PAGES: usize = 20;

/// Adapter for the Gemini generative language REST API
pub struct GeminiAdapter {
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            base_url: config.base_url().trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, GENERATE_CONTENT)
    }

    fn render(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, LlmError> {
        let call = async {
            let response = request
                .header("x-goog-api-key", &self.api_key)
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, LlmError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| LlmError::transport(format!("Gemini request timed out after {:?}", self.timeout)))??;

        if !status.is_success() {
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, LlmError> {
        let request = self.client.post(self.generate_url(model)).json(&self.render(prompt));
        let body = self.send(request).await?;

        let response: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse(format!("Failed to parse Gemini response: {}", e)))?;

        let text: String = response
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::parse("Gemini returned empty content."));
        }

        Ok(Completion {
            text: text.to_string(),
            usage: extract_usage(response.usage_metadata),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_MODEL_PAGES {
            let mut request = self.client.get(format!("{}/models", self.base_url));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let body = self.send(request).await?;
            let page: ModelList = serde_json::from_str(&body)
                .map_err(|e| LlmError::parse(format!("Failed to parse Gemini model list: {}", e)))?;

            models.extend(
                page.models
                    .into_iter()
                    .filter(|m| {
                        m.supported_generation_methods
                            .iter()
                            .any(|method| method.eq_ignore_ascii_case(GENERATE_CONTENT))
                    })
                    .map(|m| m.name),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Gemini lists {} models supporting {}", models.len(), GENERATE_CONTENT);
        Ok(models)
    }
}

fn extract_usage(usage: Option<UsageJson>) -> UsageMetadata {
    let usage = usage.unwrap_or_default();
    UsageMetadata {
        prompt_tokens: usage.prompt_token_count.unwrap_or(0),
        completion_tokens: usage.candidates_token_count.unwrap_or(0),
        total_tokens: usage.total_token_count,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageJson>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageJson {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProviderKind;

    #[test]
    fn request_body_uses_generation_config() {
        let config = ProviderConfig::new(ProviderKind::Gemini, "k", "gemini-2.5-flash");
        let adapter = GeminiAdapter::new(&config);
        let body = serde_json::to_value(adapter.render("hello")).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2000);
        assert_eq!(
            adapter.generate_url("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn usage_sums_prompt_and_candidates() {
        let usage: UsageJson =
            serde_json::from_str(r#"{"promptTokenCount": 12, "candidatesTokenCount": 30}"#).unwrap();
        assert_eq!(extract_usage(Some(usage)).total(), 42);

        let usage: UsageJson = serde_json::from_str(
            r#"{"promptTokenCount": 12, "candidatesTokenCount": 30, "totalTokenCount": 50}"#,
        )
        .unwrap();
        assert_eq!(extract_usage(Some(usage)).total(), 50);
    }
}
