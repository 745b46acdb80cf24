use common::{ProviderConfig, ProviderKind};
use linkdigest::llm::gemini::GeminiAdapter;
use linkdigest::llm::openai::OpenAiCompatibleAdapter;
use linkdigest::llm::{LlmError, ProviderAdapter};
use mockito::Matcher;
use serde_json::json;

fn provider_config(provider: ProviderKind, model: &str, base_url: String) -> ProviderConfig {
    ProviderConfig::new(provider, "test-key", model).with_base_url(base_url)
}

#[tokio::test]
async fn test_openai_adapter_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(json!({
            "model": "deepseek-chat",
            "max_tokens": 2000,
            "messages": [{"role": "system"}, {"role": "user", "content": "Summarize https://a.example"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "{\"brief\": \"b\", \"summary\": \"s\"}"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .create_async()
        .await;

    let adapter = OpenAiCompatibleAdapter::new(&provider_config(ProviderKind::DeepSeek, "deepseek-chat", server.url()));
    let completion = adapter
        .complete("deepseek-chat", "Summarize https://a.example")
        .await
        .unwrap();

    assert_eq!(completion.text, r#"{"brief": "b", "summary": "s"}"#);
    assert_eq!(completion.usage.prompt_tokens, 10);
    assert_eq!(completion.usage.total(), 15);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_adapter_content_parts_and_missing_total() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v4/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": [{"type": "text", "text": "{\"brief\": "}, {"type": "text", "text": "\"b\", \"summary\": \"s\"}"}]
                    }
                }],
                "usage": {"prompt_tokens": 7, "completion_tokens": 3}
            })
            .to_string(),
        )
        .create_async()
        .await;

    // base already pointing at the full endpoint is used verbatim
    let base = format!("{}/v4/chat/completions", server.url());
    let adapter = OpenAiCompatibleAdapter::new(&provider_config(ProviderKind::Glm, "glm-4", base));
    let completion = adapter.complete("glm-4", "p").await.unwrap();

    assert_eq!(completion.text, r#"{"brief": "b", "summary": "s"}"#);
    assert_eq!(completion.usage.total(), 10);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_adapter_error_status() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error": {"message": "Rate limit reached"}}"#)
        .create_async()
        .await;

    let adapter = OpenAiCompatibleAdapter::new(&provider_config(ProviderKind::OpenAi, "gpt-4o-mini", server.url()));
    let err = adapter.complete("gpt-4o-mini", "p").await.unwrap_err();

    match &err {
        LlmError::Provider { status, message } => {
            assert_eq!(*status, 429);
            assert!(message.contains("Rate limit reached"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert!(!err.is_model_unavailable());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_adapter_connection_refused_is_transport_error() {
    let adapter = OpenAiCompatibleAdapter::new(&provider_config(
        ProviderKind::OpenAi,
        "gpt-4o-mini",
        "http://127.0.0.1:1".to_string(),
    ));
    let err = adapter.complete("gpt-4o-mini", "p").await.unwrap_err();
    assert!(matches!(err, LlmError::Transport(_)), "got {err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_gemini_generate_content_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .match_body(Matcher::PartialJson(json!({
            "contents": [{"parts": [{"text": "Summarize https://youtu.be/x"}]}],
            "generationConfig": {"maxOutputTokens": 2000}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "```json\n{\"brief\": \"b\","}, {"text": " \"summary\": \"s\"}\n```"}]}
                }],
                "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 12, "totalTokenCount": 42}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let adapter = GeminiAdapter::new(&provider_config(ProviderKind::Gemini, "gemini-2.5-flash", server.url()));
    let completion = adapter
        .complete("gemini-2.5-flash", "Summarize https://youtu.be/x")
        .await
        .unwrap();

    assert!(completion.text.starts_with("```json"));
    assert!(completion.text.contains(r#""summary": "s""#));
    assert_eq!(completion.usage.total(), 42);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_empty_candidates_is_parse_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .with_status(200)
        .with_body(r#"{"candidates": [], "usageMetadata": {"promptTokenCount": 3}}"#)
        .create_async()
        .await;

    let adapter = GeminiAdapter::new(&provider_config(ProviderKind::Gemini, "gemini-2.5-flash", server.url()));
    let err = adapter.complete("gemini-2.5-flash", "p").await.unwrap_err();
    assert!(matches!(err, LlmError::Parse(_)), "got {err}");
}

#[tokio::test]
async fn test_gemini_missing_model_is_detected() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-1.0-pro:generateContent")
        .with_status(404)
        .with_body(r#"{"error": {"code": 404, "message": "models/gemini-1.0-pro is not found for API version v1beta, or is not supported for generateContent.", "status": "NOT_FOUND"}}"#)
        .create_async()
        .await;

    let adapter = GeminiAdapter::new(&provider_config(ProviderKind::Gemini, "gemini-1.0-pro", server.url()));
    let err = adapter.complete("gemini-1.0-pro", "p").await.unwrap_err();
    assert!(err.is_model_unavailable());
}

#[tokio::test]
async fn test_gemini_list_models_follows_pages() {
    let mut server = mockito::Server::new_async().await;

    let first = server
        .mock("GET", "/models")
        .match_header("x-goog-api-key", "test-key")
        .with_status(200)
        .with_body(
            json!({
                "models": [
                    {"name": "models/gemini-2.5-pro", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                    {"name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"]}
                ],
                "nextPageToken": "page-2"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let second = server
        .mock("GET", "/models")
        .match_query(Matcher::UrlEncoded("pageToken".into(), "page-2".into()))
        .with_status(200)
        .with_body(
            json!({
                "models": [
                    {"name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["generateContent"]},
                    {"name": "models/aqa"}
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let adapter = GeminiAdapter::new(&provider_config(ProviderKind::Gemini, "gemini-2.5-flash", server.url()));
    let models = adapter.list_models().await.unwrap();

    assert_eq!(models, vec!["models/gemini-2.5-pro", "models/gemini-2.0-flash"]);

    first.assert_async().await;
    second.assert_async().await;
}
