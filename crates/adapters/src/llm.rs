use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use blog_core::config::{Config, LlmConfig};
use blog_core::{LanguageModel, LanguageModelError, ModelRequest};

use crate::error::AdapterError;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+$").expect("version suffix pattern"));

const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional blog writer and editor.";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Arc<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{profile_name}`"))
    })?;
    create_llm_adapter_from_profile(profile)
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Arc<dyn LanguageModel>, AdapterError> {
    let format = profile.interface_format.trim().to_lowercase();
    let default_base = match format.as_str() {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "grok" => "https://api.x.ai/v1",
        "ollama" => "http://localhost:11434/v1",
        "gemini" => return Ok(Arc::new(GeminiAdapter::new(profile)?)),
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {other}"
            )))
        }
    };
    Ok(Arc::new(OpenAiLikeAdapter::new(profile, default_base)?))
}

/// Appends `/v1` unless the URL already names an API version. A trailing
/// `#` opts out of the rewrite.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(verbatim) = trimmed.strip_suffix('#') {
        return verbatim.to_string();
    }
    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}

fn token_budget(configured: u32, hint: Option<u32>) -> Option<u32> {
    match (configured, hint) {
        (0, hint) => hint,
        (configured, Some(hint)) => Some(configured.min(hint)),
        (configured, None) => Some(configured),
    }
}

fn http_client(timeout: u64) -> Result<Client, AdapterError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout.max(1)))
        .build()?)
}

/// Chat-completions endpoint shared by OpenAI, DeepSeek, Grok and Ollama.
struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiLikeAdapter {
    fn new(profile: &LlmConfig, default_base: &str) -> Result<Self, AdapterError> {
        let raw = if profile.base_url.trim().is_empty() {
            default_base
        } else {
            profile.base_url.as_str()
        };
        let base_url = check_base_url(raw);
        if profile.model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(profile.timeout)?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: Some(profile.api_key.trim().to_string()).filter(|key| !key.is_empty()),
            model_name: profile.model_name.clone(),
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
        })
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![
                ChatMessageRequest {
                    role: "system",
                    content: DEFAULT_SYSTEM_PROMPT,
                },
                ChatMessageRequest {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: token_budget(self.max_tokens, request.max_tokens),
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!("POST {} (model {})", self.url, self.model_name);

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::from_response(response).await);
        }
        let parsed: ChatCompletionResponse = response.json().await?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

#[async_trait]
impl LanguageModel for OpenAiLikeAdapter {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, LanguageModelError> {
        Ok(self.complete(request).await?)
    }
}

struct GeminiAdapter {
    client: Client,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl GeminiAdapter {
    fn new(profile: &LlmConfig) -> Result<Self, AdapterError> {
        if profile.api_key.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Gemini api_key must not be empty".to_string(),
            ));
        }
        if profile.model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Gemini model_name must not be empty".to_string(),
            ));
        }

        let base = if profile.base_url.trim().is_empty() {
            "https://generativelanguage.googleapis.com/v1beta"
        } else {
            profile.base_url.trim().trim_end_matches('/')
        };

        Ok(Self {
            client: http_client(profile.timeout)?,
            url: format!("{base}/models/{}:generateContent", profile.model_name.trim()),
            api_key: profile.api_key.trim().to_string(),
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
        })
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, AdapterError> {
        let body = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: token_budget(self.max_tokens, request.max_tokens),
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AdapterError::from_response(response).await);
        }
        let parsed: GeminiResponse = response.json().await?;
        parse_gemini_response(parsed)
    }
}

#[async_trait]
impl LanguageModel for GeminiAdapter {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, LanguageModelError> {
        Ok(self.complete(request).await?)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|message| message.content))
        .find(|content| !content.trim().is_empty())
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

fn parse_gemini_response(response: GeminiResponse) -> Result<String, AdapterError> {
    for candidate in response.candidates {
        match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => warn!("Gemini response truncated due to max_tokens limit"),
            Some("SAFETY") => warn!("Gemini response blocked by safety filters"),
            _ => {}
        }

        let text: String = candidate
            .content
            .into_iter()
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect();
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }
    Err(AdapterError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile(format: &str, base_url: &str) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".into(),
            base_url: base_url.into(),
            interface_format: format.into(),
            model_name: "test-model".into(),
            max_tokens: 2048,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn base_url_gains_version_suffix() {
        assert_eq!(check_base_url("https://example.com"), "https://example.com/v1");
        assert_eq!(check_base_url("https://example.com/v2"), "https://example.com/v2");
        assert_eq!(check_base_url("https://example.com/raw#"), "https://example.com/raw");
        assert_eq!(check_base_url("  "), "");
    }

    #[test]
    fn token_budget_respects_profile_cap() {
        assert_eq!(token_budget(2048, Some(1256)), Some(1256));
        assert_eq!(token_budget(1000, Some(5256)), Some(1000));
        assert_eq!(token_budget(0, Some(1256)), Some(1256));
        assert_eq!(token_budget(0, None), None);
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let result = create_llm_adapter_from_profile(&profile("carrier-pigeon", ""));
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn openai_adapter_sends_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "test-model", "max_tokens": 1256 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Title: Hi\n\nBody" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = create_llm_adapter_from_profile(&profile("OpenAI", &server.uri())).unwrap();
        let reply = adapter
            .invoke(&ModelRequest::new("write").with_max_tokens(1256))
            .await
            .unwrap();
        assert_eq!(reply, "Title: Hi\n\nBody");
    }

    #[tokio::test]
    async fn unauthorized_is_not_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let adapter = create_llm_adapter_from_profile(&profile("openai", &server.uri())).unwrap();
        let error = adapter.invoke(&ModelRequest::new("write")).await.unwrap_err();
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn empty_choices_are_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let adapter = create_llm_adapter_from_profile(&profile("deepseek", &server.uri())).unwrap();
        let error = adapter.invoke(&ModelRequest::new("write")).await.unwrap_err();
        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn gemini_adapter_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(query_param("key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Title: Hi\n" }, { "text": "Body" }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let adapter = create_llm_adapter_from_profile(&profile("gemini", &server.uri())).unwrap();
        let reply = adapter.invoke(&ModelRequest::new("write")).await.unwrap();
        assert_eq!(reply, "Title: Hi\nBody");
    }
}
