//! OpenAI-compatible chat-completions adapter. Multimodal content parts
//! and the SSE streaming path are out of scope: every call here is a
//! single non-streaming request; retrying it is the caller's
//! responsibility.

use crate::llm::provider::{LlmParams, LlmProvider, Message};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    temperature: f32,
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    default_temperature: f32,
    provider_id: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String, default_temperature: f32, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model,
            default_temperature,
            provider_id: "openai".to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = id.into();
        self
    }

    /// Retry policy lives with the caller: only the caller knows whether
    /// this particular invocation should retry on a geo-restriction error
    /// or fall back immediately.
    async fn chat_once(&self, messages: &[Message], options: &Option<LlmParams>) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let temperature = options.as_ref().and_then(|o| o.temperature).unwrap_or(self.default_temperature);
        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: false,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 451 || body.to_lowercase().contains("unsupported_country_region_territory") {
                return Err(format!("geo_restricted: {body}"));
            }
            if status.as_u16() == 429 || body.to_lowercase().contains("rate_limit") || body.to_lowercase().contains("quota") {
                return Err(format!("rate_limited: {body}"));
            }
            return Err(format!("api error ({status}): {body}"));
        }

        let body: Value = response.json().await.map_err(|e| format!("failed to parse response: {e}"))?;
        Ok(body["choices"][0]["message"]["content"].as_str().unwrap_or("").to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: Vec<Message>, options: Option<LlmParams>) -> Result<String, String> {
        self.chat_once(&messages, &options).await
    }

    fn id(&self) -> &str {
        &self.provider_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> OpenAiProvider {
        OpenAiProvider::new("sk-test".to_string(), Some(base_url), "gpt-4".to_string(), 0.7, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn parses_choices_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
            })))
            .mount(&server)
            .await;

        let result = provider(server.uri())
            .chat(vec![Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(result, "hello there");
    }

    #[tokio::test]
    async fn maps_451_to_geo_restricted_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(451).set_body_string("unsupported_country_region_territory"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).chat(vec![Message::user("hi")], None).await.unwrap_err();
        assert!(err.starts_with("geo_restricted"), "got: {err}");
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate_limit_exceeded"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).chat(vec![Message::user("hi")], None).await.unwrap_err();
        assert!(err.starts_with("rate_limited"), "got: {err}");
    }

    #[tokio::test]
    async fn maps_server_error_to_plain_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).chat(vec![Message::user("hi")], None).await.unwrap_err();
        assert!(!err.starts_with("geo_restricted"));
        assert!(err.contains("500"));
    }
}
