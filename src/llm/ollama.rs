//! Ollama provider — non-streaming `/api/chat`.

use crate::llm::provider::{LlmParams, LlmProvider, Message};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessageResponse>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessageResponse {
    content: Option<String>,
}

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    provider_id: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            provider_id: "ollama".to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = id.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: Vec<Message>, _options: Option<LlmParams>) -> Result<String, String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request_body = OllamaChatRequest {
            model: self.model.clone(),
            messages: messages
                .into_iter()
                .map(|m| OllamaMessage { role: m.role, content: m.content })
                .collect(),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("api error ({status}): {body}"));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| format!("failed to parse response: {e}"))?;
        Ok(parsed.message.and_then(|m| m.content).unwrap_or_default())
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

    #[tokio::test]
    async fn parses_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "local reply"},
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(Some(server.uri()), "llama3".to_string(), Duration::from_secs(5));
        let result = provider.chat(vec![Message::user("hi")], None).await.unwrap();
        assert_eq!(result, "local reply");
    }
}
