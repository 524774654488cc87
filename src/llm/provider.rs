//! Model-provider trait shared by every system/persona call. Turn
//! responses and every other model call in this engine consume the full
//! text in one response; nothing here streams a delta.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Common interface for model providers (OpenAI-compatible, Ollama, etc.)
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, messages: Vec<Message>, options: Option<LlmParams>) -> Result<String, String>;

    /// Provider identifier (e.g. "openai", "ollama"), used in logs.
    fn id(&self) -> &str;
}
