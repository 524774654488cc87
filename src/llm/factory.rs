//! Builds a boxed `LlmProvider` from a `ModelConfig`, dispatching on the
//! configured backend kind.

use crate::config::ModelConfig;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::provider::LlmProvider;
use std::sync::Arc;

pub fn build_provider(config: &ModelConfig) -> Arc<dyn LlmProvider> {
    match config.provider_type.as_str() {
        "ollama" => Arc::new(
            OllamaProvider::new(config.base_url.clone(), config.model.clone(), config.timeout()).with_id(config.id.clone()),
        ),
        _ => Arc::new(
            OpenAiProvider::new(
                config.resolve_api_key().unwrap_or_default(),
                config.base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.timeout(),
            )
            .with_id(config.id.clone()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_provider_type_builds_ollama_adapter() {
        let config = ModelConfig {
            id: "local".to_string(),
            provider_type: "ollama".to_string(),
            api_key: None,
            api_key_env: None,
            base_url: Some("http://localhost:11434".to_string()),
            model: "llama3".to_string(),
            temperature: 0.7,
            timeout_secs: 30,
        };
        assert_eq!(build_provider(&config).id(), "local");
    }

    #[test]
    fn unknown_provider_type_falls_back_to_openai_compatible() {
        let config = ModelConfig {
            id: "custom".to_string(),
            provider_type: "something-else".to_string(),
            api_key: Some("sk-x".to_string()),
            api_key_env: None,
            base_url: Some("https://api.example.com/v1".to_string()),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            timeout_secs: 30,
        };
        assert_eq!(build_provider(&config).id(), "custom");
    }
}
