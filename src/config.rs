//! Typed configuration, loaded once at process start and passed by value.
//!
//! Replaces the source's habit of mutating process-global environment
//! variables on provider switch: a new `ModelConfig` is just a
//! new value, never a side effect on the process.

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Generic JSON config loader: returns `T::default()` on any read/parse
/// failure, logging the reason instead of propagating it. Config files are
/// operator-editable and a missing/corrupt file should not crash the
/// process.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(%label, error = %e, path = %path.display(), "failed to parse config, using defaults");
                T::default()
            }
        },
        Err(_) => {
            tracing::info!(%label, path = %path.display(), "no config file found, using defaults");
            T::default()
        }
    }
}

pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    std::fs::write(path, raw)
        .map_err(|e| anyhow::anyhow!("failed to write {label} config to {}: {e}", path.display()))
}

/// Resolves an API key: explicit value wins, else read from the named
/// environment variable, else `None`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    api_key_env.as_ref().and_then(|var| std::env::var(var).ok())
}

/// Per-provider configuration. One engine may hold several (e.g. a cheap
/// model for system tasks, a stronger one for persona generation).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    pub id: String,
    /// "openai" | "ollama" (anything else falls back to the OpenAI-compatible adapter).
    pub provider_type: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    30
}

impl ModelConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key(&self.api_key, &self.api_key_env)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Process-wide configuration: which model serves each role, storage
/// locations, and clock zone. Loaded once at startup, then handed out by
/// reference/clone — never mutated in place.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Model used for persona generation / the user-facing reply.
    pub persona_model: ModelConfig,
    /// Model used for intent/emotion analysis, mood impact, thought chain,
    /// and plot generation. May be the same id as `persona_model`.
    #[serde(default)]
    pub system_model: Option<ModelConfig>,

    pub database_url: String,

    /// Root directories for the three external text-blob families.
    pub plot_root: PathBuf,
    pub summary_root: PathBuf,
    pub persona_root: PathBuf,

    /// Civil-zone offset in minutes east of UTC. Default +08:00.
    #[serde(default = "default_zone_offset_minutes")]
    pub zone_offset_minutes: i32,

    #[serde(default = "default_clock_ttl_secs")]
    pub clock_ttl_secs: u64,
    #[serde(default = "default_mood_ttl_secs")]
    pub mood_ttl_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    pub http_bind: std::net::SocketAddr,
}

fn default_zone_offset_minutes() -> i32 {
    8 * 60
}
fn default_clock_ttl_secs() -> u64 {
    30 * 60
}
fn default_mood_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl EngineConfig {
    /// The model to use for system-side calls (analyzer, thought chain,
    /// mood impact, plot generation); falls back to the persona model.
    pub fn system_model(&self) -> &ModelConfig {
        self.system_model.as_ref().unwrap_or(&self.persona_model)
    }

    /// Candidate plot-folder names for a role, most specific first: the
    /// full `role_id` folder, then a first-token alias if `role_id` itself
    /// is compound. The first one that exists wins; never guess beyond
    /// this list.
    pub fn plot_file_candidates(&self, role_id: &str) -> Vec<PathBuf> {
        let first_token = role_id.split('_').next().unwrap_or(role_id);
        let mut candidates = vec![self.plot_root.join(format!("{role_id}_plot"))];
        if first_token != role_id {
            candidates.push(self.plot_root.join(format!("{first_token}_plot")));
        }
        candidates
    }

    pub fn persona_path(&self, role_id: &str) -> PathBuf {
        self.persona_root.join(format!("{role_id}_L0_prompt.txt"))
    }

    pub fn summary_path(&self, role_id: &str, role_name: &str) -> PathBuf {
        self.summary_root
            .join(role_id)
            .join(format!("{role_name}_summary.txt"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persona_model: ModelConfig {
                id: "openai".to_string(),
                provider_type: "openai".to_string(),
                api_key: None,
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                base_url: Some("https://api.openai.com/v1".to_string()),
                model: "gpt-4".to_string(),
                temperature: 0.8,
                timeout_secs: 30,
            },
            system_model: None,
            database_url: "sqlite://anima-engine.db".to_string(),
            plot_root: PathBuf::from("./character_plots"),
            summary_root: PathBuf::from("./life_summaries"),
            persona_root: PathBuf::from("./personas"),
            zone_offset_minutes: default_zone_offset_minutes(),
            clock_ttl_secs: default_clock_ttl_secs(),
            mood_ttl_secs: default_mood_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            http_bind: ([127, 0, 0, 1], 7890).into(),
        }
    }
}

pub fn load_engine_config(path: &Path) -> EngineConfig {
    load_json_config(path, "engine")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_prefers_explicit() {
        let key = resolve_api_key(&Some("sk-explicit".to_string()), &Some("SOME_VAR".to_string()));
        assert_eq!(key, Some("sk-explicit".to_string()));
    }

    #[test]
    fn resolve_api_key_falls_back_to_env() {
        std::env::set_var("ANIMA_TEST_KEY", "sk-from-env");
        let key = resolve_api_key(&None, &Some("ANIMA_TEST_KEY".to_string()));
        assert_eq!(key, Some("sk-from-env".to_string()));
        std::env::remove_var("ANIMA_TEST_KEY");
    }

    #[test]
    fn plot_file_candidates_includes_first_token_fallback() {
        let cfg = EngineConfig::default();
        let candidates = cfg.plot_file_candidates("chenxiaozhi_001");
        assert_eq!(candidates.len(), 2, "should offer both full-id and first-token aliases");
        assert!(candidates[0].ends_with("chenxiaozhi_001_plot"));
        assert!(candidates[1].ends_with("chenxiaozhi_plot"));
    }

    #[test]
    fn plot_file_candidates_single_when_no_underscore() {
        let cfg = EngineConfig::default();
        let candidates = cfg.plot_file_candidates("solo");
        assert_eq!(candidates.len(), 1, "no alias to offer without an underscore-separated id");
    }
}
