//! Component C — Persona Store.
//!
//! Loads per-role static identity at role selection and caches it by
//! `role_id`; immutable in memory thereafter. Failure to read a
//! role-specific persona file is fatal — no generic default is ever
//! substituted, since the character's identity *is* the persona text.

use crate::error::EngineError;
use crate::mood::MoodVector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Persona {
    pub role_id: String,
    pub role_name: String,
    pub age: u32,
    pub persona_text: String,
    pub initial_mood: MoodVector,
}

pub struct PersonaStore {
    persona_root: std::path::PathBuf,
    cache: RwLock<HashMap<String, Arc<Persona>>>,
}

impl PersonaStore {
    pub fn new(persona_root: std::path::PathBuf) -> Self {
        Self {
            persona_root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loads (or returns the cached) persona for `role_id`. `role_name`/
    /// `age`/`initial_mood` are supplied by the caller from the role's
    /// durable record the first time a role is seen; later calls ignore
    /// them and return the cached, immutable copy.
    pub async fn load(
        &self,
        role_id: &str,
        role_name: &str,
        age: u32,
        initial_mood: MoodVector,
    ) -> Result<Arc<Persona>, EngineError> {
        if let Some(cached) = self.cache.read().await.get(role_id) {
            return Ok(cached.clone());
        }

        let path = self.persona_root.join(format!("{role_id}_L0_prompt.txt"));
        let persona_text = std::fs::read_to_string(&path)
            .map_err(|_| EngineError::PersonaMissing(role_id.to_string()))?;
        if persona_text.trim().is_empty() {
            return Err(EngineError::PersonaMissing(role_id.to_string()));
        }

        let persona = Arc::new(Persona {
            role_id: role_id.to_string(),
            role_name: role_name.to_string(),
            age,
            persona_text: persona_text.trim().to_string(),
            initial_mood,
        });

        self.cache
            .write()
            .await
            .insert(role_id.to_string(), persona.clone());
        Ok(persona)
    }

    pub async fn get_cached(&self, role_id: &str) -> Option<Arc<Persona>> {
        self.cache.read().await.get(role_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_mood() -> MoodVector {
        MoodVector {
            valence: 0.0,
            arousal: 0.0,
            intensity: 5,
            tags: vec!["calm".to_string()],
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn missing_persona_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());
        let result = store.load("ghost_001", "Ghost", 20, default_mood()).await;
        assert!(matches!(result, Err(EngineError::PersonaMissing(_))));
    }

    #[tokio::test]
    async fn loads_and_caches_persona() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chen_001_L0_prompt.txt"), "I am Chen.").unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());

        let first = store.load("chen_001", "Chen", 25, default_mood()).await.unwrap();
        assert_eq!(first.persona_text, "I am Chen.");

        // Second call returns the cached copy even if the file later changes.
        std::fs::write(dir.path().join("chen_001_L0_prompt.txt"), "mutated").unwrap();
        let second = store.load("chen_001", "Chen", 25, default_mood()).await.unwrap();
        assert_eq!(second.persona_text, "I am Chen.", "persona should be immutable once cached");
    }

    #[tokio::test]
    async fn empty_persona_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty_001_L0_prompt.txt"), "   \n").unwrap();
        let store = PersonaStore::new(dir.path().to_path_buf());
        let result = store.load("empty_001", "Empty", 20, default_mood()).await;
        assert!(matches!(result, Err(EngineError::PersonaMissing(_))));
    }
}
