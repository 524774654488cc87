//! Component D — Mood Store, plus the `MoodVector` type shared by every
//! component that reads or writes mood.

pub mod composition;

use crate::error::EngineError;
use crate::store::durable::DurableStore;
use crate::store::hot::HotStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoodVector {
    pub valence: f32,
    pub arousal: f32,
    pub intensity: u8,
    pub tags: Vec<String>,
    pub description: String,
}

impl MoodVector {
    /// Clamps the numeric fields to their valid ranges and fills `tags`
    /// from the deterministic (valence, arousal) table when empty.
    pub fn normalized(mut self) -> Self {
        self.valence = self.valence.clamp(-1.0, 1.0);
        self.arousal = self.arousal.clamp(0.0, 1.0);
        self.intensity = self.intensity.clamp(1, 10);
        if self.tags.is_empty() {
            self.tags = vec![derive_tag(self.valence, self.arousal).to_string()];
        }
        self.tags.truncate(3);
        self
    }
}

/// Fixed tag-derivation table: positive+aroused ⇒ excited; positive ⇒
/// pleased; negative+aroused ⇒ angry; negative ⇒ downcast; else calm.
pub fn derive_tag(valence: f32, arousal: f32) -> &'static str {
    const AROUSED: f32 = 0.5;
    match (valence > 0.0, valence < 0.0, arousal >= AROUSED) {
        (true, _, true) => "excited",
        (true, _, false) => "pleased",
        (_, true, true) => "angry",
        (_, true, false) => "downcast",
        _ => "calm",
    }
}

pub struct MoodStore {
    hot: Arc<HotStore>,
    durable: Arc<DurableStore>,
    ttl: Duration,
}

impl MoodStore {
    pub fn new(hot: Arc<HotStore>, durable: Arc<DurableStore>, ttl: Duration) -> Self {
        Self { hot, durable, ttl }
    }

    fn hot_key(role_id: &str) -> String {
        format!("role_mood:{role_id}")
    }

    /// Reads prefer hot; on miss, load from durable and warm the hot tier.
    pub async fn get(&self, role_id: &str) -> Result<MoodVector, EngineError> {
        let key = Self::hot_key(role_id);
        if let Some(mood) = self.hot.get_json::<MoodVector>(&key).await {
            return Ok(mood);
        }

        let row = sqlx::query_as::<_, (String,)>("SELECT mood FROM role_details WHERE role_id = ?")
            .bind(role_id)
            .fetch_optional(&self.durable.pool)
            .await
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

        let mood = match row {
            Some((raw,)) => serde_json::from_str::<MoodVector>(&raw)
                .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?,
            None => return Err(EngineError::RoleNotConfigured(role_id.to_string())),
        };

        self.hot.set_json(&key, &mood, self.ttl).await;
        Ok(mood)
    }

    /// Write-through: durable first, then hot.
    pub async fn set(&self, role_id: &str, mood: &MoodVector) -> Result<(), EngineError> {
        let raw = serde_json::to_string(mood).map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO role_details (role_id, mood) VALUES (?, ?) \
             ON CONFLICT(role_id) DO UPDATE SET mood = excluded.mood",
        )
        .bind(role_id)
        .bind(&raw)
        .execute(&self.durable.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

        self.hot.set_json(&Self::hot_key(role_id), mood, self.ttl).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mood(valence: f32, arousal: f32) -> MoodVector {
        MoodVector {
            valence,
            arousal,
            intensity: 5,
            tags: vec![],
            description: String::new(),
        }
    }

    #[test]
    fn normalized_clamps_and_fills_tags() {
        let m = mood(2.5, -1.0).normalized();
        assert_eq!(m.valence, 1.0);
        assert_eq!(m.arousal, 0.0);
        assert_eq!(m.tags, vec!["pleased".to_string()]);
    }

    #[test]
    fn derive_tag_matches_fixed_table() {
        assert_eq!(derive_tag(0.5, 0.8), "excited");
        assert_eq!(derive_tag(0.5, 0.2), "pleased");
        assert_eq!(derive_tag(-0.5, 0.8), "angry");
        assert_eq!(derive_tag(-0.5, 0.2), "downcast");
        assert_eq!(derive_tag(0.0, 0.0), "calm");
    }

    #[tokio::test]
    async fn write_through_then_read_prefers_hot() {
        let hot = Arc::new(HotStore::new());
        let durable = Arc::new(DurableStore::connect("sqlite::memory:").await.unwrap());
        let store = MoodStore::new(hot.clone(), durable, Duration::from_secs(60));

        let m = mood(0.3, 0.4).normalized();
        store.set("role1", &m).await.unwrap();

        let read_back = store.get("role1").await.unwrap();
        assert_eq!(read_back, m);
    }

    #[tokio::test]
    async fn miss_on_hot_warms_from_durable() {
        let hot = Arc::new(HotStore::new());
        let durable = Arc::new(DurableStore::connect("sqlite::memory:").await.unwrap());
        let store = MoodStore::new(hot.clone(), durable, Duration::from_secs(60));

        let m = mood(0.1, 0.1).normalized();
        store.set("role2", &m).await.unwrap();
        hot.remove(&MoodStore::hot_key("role2")).await;

        let read_back = store.get("role2").await.unwrap();
        assert_eq!(read_back, m);
        assert!(
            hot.get_json::<MoodVector>(&MoodStore::hot_key("role2")).await.is_some(),
            "hot tier should be warmed after a durable-backed read"
        );
    }
}
