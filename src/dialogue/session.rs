//! Component I — Session Resolver.
//!
//! Given `(user_name, role_id, force_new?)`, reuses the most recent live
//! session whose title names the role, or creates a new one: a
//! lazy-session-creation pattern generalized from "one conversation at a
//! time per character" to title-matched session reuse across a user's
//! history.

use crate::error::EngineError;
use crate::store::durable::DurableStore;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub session_id: String,
    pub user_name: String,
    pub role_id: String,
    pub title: String,
    pub status: String,
    pub message_count: i64,
}

async fn create_session(store: &DurableStore, user_name: &str, role_id: &str, title: String) -> Result<ChatSession, EngineError> {
    let session_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO chat_sessions (session_id, user_name, role_id, title, created_at, last_message_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&session_id)
    .bind(user_name)
    .bind(role_id)
    .bind(&title)
    .bind(&now)
    .bind(&now)
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    Ok(ChatSession { session_id, user_name: user_name.to_string(), role_id: role_id.to_string(), title, status: "open".to_string(), message_count: 0 })
}

/// Resolves the session for a turn. `force_new` always creates a fresh
/// session titled "new conversation with <role_name>". Otherwise the
/// user's sessions are scanned most-recent-first for one whose title
/// mentions `role_name` or `role_id`; none matching creates a new session
/// titled "conversation with <role_name>".
pub async fn resolve_session(
    store: &DurableStore,
    user_name: &str,
    role_id: &str,
    role_name: &str,
    force_new: bool,
) -> Result<ChatSession, EngineError> {
    if force_new {
        return create_session(store, user_name, role_id, format!("new conversation with {role_name}")).await;
    }

    let rows = sqlx::query_as::<_, (String, String, String, String, String, i64)>(
        "SELECT session_id, user_name, role_id, title, status, total_count \
         FROM chat_sessions WHERE user_name = ? ORDER BY last_message_at DESC",
    )
    .bind(user_name)
    .fetch_all(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    let matched = rows.into_iter().find(|(_, _, _, title, _, _)| title.contains(role_name) || title.contains(role_id));

    match matched {
        Some((session_id, user_name, role_id, title, status, message_count)) => {
            Ok(ChatSession { session_id, user_name, role_id, title, status, message_count })
        }
        None => create_session(store, user_name, role_id, format!("conversation with {role_name}")).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn durable() -> DurableStore {
        DurableStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn force_new_always_creates_a_fresh_session() {
        let store = durable().await;
        let first = resolve_session(&store, "alice", "chen", "Chen Xiaozhi", true).await.unwrap();
        let second = resolve_session(&store, "alice", "chen", "Chen Xiaozhi", true).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(second.title.starts_with("new conversation with"));
    }

    #[tokio::test]
    async fn reuses_most_recent_session_matching_role_name() {
        let store = durable().await;
        let created = resolve_session(&store, "alice", "chen", "Chen Xiaozhi", false).await.unwrap();

        let reused = resolve_session(&store, "alice", "chen", "Chen Xiaozhi", false).await.unwrap();
        assert_eq!(created.session_id, reused.session_id);
    }

    #[tokio::test]
    async fn no_matching_session_creates_a_new_one() {
        let store = durable().await;
        resolve_session(&store, "alice", "chen", "Chen Xiaozhi", false).await.unwrap();

        let other_role = resolve_session(&store, "alice", "mika", "Mika", false).await.unwrap();
        assert!(other_role.title.contains("Mika"));
    }
}
