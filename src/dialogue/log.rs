//! Component H — Dialogue Log.
//!
//! Two-tier append log: a per-session ordered list in the hot store (newest
//! pushed to the front), periodically flushed into the durable ordered
//! message table: a `VecDeque` hot history backs a lazy-session-then-insert
//! write path, triggered by each turn's persistence step. Flushes
//! when the hot list length is divisible by 6 or exceeds 10, assigns dense
//! per-session order at flush time, and skips an entry already present in
//! the durable tier (matched by `message_id`) so a re-run flush never
//! duplicates a row.

use crate::error::EngineError;
use crate::store::durable::DurableStore;
use crate::store::hot::HotStore;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TTL_FULL: Duration = Duration::from_secs(24 * 3600);
const TTL_AFTER_FLUSH: Duration = Duration::from_secs(2 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderType {
    User,
    Agent,
    Tool,
    System,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Agent => "agent",
            SenderType::Tool => "tool",
            SenderType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "agent" => SenderType::Agent,
            "tool" => SenderType::Tool,
            "system" => SenderType::System,
            _ => SenderType::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub message_id: String,
    pub session_id: String,
    pub sender_type: SenderType,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_parameters: Option<serde_json::Value>,
    pub tool_result: Option<serde_json::Value>,
    pub is_tool_query: bool,
    /// Dense per-session order, assigned at flush time. `None` for an
    /// entry that has only ever lived in the hot tier.
    pub order: Option<i64>,
    pub timestamp: DateTime<FixedOffset>,
    pub metadata: Option<serde_json::Value>,
}

impl DialogueMessage {
    fn new(session_id: &str, sender_type: SenderType, content: String, now: DateTime<FixedOffset>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender_type,
            content,
            tool_name: None,
            tool_parameters: None,
            tool_result: None,
            is_tool_query: false,
            order: None,
            timestamp: now,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HotEntry {
    message: DialogueMessage,
    persisted: bool,
}

pub struct DialogueLog {
    hot: Arc<HotStore>,
    durable: Arc<DurableStore>,
}

impl DialogueLog {
    pub fn new(hot: Arc<HotStore>, durable: Arc<DurableStore>) -> Self {
        Self { hot, durable }
    }

    fn hot_key(session_id: &str) -> String {
        format!("session:{session_id}:messages")
    }

    async fn hot_entries(&self, session_id: &str) -> Vec<HotEntry> {
        self.hot.get_json(&Self::hot_key(session_id)).await.unwrap_or_default()
    }

    /// Appends a plain user or agent message and returns it.
    pub async fn append(
        &self,
        session_id: &str,
        sender_type: SenderType,
        content: impl Into<String>,
        now: DateTime<FixedOffset>,
    ) -> DialogueMessage {
        let message = DialogueMessage::new(session_id, sender_type, content.into(), now);
        self.push(session_id, message.clone()).await;
        message
    }

    /// Appends a Tool message carrying the invoked tool's name, arguments,
    /// and result.
    pub async fn append_tool_call(
        &self,
        session_id: &str,
        tool_name: impl Into<String>,
        tool_parameters: serde_json::Value,
        tool_result: serde_json::Value,
        now: DateTime<FixedOffset>,
    ) -> DialogueMessage {
        let mut message = DialogueMessage::new(session_id, SenderType::Tool, String::new(), now);
        message.tool_name = Some(tool_name.into());
        message.tool_parameters = Some(tool_parameters);
        message.tool_result = Some(tool_result);
        message.is_tool_query = true;
        self.push(session_id, message.clone()).await;
        message
    }

    async fn push(&self, session_id: &str, message: DialogueMessage) {
        let key = Self::hot_key(session_id);
        let mut entries = self.hot_entries(session_id).await;
        entries.insert(0, HotEntry { message, persisted: false });
        self.hot.set_json(&key, &entries, TTL_FULL).await;
    }

    /// Number of entries currently buffered in the hot tier for a session
    /// (persisted or not) — the input to the flush-trigger policy.
    pub async fn hot_len(&self, session_id: &str) -> usize {
        self.hot_entries(session_id).await.len()
    }

    /// Flush-trigger policy: every 6th entry, or once past 10.
    pub fn should_flush(hot_len: usize) -> bool {
        hot_len > 0 && (hot_len % 6 == 0 || hot_len > 10)
    }

    /// Runs `flush` if the current hot length crosses the trigger policy.
    /// Returns whether a flush ran.
    pub async fn maybe_flush(&self, session_id: &str) -> Result<bool, EngineError> {
        if Self::should_flush(self.hot_len(session_id).await) {
            self.flush(session_id).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Persists every not-yet-persisted hot entry into the durable tier, in
    /// insertion (oldest-first) order, assigning dense `order` values
    /// continuing from the session's current max. Idempotent on
    /// `message_id`: an entry already present in the durable tier is
    /// skipped but still marked persisted.
    pub async fn flush(&self, session_id: &str) -> Result<(), EngineError> {
        let key = Self::hot_key(session_id);
        let mut entries = self.hot_entries(session_id).await;

        // entries[0] is newest; pending indices collected newest-first, so
        // reverse to persist oldest-first.
        let mut pending: Vec<usize> = entries.iter().enumerate().filter(|(_, e)| !e.persisted).map(|(i, _)| i).collect();
        pending.reverse();

        if pending.is_empty() {
            return Ok(());
        }

        ensure_session_row(&self.durable, session_id).await?;
        let mut next_order = max_order(&self.durable, session_id).await?.unwrap_or(0) + 1;

        for idx in pending {
            let message_id = entries[idx].message.message_id.clone();
            if !message_exists(&self.durable, &message_id).await? {
                let mut to_persist = entries[idx].message.clone();
                to_persist.order = Some(next_order);
                insert_message(&self.durable, &to_persist).await?;
                entries[idx].message.order = Some(next_order);
                next_order += 1;
            }
            entries[idx].persisted = true;
        }

        self.hot.set_json(&key, &entries, TTL_FULL).await;
        self.hot.touch(&key, TTL_AFTER_FLUSH).await;
        touch_session_last_message_at(&self.durable, session_id).await?;
        Ok(())
    }

    /// Flushes every session currently marked `open`, used on graceful
    /// shutdown so no hot-tier message is lost when the process exits. A
    /// failure on one session is logged and does not stop the rest from
    /// flushing.
    pub async fn flush_all_open_sessions(&self) -> Result<(), EngineError> {
        for session_id in open_session_ids(&self.durable).await? {
            if let Err(e) = self.flush(&session_id).await {
                tracing::warn!(session_id, error = %e, "shutdown flush failed for session");
            }
        }
        Ok(())
    }

    /// Merges hot and durable tiers by timestamp, deduplicated by
    /// `message_id`, clipped to the most recent `limit` messages. Durable
    /// read failures degrade to a hot-only result rather than propagating.
    pub async fn query(&self, session_id: &str, limit: usize) -> Vec<DialogueMessage> {
        let hot_entries = self.hot_entries(session_id).await;
        let durable_rows = fetch_messages(&self.durable, session_id).await.unwrap_or_else(|e| {
            tracing::warn!("durable read failed, falling back to hot-only history: {e}");
            Vec::new()
        });

        let mut merged: HashMap<String, DialogueMessage> = HashMap::new();
        for row in durable_rows {
            merged.insert(row.message_id.clone(), row);
        }
        for entry in hot_entries {
            merged.entry(entry.message.message_id.clone()).or_insert(entry.message);
        }

        let mut all: Vec<DialogueMessage> = merged.into_values().collect();
        all.sort_by_key(|m| m.timestamp);
        if all.len() > limit {
            all = all.split_off(all.len() - limit);
        }
        all
    }
}

async fn open_session_ids(store: &DurableStore) -> Result<Vec<String>, EngineError> {
    let rows = sqlx::query_as::<_, (String,)>("SELECT session_id FROM chat_sessions WHERE status = 'open'")
        .fetch_all(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn ensure_session_row(store: &DurableStore, session_id: &str) -> Result<(), EngineError> {
    let exists = sqlx::query_as::<_, (String,)>("SELECT session_id FROM chat_sessions WHERE session_id = ?")
        .bind(session_id)
        .fetch_optional(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?
        .is_some();
    if !exists {
        return Err(EngineError::StoreUnavailable(format!("flush called before session {session_id} was created")));
    }
    Ok(())
}

async fn max_order(store: &DurableStore, session_id: &str) -> Result<Option<i64>, EngineError> {
    let row = sqlx::query_as::<_, (Option<i64>,)>("SELECT MAX(msg_order) FROM chat_messages WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(row.0)
}

async fn message_exists(store: &DurableStore, message_id: &str) -> Result<bool, EngineError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT message_id FROM chat_messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(row.is_some())
}

async fn insert_message(store: &DurableStore, message: &DialogueMessage) -> Result<(), EngineError> {
    let tool_parameters = message.tool_parameters.as_ref().map(|v| v.to_string());
    let tool_result = message.tool_result.as_ref().map(|v| v.to_string());
    let metadata = message.metadata.as_ref().map(|v| v.to_string());

    sqlx::query(
        "INSERT INTO chat_messages \
         (message_id, session_id, msg_order, sender_type, content, tool_name, tool_parameters, tool_result, is_tool_query, created_at, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.message_id)
    .bind(&message.session_id)
    .bind(message.order.unwrap_or(0))
    .bind(message.sender_type.as_str())
    .bind(&message.content)
    .bind(&message.tool_name)
    .bind(&tool_parameters)
    .bind(&tool_result)
    .bind(message.is_tool_query as i64)
    .bind(message.timestamp.to_rfc3339())
    .bind(&metadata)
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

async fn touch_session_last_message_at(store: &DurableStore, session_id: &str) -> Result<(), EngineError> {
    sqlx::query("UPDATE chat_sessions SET last_message_at = ? WHERE session_id = ?")
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

async fn fetch_messages(store: &DurableStore, session_id: &str) -> Result<Vec<DialogueMessage>, EngineError> {
    let rows = sqlx::query_as::<_, (String, String, i64, String, String, Option<String>, Option<String>, Option<String>, i64, String, Option<String>)>(
        "SELECT message_id, session_id, msg_order, sender_type, content, tool_name, tool_parameters, tool_result, is_tool_query, created_at, metadata \
         FROM chat_messages WHERE session_id = ? ORDER BY msg_order ASC",
    )
    .bind(session_id)
    .fetch_all(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    rows.into_iter()
        .map(
            |(message_id, session_id, order, sender_type, content, tool_name, tool_parameters, tool_result, is_tool_query, created_at, metadata)| {
                Ok(DialogueMessage {
                    message_id,
                    session_id,
                    sender_type: SenderType::parse(&sender_type),
                    content,
                    tool_name,
                    tool_parameters: tool_parameters.and_then(|s| serde_json::from_str(&s).ok()),
                    tool_result: tool_result.and_then(|s| serde_json::from_str(&s).ok()),
                    is_tool_query: is_tool_query != 0,
                    order: Some(order),
                    timestamp: DateTime::parse_from_rfc3339(&created_at).map_err(|e| EngineError::StoreUnavailable(e.to_string()))?,
                    metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
                })
            },
        )
        .collect()
}
