//! Durable (relational) store — SQLite via `sqlx`, brought up to schema by
//! a sequence of idempotent `CREATE TABLE IF NOT EXISTS` statements run in
//! the constructor rather than a separate migrations directory.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct DurableStore {
    pub pool: SqlitePool,
}

impl DurableStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS life_plot_outlines (
                outline_id     TEXT PRIMARY KEY,
                role_id        TEXT NOT NULL,
                role_name      TEXT NOT NULL,
                title          TEXT NOT NULL,
                birthday       TEXT NOT NULL,
                life           INTEGER NOT NULL DEFAULT 100,
                wealth         TEXT NOT NULL DEFAULT '普通',
                overall_theme  TEXT,
                version        INTEGER NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outlines_role_id ON life_plot_outlines(role_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS life_stages (
                stage_id          TEXT PRIMARY KEY,
                outline_id        TEXT NOT NULL REFERENCES life_plot_outlines(outline_id) ON DELETE CASCADE,
                stage_order       INTEGER NOT NULL,
                life_period       TEXT NOT NULL,
                title             TEXT NOT NULL,
                description       TEXT,
                goals             TEXT,
                status            TEXT NOT NULL,
                summary           TEXT,
                UNIQUE(outline_id, stage_order)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stages_outline ON life_stages(outline_id, stage_order)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stages_status ON life_stages(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plot_segments (
                segment_id          TEXT PRIMARY KEY,
                stage_id            TEXT NOT NULL REFERENCES life_stages(stage_id) ON DELETE CASCADE,
                order_in_stage      INTEGER NOT NULL,
                title               TEXT NOT NULL,
                life_age            INTEGER NOT NULL,
                prompt_for_plot_llm TEXT,
                duration_days       INTEGER NOT NULL DEFAULT 1,
                emotional_arc       TEXT,
                key_npcs            TEXT,
                status              TEXT NOT NULL,
                is_milestone        INTEGER NOT NULL DEFAULT 0,
                UNIQUE(stage_id, order_in_stage)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_stage ON plot_segments(stage_id, order_in_stage)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_status ON plot_segments(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_life_age ON plot_segments(life_age)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS specific_plot (
                plot_id       TEXT PRIMARY KEY,
                segment_id    TEXT NOT NULL REFERENCES plot_segments(segment_id) ON DELETE CASCADE,
                plot_order    INTEGER NOT NULL,
                plot_date     TEXT NOT NULL,
                content_path  TEXT,
                mood          TEXT NOT NULL DEFAULT '{}',
                status        TEXT NOT NULL,
                UNIQUE(segment_id, plot_order)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_plot_date ON specific_plot(plot_date)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_plot_status ON specific_plot(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_details (
                role_id                  TEXT PRIMARY KEY,
                mood                     TEXT NOT NULL DEFAULT '{}',
                age                      INTEGER NOT NULL DEFAULT 0,
                current_life_stage_id    TEXT,
                current_plot_segment_id  TEXT,
                current_materials_id     TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                session_id        TEXT PRIMARY KEY,
                user_name         TEXT NOT NULL,
                role_id           TEXT NOT NULL,
                title             TEXT,
                status            TEXT NOT NULL DEFAULT 'open',
                total_count       INTEGER NOT NULL DEFAULT 0,
                user_count        INTEGER NOT NULL DEFAULT 0,
                agent_count       INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL,
                last_message_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON chat_sessions(user_name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_last_message ON chat_sessions(last_message_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                message_id       TEXT PRIMARY KEY,
                session_id       TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
                msg_order        INTEGER NOT NULL,
                sender_type      TEXT NOT NULL,
                content          TEXT NOT NULL,
                tool_name        TEXT,
                tool_parameters  TEXT,
                tool_result      TEXT,
                is_tool_query    INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL,
                metadata         TEXT,
                UNIQUE(session_id, msg_order)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_created ON chat_messages(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = DurableStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.expect("re-running migrate should not fail");
    }
}
