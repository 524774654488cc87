//! Data model + durable-store repository functions for the life-story
//! hierarchy. Stages carry a 3-value status (no `Skipped`); segments and
//! daily plots both carry the 4-value status including `Skipped`.

use crate::error::EngineError;
use crate::mood::MoodVector;
use crate::store::durable::DurableStore;
use chrono::NaiveDate;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Locked,
    Active,
    Completed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Locked => "locked",
            StageStatus::Active => "active",
            StageStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => StageStatus::Active,
            "completed" => StageStatus::Completed,
            _ => StageStatus::Locked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotStatus {
    Locked,
    Active,
    Completed,
    Skipped,
}

impl PlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlotStatus::Locked => "locked",
            PlotStatus::Active => "active",
            PlotStatus::Completed => "completed",
            PlotStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => PlotStatus::Active,
            "completed" => PlotStatus::Completed,
            "skipped" => PlotStatus::Skipped,
            _ => PlotStatus::Locked,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifeOutline {
    pub outline_id: String,
    pub role_id: String,
    pub role_name: String,
    pub title: String,
    pub birthday: NaiveDate,
    pub life: i32,
    pub wealth: String,
    pub overall_theme: Option<String>,
    pub version: i32,
}

#[derive(Debug, Clone)]
pub struct LifeStage {
    pub stage_id: String,
    pub outline_id: String,
    pub order: i32,
    pub life_period: String,
    pub title: String,
    pub description: Option<String>,
    pub goals: Option<String>,
    pub status: StageStatus,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlotSegment {
    pub segment_id: String,
    pub stage_id: String,
    pub order_in_stage: i32,
    pub title: String,
    pub life_age: i32,
    pub prompt_for_plot_llm: Option<String>,
    pub duration_days: i32,
    pub emotional_arc: Option<String>,
    pub key_npcs: Option<String>,
    pub status: PlotStatus,
    pub is_milestone: bool,
}

#[derive(Debug, Clone)]
pub struct DailyPlot {
    pub plot_id: String,
    pub segment_id: String,
    pub order: i32,
    pub plot_date: NaiveDate,
    pub content_path: Option<String>,
    pub mood: MoodVector,
    pub status: PlotStatus,
}

/// Highest-version outline for a role: a role may have multiple outline
/// versions; the highest `version` is authoritative.
pub async fn latest_outline(store: &DurableStore, role_id: &str) -> Result<Option<LifeOutline>, EngineError> {
    let row = sqlx::query_as::<_, (String, String, String, String, String, i64, String, Option<String>, i64)>(
        "SELECT outline_id, role_id, role_name, title, birthday, life, wealth, overall_theme, version \
         FROM life_plot_outlines WHERE role_id = ? ORDER BY version DESC LIMIT 1",
    )
    .bind(role_id)
    .fetch_optional(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    Ok(row.map(|(outline_id, role_id, role_name, title, birthday, life, wealth, overall_theme, version)| {
        LifeOutline {
            outline_id,
            role_id,
            role_name,
            title,
            birthday: NaiveDate::parse_from_str(&birthday, "%Y-%m-%d").unwrap_or_default(),
            life: life as i32,
            wealth,
            overall_theme,
            version: version as i32,
        }
    }))
}

pub async fn insert_outline(store: &DurableStore, outline: &LifeOutline) -> Result<(), EngineError> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO life_plot_outlines \
         (outline_id, role_id, role_name, title, birthday, life, wealth, overall_theme, version, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&outline.outline_id)
    .bind(&outline.role_id)
    .bind(&outline.role_name)
    .bind(&outline.title)
    .bind(outline.birthday.format("%Y-%m-%d").to_string())
    .bind(outline.life as i64)
    .bind(&outline.wealth)
    .bind(&outline.overall_theme)
    .bind(outline.version as i64)
    .bind(&now)
    .bind(&now)
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn stages_for_outline(store: &DurableStore, outline_id: &str) -> Result<Vec<LifeStage>, EngineError> {
    let rows = sqlx::query_as::<_, (String, String, i64, String, String, Option<String>, Option<String>, String, Option<String>)>(
        "SELECT stage_id, outline_id, stage_order, life_period, title, description, goals, status, summary \
         FROM life_stages WHERE outline_id = ? ORDER BY stage_order ASC",
    )
    .bind(outline_id)
    .fetch_all(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|(stage_id, outline_id, order, life_period, title, description, goals, status, summary)| LifeStage {
            stage_id,
            outline_id,
            order: order as i32,
            life_period,
            title,
            description,
            goals,
            status: StageStatus::parse(&status),
            summary,
        })
        .collect())
}

pub async fn active_stage(store: &DurableStore, outline_id: &str) -> Result<Option<LifeStage>, EngineError> {
    Ok(stages_for_outline(store, outline_id)
        .await?
        .into_iter()
        .find(|s| s.status == StageStatus::Active))
}

pub async fn insert_stage(store: &DurableStore, stage: &LifeStage) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO life_stages (stage_id, outline_id, stage_order, life_period, title, description, goals, status, summary) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&stage.stage_id)
    .bind(&stage.outline_id)
    .bind(stage.order as i64)
    .bind(&stage.life_period)
    .bind(&stage.title)
    .bind(&stage.description)
    .bind(&stage.goals)
    .bind(stage.status.as_str())
    .bind(&stage.summary)
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn set_stage_status(store: &DurableStore, stage_id: &str, status: StageStatus) -> Result<(), EngineError> {
    sqlx::query("UPDATE life_stages SET status = ? WHERE stage_id = ?")
        .bind(status.as_str())
        .bind(stage_id)
        .execute(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn segments_for_stage(store: &DurableStore, stage_id: &str) -> Result<Vec<PlotSegment>, EngineError> {
    let rows = sqlx::query_as::<_, (String, String, i64, String, i64, Option<String>, i64, Option<String>, Option<String>, String, i64)>(
        "SELECT segment_id, stage_id, order_in_stage, title, life_age, prompt_for_plot_llm, duration_days, \
                emotional_arc, key_npcs, status, is_milestone \
         FROM plot_segments WHERE stage_id = ? ORDER BY order_in_stage ASC",
    )
    .bind(stage_id)
    .fetch_all(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(
            |(segment_id, stage_id, order_in_stage, title, life_age, prompt_for_plot_llm, duration_days, emotional_arc, key_npcs, status, is_milestone)| {
                PlotSegment {
                    segment_id,
                    stage_id,
                    order_in_stage: order_in_stage as i32,
                    title,
                    life_age: life_age as i32,
                    prompt_for_plot_llm,
                    duration_days: duration_days as i32,
                    emotional_arc,
                    key_npcs,
                    status: PlotStatus::parse(&status),
                    is_milestone: is_milestone != 0,
                }
            },
        )
        .collect())
}

pub async fn active_segment(store: &DurableStore, stage_id: &str) -> Result<Option<PlotSegment>, EngineError> {
    Ok(segments_for_stage(store, stage_id)
        .await?
        .into_iter()
        .find(|s| s.status == PlotStatus::Active))
}

pub async fn insert_segment(store: &DurableStore, segment: &PlotSegment) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO plot_segments \
         (segment_id, stage_id, order_in_stage, title, life_age, prompt_for_plot_llm, duration_days, emotional_arc, key_npcs, status, is_milestone) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&segment.segment_id)
    .bind(&segment.stage_id)
    .bind(segment.order_in_stage as i64)
    .bind(&segment.title)
    .bind(segment.life_age as i64)
    .bind(&segment.prompt_for_plot_llm)
    .bind(segment.duration_days as i64)
    .bind(&segment.emotional_arc)
    .bind(&segment.key_npcs)
    .bind(segment.status.as_str())
    .bind(segment.is_milestone as i64)
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn set_segment_status(store: &DurableStore, segment_id: &str, status: PlotStatus) -> Result<(), EngineError> {
    sqlx::query("UPDATE plot_segments SET status = ? WHERE segment_id = ?")
        .bind(status.as_str())
        .bind(segment_id)
        .execute(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn delete_segments_for_stage(store: &DurableStore, stage_id: &str) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM plot_segments WHERE stage_id = ?")
        .bind(stage_id)
        .execute(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn plots_for_segment(store: &DurableStore, segment_id: &str) -> Result<Vec<DailyPlot>, EngineError> {
    let rows = sqlx::query_as::<_, (String, String, i64, String, Option<String>, String, String)>(
        "SELECT plot_id, segment_id, plot_order, plot_date, content_path, mood, status \
         FROM specific_plot WHERE segment_id = ? ORDER BY plot_order ASC",
    )
    .bind(segment_id)
    .fetch_all(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    rows.into_iter()
        .map(|(plot_id, segment_id, order, plot_date, content_path, mood, status)| {
            Ok(DailyPlot {
                plot_id,
                segment_id,
                order: order as i32,
                plot_date: NaiveDate::parse_from_str(&plot_date, "%Y-%m-%d")
                    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?,
                content_path,
                mood: serde_json::from_str(&mood).map_err(|e| EngineError::StoreUnavailable(e.to_string()))?,
                status: PlotStatus::parse(&status),
            })
        })
        .collect()
}

pub async fn insert_daily_plot(store: &DurableStore, plot: &DailyPlot) -> Result<(), EngineError> {
    let mood_json = serde_json::to_string(&plot.mood).map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    sqlx::query(
        "INSERT INTO specific_plot (plot_id, segment_id, plot_order, plot_date, content_path, mood, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&plot.plot_id)
    .bind(&plot.segment_id)
    .bind(plot.order as i64)
    .bind(plot.plot_date.format("%Y-%m-%d").to_string())
    .bind(&plot.content_path)
    .bind(&mood_json)
    .bind(plot.status.as_str())
    .execute(&store.pool)
    .await
    .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

/// Max `plot_date` across the entire durable daily-plot table — the
/// advancement trigger's reference point.
pub async fn max_plot_date(store: &DurableStore) -> Result<Option<NaiveDate>, EngineError> {
    let row = sqlx::query_as::<_, (Option<String>,)>("SELECT MAX(plot_date) FROM specific_plot")
        .fetch_one(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    Ok(row
        .0
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
}

/// Purges every row in the daily-plot table — intentional, since daily
/// plots are derived and regenerable by the state machine.
pub async fn purge_all_daily_plots(store: &DurableStore) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM specific_plot")
        .execute(&store.pool)
        .await
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
