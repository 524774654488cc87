//! Component K — Life-Story State Machine.
//!
//! Drives the stage/segment/daily-plot hierarchy forward as time passes.
//! Generalized from "recompute every stage's status from age" to a
//! purge-advance-regenerate sequence (daily plots are derived content,
//! not facts to preserve).
//! Transitions for one outline are serialized behind a per-outline lock;
//! concurrent triggers for the same outline observe linearized advancement.

use crate::llm::provider::LlmProvider;
use crate::plot::generator;
use crate::plot::models::{self, LifeOutline, LifeStage, PlotSegment, PlotStatus, StageStatus};
use crate::store::durable::DurableStore;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct StateMachine {
    store: Arc<DurableStore>,
    plot_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateMachine {
    pub fn new(store: Arc<DurableStore>, plot_root: PathBuf) -> Self {
        Self { store, plot_root, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, outline_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(outline_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// `now.date > max(plot_date) across durable daily plots` — also fires
    /// when no daily plot has ever been generated, covering the first
    /// warm-up.
    pub fn should_advance(now: NaiveDate, max_plot_date: Option<NaiveDate>) -> bool {
        match max_plot_date {
            Some(max_date) => now > max_date,
            None => true,
        }
    }

    /// Deletes every daily-plot row and every external plot text file for
    /// every role. Daily plots are derived content; nothing of record is
    /// lost by regenerating them.
    pub async fn purge_all(&self) -> Result<(), String> {
        models::purge_all_daily_plots(&self.store).await.map_err(|e| e.to_string())?;

        let mut entries = match tokio::fs::read_dir(&self.plot_root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with("_plot") {
                continue;
            }
            let mut files = match tokio::fs::read_dir(&path).await {
                Ok(files) => files,
                Err(_) => continue,
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let file_path = file.path();
                if file_path.extension().is_some_and(|ext| ext == "txt") {
                    let _ = tokio::fs::remove_file(&file_path).await;
                }
            }
        }
        Ok(())
    }

    /// Advances the single outline identified by `outline`, under its
    /// advisory lock. A model-call failure anywhere in the regeneration
    /// step leaves the outline's stage/segment statuses exactly as they
    /// were read at the start of this call — regenerated rows are only
    /// inserted once every required model call for this step has
    /// succeeded.
    pub async fn advance_for_outline(
        &self,
        provider: &dyn LlmProvider,
        persona_text: &str,
        outline: &LifeOutline,
        current_age: i32,
        past_life_summary: Option<&str>,
        now: NaiveDate,
    ) -> Result<(), String> {
        let lock = self.lock_for(&outline.outline_id).await;
        let _guard = lock.lock().await;

        self.purge_all().await?;

        let stages = models::stages_for_outline(&self.store, &outline.outline_id).await.map_err(|e| e.to_string())?;
        let Some(active_stage) = stages.iter().find(|s| s.status == StageStatus::Active).cloned() else {
            return Ok(());
        };

        let segments = models::segments_for_stage(&self.store, &active_stage.stage_id).await.map_err(|e| e.to_string())?;

        if segments.is_empty() {
            return self.regenerate_segments_and_plots(provider, persona_text, outline, &active_stage, current_age, past_life_summary, now).await;
        }

        let active_segment = segments.iter().find(|s| s.status == PlotStatus::Active).cloned();
        let Some(active_segment) = active_segment else {
            return Ok(());
        };

        let sibling = segments
            .iter()
            .find(|s| s.order_in_stage == active_segment.order_in_stage + 1 && s.status == PlotStatus::Locked)
            .cloned();

        if let Some(sibling) = sibling {
            models::set_segment_status(&self.store, &active_segment.segment_id, PlotStatus::Completed)
                .await
                .map_err(|e| e.to_string())?;
            models::set_segment_status(&self.store, &sibling.segment_id, PlotStatus::Active)
                .await
                .map_err(|e| e.to_string())?;

            let completed: Vec<PlotSegment> = segments
                .iter()
                .filter(|s| s.status == PlotStatus::Completed || s.segment_id == active_segment.segment_id)
                .cloned()
                .collect();
            let historical = historical_events_text(&completed);

            let plots = generator::generate_daily_plots(
                provider,
                persona_text,
                &sibling,
                historical.as_deref(),
                past_life_summary,
                now,
                &self.plot_root,
                &outline.role_id,
            )
            .await?;
            for plot in &plots {
                models::insert_daily_plot(&self.store, plot).await.map_err(|e| e.to_string())?;
            }
            return Ok(());
        }

        // No locked sibling: the active stage is exhausted, advance the stage.
        models::set_stage_status(&self.store, &active_stage.stage_id, StageStatus::Completed)
            .await
            .map_err(|e| e.to_string())?;
        models::delete_segments_for_stage(&self.store, &active_stage.stage_id).await.map_err(|e| e.to_string())?;

        let sibling_stage = stages.iter().find(|s| s.order == active_stage.order + 1 && s.status == StageStatus::Locked).cloned();

        let new_active_stage = match sibling_stage {
            Some(sibling_stage) => {
                models::set_stage_status(&self.store, &sibling_stage.stage_id, StageStatus::Active)
                    .await
                    .map_err(|e| e.to_string())?;
                sibling_stage
            }
            None => {
                let last_order = stages.iter().map(|s| s.order).max().unwrap_or(active_stage.order);
                let new_stages = generator::generate_continuation_stages(provider, persona_text, outline, &active_stage, last_order + 1).await?;
                for stage in &new_stages {
                    models::insert_stage(&self.store, stage).await.map_err(|e| e.to_string())?;
                }
                new_stages.into_iter().next().expect("continuation generation guarantees at least one stage")
            }
        };

        self.regenerate_segments_and_plots(provider, persona_text, outline, &new_active_stage, current_age, past_life_summary, now).await
    }

    /// Step 4: author 4-6 segments for `stage`, apply the age-based
    /// activation rule, then author daily plots for whichever segment
    /// comes out Active.
    async fn regenerate_segments_and_plots(
        &self,
        provider: &dyn LlmProvider,
        persona_text: &str,
        outline: &LifeOutline,
        stage: &LifeStage,
        current_age: i32,
        past_life_summary: Option<&str>,
        now: NaiveDate,
    ) -> Result<(), String> {
        let mut segments = generator::generate_segments(provider, persona_text, stage, past_life_summary).await?;
        apply_age_based_segment_status(&mut segments, current_age);

        let Some(active_segment) = segments.iter().find(|s| s.status == PlotStatus::Active).cloned() else {
            for segment in &segments {
                models::insert_segment(&self.store, segment).await.map_err(|e| e.to_string())?;
            }
            return Ok(());
        };

        let completed: Vec<PlotSegment> = segments.iter().filter(|s| s.status == PlotStatus::Completed).cloned().collect();
        let historical = historical_events_text(&completed);

        let plots = generator::generate_daily_plots(
            provider,
            persona_text,
            &active_segment,
            historical.as_deref(),
            past_life_summary,
            now,
            &self.plot_root,
            &outline.role_id,
        )
        .await?;

        for segment in &segments {
            models::insert_segment(&self.store, segment).await.map_err(|e| e.to_string())?;
        }
        for plot in &plots {
            models::insert_daily_plot(&self.store, plot).await.map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// `life_age < current_age` completes a segment, the smallest-order
/// segment at `life_age == current_age` goes Active, everything else
/// stays (or becomes) Locked.
fn apply_age_based_segment_status(segments: &mut [PlotSegment], current_age: i32) {
    let active_order = segments
        .iter()
        .filter(|s| s.life_age == current_age)
        .map(|s| s.order_in_stage)
        .min();

    for segment in segments.iter_mut() {
        segment.status = if segment.life_age < current_age {
            PlotStatus::Completed
        } else if segment.life_age > current_age {
            PlotStatus::Locked
        } else if Some(segment.order_in_stage) == active_order {
            PlotStatus::Active
        } else {
            PlotStatus::Locked
        };
    }
}

fn historical_events_text(completed: &[PlotSegment]) -> Option<String> {
    if completed.is_empty() {
        return None;
    }
    Some(
        completed
            .iter()
            .map(|s| format!("{}: {}", s.title, s.emotional_arc.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
