//! Component L — Plot Generator.
//!
//! Three model-driven authoring calls: one prompt produces an entire
//! ordered array of life stages in a single call, another produces a
//! stage's segments, a third walks a segment day by day writing prose to
//! an external file plus a structured mood record. Every call goes
//! through the same retry budget as the advancement state machine that
//! drives this module.

use crate::analyzer::parse_json_response;
use crate::llm::provider::{LlmProvider, Message};
use crate::mood::MoodVector;
use crate::plot::models::{new_id, LifeOutline, LifeStage, PlotSegment, PlotStatus, StageStatus};
use crate::plot::models::DailyPlot;
use crate::retry;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;

/// Designs a complete stage sequence for `outline`, from birth through
/// `current_age` or the outline's expected lifespan. At least 6 stages;
/// every stage starts `Locked` except the first, which starts `Active`.
pub async fn generate_stages(
    provider: &dyn LlmProvider,
    persona_text: &str,
    outline: &LifeOutline,
    current_age: i32,
) -> Result<Vec<LifeStage>, String> {
    let prompt = format!(
        "Design a complete sequence of life stages for this character, from birth \
         through their current age or expected lifespan.\n\n\
         Character: {}\nLife outline: {}\nOverall theme: {}\n\
         Birthday: {} (currently about {} years old)\nLife: {}/100\nWealth: {}\n\n\
         Design at least 6 stages, ordered from earliest to latest. Each stage needs:\n\
         - life_period: an age range like \"0-6\" or \"18-22\"\n\
         - title: a short name for the stage\n\
         - description: 150-300 words setting the tone for every plot segment in this stage\n\
         - goals: 100-200 words covering both external aims and internal growth\n\n\
         Respond with exactly this JSON shape and nothing else:\n\
         {{\"life_stages\": [{{\"life_period\": \"...\", \"title\": \"...\", \"description\": \"...\", \"goals\": \"...\"}}]}}",
        outline.role_name,
        outline.title,
        outline.overall_theme.as_deref().unwrap_or("unspecified"),
        outline.birthday,
        current_age,
        outline.life,
        outline.wealth,
    );

    #[derive(Deserialize)]
    struct StageDraft {
        life_period: String,
        title: String,
        description: String,
        goals: String,
    }
    #[derive(Deserialize)]
    struct StagesResponse {
        life_stages: Vec<StageDraft>,
    }

    let raw = retry::with_backoff(|| {
        provider.chat(vec![Message::system(persona_text), Message::user(prompt.clone())], None)
    })
    .await?;

    let parsed: StagesResponse =
        parse_json_response(&raw).ok_or_else(|| "unparseable life stage generation response".to_string())?;

    if parsed.life_stages.is_empty() {
        return Err("life stage generation returned no stages".to_string());
    }

    Ok(parsed
        .life_stages
        .into_iter()
        .enumerate()
        .map(|(i, draft)| LifeStage {
            stage_id: new_id(),
            outline_id: outline.outline_id.clone(),
            order: i as i32 + 1,
            life_period: draft.life_period,
            title: draft.title,
            description: Some(draft.description),
            goals: Some(draft.goals),
            status: if i == 0 { StageStatus::Active } else { StageStatus::Locked },
            summary: None,
        })
        .collect())
}

/// Authors 2-3 more stages continuing right after `last_stage`, for when
/// the stage sequence an outline started with has been fully lived
/// through. Ordered fields pick up at `next_order`; the first new stage
/// starts `Active`, the rest `Locked`.
pub async fn generate_continuation_stages(
    provider: &dyn LlmProvider,
    persona_text: &str,
    outline: &LifeOutline,
    last_stage: &LifeStage,
    next_order: i32,
) -> Result<Vec<LifeStage>, String> {
    let prompt = format!(
        "This character's life story continues past its current final stage. \
         Design 2 to 3 more stages picking up right after it.\n\n\
         Character: {}\nLast stage: {} ({})\nLast stage description: {}\n\n\
         Each stage needs:\n\
         - life_period: an age range like \"29-35\"\n\
         - title\n\
         - description: 150-300 words setting the tone for this stage's plot segments\n\
         - goals: 100-200 words\n\n\
         Respond with exactly this JSON shape and nothing else:\n\
         {{\"life_stages\": [{{\"life_period\": \"...\", \"title\": \"...\", \"description\": \"...\", \"goals\": \"...\"}}]}}",
        outline.role_name,
        last_stage.title,
        last_stage.life_period,
        last_stage.description.as_deref().unwrap_or(""),
    );

    #[derive(Deserialize)]
    struct StageDraft {
        life_period: String,
        title: String,
        description: String,
        goals: String,
    }
    #[derive(Deserialize)]
    struct StagesResponse {
        life_stages: Vec<StageDraft>,
    }

    let raw = retry::with_backoff(|| {
        provider.chat(vec![Message::system(persona_text), Message::user(prompt.clone())], None)
    })
    .await?;

    let parsed: StagesResponse =
        parse_json_response(&raw).ok_or_else(|| "unparseable stage continuation response".to_string())?;

    if parsed.life_stages.is_empty() {
        return Err("stage continuation generation returned no stages".to_string());
    }

    Ok(parsed
        .life_stages
        .into_iter()
        .enumerate()
        .map(|(i, draft)| LifeStage {
            stage_id: new_id(),
            outline_id: outline.outline_id.clone(),
            order: next_order + i as i32,
            life_period: draft.life_period,
            title: draft.title,
            description: Some(draft.description),
            goals: Some(draft.goals),
            status: if i == 0 { StageStatus::Active } else { StageStatus::Locked },
            summary: None,
        })
        .collect())
}

/// Designs 4-6 plot segments spanning `stage`. `past_life_summary` is the
/// external summary blob's contents, if one exists for the role yet.
pub async fn generate_segments(
    provider: &dyn LlmProvider,
    persona_text: &str,
    stage: &LifeStage,
    past_life_summary: Option<&str>,
) -> Result<Vec<PlotSegment>, String> {
    let summary_block = past_life_summary
        .map(|s| format!("\n\nPast-life summary so far:\n{s}"))
        .unwrap_or_default();

    let prompt = format!(
        "Design 4 to 6 plot segments covering the following life stage of this character.\n\n\
         Stage: {} ({})\nStage description: {}\nStage goals: {}{}\n\n\
         Each segment needs:\n\
         - title\n\
         - life_age: the character's age during this segment\n\
         - prompt_for_plot_llm: the seed prompt that day-by-day plots in this segment will be written from\n\
         - duration_days: how many days this segment spans\n\
         - emotional_arc\n\
         - key_npcs: comma-separated names\n\
         - is_milestone: true only for a segment marking a major turning point\n\n\
         Order the segments earliest to latest. Respond with exactly this JSON shape and nothing else:\n\
         {{\"segments\": [{{\"title\": \"...\", \"life_age\": 0, \"prompt_for_plot_llm\": \"...\", \"duration_days\": 0, \"emotional_arc\": \"...\", \"key_npcs\": \"...\", \"is_milestone\": false}}]}}",
        stage.title,
        stage.life_period,
        stage.description.as_deref().unwrap_or(""),
        stage.goals.as_deref().unwrap_or(""),
        summary_block,
    );

    #[derive(Deserialize)]
    struct SegmentDraft {
        title: String,
        life_age: i32,
        prompt_for_plot_llm: String,
        duration_days: i32,
        emotional_arc: String,
        key_npcs: String,
        #[serde(default)]
        is_milestone: bool,
    }
    #[derive(Deserialize)]
    struct SegmentsResponse {
        segments: Vec<SegmentDraft>,
    }

    let raw = retry::with_backoff(|| {
        provider.chat(vec![Message::system(persona_text), Message::user(prompt.clone())], None)
    })
    .await?;

    let parsed: SegmentsResponse =
        parse_json_response(&raw).ok_or_else(|| "unparseable segment generation response".to_string())?;

    if parsed.segments.is_empty() {
        return Err("segment generation returned no segments".to_string());
    }

    Ok(parsed
        .segments
        .into_iter()
        .enumerate()
        .map(|(i, draft)| PlotSegment {
            segment_id: new_id(),
            stage_id: stage.stage_id.clone(),
            order_in_stage: i as i32 + 1,
            title: draft.title,
            life_age: draft.life_age,
            prompt_for_plot_llm: Some(draft.prompt_for_plot_llm),
            duration_days: draft.duration_days.max(1),
            emotional_arc: Some(draft.emotional_arc),
            key_npcs: Some(draft.key_npcs),
            status: if i == 0 { PlotStatus::Active } else { PlotStatus::Locked },
            is_milestone: draft.is_milestone,
        })
        .collect())
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

/// Writes `segment.duration_days` daily plots, one model call per day,
/// each seeded by the previous day's content and mood. Plot text is
/// written to `<plot_root>/<role_id>_plot/<date>_<slug>.txt`; the
/// returned records carry the path and a structured mood reading, all
/// `Locked` except day 1 which starts `Active`.
pub async fn generate_daily_plots(
    provider: &dyn LlmProvider,
    persona_text: &str,
    segment: &PlotSegment,
    historical_events: Option<&str>,
    past_life_summary: Option<&str>,
    start_date: NaiveDate,
    plot_root: &Path,
    role_id: &str,
) -> Result<Vec<DailyPlot>, String> {
    let folder = plot_root.join(format!("{role_id}_plot"));
    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|e| format!("failed to create plot folder: {e}"))?;

    #[derive(Deserialize)]
    struct DayDraft {
        content: String,
        mood: MoodVector,
    }

    let mut plots = Vec::with_capacity(segment.duration_days.max(0) as usize);
    let mut previous_content: Option<String> = historical_events.map(|s| s.to_string());
    let mut previous_mood: Option<MoodVector> = None;

    for day in 1..=segment.duration_days {
        let date = start_date + chrono::Duration::days((day - 1) as i64);

        let mood_block = previous_mood
            .as_ref()
            .map(|m| {
                format!(
                    "\n\nYesterday's mood: valence {:.2}, arousal {:.2}, intensity {}, tags {}",
                    m.valence,
                    m.arousal,
                    m.intensity,
                    m.tags.join(", ")
                )
            })
            .unwrap_or_default();
        let history_block = previous_content
            .as_ref()
            .map(|s| format!("\n\nWhat happened so far:\n{s}"))
            .unwrap_or_default();
        let past_life_block = past_life_summary
            .map(|s| format!("\n\nPast-life summary:\n{s}"))
            .unwrap_or_default();

        let prompt = format!(
            "Write day {day} of {duration} in this plot segment, as lived scene not summary.\n\n\
             Segment: {title} (age {age})\nSeed prompt: {seed}{mood_block}{history_block}{past_life_block}\n\n\
             Respond with exactly this JSON shape and nothing else:\n\
             {{\"content\": \"...\", \"mood\": {{\"valence\": 0.0, \"arousal\": 0.0, \"intensity\": 5, \"tags\": [\"...\"], \"description\": \"...\"}}}}",
            day = day,
            duration = segment.duration_days,
            title = segment.title,
            age = segment.life_age,
            seed = segment.prompt_for_plot_llm.as_deref().unwrap_or(""),
        );

        let raw = retry::with_backoff(|| {
            provider.chat(vec![Message::system(persona_text), Message::user(prompt.clone())], None)
        })
        .await?;

        let draft: DayDraft = parse_json_response(&raw)
            .ok_or_else(|| format!("unparseable daily plot response for day {day}"))?;
        let mood = draft.mood.normalized();

        let file_name = format!("{}_{}.txt", date.format("%Y-%m-%d"), slugify(&segment.title));
        let path = folder.join(&file_name);
        tokio::fs::write(&path, &draft.content)
            .await
            .map_err(|e| format!("failed to write daily plot file {}: {e}", path.display()))?;

        plots.push(DailyPlot {
            plot_id: new_id(),
            segment_id: segment.segment_id.clone(),
            order: day,
            plot_date: date,
            content_path: Some(path.to_string_lossy().to_string()),
            mood: mood.clone(),
            status: if day == 1 { PlotStatus::Active } else { PlotStatus::Locked },
        });

        previous_content = Some(draft.content);
        previous_mood = Some(mood);
    }

    Ok(plots)
}
