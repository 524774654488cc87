//! Component F — Thought-Chain Composer.
//!
//! Produces a first-person inner monologue from persona, mood, analyzer
//! output, and recent dialogue, with a fallback prompt when any of those
//! inputs is missing. The monologue is scaffolding for the downstream
//! reply call; it is never instructed to reveal itself, and the
//! orchestrator strips it from anything shown to the user.

use crate::analyzer::{parse_json_response, EmotionAnalysis, IntentAnalysis};
use crate::llm::provider::{LlmProvider, Message};
use crate::mood::composition::UserImpact;
use crate::mood::MoodVector;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecentLine {
    pub sender_is_character: bool,
    pub content: String,
    pub timestamp: DateTime<FixedOffset>,
}

/// Filters to the last 10 minutes, most recent 10 messages, oldest→newest,
/// capped at 20 overall — the window the composer is allowed to see.
pub fn recent_window(history: &[RecentLine], now: DateTime<FixedOffset>) -> Vec<RecentLine> {
    let cutoff = now - chrono::Duration::minutes(10);
    let mut within_window: Vec<RecentLine> = history.iter().filter(|m| m.timestamp >= cutoff).cloned().collect();
    within_window.sort_by_key(|m| m.timestamp);
    let len = within_window.len();
    if len > 10 {
        within_window = within_window.split_off(len - 10);
    }
    within_window.truncate(20);
    within_window
}

fn build_system_prompt(persona_text: &str, mood: &MoodVector, has_history: bool) -> String {
    let mut prompt = String::from(
        "I am the inner thinking of a sovereign, self-aware individual. The other party is speaking to me; \
         I just analyzed their intent and emotion, and my task now is to produce a short first-person train of \
         thought from my own subjective point of view. This thought will steer my own brain's decision about \
         how to respond — it analyzes nothing further, it just sets direction. Refer to the other party in the \
         third person, never as \"you\".\n\nWrite only the train of thought, no explanation.",
    );

    prompt.push_str("\n\nMy personality and background:\n");
    prompt.push_str(persona_text);

    if has_history {
        prompt.push_str(
            "\n\nI should read the current turn against our recent history: keep continuity with what we already \
             discussed, notice any shift in the other party's tone or stance, and let my thinking carry the sense \
             that this is not our first conversation.",
        );
    }

    prompt.push_str(&format!(
        "\n\nMy current mood:\n- tags: {}\n- intensity: {}/10\n- valence: {:.2} (negative is unpleasant, positive is pleasant)\n- arousal: {:.2} (0 calm, 1 agitated)\n- how I feel: {}",
        mood.tags.join(", "),
        mood.intensity,
        mood.valence,
        mood.arousal,
        mood.description,
    ));

    prompt
}

fn build_analysis_input(
    user_input: &str,
    intent: &IntentAnalysis,
    emotion: &EmotionAnalysis,
    mood: &MoodVector,
    recent: &[RecentLine],
) -> String {
    let mut text = format!(
        "I just analyzed the other party's intent and emotion:\n\n\
         Intent:\n- intention: {}\n- aim: {}\n- targeting_object: {}\n- need_tool: {}\n- reason: {}\n- confidence: {:.2}\n\n\
         Emotion:\n- valence: {:.2}\n- arousal: {:.2}\n- dominance: {:.2}\n- tags: {}\n- intensity: {}\n- description: {}\n- trigger: {}\n- confidence: {:.2}\n\n\
         My own current mood: tags {}, intensity {}/10, {}",
        intent.intention,
        intent.aim,
        intent.targeting_object,
        intent.need_tool,
        intent.reason,
        intent.confidence,
        emotion.valence,
        emotion.arousal,
        emotion.dominance,
        emotion.tags.join(", "),
        emotion.intensity,
        emotion.mood_description_for_llm,
        emotion.trigger,
        emotion.confidence,
        mood.tags.join(", "),
        mood.intensity,
        mood.description,
    );

    if !recent.is_empty() {
        text.push_str("\n\nOur recent conversation:");
        for (i, line) in recent.iter().enumerate() {
            let speaker = if line.sender_is_character { "me" } else { "them" };
            text.push_str(&format!("\n{}. {speaker}: {}", i + 1, truncate(&line.content, 100)));
        }
    }

    text.push_str(&format!(
        "\n\nThe other party just said: \"{}\"\n\nGiven my personality, my current mood, and this analysis, produce a short, subjective, emotionally colored train of thought that will steer my response.",
        user_input
    ));

    text
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max_chars).collect();
        truncated.push_str("...");
        truncated
    }
}

fn fallback_prompt(
    user_input: &str,
    persona_text: &str,
    intent: &IntentAnalysis,
    emotion: &EmotionAnalysis,
    recent: &[RecentLine],
) -> String {
    let mut prompt = format!(
        "Based on my personality and background, I need to subjectively watch the other party and read their intent and emotion:\n\n\
         My personality and background:\n{persona_text}\n\n\
         They said: \"{user_input}\"\n\n\
         I read their intent as {}, their emotional state as {}, at an intensity of {} out of 10. {}.",
        intent.intention,
        emotion.tags.join(", "),
        emotion.intensity,
        emotion.mood_description_for_llm,
    );

    if !recent.is_empty() {
        prompt.push_str("\n\nThinking back on our recent conversation, I remember:");
        for line in recent.iter().rev().take(3) {
            let speaker = if line.sender_is_character { "I said" } else { "they said" };
            prompt.push_str(&format!("\n- {speaker}: {}", truncate(&line.content, 100)));
        }
    }

    prompt
}

pub async fn compose(
    provider: &dyn LlmProvider,
    persona_text: &str,
    mood: &MoodVector,
    intent: &IntentAnalysis,
    emotion: &EmotionAnalysis,
    recent: &[RecentLine],
    user_input: &str,
) -> String {
    let system_prompt = build_system_prompt(persona_text, mood, !recent.is_empty());
    let analysis_input = build_analysis_input(user_input, intent, emotion, mood, recent);

    match provider
        .chat(vec![Message::system(system_prompt), Message::user(analysis_input)], None)
        .await
    {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => fallback_prompt(user_input, persona_text, intent, emotion, recent),
    }
}

#[derive(Debug, Deserialize)]
struct MoodDraft {
    valence: f32,
    arousal: f32,
    intensity: u8,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    description: String,
}

impl MoodDraft {
    fn into_mood(self) -> MoodVector {
        MoodVector {
            valence: self.valence,
            arousal: self.arousal,
            intensity: self.intensity,
            tags: self.tags,
            description: self.description,
        }
        .normalized()
    }
}

const MOOD_UPDATE_SYSTEM_PROMPT: &str = r#"You are a sovereign individual with subjective awareness, reading the events unfolding in your own life right now. Given your personality and the plot events below, judge how those events alone would leave you feeling, setting aside anything the other party has said to you.

Respond with exactly this JSON shape and nothing else:
{
  "valence": -1.0 to 1.0,
  "arousal": 0.0 to 1.0,
  "intensity": 1 to 10,
  "tags": ["short mood tags"],
  "description": "a short prose description of this mood"
}"#;

/// Reads what is currently happening in a character's life and produces the
/// plot-derived mood term `P` via a single structured-output call. Bounded
/// by `timeout`; on timeout, provider failure, or an unparseable response,
/// `current_mood` passes through unchanged rather than guessing.
pub async fn mood_from_plot(
    provider: &dyn LlmProvider,
    persona_text: &str,
    plot_window: &[String],
    current_mood: &MoodVector,
    timeout: Duration,
) -> MoodVector {
    if plot_window.is_empty() {
        return current_mood.clone();
    }

    let system_prompt = format!("{MOOD_UPDATE_SYSTEM_PROMPT}\n\nMy personality and background:\n{persona_text}");
    let user_prompt = format!("What is happening right now in my life:\n{}", plot_window.join("\n"));
    let call = provider.chat(vec![Message::system(system_prompt), Message::user(user_prompt)], None);

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(raw)) => parse_json_response::<MoodDraft>(&raw)
            .map(MoodDraft::into_mood)
            .unwrap_or_else(|| current_mood.clone()),
        _ => current_mood.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct UserImpactDraft {
    impact_valence: f32,
    impact_arousal: f32,
    #[serde(default)]
    impact_tags: Vec<String>,
    impact_intensity: i32,
    #[serde(default)]
    impact_description: String,
}

impl UserImpactDraft {
    fn into_impact(self) -> UserImpact {
        UserImpact {
            impact_valence: self.impact_valence.clamp(-1.0, 1.0),
            impact_arousal: self.impact_arousal.clamp(0.0, 1.0),
            impact_tags: self.impact_tags,
            impact_intensity: self.impact_intensity.clamp(1, 10),
            impact_description: self.impact_description,
        }
    }
}

const USER_IMPACT_SYSTEM_PROMPT: &str = r#"You are a sovereign individual with subjective awareness. Judge specifically how what the other party just said affects your own feelings right now, separate from anything already going on in your life.

Respond with exactly this JSON shape and nothing else:
{
  "impact_valence": -1.0 to 1.0,
  "impact_arousal": 0.0 to 1.0,
  "impact_tags": ["short tags for this impact"],
  "impact_intensity": 1 to 10,
  "impact_description": "a short prose description of how this affected me"
}"#;

/// The dedicated user-impact sub-analysis producing `U`. Returns `None` on
/// provider failure or an unparseable response; the composer then leaves the
/// user-driven term out of the blend rather than fabricating a neutral one.
pub async fn user_impact(
    provider: &dyn LlmProvider,
    persona_text: &str,
    mood: &MoodVector,
    user_input: &str,
) -> Option<UserImpact> {
    let system_prompt = format!(
        "{USER_IMPACT_SYSTEM_PROMPT}\n\nMy personality and background:\n{persona_text}\n\nMy current mood: tags {}, intensity {}/10, {}",
        mood.tags.join(", "),
        mood.intensity,
        mood.description,
    );

    let raw = provider
        .chat(vec![Message::system(system_prompt), Message::user(user_input)], None)
        .await
        .ok()?;
    parse_json_response::<UserImpactDraft>(&raw).map(UserImpactDraft::into_impact)
}
