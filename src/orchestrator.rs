//! Component J — Turn Orchestrator.
//!
//! The per-utterance pipeline: analyze, recompute mood, decide tool
//! permission, assemble a system prompt, invoke the model (optionally
//! tool-augmented), filter leaks, and persist through the two-tier dialogue
//! log. Streaming and multi-modal dispatch (vision, image generation) are
//! dropped; every model call here returns a complete response in one shot.

use crate::analyzer;
use crate::clock::Clock;
use crate::dialogue::log::{DialogueLog, SenderType};
use crate::leak_filter;
use crate::llm::provider::{LlmProvider, Message};
use crate::mood::composition;
use crate::mood::{MoodStore, MoodVector};
use crate::persona::Persona;
use crate::plot::window;
use crate::thought_chain::{self, RecentLine};
use crate::tools::{parse_tool_calls, ToolRegistry};
use crate::config::EngineConfig;
use crate::error::EngineError;
use std::sync::Arc;
use std::time::Duration;

const PLOT_MOOD_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOOL_ROUNDS: u32 = 5;

const SEARCH_KEYWORDS: &[&str] = &["search", "google", "look up", "find out", "news", "headline"];
const TIME_KEYWORDS: &[&str] = &["what time", "what day", "current time", "what's the date", "today's date"];
const WEATHER_KEYWORDS: &[&str] = &["weather", "temperature outside", "forecast", "is it raining", "sunny"];
const MAP_KEYWORDS: &[&str] = &["map", "directions to", "where is", "how far is"];

/// Keyword classification into `needs_tools`. Search/news, weather, and map
/// keywords are one family; pure time queries are tracked as their own
/// category so they never get folded into "search" for logging purposes,
/// though both still flip the same boolean.
fn needs_tools(user_input: &str) -> bool {
    let lowered = user_input.to_lowercase();
    let all = SEARCH_KEYWORDS.iter().chain(TIME_KEYWORDS).chain(WEATHER_KEYWORDS).chain(MAP_KEYWORDS);
    all.into_iter().any(|kw| lowered.contains(kw))
}

/// Result of one turn, handed back to the HTTP layer verbatim.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub tools_used: Vec<String>,
    pub system_message: Option<String>,
    pub session_id: String,
}

pub struct Orchestrator {
    /// Serves the character's actual reply and its leak-filter regeneration.
    persona_provider: Arc<dyn LlmProvider>,
    /// Serves analysis, mood impact, and thought-chain calls.
    system_provider: Arc<dyn LlmProvider>,
    config: Arc<EngineConfig>,
    clock: Arc<Clock>,
    mood_store: Arc<MoodStore>,
    dialogue: Arc<DialogueLog>,
    tools: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(
        persona_provider: Arc<dyn LlmProvider>,
        system_provider: Arc<dyn LlmProvider>,
        config: Arc<EngineConfig>,
        clock: Arc<Clock>,
        mood_store: Arc<MoodStore>,
        dialogue: Arc<DialogueLog>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self { persona_provider, system_provider, config, clock, mood_store, dialogue, tools }
    }

    fn build_system_prompt(
        persona: &Persona,
        user_name: &str,
        mood: &MoodVector,
        plot_lines: &[String],
        monologue: &str,
        tool_guidance: &str,
    ) -> String {
        let mut prompt = persona.persona_text.clone();
        prompt.push_str(&format!("\n\nThe person talking to me goes by \"{user_name}\"."));
        prompt.push_str(&format!(
            "\n\nMy current mood: tags {}, intensity {}/10, valence {:.2}, arousal {:.2}. {}",
            mood.tags.join(", "),
            mood.intensity,
            mood.valence,
            mood.arousal,
            mood.description,
        ));

        if !plot_lines.is_empty() {
            prompt.push_str("\n\nWhat has happened in my day so far:");
            let last = plot_lines.len() - 1;
            for (i, line) in plot_lines.iter().enumerate() {
                if i == last {
                    prompt.push_str(&format!("\n- {line} (this moment)"));
                } else {
                    prompt.push_str(&format!("\n- {line}"));
                }
            }
        }

        prompt.push_str(
            "\n\nI never reveal my inner reasoning, strategy, or any meta-commentary about this \
             conversation. I never use parentheses to narrate a hidden evaluation of the other \
             party. Everything I say is spoken aloud, in character, as myself.",
        );

        prompt.push_str(&format!("\n\nMy private train of thought right now (never spoken aloud): {monologue}"));

        prompt.push_str(
            "\n\nI reply as myself, staying true to my personality and my current mood — including \
             refusing, deflecting, or answering curtly when that is what I would actually do.",
        );

        if !tool_guidance.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(tool_guidance);
            prompt.push_str("\n\nI am free to refuse to use a tool if my personality or mood doesn't want to help right now.");
        }

        prompt
    }

    async fn plain_call(&self, system_prompt: &str, user_input: &str) -> Result<String, String> {
        self.persona_provider
            .chat(vec![Message::system(system_prompt), Message::user(user_input)], None)
            .await
    }

    /// Tool-augmented, ReAct-style invocation: the model may emit
    /// `[TOOL_CALL:...]` tags, each of which is invoked and fed back as
    /// context for up to `MAX_TOOL_ROUNDS` rounds.
    async fn tool_augmented_call(
        &self,
        system_prompt: &str,
        user_input: &str,
        session_id: &str,
        now: chrono::DateTime<chrono::FixedOffset>,
        tools_used: &mut Vec<String>,
    ) -> Result<String, String> {
        let mut messages = vec![Message::system(system_prompt), Message::user(user_input)];

        for _round in 0..MAX_TOOL_ROUNDS {
            let response = self.persona_provider.chat(messages.clone(), None).await?;
            let (cleaned, calls) = parse_tool_calls(&response);
            if calls.is_empty() {
                return Ok(cleaned);
            }

            for call in calls {
                tools_used.push(call.name.clone());
                let args_value: serde_json::Value = serde_json::to_value(&call.args).unwrap_or_default();
                let result_value = match self.tools.invoke(&call.name, call.args.clone()).await {
                    Ok(result) => serde_json::json!({"success": result.success, "message": result.message, "data": result.data}),
                    Err(e) => serde_json::json!({"success": false, "message": e.to_string()}),
                };
                self.dialogue.append_tool_call(session_id, &call.name, args_value, result_value.clone(), now).await;
                messages.push(Message::user(format!("Tool \"{}\" returned: {}", call.name, result_value)));
            }
        }

        Ok(String::new())
    }

    /// Runs the full ten-step turn pipeline for one utterance.
    pub async fn handle_turn(
        &self,
        persona: &Persona,
        user_name: &str,
        session_id: &str,
        user_input: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let now = self.clock.now().await;

        // 1. Analyze.
        let analysis = analyzer::analyze(self.system_provider.as_ref(), user_input).await;

        // 2. Recompute mood. The composed value is held in memory until step
        // 6 succeeds; writing it through only then means a backpressure
        // rejection leaves the stored mood untouched, as required, without
        // delaying when the system prompt can use it.
        let current_mood = self.mood_store.get(&persona.role_id).await?;
        let plot_lines = window::resolve(&self.config, &persona.role_id, now);
        let plot_mood = thought_chain::mood_from_plot(
            self.system_provider.as_ref(),
            &persona.persona_text,
            &plot_lines,
            &current_mood,
            PLOT_MOOD_TIMEOUT,
        )
        .await;
        let user_impact = thought_chain::user_impact(self.system_provider.as_ref(), &persona.persona_text, &current_mood, user_input).await;
        let new_mood = composition::compose(&current_mood, &plot_mood, user_impact.as_ref());

        // 3. Decide tool permission.
        let wants_tools = needs_tools(user_input);

        // 4. Load recent dialogue.
        let history = self.dialogue.query(session_id, 10).await;
        let recent: Vec<RecentLine> = history
            .iter()
            .map(|m| RecentLine {
                sender_is_character: m.sender_type == SenderType::Agent,
                content: m.content.clone(),
                timestamp: m.timestamp,
            })
            .collect();
        let recent_window = thought_chain::recent_window(&recent, now);

        let monologue = thought_chain::compose(
            self.system_provider.as_ref(),
            &persona.persona_text,
            &new_mood,
            &analysis.intent,
            &analysis.emotion,
            &recent_window,
            user_input,
        )
        .await;

        // 5. Assemble system prompt.
        let tool_guidance = if wants_tools { self.tools.generate_tool_prompt() } else { String::new() };
        let system_prompt = Self::build_system_prompt(persona, user_name, &new_mood, &plot_lines, &monologue, &tool_guidance);

        // 6. Invoke model.
        let mut tools_used = Vec::new();
        let mut system_message = None;
        let call_result = if wants_tools && !self.tools.is_empty() {
            match self.tool_augmented_call(&system_prompt, user_input, session_id, now, &mut tools_used).await {
                Err(e) if e.starts_with("geo_restricted") => {
                    system_message = Some("the model provider restricted this request by region; continuing without tools".to_string());
                    self.plain_call(&system_prompt, user_input).await
                }
                other => other,
            }
        } else {
            self.plain_call(&system_prompt, user_input).await
        };

        let raw_response = match call_result {
            Ok(text) => text,
            Err(e) if e.starts_with("rate_limited") => {
                // Backpressure: mood and dialogue state stay untouched, so a
                // retry is indistinguishable from a fresh turn.
                return Ok(TurnOutcome {
                    response: String::new(),
                    tools_used: Vec::new(),
                    system_message: Some("the model provider is temporarily rate-limited, please try again shortly".to_string()),
                    session_id: session_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, role_id = %persona.role_id, "model call failed");
                system_message = Some("something went wrong reaching the model".to_string());
                String::new()
            }
        };

        // 7. Leak filter.
        let response = if raw_response.trim().is_empty() {
            raw_response
        } else if leak_filter::has_leak(&raw_response) {
            let strict_prompt = format!(
                "{system_prompt}\n\nMy previous draft leaked private reasoning inside parentheses. \
                 I will not do that again: no parenthetical asides about strategy, hidden evaluation, \
                 or anything not meant to be spoken aloud."
            );
            match self.plain_call(&strict_prompt, user_input).await {
                Ok(retry) if !retry.trim().is_empty() && !leak_filter::has_leak(&retry) => leak_filter::filter(&retry),
                _ => leak_filter::fallback_line(new_mood.intensity).to_string(),
            }
        } else {
            raw_response
        };

        // mood write-through (durable then hot), now that the call did not
        // get backpressured.
        self.mood_store.set(&persona.role_id, &new_mood).await?;
        if new_mood.tags != current_mood.tags || (new_mood.valence - current_mood.valence).abs() > f32::EPSILON {
            tracing::info!(
                role_id = %persona.role_id,
                from_tags = ?current_mood.tags,
                to_tags = ?new_mood.tags,
                from_valence = current_mood.valence,
                to_valence = new_mood.valence,
                "mood trajectory shift"
            );
        }

        // 8. Persist.
        self.dialogue.append(session_id, SenderType::User, user_input, now).await;
        if !response.trim().is_empty() {
            self.dialogue.append(session_id, SenderType::Agent, response.clone(), now).await;
        }

        // 9. Flush check.
        self.dialogue.maybe_flush(session_id).await?;

        // 10. Return.
        Ok(TurnOutcome { response, tools_used, system_message, session_id: session_id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::durable::DurableStore;
    use crate::store::hot::HotStore;
    use crate::tools::{ToolError, ToolHandler, ToolParam, ToolResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn offset() -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn persona() -> Persona {
        Persona {
            role_id: "chen_001".to_string(),
            role_name: "Chen".to_string(),
            age: 25,
            persona_text: "I am Chen, a sharp-tongued but loyal friend.".to_string(),
            initial_mood: MoodVector {
                valence: 0.0,
                arousal: 0.2,
                intensity: 4,
                tags: vec!["calm".to_string()],
                description: "steady".to_string(),
            },
        }
    }

    struct ScriptedProvider {
        responses: StdMutex<Vec<Result<String, String>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self { responses: StdMutex::new(responses) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _messages: Vec<Message>, _options: Option<crate::llm::LlmParams>) -> Result<String, String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(String::new())
            } else {
                responses.remove(0)
            }
        }
        fn id(&self) -> &str {
            "scripted"
        }
    }

    async fn fixture() -> (Arc<EngineConfig>, Arc<Clock>, Arc<MoodStore>, Arc<DialogueLog>, String) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.plot_root = dir.path().to_path_buf();
        let config = Arc::new(config);

        let hot = Arc::new(HotStore::new());
        let durable = Arc::new(DurableStore::connect("sqlite::memory:").await.unwrap());
        let clock = Arc::new(Clock::new(hot.clone(), 8 * 60, Duration::from_secs(60)));
        let mood_store = Arc::new(MoodStore::new(hot.clone(), durable.clone(), Duration::from_secs(60)));
        mood_store.set(&persona().role_id, &persona().initial_mood).await.unwrap();
        let dialogue = Arc::new(DialogueLog::new(hot, durable.clone()));

        let session = crate::dialogue::resolve_session(&durable, "alice", "chen_001", "Chen", false).await.unwrap();

        (config, clock, mood_store, dialogue, session.session_id)
    }

    fn json_responses(analysis_count: usize, mood_json: &str, reply: &str) -> Vec<Result<String, String>> {
        let mut v = Vec::new();
        for _ in 0..analysis_count {
            v.push(Ok(r#"{"intention":"chat","aim":"talk","targeting_object":"me","need_tool":false,"tool":[],"reason":"casual","confidence":0.7}"#.to_string()));
        }
        v.push(Ok(mood_json.to_string()));
        v.push(Ok(reply.to_string()));
        v
    }

    #[tokio::test]
    async fn plain_turn_returns_response_and_persists_both_messages() {
        let (config, clock, mood_store, dialogue, session_id) = fixture().await;

        // system_provider services: intent, emotion, plot-mood, user-impact, monologue (5 calls)
        let system = Arc::new(ScriptedProvider::new(vec![
            Ok(r#"{"intention":"chat","aim":"talk","targeting_object":"me","need_tool":false,"tool":[],"reason":"casual","confidence":0.7}"#.to_string()),
            Ok(r#"{"valence":0.2,"arousal":0.3,"dominance":0.4,"tags":["curious"],"intensity":4,"mood_description_for_llm":"mildly curious","trigger":"question","targeting_object":"me","confidence":0.6,"reason":"neutral"}"#.to_string()),
            Ok(r#"{"valence":0.1,"arousal":0.2,"intensity":4,"tags":["calm"],"description":"an ordinary day"}"#.to_string()),
            Ok(r#"{"impact_valence":0.1,"impact_arousal":0.1,"impact_tags":["warm"],"impact_intensity":4,"impact_description":"a friendly remark"}"#.to_string()),
            Ok("I feel at ease hearing that.".to_string()),
        ]));
        let persona_provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![Ok("Good to hear from you.".to_string())]));

        let orchestrator = Orchestrator::new(
            persona_provider,
            system,
            config,
            clock,
            mood_store.clone(),
            dialogue.clone(),
            Arc::new(ToolRegistry::new()),
        );

        let outcome = orchestrator.handle_turn(&persona(), "alice", &session_id, "hey there").await.unwrap();
        assert_eq!(outcome.response, "Good to hear from you.");
        assert!(outcome.system_message.is_none());
        assert!(outcome.tools_used.is_empty());

        let history = dialogue.query(&session_id, 10).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|m| m.sender_type == SenderType::User && m.content == "hey there"));
        assert!(history.iter().any(|m| m.sender_type == SenderType::Agent && m.content == "Good to hear from you."));

        let mood = mood_store.get(&persona().role_id).await.unwrap();
        assert!(mood.tags.contains(&"warm".to_string()) || mood.tags.contains(&"calm".to_string()));
    }

    #[tokio::test]
    async fn rate_limited_reply_leaves_mood_and_dialogue_untouched() {
        let (config, clock, mood_store, dialogue, session_id) = fixture().await;
        let before_mood = mood_store.get(&persona().role_id).await.unwrap();

        let mut responses = json_responses(2, r#"{"valence":0.1,"arousal":0.1,"intensity":4,"tags":["calm"],"description":"nothing new"}"#, "unused");
        responses.push(Ok(r#"{"impact_valence":0.0,"impact_arousal":0.0,"impact_tags":[],"impact_intensity":4,"impact_description":""}"#.to_string()));
        // Reorder: analysis x2, mood, user-impact, monologue; then the final call (persona reply) rate-limits.
        let system = Arc::new(ScriptedProvider::new(vec![
            Ok(r#"{"intention":"chat","aim":"talk","targeting_object":"me","need_tool":false,"tool":[],"reason":"casual","confidence":0.7}"#.to_string()),
            Ok(r#"{"valence":0.2,"arousal":0.3,"dominance":0.4,"tags":["curious"],"intensity":4,"mood_description_for_llm":"mildly curious","trigger":"question","targeting_object":"me","confidence":0.6,"reason":"neutral"}"#.to_string()),
            Ok(r#"{"valence":0.1,"arousal":0.1,"intensity":4,"tags":["calm"],"description":"nothing new"}"#.to_string()),
            Ok(r#"{"impact_valence":0.0,"impact_arousal":0.0,"impact_tags":[],"impact_intensity":4,"impact_description":""}"#.to_string()),
            Ok("a private thought".to_string()),
        ]));
        let persona_provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![Err("rate_limited: quota exceeded".to_string())]));

        let orchestrator = Orchestrator::new(
            persona_provider,
            system,
            config,
            clock,
            mood_store.clone(),
            dialogue.clone(),
            Arc::new(ToolRegistry::new()),
        );

        let outcome = orchestrator.handle_turn(&persona(), "alice", &session_id, "hello").await.unwrap();
        assert_eq!(outcome.response, "");
        assert!(outcome.system_message.unwrap().contains("rate-limited"));

        let history = dialogue.query(&session_id, 10).await;
        assert!(history.is_empty(), "backpressure must not persist the turn");

        let after_mood = mood_store.get(&persona().role_id).await.unwrap();
        assert_eq!(after_mood, before_mood, "backpressure must leave mood untouched");
    }

    struct LeakyOnceProvider {
        calls: StdMutex<u32>,
    }

    #[async_trait]
    impl LlmProvider for LeakyOnceProvider {
        async fn chat(&self, _messages: Vec<Message>, _options: Option<crate::llm::LlmParams>) -> Result<String, String> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok("Sure(he's pathetic, I'll play along) let's talk.".to_string())
            } else {
                Ok("Let's talk about it.".to_string())
            }
        }
        fn id(&self) -> &str {
            "leaky"
        }
    }

    #[tokio::test]
    async fn leaked_reply_triggers_one_regeneration() {
        let (config, clock, mood_store, dialogue, session_id) = fixture().await;
        let system = Arc::new(ScriptedProvider::new(json_responses(
            2,
            r#"{"valence":0.1,"arousal":0.1,"intensity":4,"tags":["calm"],"description":"nothing new"}"#,
            "unused",
        )));
        // insert the user-impact response between emotion and monologue calls
        {
            let mut r = system.responses.lock().unwrap();
            r.insert(3, Ok(r#"{"impact_valence":0.0,"impact_arousal":0.0,"impact_tags":[],"impact_intensity":4,"impact_description":""}"#.to_string()));
        }
        let persona_provider: Arc<dyn LlmProvider> = Arc::new(LeakyOnceProvider { calls: StdMutex::new(0) });

        let orchestrator = Orchestrator::new(persona_provider, system, config, clock, mood_store, dialogue.clone(), Arc::new(ToolRegistry::new()));

        let outcome = orchestrator.handle_turn(&persona(), "alice", &session_id, "hello").await.unwrap();
        assert_eq!(outcome.response, "Let's talk about it.");
        assert!(!outcome.response.contains("pathetic"));
    }

    struct EchoTimeTool;

    #[async_trait]
    impl ToolHandler for EchoTimeTool {
        fn name(&self) -> &str {
            "current_time"
        }
        fn description(&self) -> &str {
            "returns the time"
        }
        fn parameters(&self) -> Vec<ToolParam> {
            Vec::new()
        }
        async fn invoke(&self, _args: HashMap<String, String>) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok_with_data("noon", serde_json::json!({"now": "noon"})))
        }
    }

    struct ToolCallingProvider {
        calls: StdMutex<u32>,
    }

    #[async_trait]
    impl LlmProvider for ToolCallingProvider {
        async fn chat(&self, _messages: Vec<Message>, _options: Option<crate::llm::LlmParams>) -> Result<String, String> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok("Let me check. [TOOL_CALL:current_time]".to_string())
            } else {
                Ok("It's noon.".to_string())
            }
        }
        fn id(&self) -> &str {
            "tool-caller"
        }
    }

    #[tokio::test]
    async fn tool_augmented_turn_invokes_tool_and_logs_it() {
        let (config, clock, mood_store, dialogue, session_id) = fixture().await;
        let mut responses = vec![
            Ok(r#"{"intention":"ask time","aim":"know the time","targeting_object":"me","need_tool":true,"tool":["current_time"],"reason":"asked directly","confidence":0.9}"#.to_string()),
            Ok(r#"{"valence":0.1,"arousal":0.2,"dominance":0.4,"tags":["curious"],"intensity":4,"mood_description_for_llm":"curious","trigger":"question","targeting_object":"me","confidence":0.7,"reason":"neutral"}"#.to_string()),
            Ok(r#"{"valence":0.1,"arousal":0.1,"intensity":4,"tags":["calm"],"description":"nothing new"}"#.to_string()),
            Ok(r#"{"impact_valence":0.0,"impact_arousal":0.0,"impact_tags":[],"impact_intensity":4,"impact_description":""}"#.to_string()),
            Ok("wondering what time it is".to_string()),
        ];
        let system = Arc::new(ScriptedProvider::new(responses.drain(..).collect()));
        let persona_provider: Arc<dyn LlmProvider> = Arc::new(ToolCallingProvider { calls: StdMutex::new(0) });

        let mut registry = ToolRegistry::new();
        registry.register(EchoTimeTool);

        let orchestrator = Orchestrator::new(persona_provider, system, config, clock, mood_store, dialogue.clone(), Arc::new(registry));

        let outcome = orchestrator.handle_turn(&persona(), "alice", &session_id, "what time is it?").await.unwrap();
        assert_eq!(outcome.response, "It's noon.");
        assert_eq!(outcome.tools_used, vec!["current_time".to_string()]);

        let history = dialogue.query(&session_id, 10).await;
        assert!(history.iter().any(|m| m.sender_type == SenderType::Tool && m.tool_name.as_deref() == Some("current_time")));
    }

    #[test]
    fn needs_tools_matches_each_keyword_family() {
        assert!(needs_tools("can you search for the latest news?"));
        assert!(needs_tools("what's the weather like today?"));
        assert!(needs_tools("where is the nearest station, can you check the map?"));
        assert!(needs_tools("what time is it right now?"));
        assert!(!needs_tools("I just wanted to say hi"));
    }

    #[test]
    fn offset_sanity() {
        let now = offset().with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap();
        assert_eq!(now.timezone().local_minus_utc(), 8 * 3600);
    }
}
