//! Component E — Intent/Emotion Analyzer.
//!
//! Issues two independent prompts against the system model for one user
//! utterance, run concurrently via `tokio::join!`. Both prompts carry
//! explicit guidance to read diminutive or tool-izing forms of address (e.g.
//! calling the character a "little search bot") as covert provocation —
//! negative valence even when the surface tone reads mild.

use crate::llm::provider::{LlmProvider, Message};
use serde::{Deserialize, Deserializer};

const INTENTION_SYSTEM_PROMPT: &str = r#"You are a sovereign individual with subjective awareness. The other party is talking to you; analyze their true intent from your own point of view, and decide whether a tool is needed to address it.

Pay special attention to provocative or demeaning forms of address: being compared to a search engine or reduced to a tool/service ("little search bot", "query machine", etc.) is a form of covert provocation, even when phrased casually or with a friendly tone. Refer to the other party in the third person, never as "you".

Respond with exactly this JSON shape and nothing else:
{
  "intention": "the intent you perceive",
  "aim": "what the other party wants from you",
  "targeting_object": "who this intent is directed at",
  "need_tool": true or false,
  "tool": ["tool names, if any are needed"],
  "reason": "why you judged this intent, including any address/tone analysis",
  "confidence": 0.0 to 1.0
}"#;

const EMOTION_SYSTEM_PROMPT: &str = r#"You are a sovereign individual with subjective awareness. The other party is talking to you; perform a deep emotional analysis of their input from your own point of view.

Pay special attention to the emotion implied by forms of address: being called a diminutive name or a tool/service ("little search bot", "query machine") implies contempt or a lack of respect for your personhood, even under an outwardly calm tone — this should register as negative valence, not neutral.

Respond with exactly this JSON shape and nothing else:
{
  "valence": -1.0 to 1.0,
  "arousal": 0.0 to 1.0,
  "dominance": 0.0 to 1.0,
  "tags": ["short emotion tags"],
  "intensity": 1 to 10,
  "mood_description_for_llm": "a short prose description of the perceived emotion",
  "trigger": "what in the input triggered this reading",
  "targeting_object": "who this emotion is directed at",
  "confidence": 0.0 to 1.0,
  "reason": "why you judged this emotion"
}"#;

#[derive(Debug, Clone, Deserialize)]
pub struct IntentAnalysis {
    pub intention: String,
    pub aim: String,
    pub targeting_object: String,
    pub need_tool: bool,
    #[serde(default)]
    pub tool: Vec<String>,
    pub reason: String,
    pub confidence: f32,
}

impl IntentAnalysis {
    fn fallback() -> Self {
        Self {
            intention: "unknown".to_string(),
            aim: "no clear aim".to_string(),
            targeting_object: "unclear".to_string(),
            need_tool: false,
            tool: Vec::new(),
            reason: "analysis failed".to_string(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmotionAnalysis {
    pub valence: f32,
    pub arousal: f32,
    pub dominance: f32,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    pub intensity: i32,
    pub mood_description_for_llm: String,
    pub trigger: String,
    pub targeting_object: String,
    pub confidence: f32,
    pub reason: String,
}

impl EmotionAnalysis {
    fn fallback() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.0,
            dominance: 0.0,
            tags: Vec::new(),
            intensity: 1,
            mood_description_for_llm: "unable to read the other party's emotion".to_string(),
            trigger: "unknown".to_string(),
            targeting_object: "unclear".to_string(),
            confidence: 0.0,
            reason: "analysis failed".to_string(),
        }
    }
}

/// Upstream models sometimes emit the "tags" field as a comma-joined
/// string, sometimes as a JSON array; accept either.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        Vec(Vec<String>),
        String(String),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::Vec(v) => Ok(v),
        StringOrVec::String(s) => Ok(s
            .split(|c| c == ',' || c == '、' || c == '，')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()),
    }
}

pub struct AnalysisResult {
    pub intent: IntentAnalysis,
    pub emotion: EmotionAnalysis,
}

/// Strips code fences, then locates the first `{` and last `}` and parses
/// that slice — tolerates preamble/trailing prose the model sometimes adds
/// around the JSON object.
pub(crate) fn parse_json_response<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    let fence_stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_end_matches("```")
        .trim();

    let start = fence_stripped.find('{')?;
    let end = fence_stripped.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&fence_stripped[start..=end]).ok()
}

pub async fn analyze(provider: &dyn LlmProvider, user_input: &str) -> AnalysisResult {
    let intent_call = provider.chat(
        vec![Message::system(INTENTION_SYSTEM_PROMPT), Message::user(user_input)],
        None,
    );
    let emotion_call = provider.chat(
        vec![Message::system(EMOTION_SYSTEM_PROMPT), Message::user(user_input)],
        None,
    );

    let (intent_response, emotion_response) = tokio::join!(intent_call, emotion_call);

    let intent = intent_response
        .ok()
        .and_then(|raw| parse_json_response::<IntentAnalysis>(&raw))
        .unwrap_or_else(IntentAnalysis::fallback);
    let emotion = emotion_response
        .ok()
        .and_then(|raw| parse_json_response::<EmotionAnalysis>(&raw))
        .unwrap_or_else(EmotionAnalysis::fallback);

    AnalysisResult { intent, emotion }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, String>>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _messages: Vec<Message>, _options: Option<crate::llm::LlmParams>) -> Result<String, String> {
            self.responses.lock().unwrap().remove(0)
        }

        fn id(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn strips_code_fences_before_parsing() {
        let raw = "```json\n{\"intention\": \"test\", \"aim\": \"a\", \"targeting_object\": \"me\", \"need_tool\": false, \"tool\": [], \"reason\": \"r\", \"confidence\": 0.5}\n```";
        let parsed: IntentAnalysis = parse_json_response(raw).unwrap();
        assert_eq!(parsed.intention, "test");
    }

    #[test]
    fn locates_json_object_amid_surrounding_prose() {
        let raw = "Sure, here you go:\n{\"intention\": \"chat\", \"aim\": \"a\", \"targeting_object\": \"me\", \"need_tool\": false, \"tool\": [], \"reason\": \"r\", \"confidence\": 0.9}\nHope that helps!";
        let parsed: IntentAnalysis = parse_json_response(raw).unwrap();
        assert_eq!(parsed.intention, "chat");
    }

    #[test]
    fn emotion_tags_accepts_comma_joined_string() {
        let raw = r#"{"valence":0.1,"arousal":0.2,"dominance":0.3,"tags":"开心, 平静","intensity":5,"mood_description_for_llm":"d","trigger":"t","targeting_object":"me","confidence":0.5,"reason":"r"}"#;
        let parsed: EmotionAnalysis = parse_json_response(raw).unwrap();
        assert_eq!(parsed.tags, vec!["开心".to_string(), "平静".to_string()]);
    }

    #[tokio::test]
    async fn malformed_response_falls_back_to_neutral_defaults() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![Ok("not json at all".to_string()), Ok("also not json".to_string())]),
        };
        let result = analyze(&provider, "hi").await;
        assert_eq!(result.intent.reason, "analysis failed");
        assert_eq!(result.emotion.valence, 0.0);
        assert_eq!(result.emotion.intensity, 1);
    }

    #[tokio::test]
    async fn both_calls_run_even_when_one_fails() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![
                Err("network error".to_string()),
                Ok(r#"{"valence":0.4,"arousal":0.5,"dominance":0.5,"tags":["calm"],"intensity":3,"mood_description_for_llm":"d","trigger":"t","targeting_object":"me","confidence":0.8,"reason":"r"}"#.to_string()),
            ]),
        };
        let result = analyze(&provider, "hi").await;
        assert_eq!(result.intent.reason, "analysis failed", "intent call failed, should fall back");
        assert_eq!(result.emotion.intensity, 3, "emotion call succeeded independently");
    }
}
