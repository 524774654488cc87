//! Tool Provider contract.
//!
//! A set of named tools, each with a JSON schema for arguments and an
//! invoke method. The real search/weather/maps adapters are out of scope
//! here; this module carries
//! the contract plus a small built-in datetime registry so the orchestrator's
//! tool-augmented path has something real to exercise end-to-end.

use crate::clock::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), data: None }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }
}

#[derive(Debug, Clone)]
pub struct ToolError(pub String);

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ToolError {}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParam>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ToolParam>;
    async fn invoke(&self, args: HashMap<String, String>) -> Result<ToolResult, ToolError>;
}

/// A tool call parsed out of a model response's `[TOOL_CALL:name|k=v]` tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub args: HashMap<String, String>,
}

const TOOL_CALL_TAG_PREFIX: &str = "[TOOL_CALL:";

/// Parses every `[TOOL_CALL:name|key=val|...]` tag out of `text`, returning
/// the tag-free text alongside the calls in the order they appeared.
pub fn parse_tool_calls(text: &str) -> (String, Vec<ToolCall>) {
    let mut result = text.to_string();
    let mut calls = Vec::new();

    while let Some(start) = result.rfind(TOOL_CALL_TAG_PREFIX) {
        let rest = &result[start..];
        let Some(end_bracket) = rest.find(']') else { break };
        let inner = &rest[TOOL_CALL_TAG_PREFIX.len()..end_bracket];
        let parts: Vec<&str> = inner.split('|').collect();

        if let Some(name) = parts.first() {
            let name = name.trim().to_string();
            let mut args = HashMap::new();
            for part in parts.iter().skip(1) {
                if let Some(eq_pos) = part.find('=') {
                    args.insert(part[..eq_pos].trim().to_string(), part[eq_pos + 1..].trim().to_string());
                }
            }
            calls.push(ToolCall { name, args });
        }

        let tag_end = start + end_bracket + 1;
        result = format!("{}{}", result[..start].trim_end(), if tag_end < result.len() { &result[tag_end..] } else { "" });
    }

    calls.reverse();
    (result.trim().to_string(), calls)
}

pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        self.handlers.insert(handler.name().to_string(), Arc::new(handler));
    }

    pub async fn invoke(&self, name: &str, args: HashMap<String, String>) -> Result<ToolResult, ToolError> {
        let handler = self.handlers.get(name).ok_or_else(|| ToolError(format!("unknown tool: {name}")))?;
        handler.invoke(args).await
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.handlers
            .values()
            .map(|h| ToolInfo { name: h.name().to_string(), description: h.description().to_string(), parameters: h.parameters() })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The instruction block attached to the system prompt when a turn is
    /// classified as needing tools. Empty when no tools are registered.
    pub fn generate_tool_prompt(&self) -> String {
        let tools = self.list();
        if tools.is_empty() {
            return String::new();
        }

        let mut lines = vec![
            "The following tools are available. To use one, include a tag in your reply:".to_string(),
            "[TOOL_CALL:tool_name|param1=value1|param2=value2]".to_string(),
            String::new(),
            "Available tools:".to_string(),
        ];

        for tool in &tools {
            if tool.parameters.is_empty() {
                lines.push(format!("- {}: {}. No parameters.", tool.name, tool.description));
            } else {
                let params: Vec<String> = tool
                    .parameters
                    .iter()
                    .map(|p| format!("{}({}, {})", p.name, p.description, if p.required { "required" } else { "optional" }))
                    .collect();
                lines.push(format!("- {}: {}. Params: {}", tool.name, tool.description, params.join(", ")));
            }
        }

        lines.push(String::new());
        lines.push("You may refuse to use a tool if your personality or mood doesn't want to help right now.".to_string());
        lines.join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the current date and time in the configured civil zone. The only
/// built-in tool wired up by default, since it needs no external adapter.
pub struct CurrentTimeTool {
    clock: Arc<Clock>,
}

impl CurrentTimeTool {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Returns the current date and time"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    async fn invoke(&self, _args: HashMap<String, String>) -> Result<ToolResult, ToolError> {
        let now = self.clock.now().await;
        Ok(ToolResult::ok_with_data(now.to_rfc3339(), serde_json::json!({ "now": now.to_rfc3339() })))
    }
}
