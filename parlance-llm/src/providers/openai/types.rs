//! Wire types for the OpenAI-compatible chat-completions API.

use serde::{Deserialize, Serialize};

use crate::{ChatMessage, ChatRole, CompletionDelta, FinishReason, ToolCallDelta, ToolSpec};

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct WireToolCallOut {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionOut,
}

#[derive(Debug, Serialize)]
pub(super) struct WireFunctionOut {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(super) struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireToolFunction,
}

#[derive(Debug, Serialize)]
pub(super) struct WireToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub(super) fn to_wire_message(message: &ChatMessage) -> WireMessage {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCallOut {
                    id: call.id.clone(),
                    kind: "function",
                    function: WireFunctionOut {
                        name: sanitize_function_name(&call.name),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        )
    };
    WireMessage {
        role,
        content: Some(message.content.clone()),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

pub(super) fn to_wire_tool(tool: &ToolSpec) -> WireTool {
    WireTool {
        kind: "function",
        function: WireToolFunction {
            name: sanitize_function_name(&tool.name),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Function names must match `[a-zA-Z0-9_-]`; anything else becomes a dash,
/// with runs deduplicated.
pub(super) fn sanitize_function_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_dash = c == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out
}

// ============================================================================
// RESPONSE
// ============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct ChunkResponse {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkToolCall {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletionChoice {
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletionToolCall {
    pub id: String,
    pub function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletionFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    pub message: String,
}

pub(super) fn parse_finish_reason(raw: &str) -> Option<FinishReason> {
    match raw {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

/// Flatten one SSE chunk into a delta; chunks with empty choices read as
/// None (they happen, and are skipped).
pub(super) fn chunk_to_delta(chunk: ChunkResponse) -> Option<CompletionDelta> {
    let choice = chunk.choices.into_iter().next()?;
    let mut delta = CompletionDelta::default();
    if let Some(d) = choice.delta {
        delta.content = d.content.filter(|c| !c.is_empty());
        for (position, call) in d.tool_calls.unwrap_or_default().into_iter().enumerate() {
            delta.tool_calls.push(ToolCallDelta {
                index: call.index.unwrap_or(position),
                id: call.id,
                name: call.function.as_ref().and_then(|f| f.name.clone()),
                arguments: call.function.and_then(|f| f.arguments),
            });
        }
    }
    delta.finish_reason = choice.finish_reason.as_deref().and_then(parse_finish_reason);
    if delta.content.is_none() && delta.tool_calls.is_empty() && delta.finish_reason.is_none() {
        None
    } else {
        Some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("update_claim"), "update_claim");
        assert_eq!(sanitize_function_name("multi_tool_use.parallel"), "multi_tool_use-parallel");
        assert_eq!(sanitize_function_name("a..b"), "a-b");
    }

    #[test]
    fn test_chunk_to_delta_content() {
        let chunk: ChunkResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Bonjour"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let delta = chunk_to_delta(chunk).unwrap();
        assert_eq!(delta.content.as_deref(), Some("Bonjour"));
        assert!(delta.tool_calls.is_empty());
    }

    #[test]
    fn test_chunk_to_delta_tool_call_fragment() {
        let chunk: ChunkResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"update_claim","arguments":"{\"fi"}}]}}]}"#,
        )
        .unwrap();
        let delta = chunk_to_delta(chunk).unwrap();
        assert_eq!(delta.tool_calls.len(), 1);
        assert_eq!(delta.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(delta.tool_calls[0].arguments.as_deref(), Some("{\"fi"));
    }

    #[test]
    fn test_empty_choices_skipped() {
        let chunk: ChunkResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(chunk_to_delta(chunk).is_none());
    }

    #[test]
    fn test_finish_reason_parsing() {
        assert_eq!(parse_finish_reason("length"), Some(FinishReason::Length));
        assert_eq!(
            parse_finish_reason("content_filter"),
            Some(FinishReason::ContentFilter)
        );
        assert_eq!(parse_finish_reason("weird"), None);
    }
}
