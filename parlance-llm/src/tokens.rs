//! Context-window budgeting.
//!
//! Token counts are estimated at four characters per token, which is
//! conservative for European languages and close enough for window
//! selection; the hard cap of 20 history messages does most of the work of
//! keeping turns fast.

use crate::{ChatMessage, ToolSpec};

const CHARS_PER_TOKEN: usize = 4;

/// Hard cap on history messages per prompt, for latency and to keep the
/// model from anchoring on stale context.
pub const MAX_PROMPT_MESSAGES: usize = 20;

/// Estimate the token cost of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn message_tokens(message: &ChatMessage) -> usize {
    let mut total = estimate_tokens(&message.content) + 4;
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name) + estimate_tokens(&call.arguments) + 4;
    }
    total
}

/// Select the newest history messages that fit the context window.
///
/// `system` and `tools` are always included in the budget; history is taken
/// newest-first until the window (minus the completion reservation) or the
/// message cap is reached, then re-ordered oldest-first.
pub fn window_messages(
    context_window: usize,
    max_completion_tokens: usize,
    system: &[ChatMessage],
    history: &[ChatMessage],
    tools: &[ToolSpec],
) -> Vec<ChatMessage> {
    let budget = context_window.saturating_sub(max_completion_tokens);
    let mut used: usize = system.iter().map(message_tokens).sum();
    for tool in tools {
        used += estimate_tokens(&tool.name)
            + estimate_tokens(&tool.description)
            + estimate_tokens(&tool.parameters.to_string());
    }

    let mut selected: Vec<ChatMessage> = Vec::new();
    for message in history.iter().rev() {
        if selected.len() + system.len() >= MAX_PROMPT_MESSAGES {
            break;
        }
        let cost = message_tokens(message);
        if used + cost >= budget {
            break;
        }
        used += cost;
        selected.push(message.clone());
    }
    selected.reverse();

    let mut prompt = system.to_vec();
    prompt.extend(selected);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_window_keeps_newest_history() {
        let system = vec![ChatMessage::system("sys")];
        let history: Vec<_> = (0..50)
            .map(|i| ChatMessage::user(format!("message number {i} with some padding text")))
            .collect();
        let prompt = window_messages(400, 100, &system, &history, &[]);

        assert_eq!(prompt[0].content, "sys");
        // Newest message survives, oldest does not
        assert!(prompt.iter().any(|m| m.content.contains("number 49")));
        assert!(!prompt.iter().any(|m| m.content.contains("number 0 ")));
        // Order is chronological after the system block
        let positions: Vec<_> = prompt[1..]
            .iter()
            .map(|m| {
                m.content
                    .split_whitespace()
                    .nth(2)
                    .unwrap()
                    .parse::<usize>()
                    .unwrap()
            })
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_message_cap_applies() {
        let system = vec![ChatMessage::system("s")];
        let history: Vec<_> = (0..100).map(|i| ChatMessage::user(format!("{i}"))).collect();
        let prompt = window_messages(1_000_000, 0, &system, &history, &[]);
        assert_eq!(prompt.len(), MAX_PROMPT_MESSAGES);
    }

    #[test]
    fn test_tools_consume_budget() {
        let system = vec![ChatMessage::system("sys")];
        let history = vec![ChatMessage::user("hello there, how are you today")];
        let big_tool = ToolSpec {
            name: "update_claim".to_string(),
            description: "x".repeat(4000),
            parameters: serde_json::json!({}),
        };
        let prompt = window_messages(1000, 100, &system, &history, &[big_tool]);
        // The tool description ate the whole window; only system remains
        assert_eq!(prompt.len(), 1);
    }
}
