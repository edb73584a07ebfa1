//! Best-effort repair of slightly-malformed JSON.
//!
//! Models occasionally emit argument JSON with a trailing comma, an
//! unterminated string, or missing closing brackets (often when the
//! completion was truncated). This scanner fixes exactly those shapes;
//! anything else is returned untouched for the caller's parser to reject.

/// Repair trailing commas, unterminated strings, and unclosed
/// brackets/braces. Idempotent on valid JSON.
pub fn repair_json(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }

    let mut out = String::with_capacity(trimmed.len() + 4);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in trimmed.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                // Drop a comma dangling before the closer
                trim_trailing_comma(&mut out);
                if stack.last() == Some(&c) {
                    stack.pop();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(s: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(s).is_ok()
    }

    #[test]
    fn test_valid_json_untouched() {
        let input = r#"{"field":"policy_number","value":"ABC123"}"#;
        assert_eq!(repair_json(input), input);
    }

    #[test]
    fn test_trailing_comma_in_object() {
        let repaired = repair_json(r#"{ "field": "policy_number", "value": "ABC123",}"#);
        assert!(parses(&repaired), "{repaired}");
    }

    #[test]
    fn test_trailing_comma_in_array() {
        let repaired = repair_json(r#"{"queries": ["a", "b",]}"#);
        assert!(parses(&repaired), "{repaired}");
    }

    #[test]
    fn test_truncated_closing_brackets() {
        let repaired = repair_json(r#"{"updates": [{"field": "a", "value": "b""#);
        assert!(parses(&repaired), "{repaired}");
    }

    #[test]
    fn test_unterminated_string() {
        let repaired = repair_json(r#"{"field": "policy_num"#);
        assert!(parses(&repaired), "{repaired}");
    }

    #[test]
    fn test_empty_input_becomes_object() {
        assert_eq!(repair_json(""), "{}");
        assert_eq!(repair_json("  "), "{}");
    }

    #[test]
    fn test_escaped_quotes_kept() {
        let input = r#"{"text": "she said \"hi\""}"#;
        let repaired = repair_json(input);
        assert!(parses(&repaired), "{repaired}");
        assert_eq!(repaired, input);
    }

    #[test]
    fn test_garbage_is_left_for_the_parser() {
        let repaired = repair_json("not json at all");
        assert!(!parses(&repaired));
    }
}
