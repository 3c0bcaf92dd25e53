//! Inline tool-call detection
//!
//! Engines without native function calling emit calls in their text as
//! `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`. The
//! scanner splits those out of a fragment stream, holding back anything
//! that might be the start of a tag.

use serde_json::{Map, Value};
use voice_loop_core::{GenerationFragment, ToolCallRequest};

use crate::LlmError;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

#[derive(Debug, Default)]
pub struct ToolCallScanner {
    buffer: String,
    in_call: bool,
}

impl ToolCallScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text fragment
    pub fn push(&mut self, text: &str) -> Result<Vec<GenerationFragment>, LlmError> {
        self.buffer.push_str(text);
        let mut out = Vec::new();

        loop {
            if self.in_call {
                let Some(end) = self.buffer.find(CLOSE_TAG) else {
                    break;
                };
                let request = parse_tool_call(&self.buffer[..end])?;
                self.buffer.drain(..end + CLOSE_TAG.len());
                self.in_call = false;
                out.push(GenerationFragment::ToolCall(request));
                continue;
            }

            if let Some(start) = self.buffer.find(OPEN_TAG) {
                if start > 0 {
                    out.push(GenerationFragment::Text(self.buffer[..start].to_string()));
                }
                self.buffer.drain(..start + OPEN_TAG.len());
                self.in_call = true;
                continue;
            }

            let emit = self.buffer.len() - partial_tag_len(&self.buffer);
            if emit > 0 {
                out.push(GenerationFragment::Text(self.buffer.drain(..emit).collect()));
            }
            break;
        }

        Ok(out)
    }

    /// Release held-back text before a structured tool call
    pub fn flush_text(&mut self) -> Option<GenerationFragment> {
        if self.in_call || self.buffer.is_empty() {
            return None;
        }
        Some(GenerationFragment::Text(std::mem::take(&mut self.buffer)))
    }

    /// End of stream
    pub fn finish(&mut self) -> Result<Option<GenerationFragment>, LlmError> {
        if self.in_call {
            return Err(LlmError::InvalidToolCall("unterminated tool call".to_string()));
        }
        Ok(self.flush_text())
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the open tag
fn partial_tag_len(text: &str) -> usize {
    (1..OPEN_TAG.len())
        .rev()
        .find(|&k| text.ends_with(&OPEN_TAG[..k]))
        .unwrap_or(0)
}

/// Parse a tool call body
///
/// Accepts `arguments` as an object or as a JSON-encoded string; a missing
/// `id` gets a fresh one.
pub fn parse_tool_call(body: &str) -> Result<ToolCallRequest, LlmError> {
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| LlmError::InvalidToolCall(format!("malformed JSON: {}", e)))?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| LlmError::InvalidToolCall("missing tool name".to_string()))?;

    let arguments = match value.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(LlmError::InvalidToolCall(format!(
                    "arguments for '{}' are not an object",
                    name
                )))
            },
        },
        Some(_) => {
            return Err(LlmError::InvalidToolCall(format!(
                "arguments for '{}' are not an object",
                name
            )))
        },
    };

    let request = ToolCallRequest::new(name, arguments);
    Ok(match value.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => request.with_id(id),
        _ => request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[GenerationFragment]) -> Vec<String> {
        items
            .iter()
            .filter_map(|f| match f {
                GenerationFragment::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut scanner = ToolCallScanner::new();
        let out = scanner.push("Hello there").unwrap();
        assert_eq!(texts(&out), vec!["Hello there"]);
        assert!(scanner.finish().unwrap().is_none());
    }

    #[test]
    fn test_tag_split_across_fragments() {
        let mut scanner = ToolCallScanner::new();
        let mut out = Vec::new();
        for piece in [
            "One sec. <tool",
            "_call>{\"name\": \"get_weather\", ",
            "\"arguments\": {\"location\": \"Paris\"}, \"id\": \"c1\"}</tool_",
            "call> trailing",
        ] {
            out.extend(scanner.push(piece).unwrap());
        }

        assert_eq!(texts(&out), vec!["One sec. ", " trailing"]);
        let call = out
            .iter()
            .find_map(|f| match f {
                GenerationFragment::ToolCall(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.id, "c1");
        assert_eq!(call.get_string("location"), Some("Paris"));
    }

    #[test]
    fn test_lone_angle_bracket_is_released() {
        let mut scanner = ToolCallScanner::new();
        assert!(scanner.push("a <").unwrap().iter().all(|f| f == &GenerationFragment::text("a ")));
        assert_eq!(scanner.push("b").unwrap(), vec![GenerationFragment::text("<b")]);
    }

    #[test]
    fn test_parse_variants() {
        let call = parse_tool_call(r#"{"name": "get_time"}"#).unwrap();
        assert!(call.arguments.is_empty());
        assert!(!call.id.is_empty());

        let call =
            parse_tool_call(r#"{"name": "get_weather", "arguments": "{\"location\": \"Oslo\"}"}"#)
                .unwrap();
        assert_eq!(call.get_string("location"), Some("Oslo"));

        assert!(parse_tool_call("{not json").is_err());
        assert!(parse_tool_call(r#"{"arguments": {}}"#).is_err());
        assert!(parse_tool_call(r#"{"name": "x", "arguments": [1]}"#).is_err());
    }

    #[test]
    fn test_unterminated_call_fails_on_finish() {
        let mut scanner = ToolCallScanner::new();
        scanner.push("<tool_call>{\"name\":").unwrap();
        assert!(matches!(scanner.finish(), Err(LlmError::InvalidToolCall(_))));
    }
}
