//! Translation of `--output-format stream-json` lines into engine events.

use crate::engine::{EngineEvent, EngineResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(EngineEvent),
    /// A tool call, kept with its input so it can be gated before it is
    /// surfaced as `tool_start`.
    ToolUse { name: String, input: Value },
}

/// Blank lines and anything that is not a JSON object yield nothing.
pub fn parse_stream_line(line: &str) -> Vec<StreamItem> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Vec::new();
    };
    if !value.is_object() {
        return Vec::new();
    }

    match value.get("type").and_then(Value::as_str) {
        Some("system") => parse_system(&value).into_iter().collect(),
        Some("assistant") => parse_assistant(&value),
        Some("user") => parse_user(&value),
        Some("result") => vec![StreamItem::Event(EngineEvent::Result(parse_result(&value)))],
        _ => Vec::new(),
    }
}

fn parse_system(value: &Value) -> Option<StreamItem> {
    if value.get("subtype").and_then(Value::as_str) != Some("init") {
        return None;
    }
    let session_id = value.get("session_id").and_then(Value::as_str)?;
    Some(StreamItem::Event(EngineEvent::Init {
        session_id: session_id.to_string(),
    }))
}

fn content_blocks(value: &Value) -> &[Value] {
    value
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_assistant(value: &Value) -> Vec<StreamItem> {
    let mut items = Vec::new();
    for block in content_blocks(value) {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        items.push(StreamItem::Event(EngineEvent::Text {
                            text: text.to_string(),
                        }));
                    }
                }
            }
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                items.push(StreamItem::ToolUse { name, input });
            }
            _ => {}
        }
    }
    items
}

fn parse_user(value: &Value) -> Vec<StreamItem> {
    content_blocks(value)
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|_| StreamItem::Event(EngineEvent::ToolEnd))
        .collect()
}

fn parse_result(value: &Value) -> EngineResult {
    let mut errors: Vec<String> = value
        .get("errors")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| match entry.as_str() {
                    Some(text) => text.to_string(),
                    None => entry.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    let is_error = value.get("is_error").and_then(Value::as_bool) == Some(true);
    if is_error && errors.is_empty() {
        let subtype = value
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or("error");
        errors.push(subtype.to_string());
    }

    EngineResult {
        session_id: value
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        cost: value
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        turns: value
            .get("num_turns")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        result: value
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string),
        errors,
    }
}
