//! Decoder for the newline-delimited JSON the agent CLI prints with
//! `--output-format stream-json`.
//!
//! Each line is one message tagged by `type`:
//! `system` (session metadata), `assistant` and `user` (content blocks),
//! and `result` (final summary). Content blocks are translated into
//! [`AgentEvent`]s; everything else is logged.

use serde_json::Value;
use tracing::{debug, info};

use crate::events::AgentEvent;

#[derive(Debug, Default)]
pub struct StreamJsonDecoder {
    lines: usize,
    saw_result: bool,
    session_id: Option<String>,
}

impl StreamJsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminal `result` message has been decoded.
    pub fn saw_result(&self) -> bool {
        self.saw_result
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn decode_line(&mut self, line: &str) -> Vec<AgentEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        self.lines += 1;

        let message = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => {
                return vec![AgentEvent::error(format!(
                    "malformed runtime event: expected a JSON object, got `{}`",
                    truncate_for_log(&other.to_string())
                ))];
            }
            Err(error) => {
                return vec![AgentEvent::error(format!(
                    "malformed runtime event: {error} (line `{}`)",
                    truncate_for_log(line)
                ))];
            }
        };

        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
        match kind.as_str() {
            "system" => {
                self.decode_system(&message);
                Vec::new()
            }
            "assistant" | "user" => decode_content_message(&kind, &message),
            "result" => self.decode_result(&message),
            "" => vec![AgentEvent::Unknown { kind: "untyped".to_string(), payload: message }],
            _ => vec![AgentEvent::Unknown { kind: kind.clone(), payload: message }],
        }
    }

    fn decode_system(&mut self, message: &Value) {
        let subtype = message.get("subtype").and_then(Value::as_str).unwrap_or("unknown");
        if let Some(session_id) = message.get("session_id").and_then(Value::as_str) {
            self.session_id = Some(session_id.to_string());
        }
        let model = message.get("model").and_then(Value::as_str).unwrap_or("");
        debug!(
            event_name = "agent.stream.system",
            subtype,
            session_id = self.session_id.as_deref().unwrap_or(""),
            model,
            "runtime system message"
        );
    }

    fn decode_result(&mut self, message: &Value) -> Vec<AgentEvent> {
        self.saw_result = true;

        let subtype = message.get("subtype").and_then(Value::as_str).unwrap_or("success");
        let is_error = message.get("is_error").and_then(Value::as_bool).unwrap_or(false)
            || subtype.starts_with("error");

        let num_turns = message.get("num_turns").and_then(Value::as_u64).unwrap_or(0);
        let duration_ms = message.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
        let total_cost_usd = message.get("total_cost_usd").and_then(Value::as_f64).unwrap_or(0.0);
        info!(
            event_name = "agent.stream.result",
            subtype,
            is_error,
            num_turns,
            duration_ms,
            total_cost_usd,
            lines = self.lines,
            "runtime finished query"
        );

        if !is_error {
            return Vec::new();
        }

        let detail = message
            .get("result")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("runtime reported `{subtype}`"));
        vec![AgentEvent::error(detail)]
    }
}

fn decode_content_message(kind: &str, message: &Value) -> Vec<AgentEvent> {
    let content = message.get("message").and_then(|body| body.get("content"));

    match content {
        Some(Value::Array(blocks)) => {
            blocks.iter().filter_map(|block| decode_block(kind, block)).collect()
        }
        // Plain string content is the echoed prompt on `user` messages.
        Some(Value::String(text)) if kind == "assistant" && !text.trim().is_empty() => {
            vec![AgentEvent::text(text.clone())]
        }
        Some(Value::String(_)) | Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![AgentEvent::Unknown {
            kind: format!("{kind}.content"),
            payload: other.clone(),
        }],
    }
}

fn decode_block(kind: &str, block: &Value) -> Option<AgentEvent> {
    let block_type = block.get("type").and_then(Value::as_str).unwrap_or_default();
    let text_field = |field: &str| block.get(field).and_then(Value::as_str).map(ToString::to_string);

    match block_type {
        // `user` text is runtime-injected context (skill instructions, prompt
        // echoes), never model output for the reply.
        "text" | "thinking" | "redacted_thinking" if kind != "assistant" => {
            let chars = text_field(block_type).map(|text| text.chars().count()).unwrap_or(0);
            debug!(
                event_name = "agent.stream.injected_text",
                role = kind,
                block = block_type,
                chars,
                "ignoring non-assistant text block"
            );
            None
        }
        "text" => text_field("text").filter(|text| !text.trim().is_empty()).map(AgentEvent::text),
        "thinking" => {
            text_field("thinking").filter(|text| !text.trim().is_empty()).map(AgentEvent::thinking)
        }
        "redacted_thinking" => Some(AgentEvent::thinking("[redacted]")),
        "tool_use" | "server_tool_use" => Some(AgentEvent::ToolUse {
            id: text_field("id"),
            name: text_field("name").unwrap_or_else(|| "unknown".to_string()),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(AgentEvent::ToolResult {
            tool_use_id: text_field("tool_use_id"),
            content: flatten_tool_content(block.get("content").unwrap_or(&Value::Null)),
            is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }),
        other => Some(AgentEvent::Unknown {
            kind: format!("{kind}.{}", if other.is_empty() { "untyped" } else { other }),
            payload: block.clone(),
        }),
    }
}

/// Tool output arrives either as a string or as a list of content blocks.
/// Text blocks are joined; anything else is kept as its JSON text.
pub fn flatten_tool_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn truncate_for_log(value: &str) -> String {
    const LIMIT: usize = 200;
    if value.chars().count() <= LIMIT {
        return value.to_string();
    }
    let mut head = value.chars().take(LIMIT).collect::<String>();
    head.push('…');
    head
}
