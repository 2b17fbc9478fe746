use serde_json::Value;

/// One observation reported by the agent runtime while it works on a query.
///
/// The set is closed: anything the runtime emits that does not fit one of the
/// known shapes arrives as [`AgentEvent::Unknown`] so it still shows up in the
/// trace instead of being dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    ToolUse { id: Option<String>, name: String, input: Value },
    ToolResult { tool_use_id: Option<String>, content: String, is_error: bool },
    Text { text: String },
    Thinking { text: String },
    Error { message: String },
    Unknown { kind: String, payload: Value },
}

impl AgentEvent {
    pub fn tool_use(name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse { id: None, name: name.into(), input }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::ToolResult { tool_use_id: None, content: content.into(), is_error: false }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::Error { .. } => "error",
            Self::Unknown { kind, .. } => kind,
        }
    }
}
