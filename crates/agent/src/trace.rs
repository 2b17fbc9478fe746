use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::AgentEvent;
use crate::runtime::{GatewayError, StreamItem};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolUse,
    ToolResult,
    Text,
    Thinking,
    Error,
}

/// One numbered entry in a query's reasoning trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
}

/// Marks the content of a `tool_result` step whose tool reported failure.
pub const TOOL_ERROR_PREFIX: &str = "[tool error] ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadPolicy {
    pub max_tool_result_chars: Option<usize>,
}

impl PayloadPolicy {
    fn apply(&self, content: String) -> String {
        let Some(limit) = self.max_tool_result_chars else {
            return content;
        };
        let total = content.chars().count();
        if total <= limit {
            return content;
        }
        let mut kept = content.chars().take(limit).collect::<String>();
        kept.push_str(&format!("… [truncated {} chars]", total - limit));
        kept
    }
}

/// Result of a finished (or abandoned) query.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    pub reply: String,
    pub steps: Vec<TraceStep>,
}

impl Trace {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Distinct tool names in order of first use.
    pub fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for name in self.steps.iter().filter_map(|step| step.tool_name.as_deref()) {
            if !tools.iter().any(|seen| seen == name) {
                tools.push(name.to_string());
            }
        }
        tools
    }

    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|step| step.kind == StepKind::Error)
    }
}

/// Turns runtime events into numbered [`TraceStep`]s and accumulates the
/// user-facing reply.
///
/// Step numbers start at 1 and increase by one per observation, failures
/// included. Text steps and error steps both contribute to the reply.
#[derive(Debug, Default)]
pub struct StepTraceNormalizer {
    policy: PayloadPolicy,
    steps: Vec<TraceStep>,
    reply_parts: Vec<String>,
}

impl StepTraceNormalizer {
    pub fn new(policy: PayloadPolicy) -> Self {
        Self { policy, steps: Vec::new(), reply_parts: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push(&mut self, item: StreamItem) -> &TraceStep {
        match item {
            Ok(event) => self.push_event(event),
            Err(error) => self.push_failure(&error),
        }
    }

    pub fn push_event(&mut self, event: AgentEvent) -> &TraceStep {
        match event {
            AgentEvent::ToolUse { name, input, .. } => self.record(
                StepKind::ToolUse,
                format!("Using tool: {name}"),
                Some(name),
                Some(input),
            ),
            AgentEvent::ToolResult { content, is_error, .. } => {
                let content = self.policy.apply(content);
                let content =
                    if is_error { format!("{TOOL_ERROR_PREFIX}{content}") } else { content };
                self.record(StepKind::ToolResult, content, None, None)
            }
            AgentEvent::Text { text } => {
                self.reply_parts.push(text.clone());
                self.record(StepKind::Text, text, None, None)
            }
            AgentEvent::Thinking { text } => self.record(StepKind::Thinking, text, None, None),
            AgentEvent::Error { message } => self.record_error(message),
            AgentEvent::Unknown { kind, payload } => {
                self.record_error(format!("unrecognized runtime event `{kind}`: {payload}"))
            }
        }
    }

    /// Records a transport failure or timeout as an ordinary error step.
    pub fn push_failure(&mut self, error: &GatewayError) -> &TraceStep {
        self.record_error(error.to_string())
    }

    pub fn finish(self) -> Trace {
        Trace { reply: self.reply_parts.join("\n\n"), steps: self.steps }
    }

    fn record_error(&mut self, message: String) -> &TraceStep {
        self.reply_parts.push(format!("Error: {message}"));
        self.record(StepKind::Error, message, None, None)
    }

    fn record(
        &mut self,
        kind: StepKind,
        content: String,
        tool_name: Option<String>,
        tool_input: Option<Value>,
    ) -> &TraceStep {
        let step = u32::try_from(self.steps.len() + 1).unwrap_or(u32::MAX);
        self.steps.push(TraceStep {
            step,
            timestamp: Utc::now(),
            kind,
            content,
            tool_name,
            tool_input,
        });
        &self.steps[self.steps.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PayloadPolicy, StepKind, StepTraceNormalizer, TOOL_ERROR_PREFIX};
    use crate::events::AgentEvent;
    use crate::runtime::GatewayError;

    #[test]
    fn tool_call_then_summary_produces_three_steps() {
        let mut normalizer = StepTraceNormalizer::default();
        normalizer.push_event(AgentEvent::tool_use("pdf", json!({"path": "report.pdf"})));
        normalizer.push_event(AgentEvent::tool_result("extracted 12 pages"));
        normalizer.push_event(AgentEvent::text("summary"));

        let trace = normalizer.finish();

        assert_eq!(trace.total_steps(), 3);
        assert_eq!(trace.tools_used(), vec!["pdf".to_string()]);
        assert_eq!(trace.reply, "summary");
        assert_eq!(
            trace.steps.iter().map(|step| step.kind).collect::<Vec<_>>(),
            vec![StepKind::ToolUse, StepKind::ToolResult, StepKind::Text]
        );
        assert_eq!(trace.steps[0].tool_input, Some(json!({"path": "report.pdf"})));
    }

    #[test]
    fn step_numbers_are_contiguous_from_one() {
        let mut normalizer = StepTraceNormalizer::default();
        normalizer.push_event(AgentEvent::thinking("plan"));
        normalizer.push(Err(GatewayError::Transport("pipe closed".to_string())));
        normalizer.push_event(AgentEvent::text("partial"));

        let trace = normalizer.finish();

        assert_eq!(trace.steps.iter().map(|step| step.step).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(trace.steps.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn tools_used_is_deduplicated_in_first_use_order() {
        let mut normalizer = StepTraceNormalizer::default();
        for name in ["xlsx", "Read", "xlsx", "Bash", "Read"] {
            normalizer.push_event(AgentEvent::tool_use(name, json!({})));
        }

        assert_eq!(normalizer.finish().tools_used(), vec!["xlsx", "Read", "Bash"]);
    }

    #[test]
    fn reply_joins_text_and_error_steps() {
        let mut normalizer = StepTraceNormalizer::default();
        normalizer.push_event(AgentEvent::text("first"));
        normalizer.push_event(AgentEvent::thinking("not in reply"));
        normalizer.push_event(AgentEvent::error("tool crashed"));
        normalizer.push_event(AgentEvent::text("second"));

        let trace = normalizer.finish();

        assert_eq!(trace.reply, "first\n\nError: tool crashed\n\nsecond");
        assert!(trace.has_errors());
    }

    #[test]
    fn failed_tool_results_are_marked() {
        let mut normalizer = StepTraceNormalizer::default();
        normalizer.push_event(AgentEvent::ToolResult {
            tool_use_id: Some("toolu_1".to_string()),
            content: "file not found".to_string(),
            is_error: true,
        });
        normalizer.push_event(AgentEvent::tool_result("ok"));

        let trace = normalizer.finish();

        assert_eq!(trace.steps[0].kind, StepKind::ToolResult);
        assert_eq!(trace.steps[0].content, format!("{TOOL_ERROR_PREFIX}file not found"));
        assert_eq!(trace.steps[1].content, "ok");
        assert_eq!(trace.reply, "");
    }

    #[test]
    fn empty_trace_has_empty_reply() {
        let trace = StepTraceNormalizer::default().finish();

        assert_eq!(trace.reply, "");
        assert_eq!(trace.total_steps(), 0);
        assert!(trace.tools_used().is_empty());
    }

    #[test]
    fn unknown_events_become_error_steps() {
        let mut normalizer = StepTraceNormalizer::default();

        let step = normalizer
            .push_event(AgentEvent::Unknown { kind: "mystery".to_string(), payload: json!(1) })
            .clone();

        assert_eq!(step.kind, StepKind::Error);
        assert!(step.content.contains("mystery"));
    }

    #[test]
    fn oversized_tool_results_are_truncated() {
        let mut normalizer =
            StepTraceNormalizer::new(PayloadPolicy { max_tool_result_chars: Some(5) });

        let step = normalizer.push_event(AgentEvent::tool_result("ééééééééé")).clone();

        assert_eq!(step.content, "ééééé… [truncated 4 chars]");
    }

    #[test]
    fn steps_serialize_with_wire_field_names() {
        let mut normalizer = StepTraceNormalizer::default();
        normalizer.push_event(AgentEvent::tool_use("pdf", json!({"page": 1})));
        normalizer.push_event(AgentEvent::text("done"));
        let trace = normalizer.finish();

        let value = serde_json::to_value(&trace.steps).expect("steps should serialize");

        assert_eq!(value[0]["step"], 1);
        assert_eq!(value[0]["type"], "tool_use");
        assert_eq!(value[0]["tool_name"], "pdf");
        assert_eq!(value[0]["tool_input"]["page"], 1);
        assert_eq!(value[1]["type"], "text");
        assert!(value[1].get("tool_name").is_none());
        assert!(value[1]["timestamp"].is_string());
    }
}
