use std::time::{Duration, Instant};

use skillbridge_core::config::AppConfig;
use skillbridge_core::errors::ApplicationError;
use thiserror::Error;
use tracing::{info, warn};

use crate::runtime::{AgentRuntime, GatewayError, QueryConfig};
use crate::trace::{PayloadPolicy, StepTraceNormalizer, Trace, TraceStep};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0}")]
    Validation(GatewayError),
    /// The runtime failed before producing a single step.
    #[error("{0}")]
    Unavailable(GatewayError),
}

impl From<SessionError> for ApplicationError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Validation(error) => Self::Validation(error.to_string()),
            SessionError::Unavailable(error) => Self::Runtime(error.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub payload: PayloadPolicy,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.agent.query_timeout_secs),
            payload: PayloadPolicy { max_tool_result_chars: config.agent.max_tool_result_chars },
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(300), payload: PayloadPolicy::default() }
    }
}

/// Drives one query from start to finish: starts the runtime, consumes its
/// event stream under the configured deadline, and produces a [`Trace`].
pub struct QuerySession<'a> {
    runtime: &'a dyn AgentRuntime,
    config: &'a QueryConfig,
    settings: SessionSettings,
    correlation_id: String,
}

impl<'a> QuerySession<'a> {
    pub fn new(
        runtime: &'a dyn AgentRuntime,
        config: &'a QueryConfig,
        settings: SessionSettings,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self { runtime, config, settings, correlation_id: correlation_id.into() }
    }

    pub async fn run(self, message: &str) -> Result<Trace, SessionError> {
        self.run_observed(message, |_| {}).await
    }

    /// Like [`QuerySession::run`], calling `observer` with each step as soon as
    /// it is recorded.
    pub async fn run_observed<F>(self, message: &str, mut observer: F) -> Result<Trace, SessionError>
    where
        F: FnMut(&TraceStep) + Send,
    {
        let started = Instant::now();
        let message = match crate::runtime::validate_message(message) {
            Ok(message) => message,
            Err(error) => return Err(SessionError::Validation(error)),
        };

        info!(
            event_name = "session.query.started",
            correlation_id = %self.correlation_id,
            message_chars = message.chars().count(),
            timeout_secs = self.settings.timeout.as_secs(),
            "starting agent query"
        );

        let mut stream = match self.runtime.run_query(message, self.config).await {
            Ok(stream) => stream,
            Err(GatewayError::EmptyMessage) => {
                return Err(SessionError::Validation(GatewayError::EmptyMessage));
            }
            Err(error) => {
                warn!(
                    event_name = "session.query.unavailable",
                    correlation_id = %self.correlation_id,
                    error = %error,
                    "agent runtime could not start"
                );
                return Err(SessionError::Unavailable(error));
            }
        };

        let deadline = tokio::time::Instant::now() + self.settings.timeout;
        let mut normalizer = StepTraceNormalizer::new(self.settings.payload);

        loop {
            let failure = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(event))) => {
                    observer(normalizer.push_event(event));
                    continue;
                }
                Ok(Some(Err(error))) => error,
                Ok(None) => break,
                Err(_) => GatewayError::Timeout { secs: self.settings.timeout.as_secs() },
            };

            warn!(
                event_name = "session.query.failed",
                correlation_id = %self.correlation_id,
                completed_steps = normalizer.len(),
                error = %failure,
                "agent query failed"
            );
            if normalizer.is_empty() {
                return Err(SessionError::Unavailable(failure));
            }
            observer(normalizer.push_failure(&failure));
            // Dropping the stream stops the runtime.
            break;
        }
        drop(stream);

        let trace = normalizer.finish();
        info!(
            event_name = "session.query.finished",
            correlation_id = %self.correlation_id,
            total_steps = trace.total_steps(),
            tools_used = ?trace.tools_used(),
            has_errors = trace.has_errors(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent query finished"
        );
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use skillbridge_core::errors::ApplicationError;

    use super::{QuerySession, SessionError, SessionSettings};
    use crate::events::AgentEvent;
    use crate::fixtures::{ScriptStep, ScriptedRuntime};
    use crate::runtime::{GatewayError, QueryConfig};
    use crate::trace::StepKind;

    fn query_config() -> QueryConfig {
        QueryConfig {
            working_directory: "/app".into(),
            allowed_tools: vec!["Skill".to_string(), "Read".to_string()],
            skill_source: "/app/skills".into(),
            permission_mode: "acceptEdits".to_string(),
            setting_sources: vec!["project".to_string()],
            model: None,
        }
    }

    #[tokio::test]
    async fn completed_query_produces_trace() {
        let runtime = ScriptedRuntime::from_events(vec![
            AgentEvent::tool_use("pdf", json!({"file": "q3.pdf"})),
            AgentEvent::tool_result("..."),
            AgentEvent::text("summary"),
        ]);
        let config = query_config();

        let trace = QuerySession::new(&runtime, &config, SessionSettings::default(), "req-1")
            .run("summarize q3.pdf")
            .await
            .expect("query should succeed");

        assert_eq!(trace.total_steps(), 3);
        assert_eq!(trace.tools_used(), vec!["pdf".to_string()]);
        assert_eq!(trace.reply, "summary");
        assert_eq!(runtime.last_message().as_deref(), Some("summarize q3.pdf"));
    }

    #[tokio::test]
    async fn empty_message_never_reaches_runtime() {
        let runtime = ScriptedRuntime::from_events(vec![AgentEvent::text("unused")]);
        let config = query_config();

        let error = QuerySession::new(&runtime, &config, SessionSettings::default(), "req-2")
            .run("   ")
            .await
            .expect_err("blank message should be rejected");

        assert_eq!(error, SessionError::Validation(GatewayError::EmptyMessage));
        assert_eq!(runtime.calls(), 0);
        assert!(matches!(ApplicationError::from(error), ApplicationError::Validation(_)));
    }

    #[tokio::test]
    async fn transport_failure_after_first_step_is_recorded_as_error_step() {
        let runtime = ScriptedRuntime::new(vec![
            ScriptStep::Event(AgentEvent::tool_use("pdf", json!({}))),
            ScriptStep::Fail("connection reset".to_string()),
            ScriptStep::Event(AgentEvent::text("never delivered")),
        ]);
        let config = query_config();

        let trace = QuerySession::new(&runtime, &config, SessionSettings::default(), "req-3")
            .run("summarize")
            .await
            .expect("partial trace should be returned");

        assert_eq!(trace.total_steps(), 2);
        assert_eq!(trace.steps[0].kind, StepKind::ToolUse);
        assert_eq!(trace.steps[1].step, 2);
        assert_eq!(trace.steps[1].kind, StepKind::Error);
        assert!(trace.steps[1].content.contains("connection reset"));
    }

    #[tokio::test]
    async fn failure_before_any_step_is_unavailable() {
        let runtime = ScriptedRuntime::new(vec![ScriptStep::Fail("spawn refused".to_string())]);
        let config = query_config();

        let error = QuerySession::new(&runtime, &config, SessionSettings::default(), "req-4")
            .run("hello")
            .await
            .expect_err("query should fail");

        assert!(matches!(error, SessionError::Unavailable(GatewayError::Transport(_))));
        assert!(matches!(ApplicationError::from(error), ApplicationError::Runtime(_)));
    }

    #[tokio::test]
    async fn start_failure_is_unavailable() {
        let runtime = ScriptedRuntime::failing_to_start("claude: not found");
        let config = query_config();

        let error = QuerySession::new(&runtime, &config, SessionSettings::default(), "req-5")
            .run("hello")
            .await
            .expect_err("query should fail");

        assert_eq!(error, SessionError::Unavailable(GatewayError::Spawn("claude: not found".into())));
    }

    #[tokio::test]
    async fn stalled_runtime_times_out_with_error_step() {
        let runtime = ScriptedRuntime::new(vec![
            ScriptStep::Event(AgentEvent::thinking("working")),
            ScriptStep::Stall,
        ]);
        let config = query_config();
        let settings =
            SessionSettings { timeout: Duration::from_millis(50), ..SessionSettings::default() };

        let trace = QuerySession::new(&runtime, &config, settings, "req-6")
            .run("hello")
            .await
            .expect("partial trace should be returned");

        assert_eq!(trace.total_steps(), 2);
        assert_eq!(trace.steps[1].kind, StepKind::Error);
        assert!(trace.steps[1].content.contains("did not finish"));
        assert!(trace.reply.starts_with("Error: "));
    }

    #[tokio::test]
    async fn observer_sees_every_step_in_order() {
        let runtime = ScriptedRuntime::from_events(vec![
            AgentEvent::tool_use("xlsx", json!({})),
            AgentEvent::tool_result("3 sheets"),
            AgentEvent::text("done"),
        ]);
        let config = query_config();
        let mut seen = Vec::new();

        QuerySession::new(&runtime, &config, SessionSettings::default(), "req-7")
            .run_observed("hello", |step| seen.push(step.step))
            .await
            .expect("query should succeed");

        assert_eq!(seen, vec![1, 2, 3]);
    }
}
