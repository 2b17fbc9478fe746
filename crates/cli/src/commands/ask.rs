use serde_json::json;
use skillbridge_agent::{
    AgentRuntime, ClaudeCliRuntime, QueryConfig, QuerySession, SessionError, SessionSettings,
    Trace,
};
use skillbridge_core::CatalogMaterializer;
use tracing::info;
use uuid::Uuid;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

/// One-shot query from the command line. The catalog is synced first so the
/// runtime sees the same skills the server would.
pub fn run(message: &str, verbose: bool) -> CommandResult {
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    if let Err(error) = CatalogMaterializer::from_config(&config).materialize() {
        return CommandResult::failure("ask", "catalog", error.to_string(), 4);
    }

    let runtime = ClaudeCliRuntime::from_config(&config);
    let query = QueryConfig::from_config(&config);
    let settings = SessionSettings::from_config(&config);
    ask_with_runtime(&runtime, &query, settings, message, verbose)
}

pub fn ask_with_runtime(
    runtime: &dyn AgentRuntime,
    query: &QueryConfig,
    settings: SessionSettings,
    message: &str,
    verbose: bool,
) -> CommandResult {
    let async_runtime = match current_thread_runtime("ask") {
        Ok(async_runtime) => async_runtime,
        Err(failure) => return failure,
    };

    let correlation_id = Uuid::new_v4().to_string();
    info!(
        event_name = "cli.ask.started",
        correlation_id = %correlation_id,
        verbose,
        "running one-shot query"
    );
    let session = QuerySession::new(runtime, query, settings, correlation_id);
    match async_runtime.block_on(session.run(message)) {
        Ok(trace) => render_trace(trace, verbose),
        Err(SessionError::Validation(error)) => {
            CommandResult::failure("ask", "validation", error.to_string(), 4)
        }
        Err(SessionError::Unavailable(error)) => {
            CommandResult::failure("ask", "runtime_unavailable", error.to_string(), 5)
        }
    }
}

fn render_trace(trace: Trace, verbose: bool) -> CommandResult {
    let message = if trace.has_errors() {
        "query finished with errors"
    } else {
        "query finished"
    };

    let details = if verbose {
        let total_steps = trace.total_steps();
        let tools_used = trace.tools_used();
        json!({
            "reply": trace.reply,
            "total_steps": total_steps,
            "tools_used": tools_used,
            "steps": trace.steps,
        })
    } else {
        json!({ "reply": trace.reply })
    };

    CommandResult::success_with_details("ask", message, Some(details))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use skillbridge_agent::fixtures::{ScriptStep, ScriptedRuntime};
    use skillbridge_agent::{AgentEvent, QueryConfig, SessionSettings};

    use super::ask_with_runtime;

    fn query_config() -> QueryConfig {
        QueryConfig {
            working_directory: "/app".into(),
            allowed_tools: vec!["Skill".to_string()],
            skill_source: "/app/skills".into(),
            permission_mode: "acceptEdits".to_string(),
            setting_sources: vec!["project".to_string()],
            model: None,
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings { timeout: Duration::from_secs(5), ..SessionSettings::default() }
    }

    fn payload(output: &str) -> Value {
        serde_json::from_str(output).expect("command output should be JSON")
    }

    #[test]
    fn reply_only_by_default() {
        let runtime = ScriptedRuntime::from_events(vec![
            AgentEvent::tool_use("pdf", json!({})),
            AgentEvent::text("done"),
        ]);

        let result = ask_with_runtime(&runtime, &query_config(), settings(), "go", false);

        assert_eq!(result.exit_code, 0);
        let payload = payload(&result.output);
        assert_eq!(payload["details"], json!({"reply": "done"}));
        assert_eq!(runtime.last_message().as_deref(), Some("go"));
    }

    #[test]
    fn verbose_includes_trace() {
        let runtime = ScriptedRuntime::new(vec![
            ScriptStep::Event(AgentEvent::tool_use("xlsx", json!({"sheet": 1}))),
            ScriptStep::Fail("pipe closed".to_string()),
        ]);

        let result = ask_with_runtime(&runtime, &query_config(), settings(), "go", true);

        assert_eq!(result.exit_code, 0);
        let payload = payload(&result.output);
        assert_eq!(payload["message"], "query finished with errors");
        assert_eq!(payload["details"]["total_steps"], 2);
        assert_eq!(payload["details"]["tools_used"], json!(["xlsx"]));
        assert_eq!(payload["details"]["steps"][1]["type"], "error");
    }

    #[test]
    fn blank_message_is_a_validation_failure() {
        let runtime = ScriptedRuntime::from_events(vec![AgentEvent::text("unused")]);

        let result = ask_with_runtime(&runtime, &query_config(), settings(), "   ", false);

        assert_eq!(result.exit_code, 4);
        assert_eq!(payload(&result.output)["error_class"], "validation");
        assert_eq!(runtime.calls(), 0);
    }

    #[test]
    fn runtime_that_never_starts_is_unavailable() {
        let runtime = ScriptedRuntime::failing_to_start("could not run `claude`");

        let result = ask_with_runtime(&runtime, &query_config(), settings(), "hi", false);

        assert_eq!(result.exit_code, 5);
        assert_eq!(payload(&result.output)["error_class"], "runtime_unavailable");
    }
}
