use std::io::{self, BufRead, Write};

use skillbridge_agent::{
    AgentRuntime, ClaudeCliRuntime, QueryConfig, QuerySession, SessionSettings, StepKind,
    TraceStep,
};
use skillbridge_core::CatalogMaterializer;
use tokio::runtime::Runtime;
use tracing::debug;
use uuid::Uuid;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

/// Interactive terminal chat against the local agent runtime.
pub fn run() -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    if !config.has_api_credentials() {
        return CommandResult::failure(
            "chat",
            "credentials_missing",
            "set ANTHROPIC_API_KEY or LLM_GATEWAY_URL before starting a chat",
            2,
        );
    }

    let materialized = match CatalogMaterializer::from_config(&config).materialize() {
        Ok(materialized) => materialized,
        Err(error) => return CommandResult::failure("chat", "catalog", error.to_string(), 4),
    };
    let async_runtime = match current_thread_runtime("chat") {
        Ok(async_runtime) => async_runtime,
        Err(failure) => return failure,
    };

    let runtime = ClaudeCliRuntime::from_config(&config);
    let query = QueryConfig::from_config(&config);
    let settings = SessionSettings::from_config(&config);
    let skills = materialized.catalog.names().map(str::to_string).collect::<Vec<_>>();

    let chat = InteractiveChat {
        async_runtime: &async_runtime,
        runtime: &runtime,
        query: &query,
        settings,
    };
    // `StdoutLock` is not `Send`.
    match chat.run(&skills, io::stdin().lock(), io::stdout()) {
        Ok(queries) => {
            CommandResult::success("chat", format!("chat ended after {queries} query(ies)"))
        }
        Err(error) => CommandResult::failure("chat", "io", error.to_string(), 1),
    }
}

pub struct InteractiveChat<'a> {
    pub async_runtime: &'a Runtime,
    pub runtime: &'a dyn AgentRuntime,
    pub query: &'a QueryConfig,
    pub settings: SessionSettings,
}

impl InteractiveChat<'_> {
    /// Reads one message per line until EOF or an exit word, streaming each
    /// step to `output` as it arrives. Returns how many queries ran.
    pub fn run<R, W>(&self, skills: &[String], input: R, mut output: W) -> io::Result<usize>
    where
        R: BufRead,
        W: Write + Send,
    {
        writeln!(output, "skillbridge chat. Type `exit` to quit.")?;
        if skills.is_empty() {
            writeln!(output, "No skills installed.")?;
        } else {
            writeln!(output, "Skills: {}", skills.join(", "))?;
        }

        let mut queries = 0;
        for line in input.lines() {
            let line = line?;
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            if EXIT_WORDS.contains(&message.to_ascii_lowercase().as_str()) {
                break;
            }

            queries += 1;
            let correlation_id = Uuid::new_v4().to_string();
            debug!(
                event_name = "cli.chat.turn",
                correlation_id = %correlation_id,
                turn = queries,
                "sending chat message"
            );
            let session =
                QuerySession::new(self.runtime, self.query, self.settings, correlation_id);
            let outcome = self.async_runtime.block_on(
                session.run_observed(message, |step| {
                    let _ = render_step(&mut output, step);
                }),
            );
            if let Err(error) = outcome {
                writeln!(output, "Error: {error}")?;
            }
            writeln!(output)?;
            output.flush()?;
        }

        Ok(queries)
    }
}

fn render_step(output: &mut impl Write, step: &TraceStep) -> io::Result<()> {
    match step.kind {
        StepKind::Text => writeln!(output, "{}", step.content),
        StepKind::ToolUse => {
            writeln!(output, "[Using tool: {}]", step.tool_name.as_deref().unwrap_or("unknown"))
        }
        StepKind::Error => writeln!(output, "Error: {}", step.content),
        StepKind::ToolResult | StepKind::Thinking => Ok(()),
    }
}
