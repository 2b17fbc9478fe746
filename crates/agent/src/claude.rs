use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use skillbridge_core::config::{AppConfig, GatewayConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::runtime::{
    validate_message, AgentRuntime, EventSender, EventStream, GatewayError, QueryConfig,
};
use crate::stream_json::StreamJsonDecoder;

const STDERR_TAIL_BYTES: usize = 2048;
const CHANNEL_CAPACITY: usize = 64;
const STDERR_GRACE: Duration = Duration::from_millis(500);
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Runs queries through the agent CLI in print mode, one child process per
/// query.
///
/// The message goes to stdin and events come back as stream-json lines on
/// stdout. Gateway credentials are passed through the environment only.
#[derive(Clone, Debug)]
pub struct ClaudeCliRuntime {
    program: String,
    leading_args: Vec<String>,
    gateway: GatewayConfig,
}

impl ClaudeCliRuntime {
    pub fn new(program: impl Into<String>, gateway: GatewayConfig) -> Self {
        Self { program: program.into(), leading_args: Vec::new(), gateway }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.agent.cli_path.clone(), config.gateway.clone())
            .with_leading_args(config.agent.cli_args.clone())
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self, config: &QueryConfig) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(
            ["--print", "--output-format", "stream-json", "--verbose"].map(ToString::to_string),
        );
        if !config.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(config.allowed_tools.join(","));
        }
        args.push("--permission-mode".to_string());
        args.push(config.permission_mode.clone());
        if !config.setting_sources.is_empty() {
            args.push("--setting-sources".to_string());
            args.push(config.setting_sources.join(","));
        }
        if let Some(model) = &config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if !config.skill_source.starts_with(&config.working_directory) {
            args.push("--add-dir".to_string());
            args.push(config.skill_source.display().to_string());
        }
        args
    }

    /// Environment forwarded to the child. Values are secrets; never log them.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let Some(api_key) = &self.gateway.api_key {
            env.push(("ANTHROPIC_API_KEY", api_key.expose_secret().to_string()));
        }
        if let Some(base_url) = &self.gateway.base_url {
            env.push(("ANTHROPIC_BASE_URL", base_url.clone()));
        }
        if !self.gateway.headers.is_empty() {
            let headers = self
                .gateway
                .headers
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join("\n");
            env.push(("ANTHROPIC_CUSTOM_HEADERS", headers));
        }
        env
    }

    fn command(&self, config: &QueryConfig) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args(config))
            .envs(self.env())
            .current_dir(&config.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn run_query(
        &self,
        message: &str,
        config: &QueryConfig,
    ) -> Result<EventStream, GatewayError> {
        let message = validate_message(message)?;

        debug!(
            event_name = "agent.cli.spawn",
            program = %self.program,
            cwd = %config.working_directory.display(),
            allowed_tools = %config.allowed_tools.join(","),
            "spawning agent cli"
        );
        let child = self.command(config).spawn().map_err(|error| {
            GatewayError::Spawn(format!("could not run `{}`: {error}", self.program))
        })?;

        let (sender, stream) = EventStream::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(child, message.to_string(), sender));
        Ok(stream)
    }
}

async fn pump(mut child: Child, message: String, sender: EventSender) {
    let pid = child.id().unwrap_or_default();

    if let Some(mut stdin) = child.stdin.take() {
        // Written from its own task so a child that never drains stdin cannot
        // block cancellation below. Dropping stdin marks the prompt complete.
        tokio::spawn(async move {
            if let Err(error) = stdin.write_all(message.as_bytes()).await {
                debug!(
                    event_name = "agent.cli.stdin_failed",
                    pid,
                    error = %error,
                    "prompt write failed"
                );
            }
        });
    }

    let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));
    let Some(stdout) = child.stdout.take() else {
        let _ = sender
            .send(Err(GatewayError::Transport("agent cli stdout was not captured".to_string())))
            .await;
        return;
    };

    let mut lines = BufReader::new(stdout).lines();
    let mut decoder = StreamJsonDecoder::new();
    loop {
        let line = tokio::select! {
            _ = sender.closed() => {
                info!(
                    event_name = "agent.cli.cancelled",
                    pid,
                    "consumer went away; stopping agent cli"
                );
                stop(child).await;
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                for event in decoder.decode_line(&line) {
                    if sender.send(Ok(event)).await.is_err() {
                        stop(child).await;
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                let _ = sender
                    .send(Err(GatewayError::Transport(format!(
                        "reading agent output failed: {error}"
                    ))))
                    .await;
                stop(child).await;
                return;
            }
        }
    }

    // The `result` message ends the query, and a failing one already carries
    // its explanation. Close the stream now even if the process lingers.
    if decoder.saw_result() {
        drop(sender);
        reap(child, pid, decoder.session_id().unwrap_or("")).await;
        return;
    }

    let status = tokio::select! {
        _ = sender.closed() => {
            info!(
                event_name = "agent.cli.cancelled",
                pid,
                "consumer went away before agent cli exited"
            );
            stop(child).await;
            return;
        }
        status = child.wait() => status,
    };
    // A background process may inherit stderr and keep it open.
    let tail = match stderr_tail {
        Some(task) => tokio::time::timeout(STDERR_GRACE, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    };

    match status {
        Ok(status) if status.success() => {
            debug!(
                event_name = "agent.cli.exited",
                pid,
                session_id = decoder.session_id().unwrap_or(""),
                "agent cli exited without a result message"
            );
        }
        Ok(status) => {
            warn!(
                event_name = "agent.cli.failed",
                pid,
                code = ?status.code(),
                stderr = %tail,
                "agent cli exited abnormally"
            );
            let _ = sender.send(Err(GatewayError::Transport(describe_exit(status, &tail)))).await;
        }
        Err(error) => {
            let _ = sender
                .send(Err(GatewayError::Transport(format!(
                    "waiting for agent cli failed: {error}"
                ))))
                .await;
        }
    }
}

/// Kills the child and waits for it so no zombie is left behind.
async fn stop(mut child: Child) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(EXIT_GRACE, child.wait()).await;
}

/// Waits for a child that already delivered its result, killing it if it
/// does not exit within [`EXIT_GRACE`].
async fn reap(mut child: Child, pid: u32, session_id: &str) {
    let exited = tokio::time::timeout(EXIT_GRACE, child.wait()).await;
    match exited {
        Ok(Ok(status)) => {
            debug!(
                event_name = "agent.cli.exited",
                pid,
                session_id,
                code = ?status.code(),
                "agent cli exited"
            );
        }
        Ok(Err(error)) => {
            debug!(event_name = "agent.cli.wait_failed", pid, error = %error, "wait failed");
        }
        Err(_) => {
            warn!(
                event_name = "agent.cli.lingering",
                pid,
                grace_secs = EXIT_GRACE.as_secs(),
                "agent cli did not exit after its result; killing it"
            );
            stop(child).await;
        }
    }
}

fn describe_exit(status: ExitStatus, stderr_tail: &str) -> String {
    let mut description = match status.code() {
        Some(code) => format!("agent cli exited with status {code}"),
        None => "agent cli was terminated by a signal".to_string(),
    };
    let stderr_tail = stderr_tail.trim();
    if !stderr_tail.is_empty() {
        description.push_str(": ");
        description.push_str(stderr_tail);
    }
    description
}

/// Reads a stream to the end, keeping only the last few kilobytes.
async fn read_tail<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut buffer = [0_u8; 1024];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                tail.extend_from_slice(&buffer[..read]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}
