//! Deterministic runtime used by tests across the workspace.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::events::AgentEvent;
use crate::runtime::{validate_message, AgentRuntime, EventStream, GatewayError, QueryConfig};

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    Event(AgentEvent),
    /// Delivers a transport failure and ends the stream.
    Fail(String),
    /// Holds the stream open until the consumer drops it.
    Stall,
}

#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    script: Vec<ScriptStep>,
    start_failure: Option<String>,
    calls: AtomicUsize,
    last_message: Mutex<Option<String>>,
}

impl ScriptedRuntime {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self { script, ..Self::default() }
    }

    pub fn from_events(events: Vec<AgentEvent>) -> Self {
        Self::new(events.into_iter().map(ScriptStep::Event).collect())
    }

    pub fn failing_to_start(reason: impl Into<String>) -> Self {
        Self { start_failure: Some(reason.into()), ..Self::default() }
    }

    /// Number of queries that passed validation and reached the runtime.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().ok().and_then(|message| message.clone())
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run_query(
        &self,
        message: &str,
        _config: &QueryConfig,
    ) -> Result<EventStream, GatewayError> {
        let message = validate_message(message)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_message.lock() {
            *last = Some(message.to_string());
        }

        if let Some(reason) = &self.start_failure {
            return Err(GatewayError::Spawn(reason.clone()));
        }

        let script = self.script.clone();
        let (sender, stream) = EventStream::channel(script.len());
        tokio::spawn(async move {
            for step in script {
                match step {
                    ScriptStep::Event(event) => {
                        if sender.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Fail(reason) => {
                        let _ = sender.send(Err(GatewayError::Transport(reason))).await;
                        return;
                    }
                    ScriptStep::Stall => {
                        sender.closed().await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}
