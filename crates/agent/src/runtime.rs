use std::path::PathBuf;

use async_trait::async_trait;
use skillbridge_core::config::AppConfig;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::AgentEvent;

pub type StreamItem = Result<AgentEvent, GatewayError>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("failed to start agent runtime: {0}")]
    Spawn(String),
    #[error("agent runtime transport failure: {0}")]
    Transport(String),
    #[error("agent runtime did not finish within {secs}s")]
    Timeout { secs: u64 },
}

/// Per-query settings handed to the runtime. Built once from [`AppConfig`]
/// and identical for every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryConfig {
    pub working_directory: PathBuf,
    pub allowed_tools: Vec<String>,
    pub skill_source: PathBuf,
    pub permission_mode: String,
    pub setting_sources: Vec<String>,
    pub model: Option<String>,
}

impl QueryConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            working_directory: config.agent.working_directory.clone(),
            allowed_tools: config
                .agent
                .allowed_tools
                .iter()
                .map(|tool| tool.trim().to_string())
                .filter(|tool| !tool.is_empty())
                .collect(),
            skill_source: config.skills.source_directory.clone(),
            permission_mode: config.agent.permission_mode.clone(),
            setting_sources: config.agent.setting_sources.clone(),
            model: config.agent.model.clone(),
        }
    }
}

/// Ordered, finite sequence of runtime events for a single query.
///
/// Dropping the stream signals the producer to stop; for the CLI runtime this
/// terminates the child process.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<StreamItem>,
}

pub type EventSender = mpsc::Sender<StreamItem>;

impl EventStream {
    pub fn channel(capacity: usize) -> (EventSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }

    pub async fn next(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Starts a query. Fails fast with [`GatewayError::EmptyMessage`] before any
    /// external work when the message is blank.
    async fn run_query(
        &self,
        message: &str,
        config: &QueryConfig,
    ) -> Result<EventStream, GatewayError>;
}

pub fn validate_message(message: &str) -> Result<&str, GatewayError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::EmptyMessage);
    }
    Ok(trimmed)
}
