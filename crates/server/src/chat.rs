use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use skillbridge_agent::{QuerySession, Trace, TraceStep};
use skillbridge_core::ApplicationError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ApiError, AppState};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerboseChatResponse {
    pub reply: String,
    pub steps: Vec<TraceStep>,
    pub total_steps: usize,
    pub tools_used: Vec<String>,
}

impl From<Trace> for VerboseChatResponse {
    fn from(trace: Trace) -> Self {
        Self {
            total_steps: trace.total_steps(),
            tools_used: trace.tools_used(),
            reply: trace.reply,
            steps: trace.steps,
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let trace = run_session(&state, payload, "/chat").await?;
    Ok(Json(ChatResponse { reply: trace.reply }))
}

pub async fn chat_verbose(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<VerboseChatResponse>, ApiError> {
    let trace = run_session(&state, payload, "/chat/verbose").await?;
    Ok(Json(VerboseChatResponse::from(trace)))
}

async fn run_session(
    state: &AppState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
    route: &'static str,
) -> Result<Trace, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    let message = match payload {
        Ok(Json(request)) => request.message.unwrap_or_default(),
        Err(rejection) => {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = %correlation_id,
                route,
                reason = %rejection.body_text(),
                "request body rejected"
            );
            let error = ApplicationError::Validation(format!(
                "request body must be JSON like {{\"message\": \"...\"}}: {}",
                rejection.body_text()
            ));
            return Err(error.into_interface(correlation_id).into());
        }
    };

    info!(
        event_name = "http.request.received",
        correlation_id = %correlation_id,
        route,
        "chat request"
    );

    match QuerySession::new(state.runtime.as_ref(), &state.query, state.session, &correlation_id)
        .run(&message)
        .await
    {
        Ok(trace) => Ok(trace),
        Err(error) => {
            let interface = ApplicationError::from(error).into_interface(correlation_id.as_str());
            warn!(
                event_name = "http.request.failed",
                correlation_id = %correlation_id,
                route,
                error = %interface,
                "chat request failed"
            );
            Err(interface.into())
        }
    }
}
