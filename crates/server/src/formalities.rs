use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use carbonex_core::domain::conversation::FormalitiesState;
use carbonex_core::domain::workflow::{WorkflowKind, WorkflowStep};
use carbonex_core::workflows;

use crate::error::ApiError;
use crate::request::{ChatRequest, CorrelationId};
use crate::{sse, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/steps/{workflow_type}", get(steps))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub workflow_type: WorkflowKind,
    pub steps: &'static [WorkflowStep],
}

async fn steps(
    Path(workflow_type): Path<String>,
    correlation_id: CorrelationId,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let kind = workflow_type
        .parse::<WorkflowKind>()
        .map_err(|error| ApiError::from_application(error.into(), &correlation_id))?;
    Ok(Json(WorkflowResponse { workflow_type: kind, steps: workflows::steps_for(kind) }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest<FormalitiesState>>,
) -> impl IntoResponse {
    let conversation_state = request.conversation_state.unwrap_or_default();
    Json(state.runtime.formalities().reply(&request.question, conversation_state).await)
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest<FormalitiesState>>,
) -> impl IntoResponse {
    let conversation_state = request.conversation_state.unwrap_or_default();
    sse::turn_events(state.runtime.formalities().stream(request.question, conversation_state))
}
