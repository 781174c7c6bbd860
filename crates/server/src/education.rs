use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::Instrument;

use carbonex_agent::TurnSink;

use crate::request::QuestionRequest;
use crate::{sse, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(chat)).route("/chat/stream", post(chat_stream))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> impl IntoResponse {
    Json(state.runtime.education().answer(&request.question).await)
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> impl IntoResponse {
    let (sink, events) = TurnSink::channel();
    let responder = state.runtime.education().clone();
    tokio::spawn(
        async move {
            responder.answer_into(&request.question, sink).await;
        }
        .in_current_span(),
    );
    sse::turn_events(events)
}
