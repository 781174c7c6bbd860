use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use carbonex_agent::CalculationObserver;
use carbonex_core::domain::calculation::CalculationResult;
use carbonex_core::domain::conversation::CalculatorState;
use carbonex_core::domain::question::{AnswerValue, Question};
use carbonex_core::domain::sector::Sector;
use carbonex_core::emissions;
use carbonex_core::errors::ApplicationError;
use carbonex_core::questionnaire;
use carbonex_db::{CalculationOrigin, CalculationRecord, CalculationRepository};

use crate::error::ApiError;
use crate::request::{ChatRequest, CorrelationId};
use crate::{sse, AppState};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/questions/{sector}", get(questions))
        .route("/calculate", post(calculate))
        .route("/history", get(history))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

#[derive(Debug, Serialize)]
pub struct QuestionnaireResponse {
    pub sector: String,
    pub questions: &'static [Question],
}

async fn questions(
    Path(sector): Path<String>,
    correlation_id: CorrelationId,
) -> Result<Json<QuestionnaireResponse>, ApiError> {
    let questions = questionnaire::questions_for_code(&sector);
    if questions.is_empty() {
        return Err(ApiError::not_found(
            format!("No questionnaire for sector: {sector}"),
            &correlation_id,
        ));
    }
    Ok(Json(QuestionnaireResponse { sector, questions }))
}

#[derive(Debug, Deserialize)]
pub struct CalculationRequest {
    pub sector: String,
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerValue>,
}

#[derive(Debug, Serialize)]
pub struct CalculationResponse {
    /// Present once the calculation has been stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sector: String,
    #[serde(flatten)]
    pub result: CalculationResult,
}

async fn calculate(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<CalculationRequest>,
) -> Result<Json<CalculationResponse>, ApiError> {
    let sector = request
        .sector
        .parse::<Sector>()
        .map_err(|error| ApiError::from_application(error.into(), &correlation_id))?;
    let result = emissions::calculate(sector, &request.answers);

    let record =
        CalculationRecord::new(sector, request.answers, result.clone(), CalculationOrigin::Direct);
    let id = record.id.clone();
    let id = match state.calculations.save(record).await {
        Ok(()) => Some(id),
        Err(error) => {
            warn!(
                event_name = "server.calculator.persist_failed",
                correlation_id = %correlation_id,
                sector = sector.code(),
                error = %error,
                "calculation not stored"
            );
            None
        }
    };

    info!(
        event_name = "server.calculator.calculated",
        correlation_id = %correlation_id,
        sector = sector.code(),
        total_emissions = result.total_emissions,
        credits_needed = result.credits_needed,
        "direct calculation completed"
    );
    Ok(Json(CalculationResponse { id, sector: sector.code().to_string(), result }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub calculations: Vec<CalculationRecord>,
}

async fn history(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let calculations =
        state.calculations.recent(query.effective_limit()).await.map_err(|error| {
            ApiError::from_application(
                ApplicationError::Persistence(error.to_string()),
                &correlation_id,
            )
        })?;
    Ok(Json(HistoryResponse { calculations }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest<CalculatorState>>,
) -> impl IntoResponse {
    let conversation_state = request.conversation_state.unwrap_or_default();
    Json(state.runtime.calculator().reply(&request.question, conversation_state).await)
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest<CalculatorState>>,
) -> impl IntoResponse {
    let conversation_state = request.conversation_state.unwrap_or_default();
    sse::turn_events(state.runtime.calculator().stream(request.question, conversation_state))
}

/// Stores every questionnaire the calculator dialogue completes.
pub struct PersistingObserver {
    repository: Arc<dyn CalculationRepository>,
}

impl PersistingObserver {
    pub fn new(repository: Arc<dyn CalculationRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl CalculationObserver for PersistingObserver {
    async fn calculation_completed(
        &self,
        sector: Sector,
        answers: &BTreeMap<String, AnswerValue>,
        result: &CalculationResult,
    ) {
        let record = CalculationRecord::new(
            sector,
            answers.clone(),
            result.clone(),
            CalculationOrigin::Dialogue,
        );
        let id = record.id.clone();
        match self.repository.save(record).await {
            Ok(()) => info!(
                event_name = "server.calculator.dialogue_stored",
                calculation_id = %id,
                sector = sector.code(),
                "dialogue calculation stored"
            ),
            Err(error) => warn!(
                event_name = "server.calculator.persist_failed",
                sector = sector.code(),
                error = %error,
                "dialogue calculation not stored"
            ),
        }
    }
}
