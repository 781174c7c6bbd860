//! HTTP surface of the carbon credit marketplace assistants.
//!
//! JSON endpoints:
//! - `GET  /health`                             : database and vector store readiness
//! - `GET  /api/calculator/questions/{sector}`  : ordered questionnaire
//! - `POST /api/calculator/calculate`           : one-shot emissions calculation
//! - `GET  /api/calculator/history`             : recently stored calculations
//! - `POST /api/calculator/chat`                : one calculator dialogue turn
//! - `GET  /api/formalities/steps/{workflow}`   : workflow step list
//! - `POST /api/formalities/chat`               : one formalities dialogue turn
//! - `POST /api/education/chat`                 : knowledge-base question
//!
//! Every `chat` route has a `chat/stream` twin answering with server-sent
//! events (see [`sse`]).

use std::sync::Arc;

use axum::{middleware, Router};

use carbonex_agent::AgentRuntime;
use carbonex_db::{CalculationRepository, DbPool};

pub mod bootstrap;
pub mod calculator;
pub mod education;
pub mod error;
pub mod formalities;
pub mod health;
pub mod request;
pub mod sse;

/// Shared by every handler. Conversation state is never part of it: each
/// dialogue turn carries its own.
#[derive(Clone)]
pub struct AppState {
    pub runtime: AgentRuntime,
    pub calculations: Arc<dyn CalculationRepository>,
}

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    let readiness = health::HealthState::new(db_pool, state.runtime.clone());
    Router::new()
        .nest("/api/calculator", calculator::router())
        .nest("/api/formalities", formalities::router())
        .nest("/api/education", education::router())
        .with_state(state)
        .merge(health::router(readiness))
        .layer(middleware::from_fn(request::correlate))
}
