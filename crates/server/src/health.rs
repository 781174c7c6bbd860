//! Readiness of what the assistants depend on. Calculations and history
//! need the database, so losing it makes the service unavailable. Without
//! the vector store the dialogues still answer from static text, which is
//! reported as degraded.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use carbonex_agent::{AgentRuntime, KnowledgeDomain};
use carbonex_db::{connection, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: AgentRuntime,
}

impl HealthState {
    pub fn new(db_pool: DbPool, runtime: AgentRuntime) -> Self {
        Self { db_pool, runtime }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub ready: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KnowledgeCollections {
    pub education: String,
    pub formalities: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub database: ComponentCheck,
    pub vector_store: ComponentCheck,
    pub collections: KnowledgeCollections,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Serves `/health` alone on the health-check port, next to the API listener.
pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health check listening"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health check listener stopped"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let (database, vector_store) =
        tokio::join!(database_check(&state.db_pool), vector_store_check(&state.runtime));

    let status = match (database.ready, vector_store.ready) {
        (false, _) => Readiness::Unavailable,
        (true, false) => Readiness::Degraded,
        (true, true) => Readiness::Ready,
    };
    if status != Readiness::Ready {
        warn!(
            event_name = "server.health.not_ready",
            status = ?status,
            database = %database.detail,
            vector_store = %vector_store.detail,
            "readiness check found a failing dependency"
        );
    }

    let report = HealthReport {
        status,
        database,
        vector_store,
        collections: KnowledgeCollections {
            education: state.runtime.collection(KnowledgeDomain::Education).to_string(),
            formalities: state.runtime.collection(KnowledgeDomain::Formalities).to_string(),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = match status {
        Readiness::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Readiness::Ready | Readiness::Degraded => StatusCode::OK,
    };
    (status_code, Json(report))
}

async fn database_check(pool: &DbPool) -> ComponentCheck {
    match connection::ping(pool).await {
        Ok(()) => ComponentCheck { ready: true, detail: "calculation store answered".to_string() },
        Err(error) => {
            ComponentCheck { ready: false, detail: format!("calculation store: {error}") }
        }
    }
}

async fn vector_store_check(runtime: &AgentRuntime) -> ComponentCheck {
    match runtime.ping_store().await {
        Ok(()) => ComponentCheck { ready: true, detail: "vector store reachable".to_string() },
        Err(error) => ComponentCheck { ready: false, detail: error.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};

    use carbonex_agent::memory::{InMemoryVectorStore, ScriptedLlmClient};
    use carbonex_agent::retrieval::{RetrievedChunk, VectorPoint};
    use carbonex_agent::{AgentRuntime, VectorStore};
    use carbonex_core::config::AppConfig;
    use carbonex_core::errors::CollaboratorError;
    use carbonex_db::{connect_with_settings, DbPool};

    use super::{health, HealthState, Readiness};

    struct UnreachableStore;

    #[async_trait]
    impl VectorStore for UnreachableStore {
        async fn ensure_collection(&self, _: &str, _: usize) -> Result<(), CollaboratorError> {
            Err(unreachable())
        }

        async fn upsert(&self, _: &str, _: Vec<VectorPoint>) -> Result<(), CollaboratorError> {
            Err(unreachable())
        }

        async fn search(
            &self,
            _: &str,
            _: &[f32],
            _: usize,
        ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
            Err(unreachable())
        }

        async fn ping(&self) -> Result<(), CollaboratorError> {
            Err(unreachable())
        }
    }

    fn unreachable() -> CollaboratorError {
        CollaboratorError::Retrieval("connection refused".to_string())
    }

    fn state(pool: DbPool, store: Arc<dyn VectorStore>) -> State<HealthState> {
        let runtime = AgentRuntime::with_collaborators(
            Arc::new(ScriptedLlmClient::new()),
            store,
            AppConfig::default().vector_store,
        );
        State(HealthState::new(pool, runtime))
    }

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    #[tokio::test]
    async fn ready_when_database_and_vector_store_answer() {
        let pool = pool().await;

        let (status, Json(report)) =
            health(state(pool.clone(), Arc::new(InMemoryVectorStore::default()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, Readiness::Ready);
        assert!(report.database.ready && report.vector_store.ready);
        assert_eq!(report.collections.education, "carbon_credits_kb");
        assert_eq!(report.collections.formalities, "formalities_kb");

        pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_vector_store_is_degraded_but_serving() {
        let pool = pool().await;

        let (status, Json(report)) = health(state(pool.clone(), Arc::new(UnreachableStore))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, Readiness::Degraded);
        assert!(report.database.ready);
        assert!(!report.vector_store.ready);
        assert!(report.vector_store.detail.contains("connection refused"));

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_database_makes_the_service_unavailable() {
        let pool = pool().await;
        pool.close().await;

        let (status, Json(report)) =
            health(state(pool, Arc::new(InMemoryVectorStore::default()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, Readiness::Unavailable);
        assert!(!report.database.ready);
        assert!(report.vector_store.ready);
    }
}
