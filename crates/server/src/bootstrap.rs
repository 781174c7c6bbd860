use std::sync::Arc;

use carbonex_agent::AgentRuntime;
use carbonex_core::config::{AppConfig, ConfigError, LoadOptions};
use carbonex_core::errors::CollaboratorError;
use carbonex_db::{connect_with_settings, migrations, DbPool, SqlCalculationRepository};
use thiserror::Error;
use tracing::info;

use crate::calculator::PersistingObserver;
use crate::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("collaborator setup failed: {0}")]
    Collaborators(#[source] CollaboratorError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let calculations = Arc::new(SqlCalculationRepository::new(db_pool.clone()));
    let runtime = AgentRuntime::from_config(&config)
        .map_err(BootstrapError::Collaborators)?
        .with_calculation_observer(Arc::new(PersistingObserver::new(calculations.clone())));
    info!(
        event_name = "system.bootstrap.collaborators_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        vector_store_provider = ?config.vector_store.provider,
        "collaborator clients configured"
    );

    Ok(Application { config, db_pool, state: AppState { runtime, calculations } })
}
