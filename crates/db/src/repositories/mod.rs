use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use carbonex_core::domain::calculation::CalculationResult;
use carbonex_core::domain::question::AnswerValue;
use carbonex_core::domain::sector::Sector;

pub mod calculation;
pub mod memory;

pub use calculation::SqlCalculationRepository;
pub use memory::InMemoryCalculationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Which surface produced a stored calculation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationOrigin {
    Direct,
    Dialogue,
}

impl CalculationOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Dialogue => "dialogue",
        }
    }
}

impl fmt::Display for CalculationOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationOrigin {
    type Err = RepositoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "direct" => Ok(Self::Direct),
            "dialogue" => Ok(Self::Dialogue),
            other => Err(RepositoryError::Decode(format!("unknown calculation origin `{other}`"))),
        }
    }
}

/// One completed emissions calculation, as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub id: String,
    pub sector: String,
    #[serde(flatten)]
    pub result: CalculationResult,
    pub answers: BTreeMap<String, AnswerValue>,
    pub origin: CalculationOrigin,
    pub created_at: DateTime<Utc>,
}

impl CalculationRecord {
    pub fn new(
        sector: Sector,
        answers: BTreeMap<String, AnswerValue>,
        result: CalculationResult,
        origin: CalculationOrigin,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sector: sector.code().to_string(),
            result,
            answers,
            origin,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CalculationRepository: Send + Sync {
    async fn save(&self, record: CalculationRecord) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<CalculationRecord>, RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CalculationRecord>, RepositoryError>;
}
