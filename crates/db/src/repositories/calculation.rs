use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use carbonex_core::domain::calculation::{BreakdownLine, CalculationResult};
use carbonex_core::domain::question::AnswerValue;

use super::{CalculationOrigin, CalculationRecord, CalculationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCalculationRepository {
    pool: DbPool,
}

impl SqlCalculationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, sector, total_emissions, scope1_emissions, scope2_emissions,
        scope3_emissions, credits_needed, cost_estimate, answers_json, breakdown_json, origin,
        created_at
 FROM emission_calculations";

fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<CalculationRecord, RepositoryError> {
    let answers_json: String = row.try_get("answers_json").map_err(decode_error)?;
    let breakdown_json: String = row.try_get("breakdown_json").map_err(decode_error)?;
    let origin: String = row.try_get("origin").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let credits_needed: i64 = row.try_get("credits_needed").map_err(decode_error)?;

    let answers: BTreeMap<String, AnswerValue> =
        serde_json::from_str(&answers_json).map_err(decode_error)?;
    let breakdown: Vec<BreakdownLine> =
        serde_json::from_str(&breakdown_json).map_err(decode_error)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_error)?;

    Ok(CalculationRecord {
        id: row.try_get("id").map_err(decode_error)?,
        sector: row.try_get("sector").map_err(decode_error)?,
        result: CalculationResult {
            total_emissions: row.try_get("total_emissions").map_err(decode_error)?,
            scope1_emissions: row.try_get("scope1_emissions").map_err(decode_error)?,
            scope2_emissions: row.try_get("scope2_emissions").map_err(decode_error)?,
            scope3_emissions: row.try_get("scope3_emissions").map_err(decode_error)?,
            credits_needed: u64::try_from(credits_needed).map_err(decode_error)?,
            cost_estimate: row.try_get("cost_estimate").map_err(decode_error)?,
            breakdown,
        },
        answers,
        origin: origin.parse()?,
        created_at,
    })
}

#[async_trait::async_trait]
impl CalculationRepository for SqlCalculationRepository {
    async fn save(&self, record: CalculationRecord) -> Result<(), RepositoryError> {
        let answers_json = serde_json::to_string(&record.answers).map_err(decode_error)?;
        let breakdown_json = serde_json::to_string(&record.result.breakdown).map_err(decode_error)?;
        let credits_needed = i64::try_from(record.result.credits_needed).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO emission_calculations (id, sector, total_emissions, scope1_emissions,
                                                scope2_emissions, scope3_emissions, credits_needed,
                                                cost_estimate, answers_json, breakdown_json,
                                                origin, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 total_emissions = excluded.total_emissions,
                 scope1_emissions = excluded.scope1_emissions,
                 scope2_emissions = excluded.scope2_emissions,
                 scope3_emissions = excluded.scope3_emissions,
                 credits_needed = excluded.credits_needed,
                 cost_estimate = excluded.cost_estimate,
                 answers_json = excluded.answers_json,
                 breakdown_json = excluded.breakdown_json",
        )
        .bind(&record.id)
        .bind(&record.sector)
        .bind(record.result.total_emissions)
        .bind(record.result.scope1_emissions)
        .bind(record.result.scope2_emissions)
        .bind(record.result.scope3_emissions)
        .bind(credits_needed)
        .bind(record.result.cost_estimate)
        .bind(answers_json)
        .bind(breakdown_json)
        .bind(record.origin.as_str())
        .bind(record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<CalculationRecord>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CalculationRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }
}
