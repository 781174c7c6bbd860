use tokio::sync::RwLock;

use super::{CalculationRecord, CalculationRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryCalculationRepository {
    records: RwLock<Vec<CalculationRecord>>,
}

#[async_trait::async_trait]
impl CalculationRepository for InMemoryCalculationRepository {
    async fn save(&self, record: CalculationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<CalculationRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut recent: Vec<_> = records.iter().rev().cloned().collect();
        recent.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CalculationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|record| record.id == id).cloned())
    }
}
