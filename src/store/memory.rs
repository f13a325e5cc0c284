use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PriceCacheStore, RecordStore};
use crate::audit::AuditTrailEntry;
use crate::pricing::{Metal, MetalPrice};
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::ZakatError;

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) records: HashMap<Uuid, NisabYearRecord>,
    pub(crate) audit: HashMap<Uuid, Vec<AuditTrailEntry>>,
    pub(crate) prices: HashMap<(Metal, NaiveDate), (MetalPrice, DateTime<Utc>)>,
}

/// Process-local store. One mutex guards all state, so every trait call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    pub(crate) state: Mutex<MemoryState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_draft(&self, record: &NisabYearRecord) -> Result<bool, ZakatError> {
        let mut state = self.state.lock().await;
        let has_draft = state
            .records
            .values()
            .any(|r| r.user_id == record.user_id && r.status == RecordStatus::Draft);
        if has_draft {
            return Ok(false);
        }
        if state.records.contains_key(&record.id) {
            return Err(ZakatError::Storage(format!("record {} already exists", record.id)));
        }
        state.records.insert(record.id, record.clone());
        Ok(true)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn list_records(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, ZakatError> {
        let state = self.state.lock().await;
        let mut records: Vec<NisabYearRecord> = state
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    async fn open_draft(&self, user_id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .find(|r| r.user_id == user_id && r.status == RecordStatus::Draft)
            .cloned())
    }

    async fn save_record(
        &self,
        record: &NisabYearRecord,
        expected_version: u64,
        audit: Option<&AuditTrailEntry>,
    ) -> Result<bool, ZakatError> {
        let mut state = self.state.lock().await;
        match state.records.get(&record.id) {
            Some(stored) if stored.version == expected_version => {}
            Some(_) => return Ok(false),
            None => return Err(ZakatError::not_found("record", record.id)),
        }

        if let Some(entry) = audit {
            let trail = state.audit.entry(record.id).or_default();
            if entry.record_id() != record.id || entry.sequence() != trail.len() as u64 {
                return Err(ZakatError::AuditIntegrity {
                    record_id: record.id,
                    reason: format!(
                        "append of sequence {} onto a trail of {} entries",
                        entry.sequence(),
                        trail.len()
                    ),
                });
            }
            trail.push(entry.clone());
        }

        state.records.insert(record.id, record.clone());
        Ok(true)
    }

    async fn delete_record(&self, id: Uuid, expected_version: u64) -> Result<bool, ZakatError> {
        let mut state = self.state.lock().await;
        match state.records.get(&id) {
            Some(stored) if stored.version == expected_version && stored.status == RecordStatus::Draft => {
                state.records.remove(&id);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ZakatError::not_found("record", id)),
        }
    }

    async fn audit_trail(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, ZakatError> {
        Ok(self.state.lock().await.audit.get(&record_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PriceCacheStore for InMemoryRecordStore {
    async fn save_price(&self, price: &MetalPrice, expires_at: DateTime<Utc>) -> Result<(), ZakatError> {
        let key = (price.metal, price.fetched_at.date_naive());
        let mut state = self.state.lock().await;
        state
            .prices
            .retain(|(metal, _), (_, expiry)| *metal != price.metal || *expiry > price.fetched_at);
        state.prices.insert(key, (price.clone(), expires_at));
        Ok(())
    }

    async fn latest_price(&self, metal: Metal) -> Result<Option<MetalPrice>, ZakatError> {
        let state = self.state.lock().await;
        Ok(state
            .prices
            .values()
            .filter(|(price, _)| price.metal == metal)
            .max_by_key(|(price, _)| price.fetched_at)
            .map(|(price, _)| price.clone()))
    }
}
