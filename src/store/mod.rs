//! Persistence interfaces for records, the audit trail and the price cache.
//!
//! [`memory::InMemoryRecordStore`] backs tests and single-process use; the
//! `sqlite` feature adds [`sqlite::SqliteRecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditTrailEntry;
use crate::pricing::{Metal, MetalPrice};
use crate::record::NisabYearRecord;
use crate::types::ZakatError;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryRecordStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;

/// Storage for Nisab-year records and their audit trails.
///
/// Writes are compare-and-swap on `version`, so concurrent writers never
/// overwrite each other blindly.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new draft. Returns `false` when the user already has one.
    async fn create_draft(&self, record: &NisabYearRecord) -> Result<bool, ZakatError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError>;

    /// All records of a user, oldest first.
    async fn list_records(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, ZakatError>;

    async fn open_draft(&self, user_id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError>;

    /// Replaces the record if its stored version is still `expected_version`,
    /// appending `audit` in the same atomic step. Returns `false` on a version
    /// mismatch, in which case nothing is written.
    async fn save_record(
        &self,
        record: &NisabYearRecord,
        expected_version: u64,
        audit: Option<&AuditTrailEntry>,
    ) -> Result<bool, ZakatError>;

    /// Removes a draft at `expected_version`. Returns `false` on a mismatch.
    async fn delete_record(&self, id: Uuid, expected_version: u64) -> Result<bool, ZakatError>;

    /// Audit entries of a record ordered by sequence.
    async fn audit_trail(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, ZakatError>;
}

/// Persistent metal price cache keyed by metal and fetch date.
#[async_trait]
pub trait PriceCacheStore: Send + Sync {
    async fn save_price(&self, price: &MetalPrice, expires_at: DateTime<Utc>) -> Result<(), ZakatError>;

    /// Most recently fetched price for `metal`, expired or not.
    async fn latest_price(&self, metal: Metal) -> Result<Option<MetalPrice>, ZakatError>;
}
