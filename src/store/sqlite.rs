//! SQLite persistence for Nisab-year records.
//!
//! Records are stored as JSON documents next to the columns needed for
//! lookups and compare-and-swap. The audit table refuses UPDATE and DELETE
//! through triggers, and a partial unique index allows one draft per user.
//!
//! # Example
//!
//! ```ignore
//! use zakat_hawl::store::SqliteRecordStore;
//!
//! let store = SqliteRecordStore::connect("sqlite:zakat.db?mode=rwc").await?;
//! let drafts = store.open_draft(user_id).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{PriceCacheStore, RecordStore};
use crate::audit::AuditTrailEntry;
use crate::pricing::{Metal, MetalPrice};
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::ZakatError;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nisab_year_records (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS nisab_year_records_one_draft
    ON nisab_year_records (user_id) WHERE status = 'DRAFT'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_trail (
        id TEXT PRIMARY KEY NOT NULL,
        record_id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        data TEXT NOT NULL,
        UNIQUE (record_id, sequence)
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS audit_trail_no_update
    BEFORE UPDATE ON audit_trail
    BEGIN
        SELECT RAISE(ABORT, 'audit trail is append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS audit_trail_no_delete
    BEFORE DELETE ON audit_trail
    BEGIN
        SELECT RAISE(ABORT, 'audit trail is append-only');
    END
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metal_price_cache (
        metal TEXT NOT NULL,
        fetch_date TEXT NOT NULL,
        price_per_gram TEXT NOT NULL,
        currency TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        PRIMARY KEY (metal, fetch_date)
    )
    "#,
];

/// A SQLite-backed implementation of [`RecordStore`] and [`PriceCacheStore`].
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Connects to a SQLite database and ensures the schema exists.
    ///
    /// In-memory databases use a single connection so every query sees the
    /// same database.
    pub async fn connect(url: &str) -> Result<Self, ZakatError> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| storage("connection", e))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wraps an existing pool. Does not run migrations.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), ZakatError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| storage("migration", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn storage(context: &str, err: impl std::fmt::Display) -> ZakatError {
    ZakatError::Storage(format!("SQLite {} error: {}", context, err))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn status_text(status: RecordStatus) -> String {
    status.to_string()
}

fn to_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, ZakatError> {
    serde_json::to_string(value).map_err(|e| storage(&format!("serialize {}", field), e))
}

fn record_from_row(row: &SqliteRow) -> Result<NisabYearRecord, ZakatError> {
    let data: String = row.try_get("data").map_err(|e| storage("read", e))?;
    serde_json::from_str(&data).map_err(|e| storage("decode record", e))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create_draft(&self, record: &NisabYearRecord) -> Result<bool, ZakatError> {
        let result = sqlx::query(
            r#"
            INSERT INTO nisab_year_records (id, user_id, status, version, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(status_text(record.status))
        .bind(record.version as i64)
        .bind(to_json("record", record)?)
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(storage("insert", err)),
        }
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError> {
        let row = sqlx::query("SELECT data FROM nisab_year_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("query", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, ZakatError> {
        let rows = sqlx::query(
            "SELECT data FROM nisab_year_records WHERE user_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("query", e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn open_draft(&self, user_id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError> {
        let row = sqlx::query("SELECT data FROM nisab_year_records WHERE user_id = ? AND status = 'DRAFT'")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("query", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn save_record(
        &self,
        record: &NisabYearRecord,
        expected_version: u64,
        audit: Option<&AuditTrailEntry>,
    ) -> Result<bool, ZakatError> {
        let mut tx = self.pool.begin().await.map_err(|e| storage("transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE nisab_year_records
            SET status = ?, version = ?, data = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(status_text(record.status))
        .bind(record.version as i64)
        .bind(to_json("record", record)?)
        .bind(timestamp(record.updated_at))
        .bind(record.id.to_string())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage("update", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| storage("rollback", e))?;
            let exists = self.get_record(record.id).await?.is_some();
            return if exists {
                Ok(false)
            } else {
                Err(ZakatError::not_found("record", record.id))
            };
        }

        if let Some(entry) = audit {
            let inserted = sqlx::query(
                r#"
                INSERT INTO audit_trail (id, record_id, sequence, event_type, timestamp, data)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.id().to_string())
            .bind(entry.record_id().to_string())
            .bind(entry.sequence() as i64)
            .bind(entry.event_type().to_string())
            .bind(timestamp(entry.timestamp()))
            .bind(to_json("audit entry", entry)?)
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                let unique = is_unique_violation(&err);
                tx.rollback().await.map_err(|e| storage("rollback", e))?;
                return Err(if unique {
                    ZakatError::AuditIntegrity {
                        record_id: record.id,
                        reason: format!("sequence {} already exists", entry.sequence()),
                    }
                } else {
                    storage("audit insert", err)
                });
            }
        }

        tx.commit().await.map_err(|e| storage("commit", e))?;
        Ok(true)
    }

    async fn delete_record(&self, id: Uuid, expected_version: u64) -> Result<bool, ZakatError> {
        let deleted = sqlx::query("DELETE FROM nisab_year_records WHERE id = ? AND version = ? AND status = 'DRAFT'")
            .bind(id.to_string())
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| storage("delete", e))?;

        if deleted.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_record(id).await? {
            Some(_) => Ok(false),
            None => Err(ZakatError::not_found("record", id)),
        }
    }

    async fn audit_trail(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, ZakatError> {
        let rows = sqlx::query("SELECT data FROM audit_trail WHERE record_id = ? ORDER BY sequence ASC")
            .bind(record_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage("query", e))?;

        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data").map_err(|e| storage("read", e))?;
                serde_json::from_str(&data).map_err(|e| storage("decode audit entry", e))
            })
            .collect()
    }
}

#[async_trait]
impl PriceCacheStore for SqliteRecordStore {
    async fn save_price(&self, price: &MetalPrice, expires_at: DateTime<Utc>) -> Result<(), ZakatError> {
        let mut tx = self.pool.begin().await.map_err(|e| storage("transaction", e))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO metal_price_cache
                (metal, fetch_date, price_per_gram, currency, fetched_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(price.metal.to_string())
        .bind(price.fetched_at.date_naive().format("%Y-%m-%d").to_string())
        .bind(price.price_per_gram.to_string())
        .bind(&price.currency)
        .bind(timestamp(price.fetched_at))
        .bind(timestamp(expires_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage("price insert", e))?;

        // Rows that expired before this quote are dead weight.
        let pruned = sqlx::query("DELETE FROM metal_price_cache WHERE metal = ? AND expires_at <= ?")
            .bind(price.metal.to_string())
            .bind(timestamp(price.fetched_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| storage("price prune", e))?
            .rows_affected();

        tx.commit().await.map_err(|e| storage("commit", e))?;
        if pruned > 0 {
            tracing::debug!(metal = %price.metal, pruned, "pruned expired price rows");
        }
        Ok(())
    }

    async fn latest_price(&self, metal: Metal) -> Result<Option<MetalPrice>, ZakatError> {
        let row = sqlx::query(
            r#"
            SELECT price_per_gram, currency, fetched_at
            FROM metal_price_cache
            WHERE metal = ?
            ORDER BY fetched_at DESC
            LIMIT 1
            "#,
        )
        .bind(metal.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("price query", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let price: String = row.try_get("price_per_gram").map_err(|e| storage("read", e))?;
        let currency: String = row.try_get("currency").map_err(|e| storage("read", e))?;
        let fetched_at: String = row.try_get("fetched_at").map_err(|e| storage("read", e))?;

        let price_per_gram = rust_decimal::Decimal::from_str_exact(&price)
            .map_err(|e| storage("decode price", e))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| storage("decode timestamp", e))?
            .with_timezone(&Utc);

        Ok(Some(MetalPrice {
            metal,
            price_per_gram,
            currency,
            fetched_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Asset;
    use crate::calculation::{CalculationRequest, ZakatEngine};
    use crate::hawl::{HawlPeriod, HawlRules, IslamicCivilCalendar};
    use crate::pricing::Prices;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn draft(user: Uuid) -> NisabYearRecord {
        let assets = vec![Asset::cash(user, 10_000).unwrap()];
        let calc = ZakatEngine::default()
            .calculate(
                &CalculationRequest::new("standard", "2024-01-01"),
                &assets,
                &Prices::new(dec!(65), dec!(0.8)).unwrap(),
            )
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let period = HawlPeriod::starting(&IslamicCivilCalendar::new(), start, HawlRules::default()).unwrap();
        NisabYearRecord::open_draft(user, None, period, &calc, Utc::now())
    }

    #[tokio::test]
    async fn test_one_draft_per_user() {
        let store = SqliteRecordStore::connect("sqlite::memory:").await.expect("connect");
        let user = Uuid::new_v4();
        assert!(store.create_draft(&draft(user)).await.unwrap());
        assert!(!store.create_draft(&draft(user)).await.unwrap());
        assert!(store.create_draft(&draft(Uuid::new_v4())).await.unwrap());
        assert_eq!(store.list_records(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = SqliteRecordStore::connect("sqlite::memory:").await.expect("connect");
        let mut record = draft(Uuid::new_v4());
        store.create_draft(&record).await.unwrap();

        record.version = 1;
        record.notes = Some("first".into());
        assert!(store.save_record(&record, 0, None).await.unwrap());
        assert!(!store.save_record(&record, 0, None).await.unwrap());

        let loaded = store.get_record(record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_audit_rows_are_immutable() {
        let store = SqliteRecordStore::connect("sqlite::memory:").await.expect("connect");
        let err = sqlx::query(
            "INSERT INTO audit_trail (id, record_id, sequence, event_type, timestamp, data) VALUES ('a', 'r', 0, 'FINALIZED', 't', '{}')",
        )
        .execute(store.pool())
        .await;
        assert!(err.is_ok());

        let update = sqlx::query("UPDATE audit_trail SET data = '[]' WHERE id = 'a'")
            .execute(store.pool())
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM audit_trail WHERE id = 'a'").execute(store.pool()).await;
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn test_price_cache_round_trip() {
        let store = SqliteRecordStore::connect("sqlite::memory:").await.expect("connect");
        let fetched_at = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z").unwrap().with_timezone(&Utc);
        let price = MetalPrice::new(Metal::Silver, dec!(0.85), fetched_at);
        store.save_price(&price, fetched_at + chrono::Duration::hours(24)).await.unwrap();
        assert_eq!(store.latest_price(Metal::Silver).await.unwrap(), Some(price));
        assert_eq!(store.latest_price(Metal::Gold).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_prices_are_pruned() {
        let store = SqliteRecordStore::connect("sqlite::memory:").await.expect("connect");
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let ttl = chrono::Duration::hours(24);
        for (fetched_at, value) in [
            ("2024-04-30T12:00:00Z", dec!(60)),
            ("2024-05-02T20:00:00Z", dec!(62)),
            ("2024-05-03T12:00:00Z", dec!(65)),
        ] {
            let price = MetalPrice::new(Metal::Gold, value, at(fetched_at));
            store.save_price(&price, price.fetched_at + ttl).await.unwrap();
        }
        store
            .save_price(&MetalPrice::new(Metal::Silver, dec!(0.8), at("2024-04-01T00:00:00Z")), at("2024-04-02T00:00:00Z"))
            .await
            .unwrap();

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT metal, fetch_date FROM metal_price_cache ORDER BY metal, fetch_date")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let expected = [("gold", "2024-05-02"), ("gold", "2024-05-03"), ("silver", "2024-04-01")];
        assert_eq!(
            rows,
            expected.map(|(m, d)| (m.to_string(), d.to_string())).to_vec()
        );
        assert_eq!(store.latest_price(Metal::Gold).await.unwrap().unwrap().price_per_gram, dec!(65));
    }
}
