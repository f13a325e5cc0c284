//! Append-only audit trail for record lifecycle transitions.
//!
//! Entries are created by the service only; their fields are private and
//! nothing mutates them after construction. [`verify_audit_trail`] checks the
//! append-only invariants before every append and on demand.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{FieldChange, NisabYearRecord};
use crate::types::ZakatError;

/// Minimum length of an unlock reason.
pub const MIN_UNLOCK_REASON_LEN: usize = 10;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Finalized,
    Unlocked,
    Edited,
    Refinalized,
}

/// Totals frozen at (re-)finalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FrozenTotals {
    pub total_wealth: Decimal,
    pub zakatable_wealth: Decimal,
    pub zakat_due: Decimal,
    pub nisab_threshold: Decimal,
}

impl From<&NisabYearRecord> for FrozenTotals {
    fn from(record: &NisabYearRecord) -> Self {
        Self {
            total_wealth: record.total_wealth,
            zakatable_wealth: record.zakatable_wealth,
            zakat_due: record.zakat_due,
            nisab_threshold: record.nisab_threshold_at_start(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDetails {
    Finalized { totals: FrozenTotals },
    Unlocked { reason: String },
    Edited { changes: Vec<FieldChange> },
    Refinalized { totals: FrozenTotals },
}

impl AuditDetails {
    pub fn event_type(&self) -> AuditEventType {
        match self {
            Self::Finalized { .. } => AuditEventType::Finalized,
            Self::Unlocked { .. } => AuditEventType::Unlocked,
            Self::Edited { .. } => AuditEventType::Edited,
            Self::Refinalized { .. } => AuditEventType::Refinalized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailEntry {
    id: Uuid,
    record_id: Uuid,
    sequence: u64,
    timestamp: DateTime<Utc>,
    actor_id: Uuid,
    details: AuditDetails,
}

impl AuditTrailEntry {
    pub(crate) fn new(
        record_id: Uuid,
        sequence: u64,
        timestamp: DateTime<Utc>,
        actor_id: Uuid,
        details: AuditDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            sequence,
            timestamp,
            actor_id,
            details,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor_id(&self) -> Uuid {
        self.actor_id
    }

    pub fn details(&self) -> &AuditDetails {
        &self.details
    }

    pub fn event_type(&self) -> AuditEventType {
        self.details.event_type()
    }
}

fn integrity(record_id: Uuid, reason: impl Into<String>) -> ZakatError {
    let reason = reason.into();
    tracing::error!(%record_id, %reason, "audit trail integrity violation");
    ZakatError::AuditIntegrity { record_id, reason }
}

/// Checks that `entries` form a valid append-only trail for `record_id`.
///
/// Sequence numbers run contiguously from zero, timestamps never go back, and
/// events follow `FINALIZED (UNLOCKED EDITED* REFINALIZED)*`, optionally ending
/// on an open unlock.
pub fn verify_audit_trail(record_id: Uuid, entries: &[AuditTrailEntry]) -> Result<(), ZakatError> {
    let mut previous: Option<&AuditTrailEntry> = None;

    for (index, entry) in entries.iter().enumerate() {
        if entry.record_id != record_id {
            return Err(integrity(
                record_id,
                format!("entry {} belongs to record {}", entry.id, entry.record_id),
            ));
        }
        if entry.sequence != index as u64 {
            return Err(integrity(
                record_id,
                format!("expected sequence {}, found {}", index, entry.sequence),
            ));
        }

        let event = entry.event_type();
        let allowed = match previous.map(|p| p.event_type()) {
            None => event == AuditEventType::Finalized,
            Some(AuditEventType::Finalized | AuditEventType::Refinalized) => {
                event == AuditEventType::Unlocked
            }
            Some(AuditEventType::Unlocked | AuditEventType::Edited) => {
                matches!(event, AuditEventType::Edited | AuditEventType::Refinalized)
            }
        };
        if !allowed {
            return Err(integrity(
                record_id,
                format!("{} cannot follow {:?} at sequence {}", event, previous.map(|p| p.event_type()), index),
            ));
        }

        if let Some(prev) = previous
            && entry.timestamp < prev.timestamp
        {
            return Err(integrity(
                record_id,
                format!("timestamp at sequence {} precedes its predecessor", index),
            ));
        }

        match &entry.details {
            AuditDetails::Unlocked { reason } if reason.trim().chars().count() < MIN_UNLOCK_REASON_LEN => {
                return Err(integrity(record_id, format!("unlock reason at sequence {} is too short", index)));
            }
            AuditDetails::Edited { changes } if changes.is_empty() => {
                return Err(integrity(record_id, format!("edit at sequence {} records no changes", index)));
            }
            _ => {}
        }

        previous = Some(entry);
    }

    Ok(())
}

/// Verifies the trail as it would look with `next` appended.
pub fn verify_append(
    record_id: Uuid,
    existing: &[AuditTrailEntry],
    next: &AuditTrailEntry,
) -> Result<(), ZakatError> {
    let mut candidate = existing.to_vec();
    candidate.push(next.clone());
    verify_audit_trail(record_id, &candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn totals() -> FrozenTotals {
        FrozenTotals {
            total_wealth: dec!(10000),
            zakatable_wealth: dec!(10000),
            zakat_due: dec!(250),
            nisab_threshold: dec!(489.89),
        }
    }

    fn trail(record: Uuid, details: Vec<AuditDetails>) -> Vec<AuditTrailEntry> {
        let start = Utc::now();
        details
            .into_iter()
            .enumerate()
            .map(|(i, d)| AuditTrailEntry::new(record, i as u64, start + Duration::seconds(i as i64), Uuid::nil(), d))
            .collect()
    }

    #[test]
    fn test_valid_full_cycle() {
        let record = Uuid::new_v4();
        let entries = trail(
            record,
            vec![
                AuditDetails::Finalized { totals: totals() },
                AuditDetails::Unlocked { reason: "Forgot a savings account".into() },
                AuditDetails::Edited {
                    changes: vec![FieldChange::ZakatDue { before: dec!(250), after: dec!(275) }],
                },
                AuditDetails::Refinalized { totals: totals() },
            ],
        );
        assert!(verify_audit_trail(record, &entries).is_ok());
        assert_eq!(entries[3].event_type(), AuditEventType::Refinalized);
    }

    #[test]
    fn test_grammar_violations() {
        let record = Uuid::new_v4();
        let starts_unlocked = trail(record, vec![AuditDetails::Unlocked { reason: "0123456789".into() }]);
        assert!(verify_audit_trail(record, &starts_unlocked).is_err());

        let double_final = trail(
            record,
            vec![AuditDetails::Finalized { totals: totals() }, AuditDetails::Refinalized { totals: totals() }],
        );
        let err = verify_audit_trail(record, &double_final).unwrap_err();
        assert_eq!(err.code(), "AUDIT_INTEGRITY_ERROR");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_sequence_gap_detected() {
        let record = Uuid::new_v4();
        let mut entries = trail(
            record,
            vec![
                AuditDetails::Finalized { totals: totals() },
                AuditDetails::Unlocked { reason: "Forgot a savings account".into() },
            ],
        );
        entries.remove(0);
        assert!(verify_audit_trail(record, &entries).is_err());
    }

    #[test]
    fn test_foreign_entry_and_short_reason() {
        let record = Uuid::new_v4();
        let foreign = trail(Uuid::new_v4(), vec![AuditDetails::Finalized { totals: totals() }]);
        assert!(verify_audit_trail(record, &foreign).is_err());

        let short = trail(
            record,
            vec![AuditDetails::Finalized { totals: totals() }, AuditDetails::Unlocked { reason: "too short".into() }],
        );
        assert!(verify_audit_trail(record, &short).is_err());
    }

    #[test]
    fn test_verify_append() {
        let record = Uuid::new_v4();
        let existing = trail(record, vec![AuditDetails::Finalized { totals: totals() }]);
        let next = AuditTrailEntry::new(
            record,
            1,
            existing[0].timestamp(),
            Uuid::nil(),
            AuditDetails::Unlocked { reason: "Recount of gold jewelry".into() },
        );
        assert!(verify_append(record, &existing, &next).is_ok());
        let wrong = AuditTrailEntry::new(record, 1, existing[0].timestamp(), Uuid::nil(), AuditDetails::Finalized { totals: totals() });
        assert!(verify_append(record, &existing, &wrong).is_err());
    }

    #[test]
    fn test_details_tagged_serialization() {
        let json = serde_json::to_string(&AuditDetails::Unlocked { reason: "Recount of gold".into() }).unwrap();
        assert_eq!(json, r#"{"type":"UNLOCKED","reason":"Recount of gold"}"#);
    }
}
