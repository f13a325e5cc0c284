//! Record lifecycle state machine.
//!
//! Stateless transition rules: which actions are legal in which status and
//! where they lead. Guards that depend on time or input (Hawl completion,
//! unlock reason) live in the service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::RecordStatus;
use crate::types::ZakatError;

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
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleAction {
    Finalize,
    Unlock,
    Edit,
    Refinalize,
    Delete,
    RefreshAssets,
}

impl RecordStatus {
    /// Actions permitted from this status.
    pub fn legal_actions(&self) -> Vec<LifecycleAction> {
        match self {
            RecordStatus::Draft => vec![
                LifecycleAction::Finalize,
                LifecycleAction::Delete,
                LifecycleAction::RefreshAssets,
            ],
            RecordStatus::Finalized => vec![LifecycleAction::Unlock],
            RecordStatus::Unlocked => vec![LifecycleAction::Edit, LifecycleAction::Refinalize],
        }
    }

    pub fn allows(&self, action: LifecycleAction) -> bool {
        next_status(*self, action).is_some()
    }
}

/// Status reached by applying `action` in `from`, if legal.
///
/// `Delete` keeps the status; the store removes the record.
pub fn next_status(from: RecordStatus, action: LifecycleAction) -> Option<RecordStatus> {
    use LifecycleAction::*;
    use RecordStatus::*;

    match (from, action) {
        (Draft, Finalize) => Some(Finalized),
        (Draft, Delete) => Some(Draft),
        (Draft, RefreshAssets) => Some(Draft),
        (Finalized, Unlock) => Some(Unlocked),
        (Unlocked, Edit) => Some(Unlocked),
        (Unlocked, Refinalize) => Some(Finalized),
        _ => None,
    }
}

/// Like [`next_status`] but fails with `InvalidTransition` naming the legal actions.
pub fn transition(
    record_id: Uuid,
    from: RecordStatus,
    action: LifecycleAction,
) -> Result<RecordStatus, ZakatError> {
    next_status(from, action).ok_or_else(|| ZakatError::InvalidTransition {
        record_id,
        from,
        action,
        legal: from.legal_actions(),
    })
}
