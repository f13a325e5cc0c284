use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::LifecycleAction;
use crate::pricing::Metal;
use crate::record::RecordStatus;

/// The kind of operation a [`CalculationStep`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Initial,
    Add,
    Subtract,
    Compare,
    Rate,
    Result,
    Info,
}

/// Represents a single step in the Zakat calculation process.
///
/// Steps are emitted in order so the final amount can be audited (and explained
/// to the user) without re-running the calculation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct CalculationStep {
    /// Human-readable description of what this step does.
    pub description: String,
    /// The value at this step (if applicable).
    pub amount: Option<Decimal>,
    pub operation: Operation,
}

impl CalculationStep {
    fn with(operation: Operation, description: impl Into<String>, amount: Option<Decimal>) -> Self {
        Self {
            description: description.into(),
            amount,
            operation,
        }
    }

    pub fn initial(description: impl Into<String>, amount: Decimal) -> Self {
        Self::with(Operation::Initial, description, Some(amount))
    }

    pub fn add(description: impl Into<String>, amount: Decimal) -> Self {
        Self::with(Operation::Add, description, Some(amount))
    }

    pub fn subtract(description: impl Into<String>, amount: Decimal) -> Self {
        Self::with(Operation::Subtract, description, Some(amount))
    }

    pub fn compare(description: impl Into<String>, amount: Decimal) -> Self {
        Self::with(Operation::Compare, description, Some(amount))
    }

    pub fn rate(description: impl Into<String>, rate: Decimal) -> Self {
        Self::with(Operation::Rate, description, Some(rate))
    }

    pub fn result(description: impl Into<String>, amount: Decimal) -> Self {
        Self::with(Operation::Result, description, Some(amount))
    }

    pub fn info(description: impl Into<String>) -> Self {
        Self::with(Operation::Info, description, None)
    }

    /// Symbol used when rendering the step in a plain-text explanation.
    pub fn symbol(&self) -> &'static str {
        match self.operation {
            Operation::Initial | Operation::Info => " ",
            Operation::Add => "+",
            Operation::Subtract => "-",
            Operation::Compare => "?",
            Operation::Rate => "x",
            Operation::Result => "=",
        }
    }
}

/// Errors produced by the calculation engine and the Nisab-year lifecycle.
///
/// Every variant is recoverable at the request boundary and maps to a stable
/// machine code via [`ZakatError::code`]. The only variant that must stop
/// further writes is [`ZakatError::AuditIntegrity`].
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ZakatError {
    #[error("Invalid '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Unknown methodology '{0}'")]
    UnknownMethodology(String),

    #[error("Record {record_id} cannot be finalized before its Hawl completes on {completion_date}")]
    PrematureFinalization {
        record_id: Uuid,
        completion_date: NaiveDate,
    },

    #[error("Cannot {action} record {record_id} while it is {from}; legal actions: {}", list_actions(.legal))]
    InvalidTransition {
        record_id: Uuid,
        from: RecordStatus,
        action: LifecycleAction,
        legal: Vec<LifecycleAction>,
    },

    #[error("Price oracle unavailable for {metal} and no cached price exists: {reason}")]
    PriceOracleUnavailable { metal: Metal, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Audit trail of record {record_id} failed integrity check: {reason}")]
    AuditIntegrity { record_id: Uuid, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn list_actions(actions: &[LifecycleAction]) -> String {
    if actions.is_empty() {
        return "none".to_string();
    }
    actions.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

impl ZakatError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ZakatError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        ZakatError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UnknownMethodology(_) => "UNKNOWN_METHODOLOGY",
            Self::PrematureFinalization { .. } => "PREMATURE_FINALIZATION",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PriceOracleUnavailable { .. } => "PRICE_ORACLE_UNAVAILABLE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AuditIntegrity { .. } => "AUDIT_INTEGRITY_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::UnknownMethodology(_) => 400,
            Self::NotFound { .. } => 404,
            Self::PrematureFinalization { .. } | Self::InvalidTransition { .. } => 409,
            Self::PriceOracleUnavailable { .. } => 503,
            Self::AuditIntegrity { .. } | Self::Configuration(_) | Self::Storage(_) => 500,
        }
    }

    /// True when writes to the affected record must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuditIntegrity { .. })
    }
}

/// Serialized error shape returned at the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl From<&ZakatError> for ErrorBody {
    fn from(err: &ZakatError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            status: err.status_code(),
        }
    }
}
