//! Nisab-year records.
//!
//! A record tracks one Hawl for one user. The Nisab it was opened against is
//! locked for the record's lifetime; totals and the asset snapshot are derived
//! and may be refreshed while the record is a draft.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::AssetCategory;
use crate::calculation::ZakatCalculation;
use crate::hawl::{HawlPeriod, HijriDate};
use crate::methodology::{CustomRules, MethodologyId};
use crate::nisab::{NisabInfo, NisabSource};
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RecordStatus {
    Draft,
    Finalized,
    Unlocked,
}

/// An asset as captured into a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetSnapshot {
    pub asset_id: Uuid,
    pub name: String,
    pub category: AssetCategory,
    pub value: Decimal,
    pub is_zakatable: bool,
    pub zakatable_amount: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// Derived totals of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordTotals {
    pub total_wealth: Decimal,
    pub zakatable_wealth: Decimal,
    pub zakat_due: Decimal,
}

impl From<&ZakatCalculation> for RecordTotals {
    fn from(calc: &ZakatCalculation) -> Self {
        Self {
            total_wealth: calc.totals.total_wealth,
            zakatable_wealth: calc.totals.net_zakatable,
            zakat_due: calc.totals.zakat_due,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NisabYearRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: RecordStatus,
    pub methodology: MethodologyId,
    #[serde(default)]
    pub custom_rules: Option<CustomRules>,
    pub hawl_start_date: NaiveDate,
    pub hawl_start_hijri: HijriDate,
    pub hawl_completion_date: NaiveDate,
    pub hawl_completion_hijri: HijriDate,
    /// Nisab locked at Hawl start.
    pub nisab: NisabInfo,
    pub asset_breakdown: Vec<AssetSnapshot>,
    pub total_wealth: Decimal,
    pub zakatable_wealth: Decimal,
    pub zakat_due: Decimal,
    pub finalized_at: Option<DateTime<Utc>>,
    pub interrupted: bool,
    pub interrupted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NisabYearRecord {
    /// Opens a draft from the calculation that first met the Nisab.
    pub fn open_draft(
        user_id: Uuid,
        custom_rules: Option<CustomRules>,
        period: HawlPeriod,
        calculation: &ZakatCalculation,
        now: DateTime<Utc>,
    ) -> Self {
        let totals = RecordTotals::from(calculation);
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: RecordStatus::Draft,
            methodology: calculation.methodology,
            custom_rules,
            hawl_start_date: period.start,
            hawl_start_hijri: period.start_hijri,
            hawl_completion_date: period.completion,
            hawl_completion_hijri: period.completion_hijri,
            nisab: calculation.nisab.clone(),
            asset_breakdown: snapshot(calculation, now),
            total_wealth: totals.total_wealth,
            zakatable_wealth: totals.zakatable_wealth,
            zakat_due: totals.zakat_due,
            finalized_at: None,
            interrupted: false,
            interrupted_at: None,
            notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn nisab_threshold_at_start(&self) -> Decimal {
        self.nisab.effective_nisab
    }

    pub fn nisab_basis(&self) -> NisabSource {
        self.nisab.nisab_basis
    }

    pub fn hawl_period(&self) -> HawlPeriod {
        HawlPeriod {
            start: self.hawl_start_date,
            start_hijri: self.hawl_start_hijri,
            completion: self.hawl_completion_date,
            completion_hijri: self.hawl_completion_hijri,
        }
    }

    pub fn totals(&self) -> RecordTotals {
        RecordTotals {
            total_wealth: self.total_wealth,
            zakatable_wealth: self.zakatable_wealth,
            zakat_due: self.zakat_due,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == RecordStatus::Draft
    }

    /// Replaces derived totals. Returns true when anything changed.
    pub fn apply_totals(&mut self, totals: RecordTotals) -> bool {
        if self.totals() == totals {
            return false;
        }
        self.total_wealth = totals.total_wealth;
        self.zakatable_wealth = totals.zakatable_wealth;
        self.zakat_due = totals.zakat_due;
        true
    }

    /// Re-captures the asset snapshot and totals. The locked Nisab is untouched.
    pub fn refresh_from(&mut self, calculation: &ZakatCalculation, now: DateTime<Utc>) {
        self.apply_totals(RecordTotals::from(calculation));
        self.asset_breakdown = snapshot(calculation, now);
    }

    /// Marks the Hawl interrupted the first time wealth drops below the Nisab.
    pub fn mark_interrupted(&mut self, now: DateTime<Utc>) -> bool {
        if self.interrupted {
            return false;
        }
        self.interrupted = true;
        self.interrupted_at = Some(now);
        true
    }
}

fn snapshot(calculation: &ZakatCalculation, captured_at: DateTime<Utc>) -> Vec<AssetSnapshot> {
    calculation
        .breakdown
        .iter()
        .map(|line| AssetSnapshot {
            asset_id: line.asset_id,
            name: line.name.clone(),
            category: line.category,
            value: line.value,
            is_zakatable: line.zakatable_amount > Decimal::ZERO,
            zakatable_amount: line.zakatable_amount,
            captured_at,
        })
        .collect()
}

/// A typed before/after pair for an edited field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum FieldChange {
    TotalWealth { before: Decimal, after: Decimal },
    ZakatableWealth { before: Decimal, after: Decimal },
    ZakatDue { before: Decimal, after: Decimal },
    Notes { before: Option<String>, after: Option<String> },
}

/// User edits to an unlocked record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default)]
    pub total_wealth: Option<Decimal>,
    #[serde(default)]
    pub zakatable_wealth: Option<Decimal>,
    #[serde(default)]
    pub zakat_due: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.total_wealth.is_none()
            && self.zakatable_wealth.is_none()
            && self.zakat_due.is_none()
            && self.notes.is_none()
    }

    pub fn validate(&self) -> Result<(), ZakatError> {
        if self.is_empty() {
            return Err(ZakatError::validation("patch", "no fields to update"));
        }
        let amounts = [
            ("totalWealth", self.total_wealth),
            ("zakatableWealth", self.zakatable_wealth),
            ("zakatDue", self.zakat_due),
        ];
        for (field, value) in amounts {
            if let Some(v) = value
                && v < Decimal::ZERO
            {
                return Err(ZakatError::validation(field, "must be non-negative"));
            }
        }
        Ok(())
    }

    /// Applies the patch and returns the changes made.
    ///
    /// Fails with `ValidationError` when the patch is invalid or changes nothing.
    pub fn apply(&self, record: &mut NisabYearRecord) -> Result<Vec<FieldChange>, ZakatError> {
        self.validate()?;
        let mut changes = Vec::new();

        if let Some(after) = self.total_wealth
            && after != record.total_wealth
        {
            changes.push(FieldChange::TotalWealth { before: record.total_wealth, after });
            record.total_wealth = after;
        }
        if let Some(after) = self.zakatable_wealth
            && after != record.zakatable_wealth
        {
            changes.push(FieldChange::ZakatableWealth { before: record.zakatable_wealth, after });
            record.zakatable_wealth = after;
        }
        if let Some(after) = self.zakat_due
            && after != record.zakat_due
        {
            changes.push(FieldChange::ZakatDue { before: record.zakat_due, after });
            record.zakat_due = after;
        }
        if let Some(notes) = &self.notes {
            let after = Some(notes.clone()).filter(|n| !n.trim().is_empty());
            if after != record.notes {
                changes.push(FieldChange::Notes { before: record.notes.clone(), after: after.clone() });
                record.notes = after;
            }
        }

        if changes.is_empty() {
            return Err(ZakatError::validation("patch", "patch does not change the record"));
        }
        Ok(changes)
    }
}
