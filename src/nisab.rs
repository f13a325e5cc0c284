//! Nisab threshold calculation.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::methodology::{self, MethodologyId, MethodologyRules, NisabBasis};
use crate::types::ZakatError;

/// Gold Nisab weight in grams.
pub const GOLD_NISAB_GRAMS: Decimal = dec!(87.48);
/// Silver Nisab weight in grams.
pub const SILVER_NISAB_GRAMS: Decimal = dec!(612.36);

/// Which threshold the effective Nisab came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NisabSource {
    Gold,
    Silver,
    Custom,
}

/// Nisab snapshot. Locked into a record when its Hawl starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NisabInfo {
    pub gold_nisab: Decimal,
    pub silver_nisab: Decimal,
    pub effective_nisab: Decimal,
    pub nisab_basis: NisabSource,
    pub methodology_basis: NisabBasis,
    pub gold_price_per_gram: Decimal,
    pub silver_price_per_gram: Decimal,
}

pub(crate) fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes the Nisab thresholds for the given prices under `rules`.
///
/// Dual bases take the lower threshold; a tie is labelled gold.
pub fn compute_nisab(
    gold_price_per_gram: Decimal,
    silver_price_per_gram: Decimal,
    rules: &MethodologyRules,
) -> Result<NisabInfo, ZakatError> {
    if gold_price_per_gram < Decimal::ZERO {
        return Err(ZakatError::validation("goldPricePerGram", "price must be non-negative"));
    }
    if silver_price_per_gram < Decimal::ZERO {
        return Err(ZakatError::validation("silverPricePerGram", "price must be non-negative"));
    }

    let gold_nisab = round_money(gold_price_per_gram * GOLD_NISAB_GRAMS);
    let silver_nisab = round_money(silver_price_per_gram * SILVER_NISAB_GRAMS);

    let (effective_nisab, nisab_basis) = match rules.nisab_basis {
        NisabBasis::Gold => (gold_nisab, NisabSource::Gold),
        NisabBasis::Silver => (silver_nisab, NisabSource::Silver),
        NisabBasis::DualMinimum | NisabBasis::DualFlexible => {
            if silver_nisab < gold_nisab {
                (silver_nisab, NisabSource::Silver)
            } else {
                (gold_nisab, NisabSource::Gold)
            }
        }
        NisabBasis::Custom => {
            let value = rules.custom_nisab_value.ok_or_else(|| {
                ZakatError::validation("customNisabValue", "required when nisab basis is custom")
            })?;
            if value < Decimal::ZERO {
                return Err(ZakatError::validation("customNisabValue", "must be non-negative"));
            }
            (round_money(value), NisabSource::Custom)
        }
    };

    tracing::debug!(
        methodology = %rules.id,
        %gold_nisab,
        %silver_nisab,
        %effective_nisab,
        basis = %nisab_basis,
        "computed nisab"
    );

    Ok(NisabInfo {
        gold_nisab,
        silver_nisab,
        effective_nisab,
        nisab_basis,
        methodology_basis: rules.nisab_basis,
        gold_price_per_gram,
        silver_price_per_gram,
    })
}

/// Convenience wrapper for a built-in methodology.
pub fn compute_nisab_for(
    gold_price_per_gram: Decimal,
    silver_price_per_gram: Decimal,
    methodology: MethodologyId,
) -> Result<NisabInfo, ZakatError> {
    let rules = methodology::resolve(methodology, None)?;
    compute_nisab(gold_price_per_gram, silver_price_per_gram, &rules)
}
