//! Wealth aggregation.
//!
//! A single pass over the asset list produces total wealth, the zakatable
//! base, deductions and a per-category breakdown.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{Asset, AssetCategory};
use crate::methodology::{BaseTreatment, CategoryRule, MethodologyRules};
use crate::modifier::{AssetModifier, ModifierResolver};

/// Decides how each category contributes to the zakatable base.
pub trait AggregationPolicy {
    fn rule_for(&self, category: AssetCategory) -> CategoryRule;
}

/// Only expenses are deducted; everything else is included.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl AggregationPolicy for DefaultPolicy {
    fn rule_for(&self, category: AssetCategory) -> CategoryRule {
        if category == AssetCategory::Expense {
            CategoryRule::DEDUCTED
        } else {
            CategoryRule::FULL
        }
    }
}

impl AggregationPolicy for MethodologyRules {
    fn rule_for(&self, category: AssetCategory) -> CategoryRule {
        MethodologyRules::rule_for(self, category)
    }
}

/// One asset's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetLine {
    pub asset_id: Uuid,
    pub name: String,
    pub category: AssetCategory,
    pub value: Decimal,
    pub modifier: AssetModifier,
    pub rule: CategoryRule,
    /// Value counted toward the zakatable base (0 for excluded or deducted).
    pub zakatable_amount: Decimal,
    /// Value subtracted from the base.
    pub deduction: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub count: usize,
    pub value: Decimal,
    pub zakatable: Decimal,
    pub deductions: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WealthSummary {
    pub total_wealth: Decimal,
    pub zakatable_gross: Decimal,
    pub deductions: Decimal,
    /// `zakatable_gross - deductions`, floored at zero.
    pub zakatable_wealth: Decimal,
    pub per_category: BTreeMap<AssetCategory, CategoryTotals>,
    pub lines: Vec<AssetLine>,
}

/// Aggregates `assets` under `policy`, resolving modifiers with `resolver`.
pub fn aggregate<R, P>(assets: &[Asset], resolver: &R, policy: &P) -> WealthSummary
where
    R: ModifierResolver + ?Sized,
    P: AggregationPolicy + ?Sized,
{
    let mut summary = WealthSummary {
        lines: Vec::with_capacity(assets.len()),
        ..Default::default()
    };

    for asset in assets {
        let rule = policy.rule_for(asset.category);
        let modifier = resolver.resolve(asset);

        let counts_as_wealth = !asset.category.is_liability() && rule.base != BaseTreatment::Deduct;
        if counts_as_wealth {
            summary.total_wealth += asset.value;
        }

        let (zakatable_amount, deduction) = match rule.base {
            BaseTreatment::Include if asset.zakat_eligible && !asset.category.is_liability() => {
                (asset.value * modifier.fraction, Decimal::ZERO)
            }
            BaseTreatment::Deduct => (Decimal::ZERO, asset.value),
            _ => (Decimal::ZERO, Decimal::ZERO),
        };

        summary.zakatable_gross += zakatable_amount;
        summary.deductions += deduction;

        let totals = summary.per_category.entry(asset.category).or_default();
        totals.count += 1;
        totals.value += asset.value;
        totals.zakatable += zakatable_amount;
        totals.deductions += deduction;

        summary.lines.push(AssetLine {
            asset_id: asset.id,
            name: asset.name.clone(),
            category: asset.category,
            value: asset.value,
            modifier,
            rule,
            zakatable_amount,
            deduction,
        });
    }

    summary.zakatable_wealth = (summary.zakatable_gross - summary.deductions).max(Decimal::ZERO);

    tracing::debug!(
        assets = assets.len(),
        total_wealth = %summary.total_wealth,
        zakatable_wealth = %summary.zakatable_wealth,
        "aggregated wealth"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methodology::{self, MethodologyId};
    use crate::modifier::StandardModifierResolver;
    use rust_decimal_macros::dec;

    fn user() -> Uuid {
        Uuid::nil()
    }

    #[test]
    fn test_default_policy_deducts_expenses_only() {
        let assets = vec![
            Asset::cash(user(), 5000).unwrap(),
            Asset::new(user(), AssetCategory::Expense, 1000).unwrap(),
            Asset::new(user(), AssetCategory::DebtOwed, 700).unwrap(),
        ];
        let summary = aggregate(&assets, &StandardModifierResolver, &DefaultPolicy);
        assert_eq!(summary.total_wealth, dec!(5000));
        assert_eq!(summary.deductions, dec!(1000));
        assert_eq!(summary.zakatable_wealth, dec!(4000));
    }

    #[test]
    fn test_modifiers_and_eligibility() {
        let assets = vec![
            Asset::new(user(), AssetCategory::Stocks, 10_000).unwrap().passive(true),
            Asset::new(user(), AssetCategory::Retirement401k, 50_000).unwrap(),
            Asset::cash(user(), 2000).unwrap().eligible(false),
        ];
        let summary = aggregate(&assets, &StandardModifierResolver, &DefaultPolicy);
        assert_eq!(summary.total_wealth, dec!(62000));
        assert_eq!(summary.zakatable_wealth, dec!(3000));
        assert_eq!(summary.per_category[&AssetCategory::Stocks].zakatable, dec!(3000));
        assert_eq!(summary.per_category[&AssetCategory::Retirement401k].zakatable, Decimal::ZERO);
    }

    #[test]
    fn test_methodology_debt_treatment() {
        let assets = vec![
            Asset::cash(user(), 3000).unwrap(),
            Asset::new(user(), AssetCategory::DebtReceivable, 1000).unwrap(),
            Asset::new(user(), AssetCategory::DebtOwed, 500).unwrap(),
        ];

        let standard = methodology::resolve(MethodologyId::Standard, None).unwrap();
        let summary = aggregate(&assets, &StandardModifierResolver, &standard);
        assert_eq!(summary.total_wealth, dec!(4000));
        assert_eq!(summary.zakatable_wealth, dec!(3500));

        let maliki = methodology::resolve(MethodologyId::Maliki, None).unwrap();
        let summary = aggregate(&assets, &StandardModifierResolver, &maliki);
        assert_eq!(summary.total_wealth, dec!(4000));
        assert_eq!(summary.zakatable_wealth, dec!(2500));

        let shafi = methodology::resolve(MethodologyId::Shafi, None).unwrap();
        let summary = aggregate(&assets, &StandardModifierResolver, &shafi);
        assert_eq!(summary.deductions, Decimal::ZERO);
        assert_eq!(summary.zakatable_wealth, dec!(4000));
    }

    #[test]
    fn test_zakatable_floored_at_zero() {
        let assets = vec![
            Asset::cash(user(), 100).unwrap(),
            Asset::new(user(), AssetCategory::Expense, 900).unwrap(),
        ];
        let summary = aggregate(&assets, &StandardModifierResolver, &DefaultPolicy);
        assert_eq!(summary.zakatable_wealth, Decimal::ZERO);
        assert_eq!(summary.lines.len(), 2);
    }
}
