//! Methodology registry.
//!
//! Each school of thought is a [`MethodologyStrategy`] producing a
//! [`MethodologyRules`] table. The built-in tables are computed once and
//! looked up by [`MethodologyId`]; the `Custom` methodology is assembled from
//! caller-supplied [`CustomRules`] layered over the Standard table.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::assets::AssetCategory;
use crate::types::ZakatError;

/// Identifier of a supported calculation methodology.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MethodologyId {
    #[default]
    Standard,
    Hanafi,
    #[serde(rename = "shafii", alias = "shafi", alias = "shafi'i")]
    #[strum(to_string = "shafii", serialize = "shafi", serialize = "shafi'i")]
    Shafi,
    Maliki,
    Hanbali,
    Custom,
}

impl MethodologyId {
    /// Parses a methodology id, mapping failures to `UnknownMethodology`.
    pub fn parse(raw: &str) -> Result<Self, ZakatError> {
        Self::from_str(raw.trim()).map_err(|_| ZakatError::UnknownMethodology(raw.to_string()))
    }

    pub fn is_custom(&self) -> bool {
        *self == Self::Custom
    }
}

/// How the Nisab threshold is derived from metal prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NisabBasis {
    Gold,
    Silver,
    /// Lower of the two thresholds.
    DualMinimum,
    /// Lower of the two thresholds; the user may opt for either.
    DualFlexible,
    /// Fixed value supplied with custom rules.
    Custom,
}

impl NisabBasis {
    pub fn is_dual(&self) -> bool {
        matches!(self, Self::DualMinimum | Self::DualFlexible)
    }
}

/// Whether a category contributes to the zakatable base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BaseTreatment {
    Include,
    Exclude,
    /// Subtracted from the zakatable base.
    Deduct,
}

/// Whether a category carries a zakat-due amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DueTreatment {
    Full,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CategoryRule {
    pub base: BaseTreatment,
    pub due: DueTreatment,
}

impl CategoryRule {
    pub const FULL: Self = Self { base: BaseTreatment::Include, due: DueTreatment::Full };
    pub const NO_DUE: Self = Self { base: BaseTreatment::Include, due: DueTreatment::Zero };
    pub const EXCLUDED: Self = Self { base: BaseTreatment::Exclude, due: DueTreatment::Zero };
    pub const DEDUCTED: Self = Self { base: BaseTreatment::Deduct, due: DueTreatment::Zero };
}

impl Default for CategoryRule {
    fn default() -> Self {
        Self::FULL
    }
}

/// Fully resolved rule table for one methodology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyRules {
    pub id: MethodologyId,
    pub nisab_basis: NisabBasis,
    /// Rate in percent (2.5 means 2.5%).
    pub rate: Decimal,
    #[serde(default)]
    pub category_rules: BTreeMap<AssetCategory, CategoryRule>,
    #[serde(default)]
    pub custom_nisab_value: Option<Decimal>,
}

impl MethodologyRules {
    fn base(id: MethodologyId, nisab_basis: NisabBasis) -> Self {
        let mut category_rules = BTreeMap::new();
        category_rules.insert(AssetCategory::DebtReceivable, CategoryRule::NO_DUE);
        category_rules.insert(AssetCategory::DebtOwed, CategoryRule::DEDUCTED);
        Self {
            id,
            nisab_basis,
            rate: STANDARD_RATE,
            category_rules,
            custom_nisab_value: None,
        }
    }

    fn with_rule(mut self, category: AssetCategory, rule: CategoryRule) -> Self {
        self.category_rules.insert(category, rule);
        self
    }

    /// Effective rule for a category. Expenses are always deducted.
    pub fn rule_for(&self, category: AssetCategory) -> CategoryRule {
        if category == AssetCategory::Expense {
            return CategoryRule::DEDUCTED;
        }
        self.category_rules.get(&category).copied().unwrap_or_default()
    }

    /// Rate as a fraction (0.025 for 2.5%).
    pub fn rate_fraction(&self) -> Decimal {
        self.rate / dec!(100)
    }
}

/// Standard rate in percent shared by every built-in methodology.
pub const STANDARD_RATE: Decimal = dec!(2.5);

pub trait MethodologyStrategy: Send + Sync {
    fn id(&self) -> MethodologyId;
    fn get_rules(&self) -> MethodologyRules;
}

pub struct StandardStrategy;
impl MethodologyStrategy for StandardStrategy {
    fn id(&self) -> MethodologyId {
        MethodologyId::Standard
    }
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules::base(MethodologyId::Standard, NisabBasis::DualMinimum)
    }
}

pub struct HanafiStrategy;
impl MethodologyStrategy for HanafiStrategy {
    fn id(&self) -> MethodologyId {
        MethodologyId::Hanafi
    }
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules::base(MethodologyId::Hanafi, NisabBasis::Silver)
    }
}

pub struct ShafiStrategy;
impl MethodologyStrategy for ShafiStrategy {
    fn id(&self) -> MethodologyId {
        MethodologyId::Shafi
    }
    fn get_rules(&self) -> MethodologyRules {
        // Debts owed do not reduce the base.
        MethodologyRules::base(MethodologyId::Shafi, NisabBasis::DualFlexible)
            .with_rule(AssetCategory::DebtOwed, CategoryRule::EXCLUDED)
    }
}

pub struct MalikiStrategy;
impl MethodologyStrategy for MalikiStrategy {
    fn id(&self) -> MethodologyId {
        MethodologyId::Maliki
    }
    fn get_rules(&self) -> MethodologyRules {
        // Receivables are only zakatable once collected.
        MethodologyRules::base(MethodologyId::Maliki, NisabBasis::DualFlexible)
            .with_rule(AssetCategory::DebtReceivable, CategoryRule::EXCLUDED)
    }
}

pub struct HanbaliStrategy;
impl MethodologyStrategy for HanbaliStrategy {
    fn id(&self) -> MethodologyId {
        MethodologyId::Hanbali
    }
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules::base(MethodologyId::Hanbali, NisabBasis::Gold)
    }
}

impl MethodologyId {
    /// Strategy for a built-in methodology. `Custom` has none.
    pub fn strategy(&self) -> Option<Box<dyn MethodologyStrategy>> {
        match self {
            Self::Standard => Some(Box::new(StandardStrategy)),
            Self::Hanafi => Some(Box::new(HanafiStrategy)),
            Self::Shafi => Some(Box::new(ShafiStrategy)),
            Self::Maliki => Some(Box::new(MalikiStrategy)),
            Self::Hanbali => Some(Box::new(HanbaliStrategy)),
            Self::Custom => None,
        }
    }
}

static REGISTRY: Lazy<BTreeMap<MethodologyId, MethodologyRules>> = Lazy::new(|| {
    let strategies: [Box<dyn MethodologyStrategy>; 5] = [
        Box::new(StandardStrategy),
        Box::new(HanafiStrategy),
        Box::new(ShafiStrategy),
        Box::new(MalikiStrategy),
        Box::new(HanbaliStrategy),
    ];
    strategies.iter().map(|s| (s.id(), s.get_rules())).collect()
});

/// Nisab basis a custom methodology may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CustomNisabBasis {
    Gold,
    Silver,
    CustomValue,
}

/// Caller-supplied rules for the `custom` methodology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomRules {
    pub nisab_basis: CustomNisabBasis,
    /// Rate in percent.
    pub rate: Decimal,
    #[serde(default)]
    pub custom_nisab_value: Option<f64>,
    #[serde(default)]
    pub category_rules: BTreeMap<AssetCategory, CategoryRule>,
}

impl CustomRules {
    pub fn new(nisab_basis: CustomNisabBasis, rate: Decimal) -> Self {
        Self {
            nisab_basis,
            rate,
            custom_nisab_value: None,
            category_rules: BTreeMap::new(),
        }
    }

    pub fn with_nisab_value(mut self, value: f64) -> Self {
        self.custom_nisab_value = Some(value);
        self
    }

    pub fn with_rule(mut self, category: AssetCategory, rule: CategoryRule) -> Self {
        self.category_rules.insert(category, rule);
        self
    }

    pub fn validate(&self) -> Result<(), ZakatError> {
        if self.rate <= Decimal::ZERO || self.rate > dec!(100) {
            return Err(ZakatError::validation(
                "customRules.rate",
                format!("rate must be in (0, 100], got {}", self.rate),
            ));
        }
        if let Some(value) = self.custom_nisab_value
            && (!value.is_finite() || value < 0.0)
        {
            return Err(ZakatError::validation(
                "customRules.customNisabValue",
                format!("custom nisab value must be a finite non-negative number, got {}", value),
            ));
        }
        if self.nisab_basis == CustomNisabBasis::CustomValue && self.custom_nisab_value.is_none() {
            return Err(ZakatError::validation(
                "customRules.customNisabValue",
                "required when nisab basis is custom-value",
            ));
        }
        Ok(())
    }

    fn into_rules(self) -> Result<MethodologyRules, ZakatError> {
        self.validate()?;

        let (nisab_basis, custom_nisab_value) = match self.nisab_basis {
            CustomNisabBasis::Gold => (NisabBasis::Gold, None),
            CustomNisabBasis::Silver => (NisabBasis::Silver, None),
            CustomNisabBasis::CustomValue => {
                let value = self
                    .custom_nisab_value
                    .and_then(Decimal::from_f64)
                    .ok_or_else(|| {
                        ZakatError::validation("customRules.customNisabValue", "not representable as a decimal")
                    })?;
                (NisabBasis::Custom, Some(value))
            }
        };

        let mut rules = StandardStrategy.get_rules();
        rules.id = MethodologyId::Custom;
        rules.nisab_basis = nisab_basis;
        rules.rate = self.rate;
        rules.custom_nisab_value = custom_nisab_value;
        rules.category_rules.extend(self.category_rules);
        Ok(rules)
    }
}

/// Resolves the rule table for a methodology.
///
/// `custom` is required for [`MethodologyId::Custom`] and ignored otherwise.
pub fn resolve(id: MethodologyId, custom: Option<&CustomRules>) -> Result<MethodologyRules, ZakatError> {
    if id.is_custom() {
        let custom = custom.ok_or_else(|| {
            ZakatError::validation("customRules", "required for the custom methodology")
        })?;
        return custom.clone().into_rules();
    }

    if custom.is_some() {
        tracing::debug!(methodology = %id, "custom rules ignored for built-in methodology");
    }

    REGISTRY
        .get(&id)
        .cloned()
        .ok_or_else(|| ZakatError::UnknownMethodology(id.to_string()))
}

/// String entry point used at the request boundary.
pub fn resolve_str(raw: &str, custom: Option<&CustomRules>) -> Result<MethodologyRules, ZakatError> {
    resolve(MethodologyId::parse(raw)?, custom)
}
