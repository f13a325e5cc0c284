//! Asset modifier resolution.
//!
//! Maps each asset to the fraction of its value that is zakatable. Priority is
//! restricted (0%) over passive (30%) over full value (100%).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::assets::Asset;

/// Zakatable fraction of passive investments.
pub const PASSIVE_FRACTION: Decimal = dec!(0.3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ModifierKind {
    Restricted,
    Passive,
    Full,
}

impl ModifierKind {
    pub fn fraction(&self) -> Decimal {
        match self {
            Self::Restricted => Decimal::ZERO,
            Self::Passive => PASSIVE_FRACTION,
            Self::Full => Decimal::ONE,
        }
    }

    /// Label shown in the calculation breakdown.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Restricted => "Deferred — Restricted",
            Self::Passive => "30% Rule Applied",
            Self::Full => "Full Value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetModifier {
    pub kind: ModifierKind,
    pub fraction: Decimal,
}

impl From<ModifierKind> for AssetModifier {
    fn from(kind: ModifierKind) -> Self {
        Self { kind, fraction: kind.fraction() }
    }
}

/// Flags after defaults and conflict correction have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFlags {
    pub passive: bool,
    pub restricted: bool,
}

impl ResolvedFlags {
    pub fn for_asset(asset: &Asset) -> Self {
        let restricted = asset
            .is_restricted_account
            .unwrap_or_else(|| asset.category.is_restricted_by_default());
        let passive = asset.is_passive_investment.unwrap_or(false);

        if passive && restricted {
            tracing::warn!(
                asset_id = %asset.id,
                category = %asset.category,
                "asset marked both passive and restricted; treating as restricted"
            );
            return Self { passive: false, restricted: true };
        }

        Self { passive, restricted }
    }
}

pub trait ModifierResolver: Send + Sync {
    fn resolve(&self, asset: &Asset) -> AssetModifier;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardModifierResolver;

impl ModifierResolver for StandardModifierResolver {
    fn resolve(&self, asset: &Asset) -> AssetModifier {
        let flags = ResolvedFlags::for_asset(asset);
        let kind = if flags.restricted {
            ModifierKind::Restricted
        } else if flags.passive && asset.category.is_passive_eligible() {
            ModifierKind::Passive
        } else {
            ModifierKind::Full
        };
        kind.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCategory;
    use uuid::Uuid;

    fn asset(category: AssetCategory) -> Asset {
        Asset::new(Uuid::nil(), category, dec!(1000)).unwrap()
    }

    #[test]
    fn test_default_retirement_restriction() {
        let resolver = StandardModifierResolver;
        for category in [
            AssetCategory::Retirement401k,
            AssetCategory::TraditionalPension,
            AssetCategory::TraditionalIra,
        ] {
            assert_eq!(resolver.resolve(&asset(category)).kind, ModifierKind::Restricted);
        }
        assert_eq!(resolver.resolve(&asset(AssetCategory::RothIra)).kind, ModifierKind::Full);
    }

    #[test]
    fn test_explicit_override_lifts_restriction() {
        let resolver = StandardModifierResolver;
        let accessible = asset(AssetCategory::Retirement401k).restricted(false);
        assert_eq!(resolver.resolve(&accessible).fraction, Decimal::ONE);
        let locked_roth = asset(AssetCategory::RothIra).restricted(true);
        assert_eq!(resolver.resolve(&locked_roth).fraction, Decimal::ZERO);
    }

    #[test]
    fn test_passive_only_for_securities() {
        let resolver = StandardModifierResolver;
        let stocks = asset(AssetCategory::Etf).passive(true);
        let modifier = resolver.resolve(&stocks);
        assert_eq!(modifier.kind, ModifierKind::Passive);
        assert_eq!(modifier.fraction, dec!(0.3));
        assert_eq!(modifier.kind.label(), "30% Rule Applied");

        let cash = asset(AssetCategory::Cash).passive(true);
        assert_eq!(resolver.resolve(&cash).kind, ModifierKind::Full);
    }

    #[test]
    fn test_conflict_resolves_to_restricted() {
        let conflicted = asset(AssetCategory::Stocks).passive(true).restricted(true);
        let flags = ResolvedFlags::for_asset(&conflicted);
        assert!(flags.restricted && !flags.passive);
        let modifier = StandardModifierResolver.resolve(&conflicted);
        assert_eq!(modifier.kind.label(), "Deferred — Restricted");
    }
}
