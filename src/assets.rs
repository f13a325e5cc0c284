//! Asset model as supplied by the external asset store.
//!
//! The engine never writes assets; it only reads them through [`AssetStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::inputs::IntoZakatDecimal;
use crate::types::ZakatError;

/// Category of a declared asset.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AssetCategory {
    Cash,
    Gold,
    Silver,
    Business,
    Property,
    Stocks,
    Etf,
    MutualFund,
    Crypto,
    /// Money owed to the user.
    DebtReceivable,
    /// Money the user owes.
    DebtOwed,
    #[serde(rename = "retirement_401k")]
    #[strum(serialize = "retirement_401k")]
    Retirement401k,
    TraditionalPension,
    TraditionalIra,
    RothIra,
    Expense,
    Other,
}

impl AssetCategory {
    /// Securities eligible for the 30% passive-investment rule.
    pub fn is_passive_eligible(&self) -> bool {
        matches!(self, Self::Stocks | Self::Etf | Self::MutualFund)
    }

    /// Retirement accounts that are inaccessible unless the user says otherwise.
    pub fn is_restricted_by_default(&self) -> bool {
        matches!(
            self,
            Self::Retirement401k | Self::TraditionalPension | Self::TraditionalIra
        )
    }

    pub fn is_retirement(&self) -> bool {
        self.is_restricted_by_default() || *self == Self::RothIra
    }

    /// Liabilities never count as wealth; they can only reduce the zakat base.
    pub fn is_liability(&self) -> bool {
        matches!(self, Self::DebtOwed | Self::Expense)
    }
}

/// A single declared holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub name: String,
    pub category: AssetCategory,
    pub value: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_true")]
    pub zakat_eligible: bool,
    #[serde(default)]
    pub is_passive_investment: Option<bool>,
    #[serde(default)]
    pub is_restricted_account: Option<bool>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

impl Asset {
    pub fn new(
        user_id: Uuid,
        category: AssetCategory,
        value: impl IntoZakatDecimal,
    ) -> Result<Self, ZakatError> {
        let value = value.into_amount("value")?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            name: category.to_string(),
            category,
            value,
            currency: default_currency(),
            zakat_eligible: true,
            is_passive_investment: None,
            is_restricted_account: None,
        })
    }

    pub fn cash(user_id: Uuid, value: impl IntoZakatDecimal) -> Result<Self, ZakatError> {
        Self::new(user_id, AssetCategory::Cash, value)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn currency(mut self, code: impl Into<String>) -> Self {
        self.currency = code.into();
        self
    }

    pub fn passive(mut self, passive: bool) -> Self {
        self.is_passive_investment = Some(passive);
        self
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.is_restricted_account = Some(restricted);
        self
    }

    pub fn eligible(mut self, eligible: bool) -> Self {
        self.zakat_eligible = eligible;
        self
    }

    /// Strict validation for callers that want conflicts rejected instead of
    /// auto-corrected by the modifier resolver.
    pub fn validate(&self) -> Result<(), ZakatError> {
        if self.value < Decimal::ZERO {
            return Err(ZakatError::validation("value", "asset value must be non-negative"));
        }
        if self.is_passive_investment == Some(true) && self.is_restricted_account == Some(true) {
            return Err(ZakatError::validation(
                "isPassiveInvestment",
                "an asset cannot be both a passive investment and a restricted account",
            ));
        }
        Ok(())
    }
}

/// Optional filter for [`AssetStore::list_assets`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetFilter {
    pub ids: Option<Vec<Uuid>>,
    pub categories: Option<Vec<AssetCategory>>,
    pub zakat_eligible_only: bool,
}

impl AssetFilter {
    pub fn ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&asset.id)
        {
            return false;
        }
        if let Some(categories) = &self.categories
            && !categories.contains(&asset.category)
        {
            return false;
        }
        !self.zakat_eligible_only || asset.zakat_eligible
    }
}

/// Read-only view of the external asset store.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn list_assets(
        &self,
        user_id: Uuid,
        filter: Option<&AssetFilter>,
    ) -> Result<Vec<Asset>, ZakatError>;

    async fn get_asset(&self, user_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, ZakatError>;
}

/// In-process asset store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryAssetStore {
    assets: RwLock<HashMap<Uuid, Vec<Asset>>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an asset (matched by id).
    pub async fn upsert(&self, asset: Asset) {
        let mut guard = self.assets.write().await;
        let owned = guard.entry(asset.user_id).or_default();
        match owned.iter_mut().find(|a| a.id == asset.id) {
            Some(existing) => *existing = asset,
            None => owned.push(asset),
        }
    }

    pub async fn remove(&self, user_id: Uuid, asset_id: Uuid) -> bool {
        let mut guard = self.assets.write().await;
        let Some(owned) = guard.get_mut(&user_id) else {
            return false;
        };
        let before = owned.len();
        owned.retain(|a| a.id != asset_id);
        owned.len() != before
    }

    pub async fn user_ids(&self) -> Vec<Uuid> {
        let guard = self.assets.read().await;
        let mut ids: Vec<Uuid> = guard.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn list_assets(
        &self,
        user_id: Uuid,
        filter: Option<&AssetFilter>,
    ) -> Result<Vec<Asset>, ZakatError> {
        let guard = self.assets.read().await;
        Ok(guard
            .get(&user_id)
            .map(|owned| {
                owned
                    .iter()
                    .filter(|a| filter.is_none_or(|f| f.matches(a)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_asset(&self, user_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, ZakatError> {
        let guard = self.assets.read().await;
        Ok(guard
            .get(&user_id)
            .and_then(|owned| owned.iter().find(|a| a.id == asset_id).cloned()))
    }
}
