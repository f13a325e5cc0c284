//! Pricing module for Nisab calculations.
//!
//! [`PriceOracle`] abstracts the external gold/silver price source.
//! [`CachedPriceOracle`] decorates an oracle with a TTL cache, a fetch
//! timeout and stale-while-revalidate semantics. Both metals are fetched
//! concurrently, so a price read never blocks longer than one bounded fetch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};

use crate::config::EngineConfig;
use crate::hawl::{Clock, SystemClock};
use crate::inputs::IntoZakatDecimal;
use crate::store::PriceCacheStore;
use crate::types::ZakatError;

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Metal {
    Gold,
    Silver,
}

/// A price quote for one metal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetalPrice {
    pub metal: Metal,
    pub price_per_gram: Decimal,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
}

impl MetalPrice {
    pub fn new(metal: Metal, price_per_gram: Decimal, fetched_at: DateTime<Utc>) -> Self {
        Self {
            metal,
            price_per_gram,
            currency: "USD".to_string(),
            fetched_at,
        }
    }
}

/// Current market prices for both metals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Prices {
    /// Gold price per gram in local currency.
    pub gold_per_gram: Decimal,
    /// Silver price per gram in local currency.
    pub silver_per_gram: Decimal,
}

impl Prices {
    pub fn new(
        gold_per_gram: impl IntoZakatDecimal,
        silver_per_gram: impl IntoZakatDecimal,
    ) -> Result<Self, ZakatError> {
        Ok(Self {
            gold_per_gram: gold_per_gram.into_amount("goldPricePerGram")?,
            silver_per_gram: silver_per_gram.into_amount("silverPricePerGram")?,
        })
    }

    pub fn get(&self, metal: Metal) -> Decimal {
        match metal {
            Metal::Gold => self.gold_per_gram,
            Metal::Silver => self.silver_per_gram,
        }
    }
}

/// Source of metal prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, metal: Metal) -> Result<MetalPrice, ZakatError>;

    /// Quotes both metals; the two lookups run concurrently.
    async fn get_prices(&self) -> Result<Prices, ZakatError> {
        let (gold, silver) =
            futures::try_join!(self.get_price(Metal::Gold), self.get_price(Metal::Silver))?;
        Ok(Prices {
            gold_per_gram: gold.price_per_gram,
            silver_per_gram: silver.price_per_gram,
        })
    }
}

/// Fixed prices, for tests and for callers supplying their own quotes.
#[derive(Debug, Clone)]
pub struct StaticPriceOracle {
    prices: Prices,
}

impl StaticPriceOracle {
    pub fn new(
        gold_per_gram: impl IntoZakatDecimal,
        silver_per_gram: impl IntoZakatDecimal,
    ) -> Result<Self, ZakatError> {
        Ok(Self {
            prices: Prices::new(gold_per_gram, silver_per_gram)?,
        })
    }

    pub fn from_prices(prices: Prices) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_price(&self, metal: Metal) -> Result<MetalPrice, ZakatError> {
        Ok(MetalPrice::new(metal, self.prices.get(metal), Utc::now()))
    }

    async fn get_prices(&self) -> Result<Prices, ZakatError> {
        Ok(self.prices.clone())
    }
}

/// Cache tuning for [`CachedPriceOracle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    pub ttl: chrono::Duration,
    pub fetch_timeout: std::time::Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::hours(24),
            fetch_timeout: std::time::Duration::from_secs(2),
        }
    }
}

/// Caching decorator around a [`PriceOracle`].
///
/// Fresh entries are served from memory. A stale entry is served immediately
/// with a warning while one background refresh runs. With no entry at all the
/// oracle is called under the fetch timeout, falling back to the persistent
/// cache and then to configured fallback prices; only when all of those are
/// empty does the read fail with `PriceOracleUnavailable`.
#[derive(Clone)]
pub struct CachedPriceOracle {
    inner: Arc<dyn PriceOracle>,
    cache: Arc<RwLock<HashMap<Metal, MetalPrice>>>,
    refreshing: Arc<Mutex<HashSet<Metal>>>,
    idle: Arc<Notify>,
    store: Option<Arc<dyn PriceCacheStore>>,
    clock: Arc<dyn Clock>,
    fallback: Option<Prices>,
    settings: CacheSettings,
}

impl std::fmt::Debug for CachedPriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPriceOracle")
            .field("settings", &self.settings)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl CachedPriceOracle {
    pub fn new(inner: Arc<dyn PriceOracle>) -> Self {
        Self {
            inner,
            cache: Arc::new(RwLock::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            idle: Arc::new(Notify::new()),
            store: None,
            clock: Arc::new(SystemClock),
            fallback: None,
            settings: CacheSettings::default(),
        }
    }

    /// Applies the configured TTL, fetch timeout and fallback prices.
    pub fn from_config(inner: Arc<dyn PriceOracle>, config: &EngineConfig) -> Self {
        let oracle = Self::new(inner).with_settings(config.cache_settings());
        match &config.fallback_prices {
            Some(prices) => oracle.with_fallback(prices.clone()),
            None => oracle,
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    pub fn with_store(mut self, store: Arc<dyn PriceCacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_fallback(mut self, prices: Prices) -> Self {
        self.fallback = Some(prices);
        self
    }

    /// Seeds the cache, e.g. from user-supplied prices.
    pub async fn prime(&self, price: MetalPrice) -> Result<(), ZakatError> {
        self.remember(price).await
    }

    fn is_fresh(&self, price: &MetalPrice) -> bool {
        self.clock.now() - price.fetched_at < self.settings.ttl
    }

    async fn cached(&self, metal: Metal) -> Option<MetalPrice> {
        if let Some(hit) = self.cache.read().await.get(&metal).cloned() {
            return Some(hit);
        }

        let store = self.store.as_ref()?;
        match store.latest_price(metal).await {
            Ok(Some(price)) => {
                self.cache.write().await.insert(metal, price.clone());
                Some(price)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%metal, error = %err, "failed to read persisted price cache");
                None
            }
        }
    }

    async fn remember(&self, price: MetalPrice) -> Result<(), ZakatError> {
        self.cache.write().await.insert(price.metal, price.clone());
        if let Some(store) = &self.store {
            let expires_at = price.fetched_at + self.settings.ttl;
            store.save_price(&price, expires_at).await?;
        }
        Ok(())
    }

    async fn fetch(&self, metal: Metal) -> Result<MetalPrice, ZakatError> {
        let fetched = tokio::time::timeout(self.settings.fetch_timeout, self.inner.get_price(metal))
            .await
            .map_err(|_| ZakatError::PriceOracleUnavailable {
                metal,
                reason: format!("fetch timed out after {:?}", self.settings.fetch_timeout),
            })??;

        if fetched.price_per_gram < Decimal::ZERO {
            return Err(ZakatError::PriceOracleUnavailable {
                metal,
                reason: format!("oracle returned a negative price {}", fetched.price_per_gram),
            });
        }

        if let Err(err) = self.remember(fetched.clone()).await {
            tracing::warn!(%metal, error = %err, "failed to persist fetched price");
        }
        Ok(fetched)
    }

    fn spawn_refresh(&self, metal: Metal) {
        let Some(slot) = RefreshSlot::claim(&self.refreshing, &self.idle, metal) else {
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            // Released on completion or panic.
            let _slot = slot;
            match this.fetch(metal).await {
                Ok(price) => tracing::debug!(%metal, price = %price.price_per_gram, "refreshed stale price"),
                Err(err) => tracing::warn!(%metal, error = %err, "background price refresh failed"),
            }
        });
    }

    fn refresh_in_flight(&self) -> bool {
        !self
            .refreshing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    /// Waits until no background refresh is in flight.
    pub async fn settle(&self) {
        loop {
            let idle = self.idle.notified();
            if !self.refresh_in_flight() {
                return;
            }
            idle.await;
        }
    }
}

/// Marks one metal as refreshing until dropped.
struct RefreshSlot {
    refreshing: Arc<Mutex<HashSet<Metal>>>,
    idle: Arc<Notify>,
    metal: Metal,
}

impl RefreshSlot {
    fn claim(refreshing: &Arc<Mutex<HashSet<Metal>>>, idle: &Arc<Notify>, metal: Metal) -> Option<Self> {
        let claimed = refreshing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(metal);
        claimed.then(|| Self {
            refreshing: refreshing.clone(),
            idle: idle.clone(),
            metal,
        })
    }
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        let mut refreshing = self.refreshing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        refreshing.remove(&self.metal);
        if refreshing.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

#[async_trait]
impl PriceOracle for CachedPriceOracle {
    async fn get_price(&self, metal: Metal) -> Result<MetalPrice, ZakatError> {
        if let Some(cached) = self.cached(metal).await {
            if self.is_fresh(&cached) {
                return Ok(cached);
            }
            tracing::warn!(
                %metal,
                fetched_at = %cached.fetched_at,
                "serving stale cached price while refreshing"
            );
            self.spawn_refresh(metal);
            return Ok(cached);
        }

        match self.fetch(metal).await {
            Ok(price) => Ok(price),
            Err(err) => match &self.fallback {
                Some(prices) => {
                    tracing::warn!(%metal, error = %err, "price oracle unavailable; using configured fallback price");
                    Ok(MetalPrice::new(metal, prices.get(metal), self.clock.now()))
                }
                None => {
                    tracing::warn!(%metal, error = %err, "price oracle unavailable and no cached price");
                    Err(match err {
                        ZakatError::PriceOracleUnavailable { .. } => err,
                        other => ZakatError::PriceOracleUnavailable { metal, reason: other.to_string() },
                    })
                }
            },
        }
    }
}
