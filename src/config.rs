use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::audit::MIN_UNLOCK_REASON_LEN;
use crate::hawl::HawlRules;
use crate::methodology::MethodologyId;
use crate::pricing::{CacheSettings, Prices};
use crate::types::ZakatError;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Methodology for records opened by the background sweep.
    pub default_methodology: MethodologyId,
    pub hawl: HawlRules,
    pub price_ttl_hours: i64,
    pub oracle_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    /// Users evaluated concurrently by one sweep.
    pub sweep_concurrency: usize,
    pub unlock_reason_min_len: usize,
    /// Used when the oracle is unreachable and nothing is cached.
    pub fallback_prices: Option<Prices>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_methodology: MethodologyId::Standard,
            hawl: HawlRules::default(),
            price_ttl_hours: 24,
            oracle_timeout_ms: 2_000,
            sweep_interval_secs: 3_600,
            sweep_concurrency: 8,
            unlock_reason_min_len: MIN_UNLOCK_REASON_LEN,
            fallback_prices: None,
        }
    }
}

impl FromStr for EngineConfig {
    type Err = ZakatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: EngineConfig = serde_json::from_str(s)
            .map_err(|e| ZakatError::Configuration(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ZakatError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ZakatError::Configuration(format!("Invalid {}: {}", name, e))),
    }
}

impl EngineConfig {
    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<(), ZakatError> {
        if !(350..=360).contains(&self.hawl.lunar_year_days) {
            return Err(ZakatError::Configuration(format!(
                "Lunar year length must be between 350 and 360 days, got {}",
                self.hawl.lunar_year_days
            )));
        }
        if !(0..=10).contains(&self.hawl.tolerance_days) {
            return Err(ZakatError::Configuration(format!(
                "Hawl tolerance must be between 0 and 10 days, got {}",
                self.hawl.tolerance_days
            )));
        }
        if self.price_ttl_hours <= 0 {
            return Err(ZakatError::Configuration("Price TTL must be positive".to_string()));
        }
        if self.oracle_timeout_ms == 0 || self.oracle_timeout_ms > 2_000 {
            return Err(ZakatError::Configuration(format!(
                "Oracle timeout must be between 1 and 2000 ms, got {}",
                self.oracle_timeout_ms
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ZakatError::Configuration("Sweep interval must be positive".to_string()));
        }
        if self.sweep_concurrency == 0 {
            return Err(ZakatError::Configuration("Sweep concurrency must be at least 1".to_string()));
        }
        if self.unlock_reason_min_len < MIN_UNLOCK_REASON_LEN {
            return Err(ZakatError::Configuration(format!(
                "Unlock reason minimum cannot be below {} characters",
                MIN_UNLOCK_REASON_LEN
            )));
        }
        if self.default_methodology.is_custom() {
            return Err(ZakatError::Configuration(
                "Default methodology must be a built-in methodology".to_string(),
            ));
        }
        if let Some(prices) = &self.fallback_prices
            && (prices.gold_per_gram.is_sign_negative() || prices.silver_per_gram.is_sign_negative())
        {
            return Err(ZakatError::Configuration("Fallback prices must be non-negative".to_string()));
        }
        Ok(())
    }

    /// Loads configuration from `ZAKAT_*` environment variables; unset variables keep defaults.
    pub fn from_env() -> Result<Self, ZakatError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ZakatError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("ZAKAT_METHODOLOGY") {
            config.default_methodology = MethodologyId::parse(&raw)
                .map_err(|e| ZakatError::Configuration(e.to_string()))?;
        }
        if let Some(days) = parse_var(&lookup, "ZAKAT_HAWL_DAYS")? {
            config.hawl.lunar_year_days = days;
        }
        if let Some(days) = parse_var(&lookup, "ZAKAT_HAWL_TOLERANCE_DAYS")? {
            config.hawl.tolerance_days = days;
        }
        if let Some(hours) = parse_var(&lookup, "ZAKAT_PRICE_TTL_HOURS")? {
            config.price_ttl_hours = hours;
        }
        if let Some(ms) = parse_var(&lookup, "ZAKAT_ORACLE_TIMEOUT_MS")? {
            config.oracle_timeout_ms = ms;
        }
        if let Some(secs) = parse_var(&lookup, "ZAKAT_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = secs;
        }
        if let Some(n) = parse_var(&lookup, "ZAKAT_SWEEP_CONCURRENCY")? {
            config.sweep_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "ZAKAT_UNLOCK_REASON_MIN")? {
            config.unlock_reason_min_len = n;
        }

        let gold = parse_var::<rust_decimal::Decimal>(&lookup, "ZAKAT_GOLD_PRICE")?;
        let silver = parse_var::<rust_decimal::Decimal>(&lookup, "ZAKAT_SILVER_PRICE")?;
        match (gold, silver) {
            (Some(gold), Some(silver)) => {
                config.fallback_prices = Some(
                    Prices::new(gold, silver).map_err(|e| ZakatError::Configuration(e.to_string()))?,
                );
            }
            (None, None) => {}
            _ => {
                return Err(ZakatError::Configuration(
                    "ZAKAT_GOLD_PRICE and ZAKAT_SILVER_PRICE must be set together".to_string(),
                ));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Attempts to load configuration from a JSON file.
    pub fn try_from_json(path: &str) -> Result<Self, ZakatError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ZakatError::Configuration(format!("Failed to read config file: {}", e)))?;
        content.parse()
    }

    pub fn with_methodology(mut self, methodology: MethodologyId) -> Self {
        self.default_methodology = methodology;
        self
    }

    pub fn with_fallback_prices(mut self, prices: Prices) -> Self {
        self.fallback_prices = Some(prices);
        self
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: chrono::Duration::hours(self.price_ttl_hours),
            fetch_timeout: Duration::from_millis(self.oracle_timeout_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hawl.lunar_year_days, 354);
        assert_eq!(config.cache_settings().fetch_timeout, Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ZAKAT_METHODOLOGY", "hanafi"),
            ("ZAKAT_ORACLE_TIMEOUT_MS", "1500"),
            ("ZAKAT_GOLD_PRICE", "65"),
            ("ZAKAT_SILVER_PRICE", "0.80"),
        ]))
        .unwrap();
        assert_eq!(config.default_methodology, MethodologyId::Hanafi);
        assert_eq!(config.oracle_timeout_ms, 1500);
        assert_eq!(config.fallback_prices.unwrap().silver_per_gram, dec!(0.80));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(EngineConfig::from_lookup(lookup(&[("ZAKAT_HAWL_DAYS", "abc")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("ZAKAT_ORACLE_TIMEOUT_MS", "5000")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("ZAKAT_GOLD_PRICE", "65")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("ZAKAT_METHODOLOGY", "custom")])).is_err());
        let err = EngineConfig::from_lookup(lookup(&[("ZAKAT_UNLOCK_REASON_MIN", "5")])).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_from_json_string() {
        let config: EngineConfig = r#"{"priceTtlHours": 12, "hawl": {"lunarYearDays": 355, "toleranceDays": 3}}"#
            .parse()
            .unwrap();
        assert_eq!(config.price_ttl_hours, 12);
        assert_eq!(config.hawl.lunar_year_days, 355);
        assert_eq!(config.unlock_reason_min_len, 10);
        assert!("{not json".parse::<EngineConfig>().is_err());
    }
}
