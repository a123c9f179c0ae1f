use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::types::RunMode;

/// Process-wide configuration, loaded once from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    // Storage
    pub database_url: String,
    pub output_dir: String,
    pub snapshot_csv_path: String,

    // Run discipline
    pub run_mode: RunMode,
    pub dev_mode: bool,
    /// Dev-only fixture universe consulted when the table is empty
    pub default_universe_path: String,
    pub ui_api_key: Option<String>,

    // Heartbeat
    pub heartbeat_interval_seconds: u64,
    pub regime_stale_threshold_minutes: f64,
    pub candidate_removal_alert_cooldown_hours: f64,

    // Stage 1 gates and scoring
    pub min_price: f64,
    pub max_price: f64,
    pub target_low: f64,
    pub target_high: f64,
    pub min_volume: f64,
    pub min_iv_rank: f64,
    pub allow_missing_iv: bool,

    // Stage 2 contract selection
    pub dte_min: i64,
    pub dte_max: i64,
    pub delta_min: f64,
    pub delta_max: f64,
    pub min_open_interest: i64,
    pub min_bid: f64,
    pub max_spread_pct: f64,

    // Chain provider
    pub chain_base_url: Option<String>,
    pub chain_token: Option<String>,
    pub chain_timeout_seconds: u64,

    // API
    pub bind_addr: String,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env::var("CHAKRAOPS_DB_URL")
                .unwrap_or_else(|_| "sqlite:data/chakraops.db".to_string()),
            output_dir: env::var("CHAKRAOPS_OUT_DIR").unwrap_or_else(|_| "out".to_string()),
            snapshot_csv_path: env::var("CHAKRAOPS_SNAPSHOT_CSV")
                .unwrap_or_else(|_| "data/snapshots/market_snapshot.csv".to_string()),

            run_mode: RunMode::parse(
                &env::var("RUN_MODE").unwrap_or_else(|_| "DRY_RUN".to_string()),
            ),
            dev_mode: is_truthy(&env::var("CHAKRAOPS_DEV").unwrap_or_default()),
            default_universe_path: env::var("CHAKRAOPS_DEFAULT_UNIVERSE")
                .unwrap_or_else(|_| "data/default_universe.txt".to_string()),
            ui_api_key: env::var("UI_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),

            heartbeat_interval_seconds: parse_env("HEARTBEAT_INTERVAL_SECONDS", 60)?,
            regime_stale_threshold_minutes: parse_env("CHAKRA_REGIME_STALE_MINUTES", 5.0)?,
            candidate_removal_alert_cooldown_hours: parse_env(
                "CANDIDATE_REMOVAL_ALERT_COOLDOWN_HOURS",
                6.0,
            )?,

            min_price: parse_env("CHAKRA_MIN_PRICE", 15.0)?,
            max_price: parse_env("CHAKRA_MAX_PRICE", 400.0)?,
            target_low: parse_env("CHAKRA_TARGET_LOW", 25.0)?,
            target_high: parse_env("CHAKRA_TARGET_HIGH", 150.0)?,
            min_volume: parse_env("CHAKRA_MIN_VOLUME", 1_000_000.0)?,
            min_iv_rank: parse_env("CHAKRA_MIN_IV_RANK", 20.0)?,
            allow_missing_iv: env::var("CHAKRA_ALLOW_MISSING_IV")
                .map(|v| is_truthy(&v))
                .unwrap_or(true),

            dte_min: parse_env("CHAKRA_DTE_MIN", 21)?,
            dte_max: parse_env("CHAKRA_DTE_MAX", 45)?,
            delta_min: parse_env("CHAKRA_DELTA_MIN", 0.15)?,
            delta_max: parse_env("CHAKRA_DELTA_MAX", 0.35)?,
            min_open_interest: parse_env("CHAKRA_MIN_OPEN_INTEREST", 100)?,
            min_bid: parse_env("CHAKRA_MIN_BID", 0.05)?,
            max_spread_pct: parse_env("CHAKRA_MAX_SPREAD_PCT", 10.0)?,

            chain_base_url: env::var("CHAKRA_CHAIN_BASE_URL").ok().filter(|v| !v.is_empty()),
            chain_token: env::var("CHAKRA_CHAIN_TOKEN").ok().filter(|v| !v.is_empty()),
            chain_timeout_seconds: parse_env("CHAKRA_CHAIN_TIMEOUT_SECONDS", 10)?,

            bind_addr: env::var("CHAKRAOPS_BIND").unwrap_or_else(|_| "0.0.0.0:8090".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.min_price < self.max_price,
            "CHAKRA_MIN_PRICE must be below CHAKRA_MAX_PRICE"
        );
        anyhow::ensure!(
            self.min_price <= self.target_low && self.target_high <= self.max_price,
            "price target band [{}, {}] must sit inside [{}, {}]",
            self.target_low,
            self.target_high,
            self.min_price,
            self.max_price
        );
        anyhow::ensure!(
            self.dte_min <= self.dte_max,
            "CHAKRA_DTE_MIN must not exceed CHAKRA_DTE_MAX"
        );
        anyhow::ensure!(
            self.delta_min <= self.delta_max,
            "CHAKRA_DELTA_MIN must not exceed CHAKRA_DELTA_MAX"
        );
        anyhow::ensure!(
            self.heartbeat_interval_seconds > 0,
            "HEARTBEAT_INTERVAL_SECONDS must be positive"
        );
        Ok(())
    }

    /// The subset of configuration whose drift between LIVE runs is an
    /// auditable freeze violation. Keys sorted for a stable hash.
    pub fn critical_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "delta_max": self.delta_max,
            "delta_min": self.delta_min,
            "dte_max": self.dte_max,
            "dte_min": self.dte_min,
            "max_price": self.max_price,
            "max_spread_pct": self.max_spread_pct,
            "min_bid": self.min_bid,
            "min_iv_rank": self.min_iv_rank,
            "min_open_interest": self.min_open_interest,
            "min_price": self.min_price,
            "min_volume": self.min_volume,
            "target_high": self.target_high,
            "target_low": self.target_low,
        })
    }
}

impl Default for CoreConfig {
    /// Defaults used by tests; mirrors `from_env` with no overrides.
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            output_dir: "out".to_string(),
            snapshot_csv_path: "data/snapshots/market_snapshot.csv".to_string(),
            run_mode: RunMode::DryRun,
            dev_mode: false,
            default_universe_path: "data/default_universe.txt".to_string(),
            ui_api_key: None,
            heartbeat_interval_seconds: 60,
            regime_stale_threshold_minutes: 5.0,
            candidate_removal_alert_cooldown_hours: 6.0,
            min_price: 15.0,
            max_price: 400.0,
            target_low: 25.0,
            target_high: 150.0,
            min_volume: 1_000_000.0,
            min_iv_rank: 20.0,
            allow_missing_iv: true,
            dte_min: 21,
            dte_max: 45,
            delta_min: 0.15,
            delta_max: 0.35,
            min_open_interest: 100,
            min_bid: 0.05,
            max_spread_pct: 10.0,
            chain_base_url: None,
            chain_token: None,
            chain_timeout_seconds: 10,
            bind_addr: "0.0.0.0:8090".to_string(),
        }
    }
}

/// Truthy env values accepted by the dev flag: 1, true, yes.
pub fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("on"));
    }

    #[test]
    fn critical_snapshot_is_stable() {
        let config = CoreConfig::default();
        assert_eq!(config.critical_snapshot(), config.critical_snapshot());
    }

    #[test]
    fn validation_rejects_inverted_band() {
        let config = CoreConfig {
            target_low: 500.0,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
