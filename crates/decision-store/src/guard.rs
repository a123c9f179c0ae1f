//! Config-hash freeze guard: detects critical-config drift between LIVE
//! runs. The outcome is an auditable signal on the artifact metadata, never
//! a block.

use chakra_core::{ChakraError, CoreConfig, RunMode};
use market_store::MarketStore;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct FreezeCheck {
    pub config_frozen: bool,
    pub changed_keys: Vec<String>,
}

/// Canonical hash of the critical config subset. `serde_json` maps serialize
/// with sorted keys, so the encoding is stable across runs.
pub fn compute_config_hash(snapshot: &serde_json::Value) -> String {
    let canonical = snapshot.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare the current critical config with the previous run's stored state.
/// Drift under LIVE marks the run as not config-frozen with the changed
/// keys listed.
pub async fn check_freeze(
    store: &MarketStore,
    config: &CoreConfig,
    run_mode: RunMode,
) -> Result<FreezeCheck, ChakraError> {
    let snapshot = config.critical_snapshot();
    let hash = compute_config_hash(&snapshot);

    let Some(previous) = store.freeze_state().await? else {
        // First run: nothing to drift from
        return Ok(FreezeCheck {
            config_frozen: true,
            changed_keys: vec![],
        });
    };

    if previous.config_hash == hash {
        return Ok(FreezeCheck {
            config_frozen: true,
            changed_keys: vec![],
        });
    }

    let changed_keys = diff_keys(&previous.config_snapshot, &snapshot);
    if run_mode == RunMode::Live {
        tracing::warn!(
            "[FREEZE] Critical config drift under LIVE; changed keys: {}",
            changed_keys.join(", ")
        );
        Ok(FreezeCheck {
            config_frozen: false,
            changed_keys,
        })
    } else {
        tracing::debug!(
            "[FREEZE] Config drift outside LIVE ignored (changed: {})",
            changed_keys.join(", ")
        );
        Ok(FreezeCheck {
            config_frozen: true,
            changed_keys: vec![],
        })
    }
}

/// Record the current critical config as the baseline for the next run.
pub async fn record_run(
    store: &MarketStore,
    config: &CoreConfig,
    run_mode: RunMode,
) -> Result<(), ChakraError> {
    let snapshot = config.critical_snapshot();
    let hash = compute_config_hash(&snapshot);
    store
        .save_freeze_state(&hash, &snapshot.to_string(), run_mode)
        .await
}

fn diff_keys(previous_snapshot: &str, current: &serde_json::Value) -> Vec<String> {
    let previous: serde_json::Value =
        serde_json::from_str(previous_snapshot).unwrap_or(serde_json::Value::Null);
    let (Some(prev_map), Some(curr_map)) = (previous.as_object(), current.as_object()) else {
        return vec!["<unreadable previous snapshot>".to_string()];
    };

    let mut changed: Vec<String> = curr_map
        .iter()
        .filter(|(key, value)| prev_map.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect();
    for key in prev_map.keys() {
        if !curr_map.contains_key(key) {
            changed.push(key.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MarketStore {
        MarketStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn first_run_is_frozen() {
        let store = store().await;
        let config = CoreConfig::default();
        let check = check_freeze(&store, &config, RunMode::Live).await.unwrap();
        assert!(check.config_frozen);
        assert!(check.changed_keys.is_empty());
    }

    #[tokio::test]
    async fn unchanged_config_stays_frozen() {
        let store = store().await;
        let config = CoreConfig::default();
        record_run(&store, &config, RunMode::Live).await.unwrap();

        let check = check_freeze(&store, &config, RunMode::Live).await.unwrap();
        assert!(check.config_frozen);
    }

    #[tokio::test]
    async fn drift_under_live_flags_changed_keys() {
        let store = store().await;
        let config = CoreConfig::default();
        record_run(&store, &config, RunMode::Live).await.unwrap();

        let drifted = CoreConfig {
            min_price: 20.0,
            min_volume: 2_000_000.0,
            ..CoreConfig::default()
        };
        let check = check_freeze(&store, &drifted, RunMode::Live).await.unwrap();
        assert!(!check.config_frozen);
        assert_eq!(check.changed_keys, vec!["min_price", "min_volume"]);
    }

    #[tokio::test]
    async fn drift_outside_live_is_ignored() {
        let store = store().await;
        let config = CoreConfig::default();
        record_run(&store, &config, RunMode::Live).await.unwrap();

        let drifted = CoreConfig {
            min_price: 20.0,
            ..CoreConfig::default()
        };
        let check = check_freeze(&store, &drifted, RunMode::DryRun)
            .await
            .unwrap();
        assert!(check.config_frozen);
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let config = CoreConfig::default();
        let h1 = compute_config_hash(&config.critical_snapshot());
        let h2 = compute_config_hash(&config.critical_snapshot());
        assert_eq!(h1, h2);

        let drifted = CoreConfig {
            max_spread_pct: 12.0,
            ..CoreConfig::default()
        };
        assert_ne!(h1, compute_config_hash(&drifted.critical_snapshot()));
    }
}
