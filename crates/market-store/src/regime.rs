//! Market regime persistence, one row per snapshot.

use chakra_core::{ChakraError, Regime, RegimeResult};
use chrono::{DateTime, Utc};

use crate::db::{db_err, MarketStore};

impl MarketStore {
    pub async fn upsert_regime(&self, result: &RegimeResult) -> Result<(), ChakraError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO market_regimes (
                snapshot_id, regime, benchmark_symbol, benchmark_return,
                method, computed_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.snapshot_id)
        .bind(result.regime.as_str())
        .bind(&result.benchmark_symbol)
        .bind(result.benchmark_return)
        .bind(&result.method)
        .bind(result.computed_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Latest regime by computation time, retained indefinitely for audit.
    pub async fn latest_regime(&self) -> Result<Option<RegimeResult>, ChakraError> {
        let row: Option<(String, String, Option<String>, Option<f64>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT snapshot_id, regime, benchmark_symbol, benchmark_return, method, computed_at
                FROM market_regimes
                ORDER BY computed_at DESC
                LIMIT 1
                "#,
            )
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;

        Ok(row.map(
            |(snapshot_id, regime, benchmark_symbol, benchmark_return, method, computed_at)| {
                let regime = Regime::parse(&regime);
                RegimeResult {
                    snapshot_id,
                    regime,
                    benchmark_symbol,
                    benchmark_return,
                    confidence: if regime == Regime::Unknown { 0 } else { 100 },
                    method: method.unwrap_or_default(),
                    computed_at: DateTime::parse_from_rfc3339(&computed_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regime(snapshot_id: &str, regime: Regime, computed_at: DateTime<Utc>) -> RegimeResult {
        RegimeResult {
            snapshot_id: snapshot_id.to_string(),
            regime,
            benchmark_symbol: Some("SPY".to_string()),
            benchmark_return: Some(0.002),
            confidence: 100,
            method: "snapshot_price_only".to_string(),
            computed_at,
        }
    }

    #[tokio::test]
    async fn upsert_and_latest() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        store
            .upsert_regime(&regime("snap-1", Regime::Bull, now - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        store
            .upsert_regime(&regime("snap-2", Regime::Neutral, now))
            .await
            .unwrap();

        let latest = store.latest_regime().await.unwrap().unwrap();
        assert_eq!(latest.snapshot_id, "snap-2");
        assert_eq!(latest.regime, Regime::Neutral);
        assert_eq!(latest.confidence, 100);
    }

    #[tokio::test]
    async fn replace_for_same_snapshot() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        store.upsert_regime(&regime("snap-1", Regime::Bull, now)).await.unwrap();
        store
            .upsert_regime(&regime("snap-1", Regime::Bear, now))
            .await
            .unwrap();

        let latest = store.latest_regime().await.unwrap().unwrap();
        assert_eq!(latest.regime, Regime::Bear);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM market_regimes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn empty_table_returns_none() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.latest_regime().await.unwrap().is_none());
    }
}
