//! Per-snapshot CSP evaluation persistence.

use chakra_core::ChakraError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::{db_err, MarketStore};

/// One symbol's stage-1 evaluation for a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CspEvaluation {
    pub symbol: String,
    pub eligible: bool,
    pub score: i64,
    pub rejection_reasons: Vec<String>,
    pub features: serde_json::Value,
    pub regime_context: serde_json::Value,
}

impl MarketStore {
    pub async fn upsert_evaluations(
        &self,
        snapshot_id: &str,
        rows: &[CspEvaluation],
    ) -> Result<(), ChakraError> {
        if rows.is_empty() {
            return Ok(());
        }

        let created_at = Utc::now().to_rfc3339();
        let mut conn = self.begin_immediate().await?;
        match write_evaluations(&mut conn, snapshot_id, rows, &created_at).await {
            Ok(()) => MarketStore::commit(conn).await,
            Err(e) => {
                MarketStore::rollback(conn).await;
                Err(e)
            }
        }
    }

    pub async fn evaluations(
        &self,
        snapshot_id: &str,
    ) -> Result<Vec<CspEvaluation>, ChakraError> {
        let rows: Vec<(String, i64, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT symbol, eligible, score, reasons_json, features_json
            FROM csp_evaluations
            WHERE snapshot_id = ?
            ORDER BY symbol
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(symbol, eligible, score, reasons_json, features_json)| {
                let combined: serde_json::Value =
                    serde_json::from_str(&features_json).unwrap_or_default();
                CspEvaluation {
                    symbol,
                    eligible: eligible != 0,
                    score,
                    rejection_reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
                    features: combined.get("features").cloned().unwrap_or_default(),
                    regime_context: combined
                        .get("regime_context")
                        .cloned()
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Rejection reasons ranked by frequency for one snapshot.
    pub async fn rejection_reason_counts(
        &self,
        snapshot_id: &str,
    ) -> Result<Vec<(String, i64)>, ChakraError> {
        let evaluations = self.evaluations(snapshot_id).await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for eval in evaluations.iter().filter(|e| !e.eligible) {
            for reason in &eval.rejection_reasons {
                *counts.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked)
    }
}

async fn write_evaluations(
    conn: &mut sqlx::SqliteConnection,
    snapshot_id: &str,
    rows: &[CspEvaluation],
    created_at: &str,
) -> Result<(), ChakraError> {
    for row in rows {
        let reasons_json = serde_json::to_string(&row.rejection_reasons)
            .map_err(|e| ChakraError::Store(e.to_string()))?;
        let features_json = serde_json::to_string(&serde_json::json!({
            "features": row.features,
            "regime_context": row.regime_context,
        }))
        .map_err(|e| ChakraError::Store(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO csp_evaluations (
                snapshot_id, symbol, eligible, score, reasons_json, features_json, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot_id)
        .bind(&row.symbol)
        .bind(row.eligible as i64)
        .bind(row.score)
        .bind(reasons_json)
        .bind(features_json)
        .bind(created_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}
