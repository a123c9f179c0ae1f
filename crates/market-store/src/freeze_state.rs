//! Single-row config freeze state, compared across runs by the freeze guard.

use chakra_core::{ChakraError, RunMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{db_err, MarketStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeState {
    pub config_hash: String,
    pub config_snapshot: String,
    pub run_mode: RunMode,
    pub updated_at: DateTime<Utc>,
}

impl MarketStore {
    pub async fn save_freeze_state(
        &self,
        config_hash: &str,
        config_snapshot: &str,
        run_mode: RunMode,
    ) -> Result<(), ChakraError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO config_freeze_state (id, config_hash, config_snapshot, run_mode, updated_at)
            VALUES (1, ?, ?, ?, ?)
            "#,
        )
        .bind(config_hash)
        .bind(config_snapshot)
        .bind(run_mode.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn freeze_state(&self) -> Result<Option<FreezeState>, ChakraError> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT config_hash, config_snapshot, run_mode, updated_at \
             FROM config_freeze_state WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|(config_hash, config_snapshot, run_mode, updated_at)| FreezeState {
            config_hash,
            config_snapshot,
            run_mode: RunMode::parse(&run_mode),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_row_semantics() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.freeze_state().await.unwrap().is_none());

        store
            .save_freeze_state("abc", "{}", RunMode::Live)
            .await
            .unwrap();
        store
            .save_freeze_state("def", "{\"k\":1}", RunMode::Live)
            .await
            .unwrap();

        let state = store.freeze_state().await.unwrap().unwrap();
        assert_eq!(state.config_hash, "def");
        assert_eq!(state.run_mode, RunMode::Live);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM config_freeze_state")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
