//! Operator-facing alerts. Only INFO/WATCH/ACTION/HALT are persisted here;
//! internal errors go to the log and scheduler health instead.

use chakra_core::{AlertLevel, ChakraError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{db_err, MarketStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub message: String,
    pub level: AlertLevel,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl MarketStore {
    /// Create an OPEN alert and return its id.
    pub async fn create_alert(
        &self,
        message: &str,
        level: AlertLevel,
    ) -> Result<i64, ChakraError> {
        let result = sqlx::query(
            "INSERT INTO alerts (message, level, status, created_at) VALUES (?, ?, 'OPEN', ?)",
        )
        .bind(message)
        .bind(level.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        Ok(result.last_insert_rowid())
    }

    /// List alerts, newest first, optionally filtered by status
    /// (OPEN / ACKED / ARCHIVED).
    pub async fn list_alerts(&self, status: Option<&str>) -> Result<Vec<Alert>, ChakraError> {
        let rows: Vec<(i64, String, String, String, String)> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT id, message, level, status, created_at FROM alerts \
                     WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT id, message, level, status, created_at FROM alerts \
                     ORDER BY created_at DESC",
                )
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, message, level, status, created_at)| Alert {
                id,
                message,
                level: AlertLevel::parse(&level),
                status,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    pub async fn ack_alert(&self, id: i64) -> Result<(), ChakraError> {
        sqlx::query("UPDATE alerts SET status = 'ACKED' WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn archive_alert(&self, id: i64) -> Result<(), ChakraError> {
        sqlx::query("UPDATE alerts SET status = 'ARCHIVED' WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_list() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let id = store
            .create_alert("New CSP opportunity: NVDA", AlertLevel::Info)
            .await
            .unwrap();
        assert!(id > 0);

        let alerts = store.list_alerts(Some("OPEN")).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Info);
        assert_eq!(alerts[0].status, "OPEN");
    }

    #[tokio::test]
    async fn ack_moves_out_of_open() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let id = store
            .create_alert("Market regime changed: BULL -> BEAR", AlertLevel::Watch)
            .await
            .unwrap();
        store.ack_alert(id).await.unwrap();

        assert!(store.list_alerts(Some("OPEN")).await.unwrap().is_empty());
        let acked = store.list_alerts(Some("ACKED")).await.unwrap();
        assert_eq!(acked.len(), 1);
    }

    #[tokio::test]
    async fn archive_alert_works() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let id = store.create_alert("halt", AlertLevel::Halt).await.unwrap();
        store.archive_alert(id).await.unwrap();
        let all = store.list_alerts(None).await.unwrap();
        assert_eq!(all[0].status, "ARCHIVED");
    }
}
