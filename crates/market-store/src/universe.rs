//! Symbol universe management. Symbols are normalized on write; the stored
//! form is canonical and reads trust it.

use chakra_core::{normalize_symbol, ChakraError, UniverseEntry};
use chrono::{DateTime, Utc};

use crate::db::{db_err, MarketStore};

impl MarketStore {
    /// Insert or re-enable a universe symbol.
    pub async fn add_symbol(
        &self,
        symbol: &str,
        enabled: bool,
        notes: Option<&str>,
    ) -> Result<(), ChakraError> {
        let normalized = normalize_symbol(symbol);
        if normalized.is_empty() {
            return Err(ChakraError::Config("empty symbol rejected".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO symbol_universe (symbol, enabled, notes, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET enabled = excluded.enabled, notes = excluded.notes
            "#,
        )
        .bind(&normalized)
        .bind(enabled as i64)
        .bind(notes)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub async fn toggle_symbol(&self, symbol: &str, enabled: bool) -> Result<(), ChakraError> {
        let normalized = normalize_symbol(symbol);
        sqlx::query("UPDATE symbol_universe SET enabled = ? WHERE symbol = ?")
            .bind(enabled as i64)
            .bind(&normalized)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn update_symbol_notes(
        &self,
        symbol: &str,
        notes: &str,
    ) -> Result<(), ChakraError> {
        let normalized = normalize_symbol(symbol);
        sqlx::query("UPDATE symbol_universe SET notes = ? WHERE symbol = ?")
            .bind(notes)
            .bind(&normalized)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete_symbol(&self, symbol: &str) -> Result<(), ChakraError> {
        let normalized = normalize_symbol(symbol);
        sqlx::query("DELETE FROM symbol_universe WHERE symbol = ?")
            .bind(&normalized)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_universe(&self) -> Result<Vec<UniverseEntry>, ChakraError> {
        let rows: Vec<(String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT symbol, enabled, notes, created_at FROM symbol_universe ORDER BY symbol",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(symbol, enabled, notes, created_at)| UniverseEntry {
                symbol,
                enabled: enabled != 0,
                notes,
                created_at: parse_created_at(&created_at),
            })
            .collect())
    }

    /// The canonical universe filter: enabled symbols, normalized, sorted.
    pub async fn enabled_symbols(&self) -> Result<Vec<String>, ChakraError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT symbol FROM symbol_universe WHERE enabled = 1 ORDER BY symbol",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(s,)| normalize_symbol(&s))
            .filter(|s| !s.is_empty())
            .collect())
    }
}

/// Dev-only fixture universe: newline-separated symbols, `#` comments and
/// blank lines ignored, normalized on read. Never written back to the
/// database.
pub fn load_default_universe(path: &std::path::Path) -> Result<Vec<String>, ChakraError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ChakraError::Config(format!("failed to read {path:?}: {e}")))?;
    let mut symbols: Vec<String> = raw
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .map(normalize_symbol)
        .filter(|s| !s.is_empty())
        .collect();
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
}

fn parse_created_at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MarketStore {
        MarketStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_normalizes_on_write() {
        let store = store().await;
        store.add_symbol("  aapl ", true, None).await.unwrap();

        let entries = store.list_universe().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "AAPL");
        assert!(entries[0].enabled);
    }

    #[tokio::test]
    async fn empty_symbol_rejected() {
        let store = store().await;
        let err = store.add_symbol("   ", true, None).await.unwrap_err();
        assert!(matches!(err, ChakraError::Config(_)));
    }

    #[tokio::test]
    async fn toggle_and_enabled_filter() {
        let store = store().await;
        store.add_symbol("SPY", true, None).await.unwrap();
        store.add_symbol("QQQ", true, None).await.unwrap();
        store.toggle_symbol("qqq", false).await.unwrap();

        assert_eq!(store.enabled_symbols().await.unwrap(), vec!["SPY"]);
    }

    #[tokio::test]
    async fn add_is_upsert() {
        let store = store().await;
        store.add_symbol("NVDA", false, Some("watch")).await.unwrap();
        store.add_symbol("NVDA", true, Some("enabled now")).await.unwrap();

        let entries = store.list_universe().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].enabled);
        assert_eq!(entries[0].notes.as_deref(), Some("enabled now"));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = store().await;
        store.add_symbol("TSLA", true, None).await.unwrap();
        store.delete_symbol("tsla").await.unwrap();
        assert!(store.list_universe().await.unwrap().is_empty());
    }

    #[test]
    fn default_universe_file_parsing() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"# seed universe\nspy\nQQQ\n\naapl # tech\nSPY\n")
            .unwrap();

        let symbols = load_default_universe(file.path()).unwrap();
        assert_eq!(symbols, vec!["AAPL", "QQQ", "SPY"]);
    }

    #[test]
    fn default_universe_missing_file_is_config_error() {
        let err = load_default_universe(std::path::Path::new("/nonexistent.txt")).unwrap_err();
        assert!(matches!(err, ChakraError::Config(_)));
    }
}
