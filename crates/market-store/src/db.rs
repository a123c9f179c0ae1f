use chakra_core::ChakraError;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::str::FromStr;
use std::time::Duration;

/// Shared handle over the process database. One pool per process; the
/// schema is created idempotently on connect. Multi-statement writes run
/// through [`MarketStore::begin_immediate`] so they hold the write lock on a
/// single connection for the whole critical section.
#[derive(Clone)]
pub struct MarketStore {
    pool: SqlitePool,
}

/// Map driver errors into the core taxonomy at the crate boundary.
pub(crate) fn db_err(e: sqlx::Error) -> ChakraError {
    ChakraError::Database(e.to_string())
}

impl MarketStore {
    pub async fn connect(database_url: &str) -> Result<Self, ChakraError> {
        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true)
            // Contending writers wait at the driver instead of surfacing
            // SQLITE_BUSY to the caller
            .busy_timeout(Duration::from_secs(30));
        // WAL lets readers proceed while a writer holds the lock; in-memory
        // databases only support the MEMORY journal, so leave them alone.
        if !database_url.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a write critical section: one pooled connection with an
    /// immediate transaction, so the write lock is taken up front and
    /// concurrent writers queue rather than failing mid-transaction.
    /// Finish with [`MarketStore::commit`] or [`MarketStore::rollback`].
    pub(crate) async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>, ChakraError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(conn)
    }

    pub(crate) async fn commit(mut conn: PoolConnection<Sqlite>) -> Result<(), ChakraError> {
        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Best-effort rollback. A connection whose rollback fails is discarded
    /// instead of returning to the pool with an open transaction.
    pub(crate) async fn rollback(mut conn: PoolConnection<Sqlite>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            tracing::warn!("[DB] rollback failed, discarding connection: {e}");
            drop(conn.detach());
        }
    }

    /// Idempotent schema creation. Safe to call on every startup.
    pub async fn init_schema(&self) -> Result<(), ChakraError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS symbol_universe (
                symbol TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                notes TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS market_snapshots (
                snapshot_id TEXT PRIMARY KEY,
                snapshot_timestamp_et TEXT NOT NULL,
                provider TEXT NOT NULL DEFAULT 'snapshot',
                symbol_count INTEGER NOT NULL,
                symbols_with_data INTEGER NOT NULL DEFAULT 0,
                data_age_minutes REAL NOT NULL,
                is_frozen INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS market_snapshot_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                data_json TEXT,
                has_data INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (snapshot_id) REFERENCES market_snapshots(snapshot_id),
                UNIQUE(snapshot_id, symbol)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS market_regimes (
                snapshot_id TEXT PRIMARY KEY,
                regime TEXT NOT NULL,
                benchmark_symbol TEXT,
                benchmark_return REAL,
                method TEXT,
                computed_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS csp_evaluations (
                snapshot_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                eligible INTEGER NOT NULL,
                score INTEGER NOT NULL,
                reasons_json TEXT NOT NULL,
                features_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (snapshot_id, symbol)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                level TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS config_freeze_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                config_hash TEXT NOT NULL,
                config_snapshot TEXT NOT NULL,
                run_mode TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_snapshot_timestamp ON market_snapshots(snapshot_timestamp_et DESC)",
            "CREATE INDEX IF NOT EXISTS idx_snapshot_data_symbol ON market_snapshot_data(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_snapshot_data_snapshot ON market_snapshot_data(snapshot_id)",
            "CREATE INDEX IF NOT EXISTS idx_regimes_computed_at ON market_regimes(computed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status)",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}
