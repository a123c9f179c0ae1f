//! Frozen market snapshots: build from CSV or cache, persist atomically,
//! serve read-only accessors. At most one snapshot is frozen at a time.

use chakra_core::{
    normalize_symbol, BuildMode, ChakraError, PriceSlice, SnapshotMetadata, SnapshotRow,
    SnapshotSource,
};
use chrono::{DateTime, Utc};
use chrono_tz::US::Eastern;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::csv_source::load_snapshot_csv;
use crate::db::{db_err, MarketStore};

/// Benchmarks always included in snapshots for regime computation.
pub const BENCHMARKS: [&str; 2] = ["SPY", "QQQ"];

/// Build-time options derived from process configuration.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub csv_path: PathBuf,
    /// Dev-only: truncate snapshot tables before rebuild.
    pub dev_mode: bool,
}

impl MarketStore {
    /// Build a frozen snapshot from the enabled universe plus benchmarks.
    ///
    /// Source resolution: CSV reads the configured input file (absent file is
    /// a config error when CSV was explicitly requested), CACHE copies the
    /// latest snapshot forward, AUTO tries CSV then CACHE. The whole write is
    /// one transaction; on any failure the previous snapshot stays
    /// authoritative.
    pub async fn build_snapshot(
        &self,
        mode: BuildMode,
        opts: &BuildOptions,
    ) -> Result<SnapshotMetadata, ChakraError> {
        let mut enabled = self.enabled_symbols().await?;

        let (mut source_data, source) = self.resolve_source(mode, &opts.csv_path).await?;

        // Self-healing: a first-run universe/CSV mismatch would otherwise
        // produce a dead snapshot. The intersection is computed against the
        // full output universe (enabled symbols plus the always-appended
        // benchmarks), so a CSV that overlaps only via SPY/QQQ does not
        // re-trigger the upsert and overwrite a curated universe. An empty
        // universe table is the first-run case and always heals.
        let mut universe_set: HashSet<String> = enabled.iter().cloned().collect();
        for benchmark in BENCHMARKS {
            universe_set.insert(normalize_symbol(benchmark));
        }
        let intersection_empty = !source_data.keys().any(|s| universe_set.contains(s));
        if (enabled.is_empty() || intersection_empty) && source == SnapshotSource::Csv {
            tracing::info!(
                "[SNAPSHOT] Universe/CSV intersection empty - auto-upserting {} CSV symbols",
                source_data.len()
            );
            for symbol in source_data.keys() {
                self.add_symbol(symbol, true, Some("Auto-added from CSV snapshot"))
                    .await?;
            }
            enabled = self.enabled_symbols().await?;
        }

        // Final output universe: enabled symbols plus benchmarks, deduped
        // after normalization.
        let mut symbols = enabled;
        let mut seen: HashSet<String> = symbols.iter().cloned().collect();
        for benchmark in BENCHMARKS {
            let normalized = normalize_symbol(benchmark);
            if seen.insert(normalized.clone()) {
                symbols.push(normalized);
            }
        }

        // Restrict source rows to the output universe; every universe symbol
        // gets a row, with or without data.
        source_data.retain(|symbol, rows| seen.contains(symbol) && !rows.is_empty());
        let symbols_with_data = source_data.len() as i64;

        let snapshot_time_et = Utc::now().with_timezone(&Eastern);
        let data_age_minutes = compute_data_age_minutes(
            &source_data,
            snapshot_time_et.with_timezone(&Utc),
        );

        if source == SnapshotSource::Csv && symbols_with_data == 0 {
            return Err(ChakraError::SnapshotBuild(
                "CSV loaded but no universe symbol has data".into(),
            ));
        }

        let snapshot_id = Uuid::new_v4().to_string();
        let snapshot_timestamp_et = snapshot_time_et.to_rfc3339();
        let created_at = Utc::now().to_rfc3339();
        let provider = format!("snapshot-{}", source.as_str().to_lowercase());

        // One immediate transaction on one connection: the write lock is
        // held for the whole demote-and-insert sequence, and a concurrent
        // writer waits at the driver.
        let mut conn = self.begin_immediate().await?;
        let persisted = persist_snapshot(
            &mut conn,
            opts.dev_mode,
            &snapshot_id,
            &snapshot_timestamp_et,
            &provider,
            &symbols,
            &source_data,
            symbols_with_data,
            data_age_minutes,
            &created_at,
        )
        .await;
        match persisted {
            Ok(()) => MarketStore::commit(conn).await?,
            Err(e) => {
                MarketStore::rollback(conn).await;
                return Err(e);
            }
        }

        tracing::info!(
            "[SNAPSHOT] Built snapshot {} using {}, symbols={}/{}",
            &snapshot_id[..8],
            source.as_str(),
            symbols_with_data,
            symbols.len()
        );

        Ok(SnapshotMetadata {
            snapshot_id,
            snapshot_timestamp_et: snapshot_time_et.fixed_offset(),
            source,
            symbol_count: symbols.len() as i64,
            symbols_with_data,
            data_age_minutes,
            is_frozen: true,
            created_at: Utc::now(),
        })
    }

    async fn resolve_source(
        &self,
        mode: BuildMode,
        csv_path: &Path,
    ) -> Result<(HashMap<String, Vec<SnapshotRow>>, SnapshotSource), ChakraError> {
        if matches!(mode, BuildMode::Csv | BuildMode::Auto) {
            if csv_path.exists() {
                match load_snapshot_csv(csv_path) {
                    Ok(data) => {
                        tracing::info!("[SNAPSHOT] Using CSV source: {}", csv_path.display());
                        return Ok((data, SnapshotSource::Csv));
                    }
                    Err(e) if mode == BuildMode::Csv => return Err(e),
                    Err(e) => {
                        tracing::warn!("[SNAPSHOT] CSV load failed, falling back to cache: {e}");
                    }
                }
            } else if mode == BuildMode::Csv {
                return Err(ChakraError::Config(format!(
                    "CSV snapshot source requested but file not found: {}",
                    csv_path.display()
                )));
            } else {
                tracing::warn!(
                    "[SNAPSHOT] CSV file not found at {}, trying cache",
                    csv_path.display()
                );
            }
        }

        // CACHE: copy the latest snapshot forward.
        if let Some(last) = self.active_snapshot().await? {
            let data = self.load_snapshot_data(&last.snapshot_id).await?;
            let forwarded: HashMap<String, Vec<SnapshotRow>> = data
                .into_iter()
                .filter_map(|(symbol, rows)| rows.filter(|r| !r.is_empty()).map(|r| (symbol, r)))
                .collect();
            if !forwarded.is_empty() {
                tracing::info!("[SNAPSHOT] Using CACHE source (last snapshot)");
                return Ok((forwarded, SnapshotSource::Cache));
            }
        }

        Err(ChakraError::SnapshotSource(
            "No snapshot source available. Provide the snapshot CSV or ensure a previous snapshot exists."
                .into(),
        ))
    }

    /// The single frozen snapshot, if any.
    pub async fn active_snapshot(&self) -> Result<Option<SnapshotMetadata>, ChakraError> {
        let row: Option<MetadataRow> = sqlx::query_as(
            r#"
            SELECT snapshot_id, snapshot_timestamp_et, provider, symbol_count,
                   symbols_with_data, data_age_minutes, is_frozen, created_at
            FROM market_snapshots
            WHERE is_frozen = 1
            ORDER BY snapshot_timestamp_et DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(MetadataRow::into_metadata))
    }

    pub async fn latest_snapshot_id(&self) -> Result<Option<String>, ChakraError> {
        Ok(self.active_snapshot().await?.map(|s| s.snapshot_id))
    }

    /// The snapshot strictly before `latest_id` by timestamp.
    pub async fn previous_snapshot_id(
        &self,
        latest_id: &str,
    ) -> Result<Option<String>, ChakraError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT snapshot_id FROM market_snapshots
            WHERE snapshot_id != ?
            ORDER BY snapshot_timestamp_et DESC
            LIMIT 1
            "#,
        )
        .bind(latest_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;
        Ok(row.map(|(id,)| id))
    }

    /// Deserialize the stored rows for a snapshot. Symbols without data map
    /// to `None`; rows are never silently dropped.
    pub async fn load_snapshot_data(
        &self,
        snapshot_id: &str,
    ) -> Result<HashMap<String, Option<Vec<SnapshotRow>>>, ChakraError> {
        let rows: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT symbol, data_json, has_data
            FROM market_snapshot_data
            WHERE snapshot_id = ?
            ORDER BY symbol
            "#,
        )
        .bind(snapshot_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut out = HashMap::new();
        for (symbol_raw, data_json, has_data) in rows {
            let symbol = normalize_symbol(&symbol_raw);
            let parsed = if has_data != 0 {
                match data_json.as_deref().map(serde_json::from_str::<Vec<SnapshotRow>>) {
                    Some(Ok(rows)) => Some(rows),
                    Some(Err(e)) => {
                        tracing::warn!("[SNAPSHOT] Failed to parse data for {symbol}: {e}");
                        None
                    }
                    None => None,
                }
            } else {
                None
            };
            out.insert(symbol, parsed);
        }
        Ok(out)
    }

    /// Last-row reduction: symbol -> {price, volume, iv_rank}. Symbols
    /// without data are absent.
    pub async fn snapshot_prices(
        &self,
        snapshot_id: &str,
    ) -> Result<HashMap<String, PriceSlice>, ChakraError> {
        let data = self.load_snapshot_data(snapshot_id).await?;
        let mut out = HashMap::new();
        for (symbol, rows) in data {
            let Some(rows) = rows else { continue };
            let Some(last) = rows.last() else { continue };
            out.insert(
                symbol,
                PriceSlice {
                    price: Some(last.close),
                    volume: Some(last.volume),
                    iv_rank: last.iv_rank,
                },
            );
        }
        Ok(out)
    }
}

#[allow(clippy::too_many_arguments)]
async fn persist_snapshot(
    conn: &mut sqlx::SqliteConnection,
    dev_mode: bool,
    snapshot_id: &str,
    snapshot_timestamp_et: &str,
    provider: &str,
    symbols: &[String],
    source_data: &HashMap<String, Vec<SnapshotRow>>,
    symbols_with_data: i64,
    data_age_minutes: f64,
    created_at: &str,
) -> Result<(), ChakraError> {
    if dev_mode {
        sqlx::query("DELETE FROM market_snapshot_data")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM market_snapshots")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        tracing::info!("[SNAPSHOT] DEV mode: truncated snapshot tables before rebuild");
    } else {
        // Replace rows sharing this exact timestamp; history is kept.
        sqlx::query(
            "DELETE FROM market_snapshot_data WHERE snapshot_id IN \
             (SELECT snapshot_id FROM market_snapshots WHERE snapshot_timestamp_et = ?)",
        )
        .bind(snapshot_timestamp_et)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        sqlx::query("DELETE FROM market_snapshots WHERE snapshot_timestamp_et = ?")
            .bind(snapshot_timestamp_et)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
    }

    // Exactly one frozen snapshot: demote all current holders first.
    sqlx::query("UPDATE market_snapshots SET is_frozen = 0 WHERE is_frozen = 1")
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    sqlx::query(
        r#"
        INSERT INTO market_snapshots (
            snapshot_id, snapshot_timestamp_et, provider,
            symbol_count, symbols_with_data, data_age_minutes, is_frozen, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(snapshot_id)
    .bind(snapshot_timestamp_et)
    .bind(provider)
    .bind(symbols.len() as i64)
    .bind(symbols_with_data)
    .bind(data_age_minutes)
    .bind(created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    for symbol in symbols {
        let rows = source_data.get(symbol);
        let has_data = rows.is_some();
        let data_json = match rows {
            Some(rows) => Some(serde_json::to_string(rows).map_err(|e| {
                ChakraError::SnapshotBuild(format!("failed to serialize {symbol} rows: {e}"))
            })?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO market_snapshot_data (snapshot_id, symbol, data_json, has_data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot_id)
        .bind(symbol)
        .bind(data_json)
        .bind(has_data as i64)
        .bind(created_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }

    Ok(())
}

fn compute_data_age_minutes(
    data: &HashMap<String, Vec<SnapshotRow>>,
    build_instant: DateTime<Utc>,
) -> f64 {
    let newest = data
        .values()
        .flat_map(|rows| rows.iter().filter_map(|r| r.date))
        .max();
    match newest {
        Some(newest) => {
            let minutes = (build_instant - newest).num_seconds() as f64 / 60.0;
            minutes.max(0.0)
        }
        None => 0.0,
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    snapshot_id: String,
    snapshot_timestamp_et: String,
    provider: String,
    symbol_count: i64,
    symbols_with_data: i64,
    data_age_minutes: f64,
    is_frozen: i64,
    created_at: String,
}

impl MetadataRow {
    fn into_metadata(self) -> SnapshotMetadata {
        let source = if self.provider.ends_with("cache") {
            SnapshotSource::Cache
        } else {
            SnapshotSource::Csv
        };
        SnapshotMetadata {
            snapshot_id: self.snapshot_id,
            snapshot_timestamp_et: DateTime::parse_from_rfc3339(&self.snapshot_timestamp_et)
                .unwrap_or_else(|_| Utc::now().fixed_offset()),
            source,
            symbol_count: self.symbol_count,
            symbols_with_data: self.symbols_with_data,
            data_age_minutes: self.data_age_minutes,
            is_frozen: self.is_frozen != 0,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}
