//! Snapshot CSV reader.
//!
//! Required columns (case-insensitive header): `symbol` plus at least one of
//! `price` / `close`. Optional: `timestamp`/`date`, `open`, `high`, `low`,
//! `volume`, `iv_rank`. Missing OHL default to the resolved close, volume to
//! 0, iv_rank to null. Unparseable timestamps are logged and carried as null
//! dates rather than dropping the row.

use chakra_core::{normalize_symbol, ChakraError, SnapshotRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;

struct ColumnMap {
    symbol: usize,
    close: Option<usize>,
    price: Option<usize>,
    timestamp: Option<usize>,
    date: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    volume: Option<usize>,
    iv_rank: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ChakraError> {
        let index_of = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };

        let symbol = index_of("symbol")
            .ok_or_else(|| ChakraError::SnapshotSource("CSV must have 'symbol' column".into()))?;
        let close = index_of("close");
        let price = index_of("price");
        if close.is_none() && price.is_none() {
            return Err(ChakraError::SnapshotSource(
                "CSV must have a 'price' or 'close' column".into(),
            ));
        }

        Ok(Self {
            symbol,
            close,
            price,
            timestamp: index_of("timestamp"),
            date: index_of("date"),
            open: index_of("open"),
            high: index_of("high"),
            low: index_of("low"),
            volume: index_of("volume"),
            iv_rank: index_of("iv_rank"),
        })
    }
}

/// Load and group the snapshot CSV by normalized symbol, rows sorted by
/// date ascending. Zero valid symbol rows is a hard failure.
pub fn load_snapshot_csv(
    path: &Path,
) -> Result<HashMap<String, Vec<SnapshotRow>>, ChakraError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ChakraError::SnapshotSource(format!("failed to open {path:?}: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| ChakraError::SnapshotSource(format!("failed to read CSV header: {e}")))?
        .clone();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut by_symbol: HashMap<String, Vec<SnapshotRow>> = HashMap::new();
    let mut row_count = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            ChakraError::SnapshotSource(format!("CSV parse error at row {}: {e}", line + 2))
        })?;
        row_count += 1;

        let symbol = normalize_symbol(record.get(columns.symbol).unwrap_or(""));
        if symbol.is_empty() {
            continue;
        }

        let close = field_f64(&record, columns.close).or(field_f64(&record, columns.price));
        let Some(close) = close else {
            tracing::warn!("[SNAPSHOT] No price/close value for {symbol}, skipping row");
            continue;
        };

        let raw_date = columns
            .timestamp
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .or_else(|| {
                columns
                    .date
                    .and_then(|i| record.get(i))
                    .filter(|v| !v.is_empty())
            });
        let date = match raw_date {
            Some(raw) => {
                let parsed = parse_flexible_timestamp(raw);
                if parsed.is_none() {
                    tracing::warn!(
                        "[SNAPSHOT] Failed to parse timestamp {raw:?} for {symbol}; keeping row with null date"
                    );
                }
                parsed
            }
            None => None,
        };

        by_symbol.entry(symbol).or_default().push(SnapshotRow {
            date,
            open: field_f64(&record, columns.open).unwrap_or(close),
            high: field_f64(&record, columns.high).unwrap_or(close),
            low: field_f64(&record, columns.low).unwrap_or(close),
            close,
            volume: field_f64(&record, columns.volume).unwrap_or(0.0),
            iv_rank: field_f64(&record, columns.iv_rank),
        });
    }

    if by_symbol.is_empty() {
        return Err(ChakraError::SnapshotSource(
            "CSV file is empty or contains no valid symbol data".into(),
        ));
    }

    for rows in by_symbol.values_mut() {
        rows.sort_by_key(|r| r.date);
    }

    tracing::info!(
        "[SNAPSHOT] CSV loaded: {row_count} rows, {} symbols with data",
        by_symbol.len()
    );
    Ok(by_symbol)
}

fn field_f64(record: &csv::StringRecord, index: Option<usize>) -> Option<f64> {
    index
        .and_then(|i| record.get(i))
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
}

/// Lenient timestamp parsing: RFC 3339 with offset, naive ISO (interpreted
/// as UTC), bare dates, and epoch seconds/milliseconds.
pub fn parse_flexible_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    if let Ok(epoch) = value.parse::<i64>() {
        // Heuristic: pandas-style epochs are ms at 13 digits, s at 10
        let dt = if epoch.abs() >= 1_000_000_000_000 {
            Utc.timestamp_millis_opt(epoch).single()
        } else {
            Utc.timestamp_opt(epoch, 0).single()
        };
        return dt;
    }
    None
}
