use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Market regime classification (posture included)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Bull,
    Bear,
    Neutral,
    RiskOn,
    RiskOff,
    Unknown,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Neutral => "NEUTRAL",
            Regime::RiskOn => "RISK_ON",
            Regime::RiskOff => "RISK_OFF",
            Regime::Unknown => "UNKNOWN",
        }
    }

    /// Map a directional regime to the risk posture the evaluator gates on.
    /// BULL trades as RISK_ON, BEAR as RISK_OFF; NEUTRAL and UNKNOWN pass
    /// through, as do already-mapped postures.
    pub fn risk_posture(&self) -> Regime {
        match self {
            Regime::Bull => Regime::RiskOn,
            Regime::Bear => Regime::RiskOff,
            other => *other,
        }
    }

    pub fn parse(s: &str) -> Regime {
        match s.trim().to_uppercase().as_str() {
            "BULL" => Regime::Bull,
            "BEAR" => Regime::Bear,
            "NEUTRAL" => Regime::Neutral,
            "RISK_ON" => Regime::RiskOn,
            "RISK_OFF" => Regime::RiskOff,
            _ => Regime::Unknown,
        }
    }
}

/// Verdict for a symbol in one evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Eligible,
    Hold,
    Blocked,
    NotEvaluated,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Eligible => "ELIGIBLE",
            Verdict::Hold => "HOLD",
            Verdict::Blocked => "BLOCKED",
            Verdict::NotEvaluated => "NOT_EVALUATED",
        }
    }
}

/// Quality band derived purely from the numeric score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    A,
    B,
    C,
    D,
}

/// Result of one named gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Fail,
    Skip,
    Waived,
}

/// Per-stage status on a symbol summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pass,
    Fail,
    NotRun,
}

/// Exchange session phase (US equities, Eastern time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketPhase {
    Open,
    Closed,
    Pre,
    Post,
    Unknown,
}

impl MarketPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketPhase::Open => "OPEN",
            MarketPhase::Closed => "CLOSED",
            MarketPhase::Pre => "PRE",
            MarketPhase::Post => "POST",
            MarketPhase::Unknown => "UNKNOWN",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, MarketPhase::Open)
    }
}

/// Process run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    Live,
    Mock,
    DryRun,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Live => "LIVE",
            RunMode::Mock => "MOCK",
            RunMode::DryRun => "DRY_RUN",
        }
    }

    pub fn parse(s: &str) -> RunMode {
        match s.trim().to_uppercase().as_str() {
            "LIVE" => RunMode::Live,
            "MOCK" => RunMode::Mock,
            _ => RunMode::DryRun,
        }
    }
}

/// Operator-facing alert level. System/internal errors are logged, never
/// persisted as alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Watch,
    Action,
    Halt,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Watch => "WATCH",
            AlertLevel::Action => "ACTION",
            AlertLevel::Halt => "HALT",
        }
    }

    /// Invalid level strings default to INFO rather than erroring.
    pub fn parse(s: &str) -> AlertLevel {
        match s.trim().to_uppercase().as_str() {
            "WATCH" => AlertLevel::Watch,
            "ACTION" => AlertLevel::Action,
            "HALT" => AlertLevel::Halt,
            _ => AlertLevel::Info,
        }
    }
}

/// Where a snapshot's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotSource {
    Csv,
    Cache,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Csv => "CSV",
            SnapshotSource::Cache => "CACHE",
        }
    }
}

/// Snapshot build mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildMode {
    Csv,
    Cache,
    Auto,
}

impl BuildMode {
    pub fn parse(s: &str) -> BuildMode {
        match s.trim().to_uppercase().as_str() {
            "CSV" => BuildMode::Csv,
            "CACHE" => BuildMode::Cache,
            _ => BuildMode::Auto,
        }
    }
}

/// Heartbeat cycle outcome published in health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatStatus {
    Success,
    Error,
    NoRegime,
    NoData,
    NoSnapshot,
    RegimeStale,
    Unknown,
}

/// One daily OHLCV row inside a snapshot. `iv_rank` rides along when the
/// source carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub date: Option<DateTime<Utc>>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv_rank: Option<f64>,
}

/// Snapshot metadata, one per build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    /// Build instant zoned to the exchange's local offset (Eastern)
    pub snapshot_timestamp_et: DateTime<FixedOffset>,
    pub source: SnapshotSource,
    pub symbol_count: i64,
    pub symbols_with_data: i64,
    pub data_age_minutes: f64,
    pub is_frozen: bool,
    pub created_at: DateTime<Utc>,
}

/// Symbol universe row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub symbol: String,
    pub enabled: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Regime computation output, one per snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeResult {
    pub snapshot_id: String,
    pub regime: Regime,
    pub benchmark_symbol: Option<String>,
    /// Fractional return, e.g. 0.002 = +0.2%
    pub benchmark_return: Option<f64>,
    /// 0-100; price-only computation is deterministic, so 100 when known
    pub confidence: i32,
    pub method: String,
    pub computed_at: DateTime<Utc>,
}

/// Last-row reduction of a symbol's snapshot data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSlice {
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub iv_rank: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_round_trips_through_strings() {
        for r in [
            Regime::Bull,
            Regime::Bear,
            Regime::Neutral,
            Regime::RiskOn,
            Regime::RiskOff,
            Regime::Unknown,
        ] {
            assert_eq!(Regime::parse(r.as_str()), r);
        }
        assert_eq!(Regime::parse("garbage"), Regime::Unknown);
    }

    #[test]
    fn risk_posture_maps_directional_regimes() {
        assert_eq!(Regime::Bull.risk_posture(), Regime::RiskOn);
        assert_eq!(Regime::Bear.risk_posture(), Regime::RiskOff);
        assert_eq!(Regime::Neutral.risk_posture(), Regime::Neutral);
        assert_eq!(Regime::RiskOn.risk_posture(), Regime::RiskOn);
    }

    #[test]
    fn alert_level_defaults_to_info() {
        assert_eq!(AlertLevel::parse("HALT"), AlertLevel::Halt);
        assert_eq!(AlertLevel::parse("bogus"), AlertLevel::Info);
    }

    #[test]
    fn band_orders_a_first() {
        assert!(Band::A < Band::B);
        assert!(Band::C < Band::D);
    }

    #[test]
    fn serde_uses_wire_strings() {
        assert_eq!(
            serde_json::to_string(&Verdict::NotEvaluated).unwrap(),
            "\"NOT_EVALUATED\""
        );
        assert_eq!(serde_json::to_string(&Band::A).unwrap(), "\"A\"");
        assert_eq!(
            serde_json::to_string(&GateStatus::Skip).unwrap(),
            "\"SKIP\""
        );
    }
}
