//! The versioned decision artifact: the self-contained output of one
//! evaluation run, consumed by the decision store and the UI.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Band, GateStatus, MarketPhase, RunMode, StageStatus, Verdict};

pub const ARTIFACT_VERSION: &str = "v2";

/// Band thresholds over the 0-100 composite score.
const BAND_A_MIN: i64 = 80;
const BAND_B_MIN: i64 = 60;
const BAND_C_MIN: i64 = 40;

/// Band is derived purely from the numeric score; verdicts never enter the
/// derivation. A null score is band D.
pub fn assign_band(score: Option<i64>) -> Band {
    match score {
        Some(s) if s >= BAND_A_MIN => Band::A,
        Some(s) if s >= BAND_B_MIN => Band::B,
        Some(s) if s >= BAND_C_MIN => Band::C,
        _ => Band::D,
    }
}

pub fn band_reason(score: Option<i64>) -> String {
    match score {
        Some(s) if s >= BAND_A_MIN => format!("score {s} >= {BAND_A_MIN}"),
        Some(s) if s >= BAND_B_MIN => format!("score {s} >= {BAND_B_MIN}"),
        Some(s) if s >= BAND_C_MIN => format!("score {s} >= {BAND_C_MIN}"),
        Some(s) => format!("score {s} < {BAND_C_MIN}"),
        None => "no score".to_string(),
    }
}

/// Monotone encoding of the deterministic rank tuple
/// (band A->D, score desc, premium yield desc). Symbol ascending breaks the
/// remaining ties at sort time.
pub fn compute_rank_score(
    band: Band,
    score: Option<i64>,
    premium_yield_pct: Option<f64>,
) -> f64 {
    let band_base = match band {
        Band::A => 30_000.0,
        Band::B => 20_000.0,
        Band::C => 10_000.0,
        Band::D => 0.0,
    };
    let score_part = score.unwrap_or(0) as f64 * 100.0;
    let yield_part = premium_yield_pct.unwrap_or(0.0).clamp(0.0, 99.0);
    band_base + score_part + yield_part
}

/// One considered (strategy, strike, expiry) tuple for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub symbol: String,
    pub strategy: String,
    pub expiry: Option<String>,
    pub strike: Option<f64>,
    pub delta: Option<f64>,
    pub credit_estimate: Option<f64>,
    pub max_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_this_trade: Option<String>,
}

/// Canonical contract key: `<strike>-<expiry>-<right>`.
pub fn contract_key(strike: f64, expiry: &str, right: &str) -> String {
    format!("{strike}-{expiry}-{right}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub name: String,
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarningsInfo {
    pub earnings_days: Option<i64>,
    pub earnings_block: Option<bool>,
    pub note: Option<String>,
}

/// Loosely-typed diagnostic blocks, keyed the way the dashboard reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolDiagnostics {
    pub technicals: serde_json::Value,
    pub exit_plan: serde_json::Value,
    pub risk_flags: serde_json::Value,
    pub explanation: serde_json::Value,
    pub stock: serde_json::Value,
    pub symbol_eligibility: serde_json::Value,
    pub liquidity: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<serde_json::Value>,
    pub options: serde_json::Value,
}

impl SymbolDiagnostics {
    /// Placeholder diagnostics for symbols the engine did not evaluate.
    pub fn not_evaluated() -> Self {
        Self {
            exit_plan: serde_json::json!({"t1": null, "t2": null, "t3": null, "stop": null}),
            ..Self::default()
        }
    }
}

/// One row per universe symbol per artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEvalSummary {
    pub symbol: String,
    pub verdict: Verdict,
    pub score: Option<i64>,
    pub raw_score: Option<f64>,
    pub final_score: Option<i64>,
    pub band: Band,
    pub band_reason: String,
    pub stage1_status: StageStatus,
    pub stage2_status: StageStatus,
    pub primary_reason: String,
    pub provider_status: Option<String>,
    pub strategy: Option<String>,
    pub price: Option<f64>,
    pub expiration: Option<String>,
    pub capital_required: Option<f64>,
    pub expected_credit: Option<f64>,
    pub premium_yield_pct: Option<f64>,
    pub rank_score: f64,
    pub has_candidates: bool,
    pub candidate_count: usize,
    pub evaluated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<serde_json::Value>,
}

impl SymbolEvalSummary {
    /// Placeholder row for a symbol that never reached the engine.
    pub fn not_evaluated(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            verdict: Verdict::NotEvaluated,
            score: None,
            raw_score: None,
            final_score: None,
            band: Band::D,
            band_reason: band_reason(None),
            stage1_status: StageStatus::NotRun,
            stage2_status: StageStatus::NotRun,
            primary_reason: "Not evaluated".to_string(),
            provider_status: None,
            strategy: None,
            price: None,
            expiration: None,
            capital_required: None,
            expected_credit: None,
            premium_yield_pct: None,
            rank_score: compute_rank_score(Band::D, None, None),
            has_candidates: false,
            candidate_count: 0,
            evaluated_at: None,
            score_breakdown: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_version: String,
    pub mode: RunMode,
    pub pipeline_timestamp: String,
    pub run_id: String,
    pub market_phase: MarketPhase,
    pub universe_size: usize,
    pub evaluated_count_stage1: usize,
    pub evaluated_count_stage2: usize,
    pub eligible_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_frozen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_violation_changed_keys: Option<Vec<String>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Versioned decision artifact, immutable after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionArtifactV2 {
    pub metadata: ArtifactMetadata,
    pub symbols: Vec<SymbolEvalSummary>,
    pub selected_candidates: Vec<CandidateRow>,
    pub candidates_by_symbol: HashMap<String, Vec<CandidateRow>>,
    pub gates_by_symbol: HashMap<String, Vec<GateEvaluation>>,
    pub earnings_by_symbol: HashMap<String, EarningsInfo>,
    pub diagnostics_by_symbol: HashMap<String, SymbolDiagnostics>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DecisionArtifactV2 {
    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    pub fn symbol_row(&self, symbol: &str) -> Option<&SymbolEvalSummary> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    /// Sort symbol rows by the deterministic rank tuple:
    /// band A->D, score descending, premium yield descending, symbol
    /// ascending.
    pub fn sort_symbols_by_rank(&mut self) {
        self.symbols.sort_by(|a, b| {
            a.band
                .cmp(&b.band)
                .then_with(|| b.score.unwrap_or(-1).cmp(&a.score.unwrap_or(-1)))
                .then_with(|| {
                    b.premium_yield_pct
                        .unwrap_or(0.0)
                        .partial_cmp(&a.premium_yield_pct.unwrap_or(0.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
    }
}
