//! Stage-1 composite scoring: weighted bounded sub-scores, clamped to
//! [0, 100] and rounded to an integer. Deterministic over snapshot inputs.

use chakra_core::{CoreConfig, Regime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub min_price: f64,
    pub max_price: f64,
    pub target_low: f64,
    pub target_high: f64,
}

impl From<&CoreConfig> for ScoringConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            min_price: config.min_price,
            max_price: config.max_price,
            target_low: config.target_low,
            target_high: config.target_high,
        }
    }
}

/// Per-component breakdown carried on the artifact for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price_suitability: f64,
    pub regime_score: f64,
    pub universe_priority: f64,
    pub freshness: f64,
    pub iv_rank_score: f64,
    pub liquidity_bonus: f64,
    pub raw_score: f64,
    pub final_score: i64,
}

/// Optional universe metadata feeding the priority component.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversePriority {
    pub priority: Option<f64>,
    pub tier: Option<i64>,
}

pub fn compute_score(
    price: f64,
    volume: Option<f64>,
    iv_rank: Option<f64>,
    regime: Regime,
    snapshot_age_minutes: f64,
    universe: UniversePriority,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    // Price suitability (0..30): flat peak over the target band, linear
    // falloff to zero at the hard price bounds.
    let price_suitability = if (config.target_low..=config.target_high).contains(&price) {
        30.0
    } else if price < config.target_low {
        if price <= config.min_price {
            0.0
        } else {
            30.0 * (price - config.min_price) / (config.target_low - config.min_price)
        }
    } else if price >= config.max_price {
        0.0
    } else {
        30.0 * (config.max_price - price) / (config.max_price - config.target_high)
    };

    // Regime fit (0..30)
    let regime_score = match regime.risk_posture() {
        Regime::RiskOn => 30.0,
        Regime::Neutral => 15.0,
        _ => 0.0,
    };

    // Universe priority (0..20): explicit priority wins, then tier, then a
    // constant default.
    let universe_priority = if let Some(priority) = universe.priority {
        (priority * 2.0).clamp(0.0, 20.0)
    } else {
        match universe.tier {
            Some(1) => 20.0,
            Some(2) => 15.0,
            Some(_) => 10.0,
            None => 10.0,
        }
    };

    // Data freshness (0..20), tiered by snapshot age
    let freshness = if snapshot_age_minutes <= 60.0 {
        20.0
    } else if snapshot_age_minutes <= 360.0 {
        10.0
    } else {
        0.0
    };

    // IV-rank bonus (0..20), tiered
    let iv_rank_score = match iv_rank {
        Some(iv) if iv >= 50.0 => 20.0,
        Some(iv) if iv >= 30.0 => 10.0,
        _ => 0.0,
    };

    // Liquidity bonus (0..10), tiered
    let liquidity_bonus = match volume {
        Some(v) if v >= 10_000_000.0 => 10.0,
        Some(v) if v >= 3_000_000.0 => 5.0,
        _ => 0.0,
    };

    let raw_score = price_suitability
        + regime_score
        + universe_priority
        + freshness
        + iv_rank_score
        + liquidity_bonus;
    let final_score = (raw_score.round() as i64).clamp(0, 100);

    ScoreBreakdown {
        price_suitability,
        regime_score,
        universe_priority,
        freshness,
        iv_rank_score,
        liquidity_bonus,
        raw_score,
        final_score,
    }
}
