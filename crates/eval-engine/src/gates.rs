//! Stage-1 hard gates, applied in order with short-circuit on failure.
//! Every gate that ran is recorded on the artifact.

use chakra_core::artifact::GateEvaluation;
use chakra_core::{CoreConfig, GateStatus, Regime};

pub const GATE_PRESENCE: &str = "PRESENCE";
pub const GATE_PRICE_VALID: &str = "PRICE_VALID";
pub const GATE_PRICE_RANGE: &str = "PRICE_RANGE";
pub const GATE_REGIME: &str = "REGIME";
pub const GATE_LIQUIDITY: &str = "LIQUIDITY_UNDERLYING";
pub const GATE_IV_FLOOR: &str = "IV_FLOOR";

/// Stage-1 gate thresholds, sliced from process config.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_price: f64,
    pub max_price: f64,
    pub min_volume: f64,
    pub min_iv_rank: f64,
    pub allow_missing_iv: bool,
}

impl From<&CoreConfig> for GateConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            min_price: config.min_price,
            max_price: config.max_price,
            min_volume: config.min_volume,
            min_iv_rank: config.min_iv_rank,
            allow_missing_iv: config.allow_missing_iv,
        }
    }
}

/// Per-symbol inputs drawn from the frozen snapshot and regime.
#[derive(Debug, Clone)]
pub struct GateInputs {
    pub has_data: bool,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub iv_rank: Option<f64>,
    /// Risk posture (already mapped from the directional regime)
    pub regime: Regime,
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub gates: Vec<GateEvaluation>,
    pub rejection_reasons: Vec<String>,
    pub passed: bool,
}

fn pass(name: &str) -> GateEvaluation {
    GateEvaluation {
        name: name.to_string(),
        status: GateStatus::Pass,
        reason: None,
    }
}

fn fail(name: &str, reason: &str) -> GateEvaluation {
    GateEvaluation {
        name: name.to_string(),
        status: GateStatus::Fail,
        reason: Some(reason.to_string()),
    }
}

/// Run the ordered hard gates. The first failure short-circuits; gates that
/// never ran are not recorded.
pub fn run_hard_gates(inputs: &GateInputs, config: &GateConfig) -> GateOutcome {
    let mut gates = Vec::new();
    let reject = |gates: Vec<GateEvaluation>, reason: &str| GateOutcome {
        gates,
        rejection_reasons: vec![reason.to_string()],
        passed: false,
    };

    // PRESENCE: a snapshot row with data must exist
    if !inputs.has_data {
        gates.push(fail(GATE_PRESENCE, "no_snapshot_data"));
        return reject(gates, "no_snapshot_data");
    }
    gates.push(pass(GATE_PRESENCE));

    // PRICE_VALID
    let price = inputs.price.unwrap_or(0.0);
    if price <= 0.0 {
        gates.push(fail(GATE_PRICE_VALID, "missing_or_invalid_price"));
        return reject(gates, "missing_or_invalid_price");
    }
    gates.push(pass(GATE_PRICE_VALID));

    // PRICE_RANGE
    if price < config.min_price || price > config.max_price {
        gates.push(fail(GATE_PRICE_RANGE, "price_out_of_range"));
        return reject(gates, "price_out_of_range");
    }
    gates.push(pass(GATE_PRICE_RANGE));

    // REGIME: RISK_OFF and UNKNOWN block new entries; NEUTRAL passes and is
    // down-weighted in scoring instead.
    if matches!(inputs.regime, Regime::RiskOff | Regime::Unknown) {
        gates.push(fail(GATE_REGIME, "regime_not_risk_on"));
        return reject(gates, "regime_not_risk_on");
    }
    gates.push(pass(GATE_REGIME));

    // LIQUIDITY_UNDERLYING: only enforced when volume is known
    if let Some(volume) = inputs.volume {
        if volume < config.min_volume {
            gates.push(fail(GATE_LIQUIDITY, "low_liquidity"));
            return reject(gates, "low_liquidity");
        }
    }
    gates.push(pass(GATE_LIQUIDITY));

    // IV_FLOOR: SKIP when iv_rank is absent and config permits
    match inputs.iv_rank {
        Some(iv) if iv < config.min_iv_rank => {
            gates.push(fail(GATE_IV_FLOOR, "iv_too_low"));
            return reject(gates, "iv_too_low");
        }
        Some(_) => gates.push(pass(GATE_IV_FLOOR)),
        None if config.allow_missing_iv => gates.push(GateEvaluation {
            name: GATE_IV_FLOOR.to_string(),
            status: GateStatus::Skip,
            reason: Some("iv_rank not present in snapshot".to_string()),
        }),
        None => {
            gates.push(fail(GATE_IV_FLOOR, "iv_rank_missing"));
            return reject(gates, "iv_rank_missing");
        }
    }

    GateOutcome {
        gates,
        rejection_reasons: vec![],
        passed: true,
    }
}
