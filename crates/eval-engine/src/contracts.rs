//! Stage-2 contract selection over a fetched options chain.
//!
//! Filters run as a pipeline (right, DTE window, delta band, open interest,
//! bid floor, spread cap); the step at which the pool empties names the
//! rejection reason. Survivors are scored and the best contract selected.

use chakra_core::artifact::{contract_key, CandidateRow};
use chakra_core::{CoreConfig, OptionChain, OptionContract, OptionRight};
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct ContractFilters {
    pub dte_min: i64,
    pub dte_max: i64,
    pub delta_min: f64,
    pub delta_max: f64,
    pub min_open_interest: i64,
    pub min_bid: f64,
    pub max_spread_pct: f64,
}

impl From<&CoreConfig> for ContractFilters {
    fn from(config: &CoreConfig) -> Self {
        Self {
            dte_min: config.dte_min,
            dte_max: config.dte_max,
            delta_min: config.delta_min,
            delta_max: config.delta_max,
            min_open_interest: config.min_open_interest,
            min_bid: config.min_bid,
            max_spread_pct: config.max_spread_pct,
        }
    }
}

/// Outcome of selection for one symbol.
#[derive(Debug, Clone)]
pub enum ContractSelection {
    Selected {
        best: CandidateRow,
        considered: Vec<CandidateRow>,
        expirations_count: usize,
        contracts_evaluated: usize,
    },
    NoContract {
        reasons: Vec<String>,
        expirations_count: usize,
        contracts_evaluated: usize,
    },
}

struct ScoredContract<'a> {
    contract: &'a OptionContract,
    dte: i64,
    credit: f64,
    max_loss: f64,
    score: f64,
}

/// Select the best CSP contract from a chain. `today` anchors DTE so the
/// selection is deterministic for a frozen snapshot.
pub fn select_contract(
    symbol: &str,
    chain: &OptionChain,
    today: NaiveDate,
    filters: &ContractFilters,
) -> ContractSelection {
    let expirations_count = chain.expirations().len();
    let total = chain.contracts.len();

    let no_contract = |reason: &str| ContractSelection::NoContract {
        reasons: vec![reason.to_string()],
        expirations_count,
        contracts_evaluated: total,
    };

    if chain.contracts.is_empty() {
        return no_contract("no_chain_data");
    }

    let puts: Vec<&OptionContract> = chain
        .contracts
        .iter()
        .filter(|c| c.right == OptionRight::Put)
        .collect();
    if puts.is_empty() {
        return no_contract("no_put_contracts");
    }

    let in_dte: Vec<&OptionContract> = puts
        .into_iter()
        .filter(|c| {
            let dte = (c.expiry - today).num_days();
            dte >= filters.dte_min && dte <= filters.dte_max
        })
        .collect();
    if in_dte.is_empty() {
        return no_contract("no_expirations_in_dte_window");
    }

    let in_delta: Vec<&OptionContract> = in_dte
        .into_iter()
        .filter(|c| {
            c.delta
                .map(|d| {
                    let abs = d.abs();
                    abs >= filters.delta_min && abs <= filters.delta_max
                })
                .unwrap_or(false)
        })
        .collect();
    if in_delta.is_empty() {
        return no_contract("delta_out_of_range");
    }

    let liquid: Vec<&OptionContract> = in_delta
        .into_iter()
        .filter(|c| c.open_interest.unwrap_or(0) >= filters.min_open_interest)
        .collect();
    if liquid.is_empty() {
        return no_contract("open_interest_too_low");
    }

    let bid_ok: Vec<&OptionContract> = liquid
        .into_iter()
        .filter(|c| c.bid >= filters.min_bid && c.ask > 0.0)
        .collect();
    if bid_ok.is_empty() {
        return no_contract("bid_too_low");
    }

    let tight: Vec<&OptionContract> = bid_ok
        .into_iter()
        .filter(|c| c.spread_pct() <= filters.max_spread_pct)
        .collect();
    if tight.is_empty() {
        return no_contract("spread_too_wide");
    }

    let mut scored: Vec<ScoredContract> = tight
        .into_iter()
        .map(|c| score_contract(c, today, filters))
        .collect();

    // Deterministic: score descending, then nearer expiry, then lower strike
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.contract.expiry.cmp(&b.contract.expiry))
            .then_with(|| {
                a.contract
                    .strike
                    .partial_cmp(&b.contract.strike)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let considered: Vec<CandidateRow> = scored
        .iter()
        .map(|s| to_candidate(symbol, s))
        .collect();
    let best = considered[0].clone();

    ContractSelection::Selected {
        best,
        considered,
        expirations_count,
        contracts_evaluated: total,
    }
}

/// Weighted per-contract score: credit return-on-capital 50%, DTE fit 25%,
/// open-interest depth 25%.
fn score_contract<'a>(
    contract: &'a OptionContract,
    today: NaiveDate,
    filters: &ContractFilters,
) -> ScoredContract<'a> {
    let dte = (contract.expiry - today).num_days();
    let credit = contract.mid() * 100.0;
    let max_loss = (contract.strike * 100.0 - credit).max(0.0);

    let roc = if max_loss > 0.0 { credit / max_loss } else { 0.0 };
    // 2% ROC over the holding period saturates the premium component
    let premium_component = (roc / 0.02).min(1.0);

    let mid_dte = (filters.dte_min + filters.dte_max) as f64 / 2.0;
    let half_window = ((filters.dte_max - filters.dte_min) as f64 / 2.0).max(1.0);
    let dte_component = 1.0 - ((dte as f64 - mid_dte).abs() / half_window).min(1.0);

    let oi_component = (contract.open_interest.unwrap_or(0) as f64 / 1000.0).min(1.0);

    let score = 0.50 * premium_component + 0.25 * dte_component + 0.25 * oi_component;

    ScoredContract {
        contract,
        dte,
        credit,
        max_loss,
        score,
    }
}

fn to_candidate(symbol: &str, scored: &ScoredContract) -> CandidateRow {
    let expiry = scored.contract.expiry.format("%Y-%m-%d").to_string();
    let right = scored.contract.right.as_str();
    CandidateRow {
        symbol: symbol.to_string(),
        strategy: "CSP".to_string(),
        expiry: Some(expiry.clone()),
        strike: Some(scored.contract.strike),
        delta: scored.contract.delta,
        credit_estimate: Some(scored.credit),
        max_loss: Some(scored.max_loss),
        contract_key: Some(contract_key(scored.contract.strike, &expiry, right)),
        option_symbol: scored.contract.option_symbol.clone(),
        why_this_trade: Some(format!(
            "delta {:.2}, {} DTE, credit ${:.0}, ROC {:.2}%",
            scored.contract.delta.unwrap_or(0.0).abs(),
            scored.dte,
            scored.credit,
            if scored.max_loss > 0.0 {
                scored.credit / scored.max_loss * 100.0
            } else {
                0.0
            }
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> ContractFilters {
        ContractFilters {
            dte_min: 21,
            dte_max: 45,
            delta_min: 0.15,
            delta_max: 0.35,
            min_open_interest: 100,
            min_bid: 0.05,
            max_spread_pct: 10.0,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn put(strike: f64, days_out: i64, delta: f64, bid: f64, ask: f64, oi: i64) -> OptionContract {
        OptionContract {
            option_symbol: Some(format!("TST{days_out}P{strike}")),
            right: OptionRight::Put,
            strike,
            expiry: today() + chrono::Duration::days(days_out),
            bid,
            ask,
            delta: Some(-delta),
            open_interest: Some(oi),
        }
    }

    fn chain(contracts: Vec<OptionContract>) -> OptionChain {
        OptionChain {
            symbol: "TST".to_string(),
            underlying_price: Some(100.0),
            contracts,
        }
    }

    #[test]
    fn selects_best_surviving_contract() {
        let c = chain(vec![
            put(95.0, 30, 0.25, 1.00, 1.05, 800),
            put(90.0, 30, 0.18, 0.60, 0.65, 1500),
            put(100.0, 30, 0.40, 2.00, 2.05, 500), // delta out of band
        ]);
        let selection = select_contract("TST", &c, today(), &filters());
        match selection {
            ContractSelection::Selected { best, considered, contracts_evaluated, .. } => {
                assert_eq!(considered.len(), 2);
                assert_eq!(contracts_evaluated, 3);
                assert!(best.strike.is_some());
                assert_eq!(best.strategy, "CSP");
                let key = best.contract_key.unwrap();
                assert!(key.ends_with("-PUT"), "key: {key}");
            }
            ContractSelection::NoContract { reasons, .. } => {
                panic!("expected selection, got rejection {reasons:?}")
            }
        }
    }

    #[test]
    fn empty_chain_reports_no_chain_data() {
        let selection = select_contract("TST", &chain(vec![]), today(), &filters());
        match selection {
            ContractSelection::NoContract { reasons, .. } => {
                assert_eq!(reasons, vec!["no_chain_data"]);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn dte_window_excludes_everything() {
        let c = chain(vec![put(95.0, 7, 0.25, 1.0, 1.05, 800)]);
        match select_contract("TST", &c, today(), &filters()) {
            ContractSelection::NoContract { reasons, .. } => {
                assert_eq!(reasons, vec!["no_expirations_in_dte_window"]);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn missing_delta_is_excluded() {
        let mut contract = put(95.0, 30, 0.25, 1.0, 1.05, 800);
        contract.delta = None;
        match select_contract("TST", &chain(vec![contract]), today(), &filters()) {
            ContractSelection::NoContract { reasons, .. } => {
                assert_eq!(reasons, vec!["delta_out_of_range"]);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn low_open_interest_rejected() {
        let c = chain(vec![put(95.0, 30, 0.25, 1.0, 1.05, 10)]);
        match select_contract("TST", &c, today(), &filters()) {
            ContractSelection::NoContract { reasons, .. } => {
                assert_eq!(reasons, vec!["open_interest_too_low"]);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn wide_spread_rejected() {
        let c = chain(vec![put(95.0, 30, 0.25, 1.0, 2.0, 800)]);
        match select_contract("TST", &c, today(), &filters()) {
            ContractSelection::NoContract { reasons, .. } => {
                assert_eq!(reasons, vec!["spread_too_wide"]);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn credit_and_max_loss_arithmetic() {
        let c = chain(vec![put(100.0, 30, 0.25, 1.0, 1.0, 800)]);
        match select_contract("TST", &c, today(), &filters()) {
            ContractSelection::Selected { best, .. } => {
                assert_eq!(best.credit_estimate, Some(100.0));
                assert_eq!(best.max_loss, Some(9_900.0));
            }
            _ => panic!("expected selection"),
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let build = || {
            chain(vec![
                put(95.0, 30, 0.25, 1.00, 1.05, 800),
                put(90.0, 25, 0.20, 0.80, 0.85, 900),
                put(92.5, 35, 0.22, 0.90, 0.95, 700),
            ])
        };
        let first = select_contract("TST", &build(), today(), &filters());
        let second = select_contract("TST", &build(), today(), &filters());
        match (first, second) {
            (
                ContractSelection::Selected { best: a, .. },
                ContractSelection::Selected { best: b, .. },
            ) => assert_eq!(a, b),
            _ => panic!("expected selections"),
        }
    }
}
