//! Options-chain provider seam for stage-2 contract selection.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ChakraError;

/// Contract right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionRight {
    Put,
    Call,
}

impl OptionRight {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionRight::Put => "PUT",
            OptionRight::Call => "CALL",
        }
    }
}

/// One quoted contract from a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub option_symbol: Option<String>,
    pub right: OptionRight,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub bid: f64,
    pub ask: f64,
    pub delta: Option<f64>,
    pub open_interest: Option<i64>,
}

impl OptionContract {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Spread as a percentage of mid; infinite when the mid is zero.
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            return f64::INFINITY;
        }
        (self.ask - self.bid) / mid * 100.0
    }
}

/// A full chain for one underlying
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub underlying_price: Option<f64>,
    pub contracts: Vec<OptionContract>,
}

impl OptionChain {
    pub fn expirations(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.contracts.iter().map(|c| c.expiry).collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

/// External source of option chains. Implementations must be cheap to clone
/// behind an Arc and safe to call from the heartbeat worker.
#[async_trait]
pub trait OptionsChainProvider: Send + Sync {
    async fn fetch_chain(&self, symbol: &str) -> Result<OptionChain, ChakraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(bid: f64, ask: f64) -> OptionContract {
        OptionContract {
            option_symbol: None,
            right: OptionRight::Put,
            strike: 100.0,
            expiry: NaiveDate::from_ymd_opt(2025, 7, 18).unwrap(),
            bid,
            ask,
            delta: Some(-0.25),
            open_interest: Some(500),
        }
    }

    #[test]
    fn mid_and_spread() {
        let c = contract(1.0, 1.2);
        assert!((c.mid() - 1.1).abs() < 1e-9);
        assert!((c.spread_pct() - (0.2 / 1.1 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_mid_spread_is_infinite() {
        let c = contract(0.0, 0.0);
        assert!(c.spread_pct().is_infinite());
    }

    #[test]
    fn expirations_sorted_and_deduped() {
        let mut c1 = contract(1.0, 1.1);
        c1.expiry = NaiveDate::from_ymd_opt(2025, 8, 15).unwrap();
        let c2 = contract(1.0, 1.1);
        let c3 = contract(1.0, 1.1);
        let chain = OptionChain {
            symbol: "AAPL".to_string(),
            underlying_price: Some(100.0),
            contracts: vec![c1, c2, c3],
        };
        let exps = chain.expirations();
        assert_eq!(exps.len(), 2);
        assert!(exps[0] < exps[1]);
    }
}
