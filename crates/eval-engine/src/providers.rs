//! Options-chain provider implementations.

use async_trait::async_trait;
use chakra_core::{ChakraError, OptionChain, OptionsChainProvider};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP chain provider. Expects `GET {base_url}/chains/{symbol}` returning
/// the `OptionChain` JSON shape; a bearer token is attached when configured.
pub struct HttpChainProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_seconds: u64,
}

impl HttpChainProvider {
    pub fn new(
        base_url: String,
        token: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, ChakraError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ChakraError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout_seconds,
        })
    }
}

#[async_trait]
impl OptionsChainProvider for HttpChainProvider {
    async fn fetch_chain(&self, symbol: &str) -> Result<OptionChain, ChakraError> {
        let url = format!("{}/chains/{}", self.base_url, symbol);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ChakraError::ProviderTimeout(self.timeout_seconds)
            } else {
                ChakraError::Provider(format!("chain fetch failed for {symbol}: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(ChakraError::Provider(format!(
                "chain fetch for {symbol} returned {}",
                response.status()
            )));
        }

        response
            .json::<OptionChain>()
            .await
            .map_err(|e| ChakraError::Provider(format!("chain decode failed for {symbol}: {e}")))
    }
}

/// Fixture-backed provider for MOCK mode and tests.
#[derive(Default)]
pub struct StaticChainProvider {
    chains: HashMap<String, OptionChain>,
}

impl StaticChainProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain: OptionChain) -> Self {
        self.chains.insert(chain.symbol.clone(), chain);
        self
    }

    pub fn insert(&mut self, chain: OptionChain) {
        self.chains.insert(chain.symbol.clone(), chain);
    }
}

#[async_trait]
impl OptionsChainProvider for StaticChainProvider {
    async fn fetch_chain(&self, symbol: &str) -> Result<OptionChain, ChakraError> {
        self.chains
            .get(symbol)
            .cloned()
            .ok_or_else(|| ChakraError::Provider(format!("no chain fixture for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakra_core::{OptionContract, OptionRight};
    use chrono::NaiveDate;

    fn chain(symbol: &str) -> OptionChain {
        OptionChain {
            symbol: symbol.to_string(),
            underlying_price: Some(100.0),
            contracts: vec![OptionContract {
                option_symbol: None,
                right: OptionRight::Put,
                strike: 95.0,
                expiry: NaiveDate::from_ymd_opt(2025, 7, 18).unwrap(),
                bid: 1.0,
                ask: 1.05,
                delta: Some(-0.25),
                open_interest: Some(500),
            }],
        }
    }

    #[tokio::test]
    async fn static_provider_serves_fixture() {
        let provider = StaticChainProvider::new().with_chain(chain("AAPL"));
        let fetched = provider.fetch_chain("AAPL").await.unwrap();
        assert_eq!(fetched.symbol, "AAPL");
        assert_eq!(fetched.contracts.len(), 1);
    }

    #[tokio::test]
    async fn static_provider_errors_for_unknown_symbol() {
        let provider = StaticChainProvider::new();
        let err = provider.fetch_chain("MSFT").await.unwrap_err();
        assert!(matches!(err, ChakraError::Provider(_)));
    }
}
