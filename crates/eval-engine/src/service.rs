//! The evaluation service: one engine, one store. Runs the staged pipeline
//! over a universe (or a single symbol, merged into the current artifact)
//! and writes the resulting `DecisionArtifactV2` through the decision store.

use chakra_core::artifact::{
    assign_band, band_reason, compute_rank_score, ArtifactMetadata, CandidateRow,
    DecisionArtifactV2, EarningsInfo, SymbolDiagnostics, SymbolEvalSummary, ARTIFACT_VERSION,
};
use chakra_core::{
    get_market_phase, normalize_symbol, ChakraError, CoreConfig, OptionsChainProvider, PriceSlice,
    Regime, RunMode, StageStatus, Verdict,
};
use chrono::{NaiveDate, Utc};
use decision_store::{check_freeze, enforce_market_open, record_run, DecisionStore, FreezeCheck};
use market_store::MarketStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::contracts::{select_contract, ContractFilters, ContractSelection};
use crate::gates::{run_hard_gates, GateConfig, GateInputs};
use crate::scoring::{compute_score, ScoringConfig, UniversePriority};

pub struct EvaluationEngine {
    store: MarketStore,
    decisions: Arc<DecisionStore>,
    provider: Option<Arc<dyn OptionsChainProvider>>,
    config: CoreConfig,
}

/// Everything one symbol contributes to the artifact.
struct SymbolOutcome {
    summary: SymbolEvalSummary,
    candidates: Vec<CandidateRow>,
    gates: Vec<chakra_core::artifact::GateEvaluation>,
    earnings: EarningsInfo,
    diagnostics: SymbolDiagnostics,
    selected: Option<CandidateRow>,
    stage2_ran: bool,
}

impl EvaluationEngine {
    pub fn new(
        store: MarketStore,
        decisions: Arc<DecisionStore>,
        provider: Option<Arc<dyn OptionsChainProvider>>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            decisions,
            provider,
            config,
        }
    }

    pub fn decisions(&self) -> &Arc<DecisionStore> {
        &self.decisions
    }

    /// Market-hours-gated entry point for human/API callers: refuses to
    /// overwrite the canonical decision while the market is not open unless
    /// forced.
    pub async fn evaluate_universe_guarded(
        &self,
        symbols: &[String],
        mode: RunMode,
        force: bool,
    ) -> Result<DecisionArtifactV2, ChakraError> {
        enforce_market_open(get_market_phase(None), force)?;
        self.evaluate_universe(symbols, mode).await
    }

    /// Run the staged pipeline over the given universe and persist the
    /// artifact. Exactly one summary row per universe symbol; per-symbol
    /// failures never abort the run.
    pub async fn evaluate_universe(
        &self,
        symbols: &[String],
        mode: RunMode,
    ) -> Result<DecisionArtifactV2, ChakraError> {
        let phase = get_market_phase(None);
        let ts = Utc::now().to_rfc3339();

        // Deduplicate post-normalization, preserving order; empty symbols
        // are rejected rather than silently included.
        let mut universe: Vec<String> = Vec::new();
        for symbol in symbols {
            let normalized = normalize_symbol(symbol);
            if !normalized.is_empty() && !universe.contains(&normalized) {
                universe.push(normalized);
            }
        }

        let snapshot_ctx = self.load_snapshot_context().await?;
        let freeze = check_freeze(&self.store, &self.config, mode).await?;

        let mut warnings: Vec<String> = Vec::new();
        let mut outcomes: HashMap<String, SymbolOutcome> = HashMap::new();
        let mut stage1_count = 0usize;
        let mut stage2_count = 0usize;

        for symbol in &universe {
            match self.evaluate_symbol(symbol, &snapshot_ctx, &ts).await {
                Ok(outcome) => {
                    stage1_count += 1;
                    if outcome.stage2_ran {
                        stage2_count += 1;
                    }
                    outcomes.insert(symbol.clone(), outcome);
                }
                Err(e) => {
                    tracing::warn!("[EVAL] {symbol} failed stage 1, downgrading: {e}");
                    warnings.push(format!("{symbol}: {e}"));
                }
            }
        }

        let mut symbols_out = Vec::with_capacity(universe.len());
        let mut selected_candidates = Vec::new();
        let mut candidates_by_symbol = HashMap::new();
        let mut gates_by_symbol = HashMap::new();
        let mut earnings_by_symbol = HashMap::new();
        let mut diagnostics_by_symbol = HashMap::new();
        let mut eligible_count = 0usize;

        for symbol in &universe {
            match outcomes.remove(symbol) {
                Some(outcome) => {
                    if outcome.summary.verdict == Verdict::Eligible {
                        eligible_count += 1;
                    }
                    if let Some(selected) = outcome.selected {
                        selected_candidates.push(selected);
                    }
                    candidates_by_symbol.insert(symbol.clone(), outcome.candidates);
                    gates_by_symbol.insert(symbol.clone(), outcome.gates);
                    earnings_by_symbol.insert(symbol.clone(), outcome.earnings);
                    diagnostics_by_symbol.insert(symbol.clone(), outcome.diagnostics);
                    symbols_out.push(outcome.summary);
                }
                None => {
                    // Failed or skipped: placeholder row, band D, null score
                    symbols_out.push(SymbolEvalSummary::not_evaluated(symbol));
                    earnings_by_symbol.insert(
                        symbol.clone(),
                        EarningsInfo {
                            earnings_days: None,
                            earnings_block: None,
                            note: Some("Not evaluated".to_string()),
                        },
                    );
                    diagnostics_by_symbol
                        .insert(symbol.clone(), SymbolDiagnostics::not_evaluated());
                }
            }
        }

        let mut artifact = DecisionArtifactV2 {
            metadata: ArtifactMetadata {
                artifact_version: ARTIFACT_VERSION.to_string(),
                mode,
                pipeline_timestamp: ts,
                run_id: Uuid::new_v4().to_string(),
                market_phase: phase,
                universe_size: universe.len(),
                evaluated_count_stage1: stage1_count,
                evaluated_count_stage2: stage2_count,
                eligible_count,
                config_frozen: Some(freeze.config_frozen),
                freeze_violation_changed_keys: changed_keys_field(&freeze),
                warnings: warnings.clone(),
            },
            symbols: symbols_out,
            selected_candidates,
            candidates_by_symbol,
            gates_by_symbol,
            earnings_by_symbol,
            diagnostics_by_symbol,
            warnings,
        };
        artifact.sort_symbols_by_rank();

        self.decisions.set_latest(&artifact)?;
        record_run(&self.store, &self.config, mode).await?;

        tracing::info!(
            "[EVAL] evaluate_universe: {} symbols, {} stage2, {} eligible",
            universe.len(),
            stage2_count,
            artifact.metadata.eligible_count
        );
        Ok(artifact)
    }

    /// Market-hours-gated single-symbol recompute.
    pub async fn evaluate_single_guarded(
        &self,
        symbol: &str,
        mode: RunMode,
        force: bool,
    ) -> Result<DecisionArtifactV2, ChakraError> {
        enforce_market_open(get_market_phase(None), force)?;
        self.evaluate_single_and_merge(symbol, mode).await
    }

    /// Re-evaluate one symbol and merge it into the current artifact: its
    /// row, candidates, gates, earnings, and diagnostics are replaced, the
    /// run id refreshed, and `eligible_count` recomputed. Every other
    /// symbol's data is untouched.
    pub async fn evaluate_single_and_merge(
        &self,
        symbol: &str,
        mode: RunMode,
    ) -> Result<DecisionArtifactV2, ChakraError> {
        let normalized = normalize_symbol(symbol);
        if normalized.is_empty() {
            return Err(ChakraError::Config("symbol required".to_string()));
        }

        let phase = get_market_phase(None);
        let ts = Utc::now().to_rfc3339();
        let snapshot_ctx = self.load_snapshot_context().await?;

        let outcome = match self.evaluate_symbol(&normalized, &snapshot_ctx, &ts).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("[EVAL] single-symbol eval failed for {normalized}: {e}");
                SymbolOutcome {
                    summary: SymbolEvalSummary::not_evaluated(&normalized),
                    candidates: vec![],
                    gates: vec![],
                    earnings: EarningsInfo {
                        earnings_days: None,
                        earnings_block: None,
                        note: Some("Not evaluated".to_string()),
                    },
                    diagnostics: SymbolDiagnostics::not_evaluated(),
                    selected: None,
                    stage2_ran: false,
                }
            }
        };

        let merged = match self.decisions.get_latest()? {
            None => {
                let mut artifact = DecisionArtifactV2 {
                    metadata: ArtifactMetadata {
                        artifact_version: ARTIFACT_VERSION.to_string(),
                        mode,
                        pipeline_timestamp: ts,
                        run_id: Uuid::new_v4().to_string(),
                        market_phase: phase,
                        universe_size: 1,
                        evaluated_count_stage1: 1,
                        evaluated_count_stage2: usize::from(outcome.stage2_ran),
                        eligible_count: usize::from(outcome.summary.verdict == Verdict::Eligible),
                        config_frozen: None,
                        freeze_violation_changed_keys: None,
                        warnings: vec![],
                    },
                    symbols: vec![outcome.summary],
                    selected_candidates: outcome.selected.into_iter().collect(),
                    candidates_by_symbol: HashMap::from([(
                        normalized.clone(),
                        outcome.candidates,
                    )]),
                    gates_by_symbol: HashMap::from([(normalized.clone(), outcome.gates)]),
                    earnings_by_symbol: HashMap::from([(normalized.clone(), outcome.earnings)]),
                    diagnostics_by_symbol: HashMap::from([(
                        normalized.clone(),
                        outcome.diagnostics,
                    )]),
                    warnings: vec![],
                };
                artifact.sort_symbols_by_rank();
                artifact
            }
            Some(current) => {
                let mut merged = current;

                match merged
                    .symbols
                    .iter()
                    .position(|s| s.symbol == normalized)
                {
                    Some(index) => merged.symbols[index] = outcome.summary,
                    None => {
                        merged.symbols.push(outcome.summary);
                        merged.metadata.universe_size += 1;
                    }
                }

                merged
                    .candidates_by_symbol
                    .insert(normalized.clone(), outcome.candidates);
                merged
                    .gates_by_symbol
                    .insert(normalized.clone(), outcome.gates);
                merged
                    .earnings_by_symbol
                    .insert(normalized.clone(), outcome.earnings);
                merged
                    .diagnostics_by_symbol
                    .insert(normalized.clone(), outcome.diagnostics);

                merged
                    .selected_candidates
                    .retain(|c| c.symbol != normalized);
                if let Some(selected) = outcome.selected {
                    merged.selected_candidates.push(selected);
                }

                merged.metadata.pipeline_timestamp = ts;
                merged.metadata.run_id = Uuid::new_v4().to_string();
                merged.metadata.market_phase = phase;
                merged.metadata.eligible_count = merged
                    .symbols
                    .iter()
                    .filter(|s| s.verdict == Verdict::Eligible)
                    .count();
                merged
            }
        };

        self.decisions.set_latest(&merged)?;
        Ok(merged)
    }

    async fn load_snapshot_context(&self) -> Result<SnapshotContext, ChakraError> {
        let snapshot = self.store.active_snapshot().await?;
        let (prices, age_minutes, as_of_date) = match &snapshot {
            Some(meta) => (
                self.store.snapshot_prices(&meta.snapshot_id).await?,
                meta.data_age_minutes,
                meta.snapshot_timestamp_et.date_naive(),
            ),
            None => (HashMap::new(), 0.0, Utc::now().date_naive()),
        };

        let regime = self
            .store
            .latest_regime()
            .await?
            .map(|r| r.regime.risk_posture())
            .unwrap_or(Regime::Unknown);

        Ok(SnapshotContext {
            prices,
            age_minutes,
            as_of_date,
            regime,
        })
    }

    async fn evaluate_symbol(
        &self,
        symbol: &str,
        ctx: &SnapshotContext,
        ts: &str,
    ) -> Result<SymbolOutcome, ChakraError> {
        let slice = ctx.prices.get(symbol);
        let price = slice.and_then(|s| s.price);
        let volume = slice.and_then(|s| s.volume);
        let iv_rank = slice.and_then(|s| s.iv_rank);

        let gate_outcome = run_hard_gates(
            &GateInputs {
                has_data: slice.is_some(),
                price,
                volume,
                iv_rank,
                regime: ctx.regime,
            },
            &GateConfig::from(&self.config),
        );

        if !gate_outcome.passed {
            let primary = gate_outcome
                .rejection_reasons
                .first()
                .cloned()
                .unwrap_or_default();
            let summary = SymbolEvalSummary {
                symbol: symbol.to_string(),
                verdict: Verdict::Blocked,
                score: None,
                raw_score: None,
                final_score: None,
                band: assign_band(None),
                band_reason: band_reason(None),
                stage1_status: StageStatus::Fail,
                stage2_status: StageStatus::NotRun,
                primary_reason: primary.clone(),
                provider_status: provider_status(slice),
                strategy: None,
                price,
                expiration: None,
                capital_required: None,
                expected_credit: None,
                premium_yield_pct: None,
                rank_score: compute_rank_score(assign_band(None), None, None),
                has_candidates: false,
                candidate_count: 0,
                evaluated_at: Some(ts.to_string()),
                score_breakdown: None,
            };
            let diagnostics = self.build_diagnostics(
                symbol,
                slice,
                ctx,
                &gate_outcome.rejection_reasons,
                None,
                None,
            );
            return Ok(SymbolOutcome {
                summary,
                candidates: vec![],
                gates: gate_outcome.gates,
                earnings: not_evaluated_earnings(),
                diagnostics,
                selected: None,
                stage2_ran: false,
            });
        }

        // Scoring only runs once every hard gate has passed.
        let breakdown = compute_score(
            price.unwrap_or(0.0),
            volume,
            iv_rank,
            ctx.regime,
            ctx.age_minutes,
            UniversePriority::default(),
            &ScoringConfig::from(&self.config),
        );
        let score = Some(breakdown.final_score);

        // Stage 2: contract selection over the chain provider.
        let (stage2_status, stage2_ran, stage2_reason, selection) =
            self.run_stage2(symbol, ctx.as_of_date).await;

        let (verdict, selected, candidates, strategy, expiration, options_diag) = match selection {
            Some(ContractSelection::Selected {
                best,
                considered,
                expirations_count,
                contracts_evaluated,
            }) => {
                let strategy = Some(best.strategy.clone());
                let expiration = best.expiry.clone();
                let options = serde_json::json!({
                    "expirations_count": expirations_count,
                    "contracts_count": contracts_evaluated,
                    "underlying_price": price,
                });
                (
                    Verdict::Eligible,
                    Some(best),
                    considered,
                    strategy,
                    expiration,
                    options,
                )
            }
            Some(ContractSelection::NoContract {
                expirations_count,
                contracts_evaluated,
                ..
            }) => {
                let options = serde_json::json!({
                    "expirations_count": expirations_count,
                    "contracts_count": contracts_evaluated,
                    "underlying_price": price,
                });
                (Verdict::Hold, None, vec![], None, None, options)
            }
            None => (
                Verdict::Hold,
                None,
                vec![],
                None,
                None,
                serde_json::json!({
                    "expirations_count": 0,
                    "contracts_count": null,
                    "underlying_price": price,
                }),
            ),
        };

        let max_loss = selected.as_ref().and_then(|c| c.max_loss);
        let expected_credit = selected.as_ref().and_then(|c| c.credit_estimate);
        let capital_required =
            max_loss.or_else(|| price.filter(|p| *p > 0.0).map(|p| p * 100.0));
        let premium_yield_pct = match (expected_credit, capital_required) {
            (Some(credit), Some(capital)) if capital > 0.0 => Some(credit / capital * 100.0),
            _ => None,
        };

        let band = assign_band(score);
        let primary_reason = match verdict {
            Verdict::Eligible => "Stage 1 and stage 2 passed".to_string(),
            _ => stage2_reason.clone().unwrap_or_else(|| "stage2_not_run".to_string()),
        };

        let breakdown_json = serde_json::to_value(&breakdown).ok();
        let summary = SymbolEvalSummary {
            symbol: symbol.to_string(),
            verdict,
            score,
            raw_score: Some(breakdown.raw_score),
            final_score: score,
            band,
            band_reason: band_reason(score),
            stage1_status: StageStatus::Pass,
            stage2_status,
            primary_reason,
            provider_status: provider_status(slice),
            strategy,
            price,
            expiration,
            capital_required,
            expected_credit,
            premium_yield_pct,
            rank_score: compute_rank_score(band, score, premium_yield_pct),
            has_candidates: !candidates.is_empty(),
            candidate_count: candidates.len(),
            evaluated_at: Some(ts.to_string()),
            score_breakdown: breakdown_json.clone(),
        };

        let mut diagnostics = self.build_diagnostics(
            symbol,
            slice,
            ctx,
            &[],
            breakdown_json,
            stage2_reason.as_deref(),
        );
        diagnostics.options = options_diag;

        Ok(SymbolOutcome {
            summary,
            candidates,
            gates: gate_outcome.gates,
            earnings: not_evaluated_earnings(),
            diagnostics,
            selected,
            stage2_ran,
        })
    }

    /// Fetch the chain with a per-call timeout and select a contract.
    /// Returns (status, ran, failure reason, selection). Provider failures
    /// never propagate past the symbol.
    async fn run_stage2(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> (StageStatus, bool, Option<String>, Option<ContractSelection>) {
        let Some(provider) = &self.provider else {
            return (StageStatus::NotRun, false, None, None);
        };

        let timeout = Duration::from_secs(self.config.chain_timeout_seconds);
        let fetched = tokio::time::timeout(timeout, provider.fetch_chain(symbol)).await;
        let chain = match fetched {
            Err(_) => {
                tracing::warn!("[EVAL] chain fetch for {symbol} timed out");
                return (StageStatus::Fail, true, Some("TIMEOUT".to_string()), None);
            }
            Ok(Err(ChakraError::ProviderTimeout(_))) => {
                return (StageStatus::Fail, true, Some("TIMEOUT".to_string()), None);
            }
            Ok(Err(e)) => {
                tracing::warn!("[EVAL] chain fetch for {symbol} failed: {e}");
                return (StageStatus::Fail, true, Some(e.to_string()), None);
            }
            Ok(Ok(chain)) => chain,
        };

        let selection = select_contract(symbol, &chain, as_of, &ContractFilters::from(&self.config));
        match &selection {
            ContractSelection::Selected { .. } => {
                (StageStatus::Pass, true, None, Some(selection))
            }
            ContractSelection::NoContract { reasons, .. } => {
                let reason = reasons.join(", ");
                (StageStatus::Fail, true, Some(reason), Some(selection))
            }
        }
    }

    fn build_diagnostics(
        &self,
        _symbol: &str,
        slice: Option<&PriceSlice>,
        ctx: &SnapshotContext,
        rejection_reasons: &[String],
        score_breakdown: Option<serde_json::Value>,
        stage2_reason: Option<&str>,
    ) -> SymbolDiagnostics {
        let liquidity_ok = slice
            .and_then(|s| s.volume)
            .map(|v| v >= self.config.min_volume);
        let data_status = if slice.is_some() { "OK" } else { "WARN" };

        SymbolDiagnostics {
            technicals: serde_json::json!({}),
            exit_plan: serde_json::json!({
                "t1": null, "t2": null, "t3": null, "stop": null,
                "status": "NOT_AVAILABLE",
                "reason": "Missing inputs (support/resistance levels not in snapshot)",
            }),
            risk_flags: serde_json::json!({
                "stock_liq": liquidity_ok,
                "data_status": data_status,
            }),
            explanation: serde_json::json!({
                "stock_regime_reason": ctx.regime.as_str(),
                "liquidity_condition": match liquidity_ok {
                    Some(true) => "OK",
                    Some(false) => "Liquidity failed",
                    None => "Volume unknown",
                },
                "iv_condition": rejection_reasons.first(),
                "stage2_condition": stage2_reason,
            }),
            stock: serde_json::json!({
                "price": slice.and_then(|s| s.price),
                "volume": slice.and_then(|s| s.volume),
                "iv_rank": slice.and_then(|s| s.iv_rank),
                "quote_age_minutes": ctx.age_minutes,
            }),
            symbol_eligibility: serde_json::json!({
                "status": if rejection_reasons.is_empty() { "OK" } else { "BLOCKED" },
                "reasons": rejection_reasons,
            }),
            liquidity: serde_json::json!({
                "stock_liquidity_ok": liquidity_ok,
                "reason": if liquidity_ok == Some(false) { Some("volume below floor") } else { None },
            }),
            score_breakdown,
            options: serde_json::json!({}),
        }
    }
}

struct SnapshotContext {
    prices: HashMap<String, PriceSlice>,
    age_minutes: f64,
    as_of_date: NaiveDate,
    regime: Regime,
}

fn provider_status(slice: Option<&PriceSlice>) -> Option<String> {
    Some(if slice.is_some() { "OK" } else { "WARN" }.to_string())
}

fn not_evaluated_earnings() -> EarningsInfo {
    EarningsInfo {
        earnings_days: None,
        earnings_block: None,
        note: Some("Not evaluated".to_string()),
    }
}

fn changed_keys_field(freeze: &FreezeCheck) -> Option<Vec<String>> {
    if freeze.changed_keys.is_empty() {
        None
    } else {
        Some(freeze.changed_keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakra_core::{Band, OptionChain, OptionContract, OptionRight, RegimeResult};
    use crate::providers::StaticChainProvider;
    use market_store::BuildOptions;
    use std::io::Write;

    async fn seeded_store(csv: &str) -> (MarketStore, tempfile::NamedTempFile) {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(csv.as_bytes()).unwrap();
        store
            .build_snapshot(
                chakra_core::BuildMode::Csv,
                &BuildOptions {
                    csv_path: file.path().to_path_buf(),
                    dev_mode: false,
                },
            )
            .await
            .unwrap();
        (store, file)
    }

    async fn set_regime(store: &MarketStore, regime: Regime) {
        let snapshot_id = store.latest_snapshot_id().await.unwrap().unwrap();
        store
            .upsert_regime(&RegimeResult {
                snapshot_id,
                regime,
                benchmark_symbol: Some("SPY".to_string()),
                benchmark_return: Some(0.002),
                confidence: 100,
                method: "snapshot_price_only".to_string(),
                computed_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn chain_for(symbol: &str, strike: f64) -> OptionChain {
        let expiry = Utc::now().date_naive() + chrono::Duration::days(30);
        OptionChain {
            symbol: symbol.to_string(),
            underlying_price: Some(strike + 5.0),
            contracts: vec![OptionContract {
                option_symbol: Some(format!("{symbol}P{strike}")),
                right: OptionRight::Put,
                strike,
                expiry,
                bid: 1.00,
                ask: 1.05,
                delta: Some(-0.25),
                open_interest: Some(800),
            }],
        }
    }

    fn engine(
        store: MarketStore,
        dir: &std::path::Path,
        provider: Option<Arc<dyn OptionsChainProvider>>,
    ) -> EvaluationEngine {
        EvaluationEngine::new(
            store,
            Arc::new(DecisionStore::new(dir).unwrap()),
            provider,
            CoreConfig::default(),
        )
    }

    const CSV: &str = "symbol,price,volume,iv_rank\nSPY,100,5000000,40\nAAPL,95,4000000,45\nPENNY,2,5000000,40\n";

    #[tokio::test]
    async fn universe_evaluation_produces_complete_artifact() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn OptionsChainProvider> =
            Arc::new(StaticChainProvider::new().with_chain(chain_for("SPY", 95.0)));
        let engine = engine(store, dir.path(), Some(provider));

        let universe = vec![
            "SPY".to_string(),
            "AAPL".to_string(),
            "PENNY".to_string(),
            "GHOST".to_string(),
        ];
        let artifact = engine
            .evaluate_universe(&universe, RunMode::Mock)
            .await
            .unwrap();

        // Artifact completeness: one row per universe symbol
        assert_eq!(artifact.symbols.len(), artifact.metadata.universe_size);
        assert_eq!(artifact.metadata.universe_size, 4);

        let spy = artifact.symbol_row("SPY").unwrap();
        assert_eq!(spy.verdict, Verdict::Eligible);
        assert_eq!(spy.stage1_status, StageStatus::Pass);
        assert_eq!(spy.stage2_status, StageStatus::Pass);
        assert!(spy.expected_credit.is_some());
        assert!(spy.premium_yield_pct.is_some());

        // AAPL passes stage 1 but has no chain fixture: stage 2 FAIL, HOLD
        let aapl = artifact.symbol_row("AAPL").unwrap();
        assert_eq!(aapl.verdict, Verdict::Hold);
        assert_eq!(aapl.stage1_status, StageStatus::Pass);
        assert_eq!(aapl.stage2_status, StageStatus::Fail);

        // PENNY fails the price-range gate
        let penny = artifact.symbol_row("PENNY").unwrap();
        assert_eq!(penny.verdict, Verdict::Blocked);
        assert_eq!(penny.primary_reason, "price_out_of_range");
        assert!(penny.score.is_none());

        // GHOST has no snapshot row: PRESENCE gate blocks it
        let ghost = artifact.symbol_row("GHOST").unwrap();
        assert_eq!(ghost.verdict, Verdict::Blocked);
        assert_eq!(ghost.band, Band::D);

        // Selected candidates only for eligible symbols, at most one each
        assert_eq!(artifact.selected_candidates.len(), 1);
        assert_eq!(artifact.selected_candidates[0].symbol, "SPY");
        assert_eq!(artifact.metadata.eligible_count, 1);
        assert_eq!(artifact.metadata.evaluated_count_stage2, 2);

        // The artifact was persisted through the decision store
        let stored = engine.decisions().get_latest().unwrap().unwrap();
        assert_eq!(stored.run_id(), artifact.run_id());
    }

    #[tokio::test]
    async fn eligible_symbols_have_candidates_invariant() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn OptionsChainProvider> =
            Arc::new(StaticChainProvider::new().with_chain(chain_for("SPY", 95.0)));
        let engine = engine(store, dir.path(), Some(provider));

        let artifact = engine
            .evaluate_universe(&["SPY".to_string(), "AAPL".to_string()], RunMode::Mock)
            .await
            .unwrap();

        for candidate in &artifact.selected_candidates {
            let row = artifact.symbol_row(&candidate.symbol).unwrap();
            assert_eq!(row.verdict, Verdict::Eligible);
        }
    }

    #[tokio::test]
    async fn no_provider_leaves_stage2_not_run() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(store, dir.path(), None);

        let artifact = engine
            .evaluate_universe(&["SPY".to_string()], RunMode::Mock)
            .await
            .unwrap();
        let spy = artifact.symbol_row("SPY").unwrap();
        assert_eq!(spy.verdict, Verdict::Hold);
        assert_eq!(spy.stage2_status, StageStatus::NotRun);
        assert!(spy.score.is_some());
    }

    #[tokio::test]
    async fn risk_off_regime_blocks_everything() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bear).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(store, dir.path(), None);

        let artifact = engine
            .evaluate_universe(&["SPY".to_string(), "AAPL".to_string()], RunMode::Mock)
            .await
            .unwrap();
        for row in &artifact.symbols {
            assert_eq!(row.verdict, Verdict::Blocked);
            assert_eq!(row.primary_reason, "regime_not_risk_on");
        }
    }

    #[tokio::test]
    async fn duplicate_and_empty_symbols_deduplicated() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(store, dir.path(), None);

        let artifact = engine
            .evaluate_universe(
                &[
                    "spy".to_string(),
                    " SPY ".to_string(),
                    "".to_string(),
                    "  ".to_string(),
                ],
                RunMode::Mock,
            )
            .await
            .unwrap();
        assert_eq!(artifact.metadata.universe_size, 1);
        assert_eq!(artifact.symbols[0].symbol, "SPY");
    }

    #[tokio::test]
    async fn single_symbol_merge_preserves_other_rows() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        // First run: no provider, both symbols HOLD
        let provider_later: Arc<dyn OptionsChainProvider> =
            Arc::new(StaticChainProvider::new().with_chain(chain_for("AAPL", 90.0)));
        let engine_no_chain = engine(store.clone(), dir.path(), None);
        let first = engine_no_chain
            .evaluate_universe(&["SPY".to_string(), "AAPL".to_string()], RunMode::Mock)
            .await
            .unwrap();
        let spy_before = first.symbol_row("SPY").unwrap().clone();
        assert_eq!(first.symbol_row("AAPL").unwrap().verdict, Verdict::Hold);

        // Second engine shares the decision store dir; AAPL now has a chain
        let engine_with_chain = engine(store, dir.path(), Some(provider_later));
        let merged = engine_with_chain
            .evaluate_single_and_merge("AAPL", RunMode::Mock)
            .await
            .unwrap();

        // AAPL upgraded to ELIGIBLE; SPY row untouched
        let aapl = merged.symbol_row("AAPL").unwrap();
        assert_eq!(aapl.verdict, Verdict::Eligible);
        assert_eq!(merged.symbol_row("SPY").unwrap(), &spy_before);

        // New run id, recomputed eligible count, selected candidate swapped in
        assert_ne!(merged.run_id(), first.run_id());
        assert_eq!(merged.metadata.eligible_count, 1);
        assert_eq!(merged.selected_candidates.len(), 1);
        assert_eq!(merged.selected_candidates[0].symbol, "AAPL");
        // Universe size unchanged by an in-place merge
        assert_eq!(merged.metadata.universe_size, first.metadata.universe_size);
    }

    #[tokio::test]
    async fn merge_with_no_prior_artifact_builds_singleton() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(store, dir.path(), None);

        let artifact = engine
            .evaluate_single_and_merge("SPY", RunMode::Mock)
            .await
            .unwrap();
        assert_eq!(artifact.metadata.universe_size, 1);
        assert_eq!(artifact.symbols[0].symbol, "SPY");
    }

    #[tokio::test]
    async fn identical_inputs_produce_identical_rows() {
        let (store, _file) = seeded_store(
            "symbol,price,volume,iv_rank\nAAA,100,5000000,40\nBBB,100,5000000,40\n",
        )
        .await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(store, dir.path(), None);

        let artifact = engine
            .evaluate_universe(&["AAA".to_string(), "BBB".to_string()], RunMode::Mock)
            .await
            .unwrap();
        let a = artifact.symbol_row("AAA").unwrap();
        let b = artifact.symbol_row("BBB").unwrap();
        assert_eq!(
            (a.stage1_status, a.stage2_status, a.verdict, a.band, a.score),
            (b.stage1_status, b.stage2_status, b.verdict, b.band, b.score)
        );
    }

    #[tokio::test]
    async fn config_drift_under_live_flags_artifact() {
        let (store, _file) = seeded_store(CSV).await;
        set_regime(&store, Regime::Bull).await;
        let dir = tempfile::tempdir().unwrap();

        // First run records the baseline
        let engine1 = engine(store.clone(), dir.path(), None);
        engine1
            .evaluate_universe(&["SPY".to_string()], RunMode::Live)
            .await
            .unwrap();

        // Second run with drifted critical config
        let drifted = CoreConfig {
            min_price: 20.0,
            ..CoreConfig::default()
        };
        let engine2 = EvaluationEngine::new(
            store,
            Arc::new(DecisionStore::new(dir.path()).unwrap()),
            None,
            drifted,
        );
        let artifact = engine2
            .evaluate_universe(&["SPY".to_string()], RunMode::Live)
            .await
            .unwrap();
        assert_eq!(artifact.metadata.config_frozen, Some(false));
        assert_eq!(
            artifact.metadata.freeze_violation_changed_keys,
            Some(vec!["min_price".to_string()])
        );
    }
}
