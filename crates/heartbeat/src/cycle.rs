//! One heartbeat cycle: regime freshness, universe/snapshot intersection,
//! per-symbol CSP evaluation, persistence, state-change detection, alerts.

use chakra_core::{
    normalize_symbol, AlertLevel, ChakraError, CoreConfig, HeartbeatStatus, OptionsChainProvider,
    Regime, RegimeResult,
};
use chrono::{DateTime, Utc};
use eval_engine::contracts::{select_contract, ContractFilters, ContractSelection};
use eval_engine::gates::{run_hard_gates, GateConfig, GateInputs};
use eval_engine::scoring::{compute_score, ScoringConfig, UniversePriority};
use market_store::{CspEvaluation, MarketStore, BENCHMARKS};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::health::CycleStats;

/// Regime return thresholds: >= +0.15% BULL, <= -0.15% BEAR, else NEUTRAL.
const REGIME_BULL_THRESHOLD: f64 = 0.0015;
const REGIME_BEAR_THRESHOLD: f64 = -0.0015;

/// Benchmark priority when both snapshots must carry the symbol.
const BENCHMARK_PRIORITY: [&str; 3] = ["SPX", "SPY", "QQQ"];

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: HeartbeatStatus,
    pub candidates_count: usize,
    pub alerts_count: usize,
    pub skip_reason: Option<String>,
    pub data_timestamp: Option<DateTime<Utc>>,
    pub stats: CycleStats,
}

impl CycleOutcome {
    fn skipped(status: HeartbeatStatus, reason: &str, stats: CycleStats) -> Self {
        Self {
            status,
            candidates_count: 0,
            alerts_count: 0,
            skip_reason: Some(reason.to_string()),
            data_timestamp: None,
            stats,
        }
    }
}

/// Worker-local cycle state. Previous-cycle comparisons are private to the
/// worker and reset on process restart (a removal right after restart may
/// therefore alert again).
pub struct CycleRunner {
    store: MarketStore,
    provider: Option<Arc<dyn OptionsChainProvider>>,
    config: CoreConfig,
    previous_candidates: Option<HashSet<String>>,
    previous_regime: Option<Regime>,
    pub(crate) last_removal_alert: Option<DateTime<Utc>>,
    benchmark_warning_emitted: bool,
}

impl CycleRunner {
    pub fn new(
        store: MarketStore,
        provider: Option<Arc<dyn OptionsChainProvider>>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            previous_candidates: None,
            previous_regime: None,
            last_removal_alert: None,
            benchmark_warning_emitted: false,
        }
    }

    /// Run one full cycle. Errors are folded into the outcome; the loop
    /// never unwinds.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match self.evaluate_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("[HEARTBEAT] Error in evaluation cycle: {e}");
                CycleOutcome {
                    status: HeartbeatStatus::Error,
                    candidates_count: 0,
                    alerts_count: 0,
                    skip_reason: Some(e.to_string()),
                    data_timestamp: None,
                    stats: CycleStats::default(),
                }
            }
        }
    }

    async fn evaluate_cycle(&mut self) -> Result<CycleOutcome, ChakraError> {
        // Step 1: regime freshness
        let regime = match self.fresh_regime().await? {
            Ok(regime) => regime,
            Err(outcome) => return Ok(outcome),
        };

        // Step 2: enabled universe + benchmark presence warning (once)
        let mut enabled = self.store.enabled_symbols().await?;
        if enabled.is_empty() && self.config.dev_mode {
            // Dev fixture universe for this cycle only; the table is not
            // touched.
            let path = std::path::Path::new(&self.config.default_universe_path);
            match market_store::universe::load_default_universe(path) {
                Ok(fixture) if !fixture.is_empty() => {
                    tracing::info!(
                        "[HEARTBEAT] DEV: enabled universe empty, using fixture universe ({} symbols)",
                        fixture.len()
                    );
                    enabled = fixture;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[HEARTBEAT] DEV: failed to load fixture universe: {e}");
                }
            }
        }
        let universe_size = enabled.len();
        if !self.benchmark_warning_emitted
            && !BENCHMARKS.iter().any(|b| enabled.iter().any(|s| s == b))
        {
            tracing::warn!("[HEARTBEAT] Benchmarks missing from enabled universe: SPY, QQQ");
            self.benchmark_warning_emitted = true;
        }
        if enabled.is_empty() {
            tracing::warn!("[HEARTBEAT] No enabled symbols, skipping cycle");
            return Ok(CycleOutcome::skipped(
                HeartbeatStatus::NoData,
                "No enabled symbols",
                CycleStats::skipped("No enabled symbols", 0),
            ));
        }

        let posture = regime.risk_posture();
        if posture != Regime::RiskOn {
            // Candidate discovery requires a risk-on posture; the cycle
            // still succeeded.
            let reason = format!("Regime is {} (not RISK_ON)", regime.as_str());
            tracing::info!("[HEARTBEAT] {reason}, no candidates this cycle");
            let mut stats = CycleStats::skipped(&reason, universe_size);
            stats.symbols_evaluated = universe_size;
            let alerts = self
                .detect_state_changes(&HashSet::new(), regime)
                .await
                .unwrap_or(0);
            self.previous_candidates = Some(HashSet::new());
            self.previous_regime = Some(regime);
            return Ok(CycleOutcome {
                status: HeartbeatStatus::Success,
                candidates_count: 0,
                alerts_count: alerts,
                skip_reason: Some(reason),
                data_timestamp: None,
                stats,
            });
        }

        // Step 3: snapshot and intersection
        let Some(snapshot) = self.store.active_snapshot().await? else {
            tracing::warn!("[HEARTBEAT] No active snapshot available, skipping cycle");
            return Ok(CycleOutcome::skipped(
                HeartbeatStatus::NoSnapshot,
                "No snapshot available",
                CycleStats::skipped("No snapshot available", universe_size),
            ));
        };
        let prices = self.store.snapshot_prices(&snapshot.snapshot_id).await?;
        let snapshot_symbols: HashSet<String> = prices.keys().cloned().collect();
        let enabled_set: HashSet<String> =
            enabled.iter().map(|s| normalize_symbol(s)).collect();
        let mut to_evaluate: Vec<String> = enabled_set
            .intersection(&snapshot_symbols)
            .cloned()
            .collect();
        to_evaluate.sort();
        let missing_count = enabled_set.difference(&snapshot_symbols).count();

        tracing::info!(
            "[HEARTBEAT] universe={} snapshot={} intersection={} missing={}",
            enabled_set.len(),
            snapshot_symbols.len(),
            to_evaluate.len(),
            missing_count
        );

        if to_evaluate.is_empty() {
            tracing::warn!("[HEARTBEAT] No symbols to evaluate (empty intersection)");
            let mut stats = CycleStats::skipped("Symbol missing from snapshot", universe_size);
            stats.rejected_symbols_count = missing_count;
            stats.market_data_age_minutes = snapshot.data_age_minutes;
            return Ok(CycleOutcome::skipped(
                HeartbeatStatus::NoData,
                "Empty universe/snapshot intersection",
                stats,
            ));
        }

        // Step 4: per-symbol evaluation (stage 1, optional stage 2)
        let gate_config = GateConfig::from(&self.config);
        let scoring_config = ScoringConfig::from(&self.config);
        let mut evaluations: Vec<CspEvaluation> = Vec::with_capacity(to_evaluate.len());

        for symbol in &to_evaluate {
            let slice = prices.get(symbol);
            let price = slice.and_then(|s| s.price);
            let volume = slice.and_then(|s| s.volume);
            let iv_rank = slice.and_then(|s| s.iv_rank);

            let outcome = run_hard_gates(
                &GateInputs {
                    has_data: slice.is_some(),
                    price,
                    volume,
                    iv_rank,
                    regime: posture,
                },
                &gate_config,
            );

            let features = serde_json::json!({
                "price": price,
                "volume": volume,
                "iv_rank": iv_rank,
                "snapshot_age_minutes": snapshot.data_age_minutes,
            });
            let regime_context = serde_json::json!({ "regime": posture.as_str() });

            if !outcome.passed {
                evaluations.push(CspEvaluation {
                    symbol: symbol.clone(),
                    eligible: false,
                    score: 0,
                    rejection_reasons: outcome.rejection_reasons,
                    features,
                    regime_context,
                });
                continue;
            }

            let breakdown = compute_score(
                price.unwrap_or(0.0),
                volume,
                iv_rank,
                posture,
                snapshot.data_age_minutes,
                UniversePriority::default(),
                &scoring_config,
            );
            let mut features = features;
            features["score_components"] =
                serde_json::to_value(&breakdown).unwrap_or_default();

            evaluations.push(CspEvaluation {
                symbol: symbol.clone(),
                eligible: true,
                score: breakdown.final_score,
                rejection_reasons: vec![],
                features,
                regime_context,
            });
        }

        // Options-layer contract selection for stock-eligible symbols
        if let Some(provider) = self.provider.clone() {
            let filters = ContractFilters::from(&self.config);
            let as_of = snapshot.snapshot_timestamp_et.date_naive();
            for eval in evaluations.iter_mut().filter(|e| e.eligible) {
                let timeout = Duration::from_secs(self.config.chain_timeout_seconds);
                let fetched =
                    tokio::time::timeout(timeout, provider.fetch_chain(&eval.symbol)).await;
                match fetched {
                    Err(_) => {
                        eval.eligible = false;
                        eval.rejection_reasons.push("TIMEOUT".to_string());
                    }
                    Ok(Err(e)) => {
                        eval.eligible = false;
                        eval.rejection_reasons.push(format!("chain_unavailable: {e}"));
                    }
                    Ok(Ok(chain)) => match select_contract(&eval.symbol, &chain, as_of, &filters)
                    {
                        ContractSelection::Selected { best, .. } => {
                            eval.features["chosen_contract"] =
                                serde_json::to_value(&best).unwrap_or_default();
                        }
                        ContractSelection::NoContract { reasons, .. } => {
                            eval.eligible = false;
                            eval.rejection_reasons.extend(reasons);
                        }
                    },
                }
            }
        }

        // Step 5: persist evaluations and log totals
        self.store
            .upsert_evaluations(&snapshot.snapshot_id, &evaluations)
            .await?;
        let eligible: HashSet<String> = evaluations
            .iter()
            .filter(|e| e.eligible)
            .map(|e| e.symbol.clone())
            .collect();
        let rejected_count = evaluations.len() - eligible.len();

        let mut rejection_reasons: HashMap<String, usize> = HashMap::new();
        for eval in evaluations.iter().filter(|e| !e.eligible) {
            for reason in &eval.rejection_reasons {
                *rejection_reasons.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        let mut top: Vec<(&String, &usize)> = rejection_reasons.iter().collect();
        top.sort_by(|a, b| b.1.cmp(a.1));
        tracing::info!(
            "[HEARTBEAT] wrote csp_evaluations snapshot_id={} total={} eligible={} rejected={} top_reasons={:?}",
            snapshot.snapshot_id,
            evaluations.len(),
            eligible.len(),
            rejected_count,
            &top[..top.len().min(3)]
        );

        // Steps 6-7: deltas vs previous cycle, deduplicated alerts
        let alerts_count = self.detect_state_changes(&eligible, regime).await?;

        // Step 8: publish worker-local previous state
        self.previous_candidates = Some(eligible.clone());
        self.previous_regime = Some(regime);

        let data_timestamp = Some(
            snapshot
                .snapshot_timestamp_et
                .with_timezone(&Utc),
        );

        Ok(CycleOutcome {
            status: HeartbeatStatus::Success,
            candidates_count: eligible.len(),
            alerts_count,
            skip_reason: None,
            data_timestamp,
            stats: CycleStats {
                symbols_evaluated: to_evaluate.len(),
                candidates_count: eligible.len(),
                rejected_symbols_count: missing_count + rejected_count,
                rejection_reasons,
                market_data_age_minutes: snapshot.data_age_minutes,
                enabled_universe_size: universe_size,
            },
        })
    }

    /// Latest regime if fresh; otherwise recompute. Returns the directional
    /// regime or a skip outcome.
    async fn fresh_regime(&mut self) -> Result<Result<Regime, CycleOutcome>, ChakraError> {
        let latest = self.store.latest_regime().await?;
        let (mut regime, age_minutes) = match latest {
            Some(result) => {
                let age = (Utc::now() - result.computed_at).num_seconds() as f64 / 60.0;
                (Some(result.regime), age)
            }
            None => (None, 0.0),
        };

        if regime.is_none() {
            tracing::info!("[HEARTBEAT] No regime data available, computing...");
            let recomputed = self.recompute_regime().await?;
            if recomputed.regime == Regime::Unknown {
                tracing::warn!("[HEARTBEAT] Failed to compute regime, skipping cycle");
                return Ok(Err(CycleOutcome::skipped(
                    HeartbeatStatus::NoRegime,
                    "No regime data",
                    CycleStats::skipped("No regime data", 0),
                )));
            }
            regime = Some(recomputed.regime);
        } else if age_minutes > self.config.regime_stale_threshold_minutes {
            tracing::warn!("[HEARTBEAT] Regime is stale ({age_minutes:.1} min old), recomputing");
            let recomputed = self.recompute_regime().await?;
            if recomputed.regime == Regime::Unknown {
                return Ok(Err(CycleOutcome::skipped(
                    HeartbeatStatus::RegimeStale,
                    "Regime recomputation failed",
                    CycleStats::skipped("Regime recomputation failed", 0),
                )));
            }
            regime = Some(recomputed.regime);
        }

        Ok(Ok(regime.unwrap_or(Regime::Unknown)))
    }

    /// Price-only regime recompute over the two most recent snapshots.
    ///
    /// Bootstrap rule: with a single snapshot the prior price is taken equal
    /// to the current price, so the return is 0 and the regime resolves to
    /// NEUTRAL instead of failing. Known results are persisted; UNKNOWN is
    /// returned without an upsert.
    pub async fn recompute_regime(&self) -> Result<RegimeResult, ChakraError> {
        let unknown = |reason: &str| RegimeResult {
            snapshot_id: String::new(),
            regime: Regime::Unknown,
            benchmark_symbol: None,
            benchmark_return: None,
            confidence: 0,
            method: format!("unknown: {reason}"),
            computed_at: Utc::now(),
        };

        let Some(latest_id) = self.store.latest_snapshot_id().await? else {
            tracing::warn!("[HEARTBEAT] No snapshot available for regime computation");
            return Ok(unknown("no latest snapshot"));
        };
        let previous_id = self.store.previous_snapshot_id(&latest_id).await?;
        let latest_prices = self.store.snapshot_prices(&latest_id).await?;

        let bootstrap = previous_id.is_none();
        let (benchmark_symbol, p1, p2) = if bootstrap {
            tracing::info!(
                "[HEARTBEAT] No previous snapshot - bootstrap regime (baseline return = 0)"
            );
            let found = BENCHMARKS.iter().find_map(|candidate| {
                let symbol = normalize_symbol(candidate);
                latest_prices
                    .get(&symbol)
                    .and_then(|s| s.price)
                    .filter(|p| *p > 0.0)
                    .map(|p| (symbol, p))
            });
            match found {
                Some((symbol, price)) => (symbol, price, price),
                None => {
                    tracing::warn!("[HEARTBEAT] No benchmark in latest snapshot for bootstrap");
                    return Ok(unknown("benchmark missing in bootstrap"));
                }
            }
        } else {
            let previous_prices = self
                .store
                .snapshot_prices(previous_id.as_deref().unwrap_or_default())
                .await?;
            let found = BENCHMARK_PRIORITY.iter().find_map(|candidate| {
                let symbol = normalize_symbol(candidate);
                let p2 = latest_prices.get(&symbol).and_then(|s| s.price)?;
                let p1 = previous_prices.get(&symbol).and_then(|s| s.price)?;
                (p1 > 0.0).then_some((symbol, p1, p2))
            });
            match found {
                Some(triple) => triple,
                None => {
                    tracing::warn!("[HEARTBEAT] No benchmark with data in both snapshots");
                    return Ok(unknown("benchmark missing"));
                }
            }
        };

        let benchmark_return = (p2 - p1) / p1;
        let regime = if benchmark_return >= REGIME_BULL_THRESHOLD {
            Regime::Bull
        } else if benchmark_return <= REGIME_BEAR_THRESHOLD {
            Regime::Bear
        } else {
            Regime::Neutral
        };

        let method = if bootstrap {
            "snapshot_price_only_bootstrap"
        } else {
            "snapshot_price_only"
        };
        tracing::info!(
            "[HEARTBEAT] Regime ({method}): benchmark={benchmark_symbol}, p1={p1:.2}, p2={p2:.2}, return={benchmark_return:.4}, regime={}",
            regime.as_str()
        );

        let result = RegimeResult {
            snapshot_id: latest_id,
            regime,
            benchmark_symbol: Some(benchmark_symbol),
            benchmark_return: Some(benchmark_return),
            confidence: 100,
            method: method.to_string(),
            computed_at: Utc::now(),
        };
        self.store.upsert_regime(&result).await?;
        Ok(result)
    }

    /// Emit alerts only on changes, with rate limits:
    /// - first cycle: nothing (no prior state)
    /// - new candidate: one INFO per symbol
    /// - removed candidates: one aggregated INFO, cooldown-limited
    /// - regime change: one WATCH per flip
    async fn detect_state_changes(
        &mut self,
        current: &HashSet<String>,
        regime: Regime,
    ) -> Result<usize, ChakraError> {
        let Some(previous) = &self.previous_candidates else {
            tracing::debug!("[HEARTBEAT] First cycle - skipping state change alerts");
            return Ok(0);
        };
        let mut alerts = 0usize;

        let mut new_symbols: Vec<&String> = current.difference(previous).collect();
        new_symbols.sort();
        for symbol in new_symbols {
            self.store
                .create_alert(&format!("New CSP opportunity: {symbol}"), AlertLevel::Info)
                .await?;
            alerts += 1;
        }

        let mut removed: Vec<String> = previous.difference(current).cloned().collect();
        removed.sort();
        if !removed.is_empty() {
            let now = Utc::now();
            let cooldown_hours = self.config.candidate_removal_alert_cooldown_hours;
            let should_alert = match self.last_removal_alert {
                None => true,
                Some(last) => {
                    (now - last).num_seconds() as f64 / 3600.0 >= cooldown_hours
                }
            };
            if should_alert {
                self.store
                    .create_alert(
                        &format!("CSP opportunities removed: {}", removed.join(", ")),
                        AlertLevel::Info,
                    )
                    .await?;
                self.last_removal_alert = Some(now);
                alerts += 1;
            }
        }

        if let Some(previous_regime) = self.previous_regime {
            if previous_regime != regime {
                self.store
                    .create_alert(
                        &format!(
                            "Market regime changed: {} -> {}",
                            previous_regime.as_str(),
                            regime.as_str()
                        ),
                        AlertLevel::Watch,
                    )
                    .await?;
                alerts += 1;
            }
        }

        Ok(alerts)
    }
}
