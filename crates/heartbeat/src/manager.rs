//! Singleton background worker. One long-lived tokio task per process,
//! cooperatively cancellable: the worker finishes its current cycle before
//! observing a stop request, so cancellation latency is bounded by one
//! cycle plus the sleep interval.

use chakra_core::{
    get_market_phase, CoreConfig, HeartbeatStatus, MarketPhase, OptionsChainProvider,
};
use chrono::Utc;
use market_store::MarketStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cycle::{CycleOutcome, CycleRunner};
use crate::health::{CycleStats, HeartbeatHealth};

/// Process-level guard: at most one live worker per process, regardless of
/// how many manager handles exist.
static PROCESS_WORKER: AtomicBool = AtomicBool::new(false);

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a synchronous `run_once` request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOnceResult {
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

struct Shared {
    health: Mutex<HeartbeatHealth>,
    stats: Mutex<CycleStats>,
    runner: tokio::sync::Mutex<CycleRunner>,
    running: AtomicBool,
    config: CoreConfig,
}

#[derive(Clone)]
pub struct HeartbeatManager {
    shared: Arc<Shared>,
    control: Arc<Mutex<Control>>,
}

#[derive(Default)]
struct Control {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatManager {
    pub fn new(
        store: MarketStore,
        provider: Option<Arc<dyn OptionsChainProvider>>,
        config: CoreConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                health: Mutex::new(HeartbeatHealth::default()),
                stats: Mutex::new(CycleStats::default()),
                runner: tokio::sync::Mutex::new(CycleRunner::new(
                    store,
                    provider,
                    config.clone(),
                )),
                running: AtomicBool::new(false),
                config,
            }),
            control: Arc::new(Mutex::new(Control::default())),
        }
    }

    /// Start the background worker. Idempotent: a second call while the
    /// worker is alive is a no-op, and the process-level guard refuses a
    /// second worker even from another manager handle.
    pub fn start(&self) {
        let mut control = match self.control.lock() {
            Ok(control) => control,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = &control.handle {
            if !handle.is_finished() {
                tracing::debug!("[HEARTBEAT] Worker already alive, skipping start");
                return;
            }
        }
        if PROCESS_WORKER
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("[HEARTBEAT] Another worker is already running in this process");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::SeqCst);

        let interval = Duration::from_secs(shared.config.heartbeat_interval_seconds);
        let handle = tokio::spawn(run_loop(shared, stop_rx, interval));

        control.stop_tx = Some(stop_tx);
        control.handle = Some(handle);
        tracing::info!(
            "[HEARTBEAT] Started background evaluation worker (interval={}s)",
            self.shared.config.heartbeat_interval_seconds
        );
    }

    /// Signal the worker and wait for it with a bounded timeout. Idempotent.
    pub async fn stop(&self) {
        let (stop_tx, handle) = {
            let mut control = match self.control.lock() {
                Ok(control) => control,
                Err(poisoned) => poisoned.into_inner(),
            };
            (control.stop_tx.take(), control.handle.take())
        };

        let Some(stop_tx) = stop_tx else {
            return;
        };
        let _ = stop_tx.send(true);

        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(
                    "[HEARTBEAT] Worker did not stop within {STOP_JOIN_TIMEOUT:?}, proceeding"
                );
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        PROCESS_WORKER.store(false, Ordering::SeqCst);
        tracing::info!("[HEARTBEAT] Stopped background evaluation worker");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Current health, copied out from behind the lock.
    pub fn health(&self) -> HeartbeatHealth {
        let mut health = self
            .shared
            .health
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default();
        health.is_running = self.is_running();
        health
    }

    /// Last-cycle evaluation details, copied out from behind the lock.
    pub fn cycle_stats(&self) -> CycleStats {
        self.shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Run one cycle synchronously. Refuses while the market is closed
    /// unless forced, mirroring the canonical-decision overwrite gate.
    pub async fn run_once(&self, force: bool) -> RunOnceResult {
        let phase = get_market_phase(None);
        if phase != MarketPhase::Open && !force {
            return RunOnceResult {
                started: false,
                reason: Some(format!(
                    "Market is {}; scheduler tick refused without force",
                    phase.as_str()
                )),
            };
        }

        let outcome = {
            let mut runner = self.shared.runner.lock().await;
            runner.run_cycle().await
        };
        publish_outcome(&self.shared, &outcome);
        RunOnceResult {
            started: true,
            reason: outcome.skip_reason,
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>, interval: Duration) {
    tracing::info!("[HEARTBEAT] Background evaluation loop started");

    loop {
        let cycle_start = Instant::now();
        tracing::info!("[HEARTBEAT] cycle start");

        let outcome = {
            let mut runner = shared.runner.lock().await;
            runner.run_cycle().await
        };
        tracing::info!(
            "[HEARTBEAT] candidates={} alerts={}",
            outcome.candidates_count,
            outcome.alerts_count
        );
        publish_outcome(&shared, &outcome);

        // Sleep for the remainder of the interval, observing cancellation.
        let elapsed = cycle_start.elapsed();
        let sleep_for = interval.saturating_sub(elapsed);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
        if *stop_rx.borrow() {
            break;
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    tracing::info!("[HEARTBEAT] Background evaluation loop stopped");
}

fn publish_outcome(shared: &Shared, outcome: &CycleOutcome) {
    if let Ok(mut health) = shared.health.lock() {
        health.last_cycle_time = Some(Utc::now());
        health.status = outcome.status;
        if let Some(ts) = outcome.data_timestamp {
            health.data_timestamp = Some(ts);
        }
        health.last_error = match outcome.status {
            HeartbeatStatus::Error => outcome.skip_reason.clone(),
            _ => None,
        };
    }
    if let Ok(mut stats) = shared.stats.lock() {
        *stats = outcome.stats.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakra_core::{BuildMode, Regime, RegimeResult};
    use market_store::BuildOptions;
    use std::io::Write;

    async fn seeded_manager() -> HeartbeatManager {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"symbol,price,volume,iv_rank\nSPY,450,5000000,40\n")
            .unwrap();
        store
            .build_snapshot(
                BuildMode::Csv,
                &BuildOptions {
                    csv_path: file.path().to_path_buf(),
                    dev_mode: false,
                },
            )
            .await
            .unwrap();
        store
            .upsert_regime(&RegimeResult {
                snapshot_id: store.latest_snapshot_id().await.unwrap().unwrap(),
                regime: Regime::Bull,
                benchmark_symbol: Some("SPY".to_string()),
                benchmark_return: Some(0.01),
                confidence: 100,
                method: "snapshot_price_only".to_string(),
                computed_at: Utc::now(),
            })
            .await
            .unwrap();
        HeartbeatManager::new(store, None, CoreConfig::default())
    }

    #[tokio::test]
    async fn run_once_forced_executes_cycle_and_publishes_health() {
        let manager = seeded_manager().await;
        let result = manager.run_once(true).await;
        assert!(result.started);

        let health = manager.health();
        assert_eq!(health.status, HeartbeatStatus::Success);
        assert!(health.last_cycle_time.is_some());
        assert!(!health.is_running);

        let stats = manager.cycle_stats();
        // QQQ benchmark row carries no data, so only SPY intersects
        assert_eq!(stats.symbols_evaluated, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let manager = seeded_manager().await;
        manager.start();
        assert!(manager.is_running());
        // Second start is a no-op
        manager.start();

        manager.stop().await;
        assert!(!manager.is_running());
        // Second stop is a no-op
        manager.stop().await;

        // A new worker can start after a clean stop
        manager.start();
        assert!(manager.is_running());
        manager.stop().await;
    }

    #[tokio::test]
    async fn health_defaults_before_first_cycle() {
        let store = MarketStore::connect("sqlite::memory:").await.unwrap();
        let manager = HeartbeatManager::new(store, None, CoreConfig::default());
        let health = manager.health();
        assert_eq!(health.status, HeartbeatStatus::Unknown);
        assert!(health.last_cycle_time.is_none());
        assert!(!health.is_running);
    }
}
