//! On-disk decision artifact store.
//!
//! Layout under the configured output directory:
//! - `decision_latest.json`: canonical latest artifact
//! - `decision_frozen.json`: present only after an EOD freeze
//! - `history/decision_<run_id>.json`: one per evaluation run, never
//!   rewritten
//!
//! `decision_latest.json` replacement is atomic: write temp, fsync, rename.

use chakra_core::artifact::{
    CandidateRow, DecisionArtifactV2, EarningsInfo, GateEvaluation, SymbolDiagnostics,
    SymbolEvalSummary,
};
use chakra_core::{normalize_symbol, ChakraError, MarketPhase};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LATEST_FILE: &str = "decision_latest.json";
const FROZEN_FILE: &str = "decision_frozen.json";
const HISTORY_DIR: &str = "history";

/// Convenience slice of the latest artifact for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolSlice {
    pub summary: SymbolEvalSummary,
    pub candidates: Vec<CandidateRow>,
    pub gates: Vec<GateEvaluation>,
    pub earnings: Option<EarningsInfo>,
    pub diagnostics: Option<SymbolDiagnostics>,
}

pub struct DecisionStore {
    out_dir: PathBuf,
    cache: Mutex<Option<DecisionArtifactV2>>,
}

impl DecisionStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, ChakraError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(out_dir.join(HISTORY_DIR))
            .map_err(|e| ChakraError::Store(format!("failed to create output dir: {e}")))?;
        Ok(Self {
            out_dir,
            cache: Mutex::new(None),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.out_dir.join(LATEST_FILE)
    }

    pub fn frozen_path(&self) -> PathBuf {
        self.out_dir.join(FROZEN_FILE)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.out_dir.join(HISTORY_DIR)
    }

    fn history_path(&self, run_id: &str) -> PathBuf {
        self.history_dir().join(format!("decision_{run_id}.json"))
    }

    /// Active-path rule: the frozen copy wins when it exists and the market
    /// phase is not OPEN; otherwise the canonical latest file.
    pub fn active_path(&self, phase: MarketPhase) -> PathBuf {
        let frozen = self.frozen_path();
        if !phase.is_open() && frozen.exists() {
            frozen
        } else {
            self.latest_path()
        }
    }

    /// Atomically replace the canonical artifact and append the per-run
    /// history copy. The rename is the commit point: on any earlier failure
    /// the previous artifact stays visible.
    pub fn set_latest(&self, artifact: &DecisionArtifactV2) -> Result<(), ChakraError> {
        let json = serde_json::to_string_pretty(artifact)
            .map_err(|e| ChakraError::Store(format!("artifact serialization failed: {e}")))?;

        let latest = self.latest_path();
        let tmp = self.out_dir.join(format!(".{LATEST_FILE}.tmp"));
        {
            let mut file = fs::File::create(&tmp)
                .map_err(|e| ChakraError::Store(format!("failed to create temp file: {e}")))?;
            file.write_all(json.as_bytes())
                .map_err(|e| ChakraError::Store(format!("failed to write temp file: {e}")))?;
            file.sync_all()
                .map_err(|e| ChakraError::Store(format!("fsync failed: {e}")))?;
        }
        fs::rename(&tmp, &latest)
            .map_err(|e| ChakraError::Store(format!("atomic rename failed: {e}")))?;

        // History files are append-only across runs and never rewritten.
        let history = self.history_path(artifact.run_id());
        if let Err(e) = fs::write(&history, &json) {
            tracing::warn!(
                "[STORE] history write failed for run {}: {e}",
                artifact.run_id()
            );
        }

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(artifact.clone());
        }

        tracing::info!(
            "[STORE] set_latest run_id={} symbols={}",
            artifact.run_id(),
            artifact.symbols.len()
        );
        Ok(())
    }

    /// The canonical latest artifact, from cache when warm.
    pub fn get_latest(&self) -> Result<Option<DecisionArtifactV2>, ChakraError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(artifact) = cache.as_ref() {
                return Ok(Some(artifact.clone()));
            }
        }
        self.read_artifact(&self.latest_path())
    }

    /// The artifact UI reads should see, honoring the active-path rule.
    pub fn get_active(
        &self,
        phase: MarketPhase,
    ) -> Result<Option<DecisionArtifactV2>, ChakraError> {
        self.read_artifact(&self.active_path(phase))
    }

    /// Exact-run lookup from history; present only when the symbol appears
    /// in that run's artifact.
    pub fn get_by_run(
        &self,
        symbol: &str,
        run_id: &str,
    ) -> Result<Option<DecisionArtifactV2>, ChakraError> {
        let normalized = normalize_symbol(symbol);
        let artifact = self.read_artifact(&self.history_path(run_id))?;
        Ok(artifact.filter(|a| a.symbol_row(&normalized).is_some()))
    }

    /// Per-symbol slice over the latest artifact.
    pub fn get_symbol(&self, symbol: &str) -> Result<Option<SymbolSlice>, ChakraError> {
        let normalized = normalize_symbol(symbol);
        let Some(artifact) = self.get_latest()? else {
            return Ok(None);
        };
        let Some(summary) = artifact.symbol_row(&normalized).cloned() else {
            return Ok(None);
        };
        Ok(Some(SymbolSlice {
            summary,
            candidates: artifact
                .candidates_by_symbol
                .get(&normalized)
                .cloned()
                .unwrap_or_default(),
            gates: artifact
                .gates_by_symbol
                .get(&normalized)
                .cloned()
                .unwrap_or_default(),
            earnings: artifact.earnings_by_symbol.get(&normalized).cloned(),
            diagnostics: artifact.diagnostics_by_symbol.get(&normalized).cloned(),
        }))
    }

    /// Re-parse the canonical file into the in-memory cache. The store is
    /// stateless across parses; callers may rely on the cache or re-read.
    pub fn reload_from_disk(&self) -> Result<(), ChakraError> {
        let artifact = self.read_artifact(&self.latest_path())?;
        if let Ok(mut cache) = self.cache.lock() {
            *cache = artifact;
        }
        Ok(())
    }

    fn read_artifact(&self, path: &Path) -> Result<Option<DecisionArtifactV2>, ChakraError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ChakraError::Store(format!("failed to read {path:?}: {e}")))?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ChakraError::Store(format!("failed to parse {path:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakra_core::artifact::ArtifactMetadata;
    use chakra_core::{RunMode, ARTIFACT_VERSION};
    use std::collections::HashMap;

    pub(crate) fn artifact(run_id: &str, symbols: &[&str]) -> DecisionArtifactV2 {
        DecisionArtifactV2 {
            metadata: ArtifactMetadata {
                artifact_version: ARTIFACT_VERSION.to_string(),
                mode: RunMode::Mock,
                pipeline_timestamp: "2025-06-10T15:30:00+00:00".to_string(),
                run_id: run_id.to_string(),
                market_phase: MarketPhase::Open,
                universe_size: symbols.len(),
                evaluated_count_stage1: symbols.len(),
                evaluated_count_stage2: 0,
                eligible_count: 0,
                config_frozen: None,
                freeze_violation_changed_keys: None,
                warnings: vec![],
            },
            symbols: symbols
                .iter()
                .map(|s| SymbolEvalSummary::not_evaluated(s))
                .collect(),
            selected_candidates: vec![],
            candidates_by_symbol: HashMap::new(),
            gates_by_symbol: HashMap::new(),
            earnings_by_symbol: HashMap::new(),
            diagnostics_by_symbol: HashMap::new(),
            warnings: vec![],
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        let a = artifact("run-1", &["SPY", "AAPL"]);
        store.set_latest(&a).unwrap();

        let loaded = store.get_latest().unwrap().unwrap();
        assert_eq!(loaded, a);
        // pipeline_timestamp is stable through the round trip
        assert_eq!(
            loaded.metadata.pipeline_timestamp,
            a.metadata.pipeline_timestamp
        );
    }

    #[test]
    fn history_file_written_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1", &["SPY"])).unwrap();
        store.set_latest(&artifact("run-2", &["SPY"])).unwrap();

        assert!(dir.path().join("history/decision_run-1.json").exists());
        assert!(dir.path().join("history/decision_run-2.json").exists());
        // Canonical reflects the most recent set_latest
        assert_eq!(store.get_latest().unwrap().unwrap().run_id(), "run-2");
    }

    #[test]
    fn by_run_requires_symbol_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1", &["SPY"])).unwrap();

        assert!(store.get_by_run("spy", "run-1").unwrap().is_some());
        assert!(store.get_by_run("TSLA", "run-1").unwrap().is_none());
        assert!(store.get_by_run("SPY", "run-missing").unwrap().is_none());
    }

    #[test]
    fn active_path_prefers_frozen_when_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1", &["SPY"])).unwrap();

        // No frozen file: always the latest
        assert_eq!(store.active_path(MarketPhase::Closed), store.latest_path());

        std::fs::copy(store.latest_path(), store.frozen_path()).unwrap();
        assert_eq!(store.active_path(MarketPhase::Closed), store.frozen_path());
        assert_eq!(store.active_path(MarketPhase::Post), store.frozen_path());
        // Open market always reads the canonical file
        assert_eq!(store.active_path(MarketPhase::Open), store.latest_path());
    }

    #[test]
    fn get_symbol_slices_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        let mut a = artifact("run-1", &["SPY"]);
        a.gates_by_symbol.insert(
            "SPY".to_string(),
            vec![GateEvaluation {
                name: "PRESENCE".to_string(),
                status: chakra_core::GateStatus::Pass,
                reason: None,
            }],
        );
        store.set_latest(&a).unwrap();

        let slice = store.get_symbol(" spy ").unwrap().unwrap();
        assert_eq!(slice.summary.symbol, "SPY");
        assert_eq!(slice.gates.len(), 1);
        assert!(store.get_symbol("MSFT").unwrap().is_none());
    }

    #[test]
    fn reload_from_disk_picks_up_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1", &["SPY"])).unwrap();

        // Another process replaces the canonical file
        let external = artifact("run-2", &["SPY", "QQQ"]);
        std::fs::write(
            store.latest_path(),
            serde_json::to_string(&external).unwrap(),
        )
        .unwrap();

        // Cache still serves run-1 until reload
        assert_eq!(store.get_latest().unwrap().unwrap().run_id(), "run-1");
        store.reload_from_disk().unwrap();
        assert_eq!(store.get_latest().unwrap().unwrap().run_id(), "run-2");
    }

    #[test]
    fn missing_files_return_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        assert!(store.get_latest().unwrap().is_none());
        assert!(store.get_active(MarketPhase::Closed).unwrap().is_none());
    }
}
