//! End-of-day freeze: archive the canonical decision so closed-hours reads
//! serve an immutable copy, and gate human-initiated overwrites by market
//! phase.

use chakra_core::{ChakraError, MarketPhase};
use chrono::{DateTime, Utc};
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::DecisionStore;

const SNAPSHOTS_DIR: &str = "snapshots";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeManifest {
    pub created_at_utc: String,
    pub archive_date_et: String,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct FreezeOutcome {
    pub snapshot_dir: PathBuf,
    pub frozen_path: PathBuf,
    pub manifest: FreezeManifest,
}

/// Refuse canonical-decision overwrites while the market is not open, unless
/// forced. A forced write is logged for the audit trail.
pub fn enforce_market_open(phase: MarketPhase, force: bool) -> Result<(), ChakraError> {
    if phase.is_open() {
        return Ok(());
    }
    if force {
        tracing::warn!(
            "[FREEZE] Overwrite forced while market phase is {}",
            phase.as_str()
        );
        return Ok(());
    }
    Err(ChakraError::FreezeViolation(format!(
        "Market is {}. Refusing to overwrite canonical decision; use force to override.",
        phase.as_str()
    )))
}

/// Snapshot `decision_latest.json` into `decision_frozen.json` and a per-day
/// archive directory with a checksum manifest. After this, the active-path
/// rule serves the frozen copy for every non-OPEN read.
pub fn run_freeze_snapshot(
    store: &DecisionStore,
    now_utc: DateTime<Utc>,
) -> Result<FreezeOutcome, ChakraError> {
    let latest = store.latest_path();
    if !latest.exists() {
        return Err(ChakraError::Store(
            "no decision_latest.json to freeze; run an evaluation first".into(),
        ));
    }

    let frozen = store.frozen_path();
    fs::copy(&latest, &frozen)
        .map_err(|e| ChakraError::Store(format!("failed to write frozen copy: {e}")))?;

    let date_et = now_utc.with_timezone(&Eastern).date_naive();
    let snapshot_dir = store
        .out_dir()
        .join(SNAPSHOTS_DIR)
        .join(format!("{date_et}_eod"));
    fs::create_dir_all(&snapshot_dir)
        .map_err(|e| ChakraError::Store(format!("failed to create archive dir: {e}")))?;

    let archived = snapshot_dir.join("decision_latest.json");
    fs::copy(&latest, &archived)
        .map_err(|e| ChakraError::Store(format!("failed to archive decision: {e}")))?;

    let manifest = FreezeManifest {
        created_at_utc: now_utc.to_rfc3339(),
        archive_date_et: date_et.to_string(),
        files: vec![manifest_entry(&archived)?],
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| ChakraError::Store(format!("manifest serialization failed: {e}")))?;
    fs::write(snapshot_dir.join(MANIFEST_FILE), manifest_json)
        .map_err(|e| ChakraError::Store(format!("failed to write manifest: {e}")))?;

    tracing::info!(
        "[FREEZE] Archived decision to {} (frozen copy in effect)",
        snapshot_dir.display()
    );

    Ok(FreezeOutcome {
        snapshot_dir,
        frozen_path: frozen,
        manifest,
    })
}

/// Newest `<date>_eod` archive and its manifest, if any exist.
pub fn latest_eod_snapshot(
    store: &DecisionStore,
) -> Result<Option<(PathBuf, FreezeManifest)>, ChakraError> {
    let base = store.out_dir().join(SNAPSHOTS_DIR);
    if !base.exists() {
        return Ok(None);
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(&base)
        .map_err(|e| ChakraError::Store(format!("failed to list archives: {e}")))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with("_eod"))
                    .unwrap_or(false)
        })
        .collect();
    dirs.sort();

    let Some(newest) = dirs.pop() else {
        return Ok(None);
    };
    let manifest_path = newest.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&manifest_path)
        .map_err(|e| ChakraError::Store(format!("failed to read manifest: {e}")))?;
    let manifest: FreezeManifest = serde_json::from_str(&raw)
        .map_err(|e| ChakraError::Store(format!("failed to parse manifest: {e}")))?;
    Ok(Some((newest, manifest)))
}

fn manifest_entry(path: &Path) -> Result<ManifestEntry, ChakraError> {
    let bytes =
        fs::read(path).map_err(|e| ChakraError::Store(format!("failed to read {path:?}: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(ManifestEntry {
        name: path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string(),
        size_bytes: bytes.len() as u64,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakra_core::artifact::{ArtifactMetadata, DecisionArtifactV2};
    use chakra_core::{RunMode, ARTIFACT_VERSION};
    use std::collections::HashMap;

    fn artifact(run_id: &str) -> DecisionArtifactV2 {
        DecisionArtifactV2 {
            metadata: ArtifactMetadata {
                artifact_version: ARTIFACT_VERSION.to_string(),
                mode: RunMode::Mock,
                pipeline_timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.to_string(),
                market_phase: MarketPhase::Open,
                universe_size: 0,
                evaluated_count_stage1: 0,
                evaluated_count_stage2: 0,
                eligible_count: 0,
                config_frozen: None,
                freeze_violation_changed_keys: None,
                warnings: vec![],
            },
            symbols: vec![],
            selected_candidates: vec![],
            candidates_by_symbol: HashMap::new(),
            gates_by_symbol: HashMap::new(),
            earnings_by_symbol: HashMap::new(),
            diagnostics_by_symbol: HashMap::new(),
            warnings: vec![],
        }
    }

    #[test]
    fn closed_market_without_force_is_violation() {
        let err = enforce_market_open(MarketPhase::Closed, false).unwrap_err();
        assert!(matches!(err, ChakraError::FreezeViolation(_)));
        assert!(err.is_conflict());
    }

    #[test]
    fn force_bypasses_gate() {
        assert!(enforce_market_open(MarketPhase::Closed, true).is_ok());
        assert!(enforce_market_open(MarketPhase::Open, false).is_ok());
    }

    #[test]
    fn freeze_writes_frozen_copy_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1")).unwrap();

        let outcome = run_freeze_snapshot(&store, Utc::now()).unwrap();
        assert!(outcome.frozen_path.exists());
        assert!(outcome.snapshot_dir.join("decision_latest.json").exists());
        assert!(outcome.snapshot_dir.join("manifest.json").exists());
        assert_eq!(outcome.manifest.files.len(), 1);
        assert_eq!(outcome.manifest.files[0].sha256.len(), 64);

        // After the freeze, closed-hours reads serve the frozen copy
        assert_eq!(store.active_path(MarketPhase::Closed), store.frozen_path());
    }

    #[test]
    fn freeze_without_latest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        let err = run_freeze_snapshot(&store, Utc::now()).unwrap_err();
        assert!(matches!(err, ChakraError::Store(_)));
    }

    #[test]
    fn latest_eod_snapshot_finds_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::new(dir.path()).unwrap();
        store.set_latest(&artifact("run-1")).unwrap();

        assert!(latest_eod_snapshot(&store).unwrap().is_none());
        run_freeze_snapshot(&store, Utc::now()).unwrap();

        let (path, manifest) = latest_eod_snapshot(&store).unwrap().unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_eod"));
        assert!(!manifest.files.is_empty());
    }
}
