//! `/api/ui/*` routes: the decision, market, scheduler, snapshot, and alert
//! contracts the dashboard consumes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chakra_core::{get_market_phase, hours::next_open_close_et, is_market_open, BuildMode};
use chrono::Utc;
use decision_store::{latest_eod_snapshot, run_freeze_snapshot};
use market_store::BuildOptions;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use crate::{AppError, AppState};

pub fn ui_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ui/decision", get(decision))
        .route("/api/ui/decision/latest", get(decision_latest))
        .route("/api/ui/universe", get(universe))
        .route("/api/ui/market/status", get(market_status))
        .route("/api/ui/eval/run", post(eval_run))
        .route("/api/ui/eval/symbol/:symbol", post(eval_symbol))
        .route("/api/ui/scheduler/run_once", post(scheduler_run_once))
        .route("/api/ui/scheduler/health", get(scheduler_health))
        .route("/api/ui/snapshots/build", post(snapshots_build))
        .route("/api/ui/snapshots/freeze", post(snapshots_freeze))
        .route("/api/ui/snapshots/latest", get(snapshots_latest))
        .route("/api/ui/alerts", get(alerts))
        .route("/api/ui/alerts/:id/ack", post(ack_alert))
        .route("/api/ui/system-health", get(system_health))
}

#[derive(Deserialize)]
struct DecisionQuery {
    symbol: Option<String>,
    run_id: Option<String>,
}

/// Exact-run lookup when both symbol and run_id are given, else the latest.
async fn decision(
    State(state): State<AppState>,
    Query(query): Query<DecisionQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let (Some(symbol), Some(run_id)) = (&query.symbol, &query.run_id) {
        let artifact = state
            .decisions
            .get_by_run(symbol, run_id)?
            .ok_or_else(|| AppError::NotFound("exact run not found".to_string()))?;
        let meta = &artifact.metadata;
        return Ok(Json(json!({
            "artifact": artifact,
            "artifact_version": meta.artifact_version,
            "evaluation_timestamp_utc": meta.pipeline_timestamp,
            "run_id": meta.run_id,
            "exact_run": true,
        })));
    }
    latest_payload(&state)
}

async fn decision_latest(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    latest_payload(&state)
}

/// UI-facing reads honor the active-path rule: the frozen copy wins while
/// the market is not open.
fn latest_payload(state: &AppState) -> Result<Json<serde_json::Value>, AppError> {
    let phase = get_market_phase(None);
    let artifact = state
        .decisions
        .get_active(phase)?
        .ok_or_else(|| AppError::NotFound("no artifact; run evaluation".to_string()))?;
    let meta = &artifact.metadata;
    Ok(Json(json!({
        "artifact": artifact,
        "artifact_version": meta.artifact_version,
        "evaluation_timestamp_utc": meta.pipeline_timestamp,
        "run_id": meta.run_id,
        "market_phase": phase,
    })))
}

/// Universe view: one source of truth from the latest artifact.
async fn universe(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.decisions.reload_from_disk()?;
    match state.decisions.get_latest()? {
        Some(artifact) => Ok(Json(json!({
            "symbols": artifact.symbols,
            "timestamp": artifact.metadata.pipeline_timestamp,
            "universe_size": artifact.metadata.universe_size,
        }))),
        None => Ok(Json(json!({
            "symbols": [],
            "timestamp": Utc::now().to_rfc3339(),
            "universe_size": 0,
        }))),
    }
}

async fn market_status(State(_state): State<AppState>) -> Json<serde_json::Value> {
    let now_utc = Utc::now();
    let phase = get_market_phase(Some(now_utc));
    let (next_open_et, next_close_et) = next_open_close_et(now_utc);
    let now_et = now_utc.with_timezone(&chrono_tz::US::Eastern).to_rfc3339();
    Json(json!({
        "is_open": is_market_open(),
        "phase": phase,
        "now_utc": now_utc.to_rfc3339(),
        "now_et": now_et,
        "next_open_et": next_open_et,
        "next_close_et": next_close_et,
    }))
}

#[derive(Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

/// Trigger a full universe evaluation. 409 while the market is closed
/// unless forced.
async fn eval_run(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let symbols = state.store.enabled_symbols().await?;
    if symbols.is_empty() {
        return Ok(Json(json!({
            "status": "FAILED",
            "reason": "Universe is empty",
            "pipeline_timestamp": null,
            "counts": {},
        })));
    }

    let artifact = state
        .engine
        .evaluate_universe_guarded(&symbols, state.config.run_mode, query.force)
        .await?;
    let meta = &artifact.metadata;
    Ok(Json(json!({
        "status": "OK",
        "pipeline_timestamp": meta.pipeline_timestamp,
        "counts": {
            "universe_size": meta.universe_size,
            "evaluated_count_stage1": meta.evaluated_count_stage1,
            "evaluated_count_stage2": meta.evaluated_count_stage2,
            "eligible_count": meta.eligible_count,
        },
    })))
}

/// Recompute one symbol and merge into the current artifact.
async fn eval_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let artifact = state
        .engine
        .evaluate_single_guarded(&symbol, state.config.run_mode, query.force)
        .await?;
    Ok(Json(json!({
        "status": "OK",
        "run_id": artifact.metadata.run_id,
        "eligible_count": artifact.metadata.eligible_count,
    })))
}

/// One synchronous scheduler tick; refuses while the market is closed and
/// no force flag is given.
async fn scheduler_run_once(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> Json<serde_json::Value> {
    let result = state.heartbeat.run_once(query.force).await;
    Json(json!(result))
}

async fn scheduler_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.heartbeat.health()))
}

#[derive(Deserialize)]
struct BuildQuery {
    mode: Option<String>,
}

async fn snapshots_build(
    State(state): State<AppState>,
    Query(query): Query<BuildQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mode = BuildMode::parse(query.mode.as_deref().unwrap_or("AUTO"));
    let metadata = state
        .store
        .build_snapshot(
            mode,
            &BuildOptions {
                csv_path: PathBuf::from(&state.config.snapshot_csv_path),
                dev_mode: state.config.dev_mode,
            },
        )
        .await?;
    Ok(Json(json!({ "status": "OK", "snapshot": metadata })))
}

#[derive(Deserialize)]
struct FreezeQuery {
    #[serde(default)]
    skip_eval: bool,
    #[serde(default)]
    force_eval: bool,
}

/// EOD freeze. Market-aware: eval-then-archive only while the session is
/// open before 16:00 ET; otherwise archive-only. `skip_eval` and
/// `force_eval` are mutually exclusive.
async fn snapshots_freeze(
    State(state): State<AppState>,
    Query(query): Query<FreezeQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    if query.skip_eval && query.force_eval {
        return Err(AppError::BadRequest(
            "skip_eval and force_eval are mutually exclusive".to_string(),
        ));
    }

    let now_utc = Utc::now();
    let phase = get_market_phase(Some(now_utc));
    let market_open = phase.is_open();

    let mut ran_eval = false;
    let mut eval_result = None;
    let mut mode_used = "archive_only";

    if market_open && !query.skip_eval {
        let symbols = state.store.enabled_symbols().await?;
        if !symbols.is_empty() {
            match state
                .engine
                .evaluate_universe(&symbols, state.config.run_mode)
                .await
            {
                Ok(artifact) => {
                    ran_eval = true;
                    mode_used = "eval_then_archive";
                    eval_result = Some(json!({
                        "pipeline_timestamp": artifact.metadata.pipeline_timestamp,
                        "eligible_count": artifact.metadata.eligible_count,
                    }));
                    tracing::info!(
                        "[FREEZE] Ran evaluation as part of freeze: {} symbols",
                        symbols.len()
                    );
                }
                Err(e) if query.force_eval => {
                    return Err(AppError::Internal(format!("Force eval failed: {e}")));
                }
                Err(e) => {
                    tracing::warn!("[FREEZE] Eval failed, proceeding with archive_only: {e}");
                }
            }
        }
    }

    let outcome = run_freeze_snapshot(&state.decisions, now_utc)?;
    Ok(Json(json!({
        "status": "OK",
        "mode_used": mode_used,
        "snapshot_dir": outcome.snapshot_dir,
        "manifest": outcome.manifest,
        "ran_eval": ran_eval,
        "eval_result": eval_result,
    })))
}

async fn snapshots_latest(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    match latest_eod_snapshot(&state.decisions)? {
        Some((path, manifest)) => Ok(Json(json!({
            "snapshot_dir": path,
            "manifest": manifest,
        }))),
        None => Err(AppError::NotFound(
            "No EOD snapshots found. Run freeze first.".to_string(),
        )),
    }
}

#[derive(Deserialize)]
struct AlertsQuery {
    status: Option<String>,
}

async fn alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let alerts = state.store.list_alerts(query.status.as_deref()).await?;
    Ok(Json(json!({ "alerts": alerts })))
}

async fn ack_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.ack_alert(id).await?;
    Ok(Json(json!({ "status": "OK" })))
}

/// Store, scheduler, and freeze posture in one view.
async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let phase = get_market_phase(None);
    let active_path = state.decisions.active_path(phase);
    let latest = state.decisions.get_latest()?;
    let frozen_in_effect =
        !phase.is_open() && state.decisions.frozen_path().exists();

    let decision_status = match &latest {
        Some(artifact) if artifact.metadata.artifact_version == "v2" => "OK",
        Some(_) => "STALE_VERSION",
        None => "MISSING",
    };

    Ok(Json(json!({
        "decision_store": {
            "status": decision_status,
            "active_path": active_path,
            "frozen_in_effect": frozen_in_effect,
            "run_id": latest.as_ref().map(|a| a.metadata.run_id.clone()),
        },
        "scheduler": state.heartbeat.health(),
        "market_phase": phase,
        "snapshot": state.store.active_snapshot().await?,
    })))
}
