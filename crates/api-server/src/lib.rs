//! Thin HTTP surface over the ChakraOps core. Handlers translate typed core
//! errors to transport codes; business logic stays in the core crates.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use chakra_core::{ChakraError, CoreConfig};
use decision_store::DecisionStore;
use eval_engine::EvaluationEngine;
use heartbeat::HeartbeatManager;
use market_store::MarketStore;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod auth;
pub mod ui_routes;

#[derive(Clone)]
pub struct AppState {
    pub store: MarketStore,
    pub decisions: Arc<DecisionStore>,
    pub engine: Arc<EvaluationEngine>,
    pub heartbeat: HeartbeatManager,
    pub config: Arc<CoreConfig>,
}

/// Transport-level error: typed core errors map to status codes here and
/// nowhere else.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ChakraError> for AppError {
    fn from(e: ChakraError) -> Self {
        match e {
            ChakraError::Config(msg) => AppError::BadRequest(msg),
            ChakraError::FreezeViolation(msg) => AppError::Conflict(msg),
            ChakraError::Provider(msg) => AppError::Internal(format!("provider: {msg}")),
            ChakraError::ProviderTimeout(secs) => {
                AppError::Internal(format!("provider timeout after {secs}s"))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m),
            AppError::Internal(m) => {
                tracing::error!("internal error: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(ui_routes::ui_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::ui_key_guard,
        ))
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
