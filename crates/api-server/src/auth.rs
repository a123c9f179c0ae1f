//! UI key guard: when `UI_API_KEY` is configured, every `/api/ui/*` request
//! must carry a matching `x-ui-key` header. Local dev (no key set) passes
//! everything through.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::{AppError, AppState};

pub async fn ui_key_guard(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = &state.config.ui_api_key else {
        return Ok(next.run(request).await);
    };

    let provided = headers
        .get("x-ui-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if provided != expected {
        return Err(AppError::Unauthorized(
            "Missing or invalid x-ui-key".to_string(),
        ));
    }
    Ok(next.run(request).await)
}
