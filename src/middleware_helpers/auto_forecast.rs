//! Opportunistic forecast regeneration.
//!
//! Requests to the configured paths (dashboard-style pages) check whether
//! forecasts are stale and, if so, queue a background run. The request itself
//! never waits for the check or the run.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use crate::services::forecasting::TriggerOutcome;
use crate::AppState;

pub async fn auto_forecast_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_trigger_path(&state.config.forecasting.trigger_paths, request.uri().path()) {
        let scheduler = Arc::clone(&state.scheduler);
        tokio::spawn(
            async move {
                match scheduler.maybe_trigger().await {
                    Ok(TriggerOutcome::Queued) => debug!("Stale forecasts, regeneration queued"),
                    Ok(outcome) => debug!(?outcome, "No regeneration queued"),
                    Err(e) => warn!(error = %e, "Forecast staleness check failed"),
                }
            }
            .in_current_span(),
        );
    }

    next.run(request).await
}

/// Exact match, ignoring one trailing slash.
fn is_trigger_path(trigger_paths: &[String], path: &str) -> bool {
    let normalized = match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    };
    trigger_paths.iter().any(|p| p == normalized)
}
