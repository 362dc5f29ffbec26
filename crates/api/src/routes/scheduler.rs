//! Scheduler status and on-demand trigger.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use nimbus_common::error::AppError;
use nimbus_engine::scheduler::{CycleSummary, SchedulerStatus};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/scheduler/status", get(status))
        .route("/api/scheduler/trigger", post(trigger))
}

/// GET /api/scheduler/status - Counters, timer state and configuration.
async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

/// POST /api/scheduler/trigger - Run one cycle now and wait for its summary.
///
/// Waits behind a cycle that is already running rather than overlapping it.
async fn trigger(State(state): State<AppState>) -> Result<Json<CycleSummary>, AppError> {
    tracing::info!("Manual alert cycle requested");
    let summary = state.scheduler.trigger().await?;
    Ok(Json(summary))
}
