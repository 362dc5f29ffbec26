//! Alert history routes.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use nimbus_common::error::AppError;
use nimbus_engine::history::HistoryParams;
use nimbus_engine::store::HistoryPage;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CleanupParams {
    retention_days: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/alerts/history", get(list_history))
        .route("/api/alerts/history/cleanup", post(cleanup_history))
}

/// GET /api/alerts/history - Paged history, newest first.
async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, AppError> {
    let page = state.scheduler.history().query(&params).await?;
    Ok(Json(page))
}

/// POST /api/alerts/history/cleanup - Apply retention now.
async fn cleanup_history(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let retention_days = params
        .retention_days
        .unwrap_or(state.scheduler.config().retention_days);
    let purged = state.scheduler.cleanup(Some(retention_days)).await?;

    Ok(Json(json!({
        "deleted": purged.history,
        "deliveries_deleted": purged.deliveries,
        "retention_days": retention_days,
    })))
}
