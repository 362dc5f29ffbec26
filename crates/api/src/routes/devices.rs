//! Device registration and preference routes.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{Device, DevicePreferences};
use nimbus_engine::devices::{DeviceService, RegisterDeviceParams};
use nimbus_engine::preferences::{PreferenceService, UpdatePreferencesParams};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/devices", post(register_device))
        .route("/api/devices/{id}", delete(unregister_device))
        .route(
            "/api/devices/{id}/preferences",
            get(get_preferences).put(update_preferences),
        )
}

/// POST /api/devices - Register a device or refresh its token and locations.
async fn register_device(
    State(state): State<AppState>,
    Json(params): Json<RegisterDeviceParams>,
) -> Result<Json<Device>, AppError> {
    let device = DeviceService::register(&state.store, &params).await?;
    Ok(Json(device))
}

/// DELETE /api/devices/:id - Stop alerting a device.
async fn unregister_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    DeviceService::unregister(&state.store, id).await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// GET /api/devices/:id/preferences - Stored preferences, or `null` if none.
async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<DevicePreferences>>, AppError> {
    let preferences = PreferenceService::get(&state.store, id).await?;
    Ok(Json(preferences))
}

/// PUT /api/devices/:id/preferences - Replace a device's preferences.
async fn update_preferences(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdatePreferencesParams>,
) -> Result<Json<DevicePreferences>, AppError> {
    let preferences = PreferenceService::update(&state.store, id, &params).await?;
    Ok(Json(preferences))
}
