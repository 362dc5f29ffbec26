//! Device service: registration and removal of push recipients.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{Device, MonitoredLocation, Platform};

use crate::store::{AlertStore, DeviceRegistration};

/// Upper bound on monitored locations per device.
pub const MAX_LOCATIONS_PER_DEVICE: usize = 20;

/// Body of `POST /api/devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDeviceParams {
    /// Existing device id when re-registering with a rotated token
    pub device_id: Option<Uuid>,
    pub channel_token: String,
    pub platform: String,
    #[serde(default)]
    pub locations: Vec<LocationParams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationParams {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

pub struct DeviceService;

impl DeviceService {
    /// Register a device, or replace the token/locations of a known one.
    pub async fn register(
        store: &Arc<dyn AlertStore>,
        params: &RegisterDeviceParams,
    ) -> Result<Device, AppError> {
        let registration = Self::validate(params)?;
        let device = store.register_device(&registration).await?;

        tracing::info!(
            device_id = %device.id,
            platform = %device.platform,
            locations = device.locations.len(),
            "Device registered"
        );

        Ok(device)
    }

    /// Remove a device together with its locations and preferences.
    pub async fn unregister(store: &Arc<dyn AlertStore>, device_id: Uuid) -> Result<(), AppError> {
        if !store.delete_device(device_id).await? {
            return Err(AppError::NotFound(format!("Device {} not found", device_id)));
        }

        tracing::info!(device_id = %device_id, "Device unregistered");
        Ok(())
    }

    pub fn validate(params: &RegisterDeviceParams) -> Result<DeviceRegistration, AppError> {
        let channel_token = params.channel_token.trim();
        if channel_token.is_empty() {
            return Err(AppError::Validation(
                "channel_token must not be empty".to_string(),
            ));
        }

        let platform = params
            .platform
            .parse::<Platform>()
            .map_err(AppError::Validation)?;

        if params.locations.len() > MAX_LOCATIONS_PER_DEVICE {
            return Err(AppError::Validation(format!(
                "at most {} locations per device",
                MAX_LOCATIONS_PER_DEVICE
            )));
        }

        let mut locations = Vec::with_capacity(params.locations.len());
        for location in &params.locations {
            if !(-90.0..=90.0).contains(&location.latitude) {
                return Err(AppError::Validation(format!(
                    "latitude {} out of range",
                    location.latitude
                )));
            }
            if !(-180.0..=180.0).contains(&location.longitude) {
                return Err(AppError::Validation(format!(
                    "longitude {} out of range",
                    location.longitude
                )));
            }
            let name = location.name.trim();
            if name.is_empty() {
                return Err(AppError::Validation(
                    "location name must not be empty".to_string(),
                ));
            }

            locations.push(MonitoredLocation {
                latitude: location.latitude,
                longitude: location.longitude,
                name: name.to_string(),
            });
        }

        Ok(DeviceRegistration {
            device_id: params.device_id,
            channel_token: channel_token.to_string(),
            platform,
            locations,
        })
    }
}
