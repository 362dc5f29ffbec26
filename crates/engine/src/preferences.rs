//! Per-device alert preferences.
//!
//! [`PreferenceFilter`] is pure: severity and type filtering of candidates,
//! plus the quiet-hours window check. Quiet hours are applied separately by
//! the scheduler at delivery time, so an alert dropped for severity/type is
//! never confused with one held back because the recipient is asleep.
//!
//! [`PreferenceService`] validates and persists the settings for the API.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{AlertCandidate, AlertType, DevicePreferences, Severity};

use crate::store::AlertStore;

pub struct PreferenceFilter;

impl PreferenceFilter {
    /// Narrow `candidates` to the ones a recipient wants.
    ///
    /// `None` preferences pass everything through unchanged.
    pub fn filter(
        candidates: Vec<AlertCandidate>,
        preferences: Option<&DevicePreferences>,
    ) -> Vec<AlertCandidate> {
        candidates
            .into_iter()
            .filter(|c| Self::accepts(c, preferences))
            .collect()
    }

    /// Single-candidate form of [`PreferenceFilter::filter`].
    pub fn accepts(candidate: &AlertCandidate, preferences: Option<&DevicePreferences>) -> bool {
        let Some(prefs) = preferences else {
            return true;
        };

        if candidate.severity < prefs.min_severity {
            return false;
        }

        match &prefs.enabled_types {
            Some(types) if !types.is_empty() => types.contains(&candidate.alert_type),
            _ => true,
        }
    }

    /// Whether `hour` (UTC, 0-23) falls in the quiet window.
    ///
    /// `start <= end` is the half-open range `[start, end)`; `start > end`
    /// wraps past midnight. A missing bound means never quiet.
    pub fn is_quiet_hours(start: Option<u8>, end: Option<u8>, hour: u8) -> bool {
        let (Some(start), Some(end)) = (start, end) else {
            return false;
        };

        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Quiet-hours check against a recipient's stored preferences.
    pub fn in_quiet_hours(preferences: Option<&DevicePreferences>, hour: u8) -> bool {
        preferences.is_some_and(|p| Self::is_quiet_hours(p.quiet_hours_start, p.quiet_hours_end, hour))
    }
}

/// Body of `PUT /api/devices/{id}/preferences`. Replaces the stored settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePreferencesParams {
    /// `moderate` (default), `severe` or `extreme`
    pub min_severity: Option<String>,
    pub quiet_hours_start: Option<i32>,
    pub quiet_hours_end: Option<i32>,
    /// Alert type tags; omitted or empty enables every type
    pub enabled_types: Option<Vec<String>>,
}

/// Service layer for reading and writing device preferences.
pub struct PreferenceService;

impl PreferenceService {
    /// Fetch a device's preferences. Unknown devices are a 404; a known device
    /// without stored preferences gets `None`.
    pub async fn get(
        store: &Arc<dyn AlertStore>,
        device_id: Uuid,
    ) -> Result<Option<DevicePreferences>, AppError> {
        Self::ensure_device(store, device_id).await?;
        store.get_preferences(device_id).await
    }

    /// Validate and store preferences for a device.
    pub async fn update(
        store: &Arc<dyn AlertStore>,
        device_id: Uuid,
        params: &UpdatePreferencesParams,
    ) -> Result<DevicePreferences, AppError> {
        let preferences = Self::validate(device_id, params)?;
        Self::ensure_device(store, device_id).await?;
        store.upsert_preferences(&preferences).await?;

        tracing::info!(
            device_id = %device_id,
            min_severity = %preferences.min_severity,
            quiet_hours_start = ?preferences.quiet_hours_start,
            quiet_hours_end = ?preferences.quiet_hours_end,
            "Device preferences updated"
        );

        Ok(preferences)
    }

    /// Turn raw request params into typed preferences.
    pub fn validate(
        device_id: Uuid,
        params: &UpdatePreferencesParams,
    ) -> Result<DevicePreferences, AppError> {
        let min_severity = match &params.min_severity {
            Some(raw) => raw.parse::<Severity>().map_err(AppError::Validation)?,
            None => Severity::Moderate,
        };

        let quiet_hours_start = Self::validate_hour("quiet_hours_start", params.quiet_hours_start)?;
        let quiet_hours_end = Self::validate_hour("quiet_hours_end", params.quiet_hours_end)?;

        let enabled_types = match &params.enabled_types {
            Some(raw) if !raw.is_empty() => {
                let mut types = Vec::with_capacity(raw.len());
                for name in raw {
                    let alert_type = name.parse::<AlertType>().map_err(|e| {
                        AppError::Validation(format!(
                            "{}. Valid types: {}",
                            e,
                            AlertType::ALL.map(|t| t.as_str()).join(", ")
                        ))
                    })?;
                    if !types.contains(&alert_type) {
                        types.push(alert_type);
                    }
                }
                Some(types)
            }
            _ => None,
        };

        Ok(DevicePreferences {
            device_id,
            min_severity,
            quiet_hours_start,
            quiet_hours_end,
            enabled_types,
        })
    }

    fn validate_hour(field: &str, hour: Option<i32>) -> Result<Option<u8>, AppError> {
        match hour {
            None => Ok(None),
            Some(h) if (0..=23).contains(&h) => Ok(Some(h as u8)),
            Some(h) => Err(AppError::Validation(format!(
                "{} must be an hour between 0 and 23, got {}",
                field, h
            ))),
        }
    }

    async fn ensure_device(store: &Arc<dyn AlertStore>, device_id: Uuid) -> Result<(), AppError> {
        store
            .get_device(device_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Device {} not found", device_id)))
    }
}
