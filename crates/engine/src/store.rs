//! Persistence seam for the alert pipeline.
//!
//! Every method is one short statement or transaction; nothing here spans a
//! whole scheduler cycle. [`crate::pg_store::PgAlertStore`] is the production
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{
    AlertCandidate, AlertStatus, AlertType, Device, DevicePreferences, HistoryEntry,
    MonitoredLocation, Platform, Severity,
};

/// Validated input for registering (or re-registering) a device.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    /// Set when an existing device re-registers with a new token
    pub device_id: Option<Uuid>,
    pub channel_token: String,
    pub platform: Platform,
    pub locations: Vec<MonitoredLocation>,
}

/// A history row before it has been assigned an id.
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: AlertStatus,
    pub recipients_notified: i32,
    pub created_at: DateTime<Utc>,
}

impl NewHistoryEntry {
    pub fn from_candidate(
        alert: &AlertCandidate,
        status: AlertStatus,
        recipients_notified: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title.clone(),
            description: alert.description.clone(),
            location_name: alert.location_name.clone(),
            latitude: alert.latitude,
            longitude: alert.longitude,
            status,
            recipients_notified,
            created_at,
        }
    }
}

/// Validated history filter.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub limit: i64,
    pub offset: i64,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: i64,
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub history: u64,
    pub deliveries: u64,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    // Devices
    async fn list_devices(&self) -> Result<Vec<Device>, AppError>;
    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, AppError>;
    async fn register_device(&self, registration: &DeviceRegistration) -> Result<Device, AppError>;
    /// Remove a device with its locations and preferences. Returns whether it existed.
    async fn delete_device(&self, device_id: Uuid) -> Result<bool, AppError>;

    // Preferences
    async fn get_preferences(&self, device_id: Uuid)
    -> Result<Option<DevicePreferences>, AppError>;
    async fn upsert_preferences(&self, preferences: &DevicePreferences) -> Result<(), AppError>;

    // Cooldown
    async fn last_sent_at(
        &self,
        alert_type: AlertType,
        location_name: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError>;
    async fn record_sent(
        &self,
        alert_type: AlertType,
        location_name: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    // Delivery dedup
    async fn delivery_exists(&self, alert_id: &str, device_id: Uuid) -> Result<bool, AppError>;
    /// Insert the dedup row. Returns false when the pair was already present.
    async fn record_delivery(
        &self,
        alert_id: &str,
        device_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    // History
    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError>;
    async fn query_history(&self, query: &HistoryQuery) -> Result<HistoryPage, AppError>;
    /// Delete history and delivery rows created before `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, AppError>;
}
