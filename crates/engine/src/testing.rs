//! In-memory fakes shared by the engine's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{
    AlertCandidate, AlertType, Device, DevicePreferences, HistoryEntry, MonitoredLocation,
    Platform, Severity,
};
use nimbus_notifier::{PushChannel, PushError, PushMessage};
use nimbus_weather::{
    CurrentConditions, LocationConditions, UpstreamError, WeatherProvider, WeatherSnapshot,
};

use crate::store::{
    AlertStore, DeviceRegistration, HistoryPage, HistoryQuery, NewHistoryEntry, PurgeCounts,
};

pub fn observed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

pub fn candidate(alert_type: AlertType, severity: Severity, location: &str) -> AlertCandidate {
    AlertCandidate {
        id: format!(
            "{}:{}:{}",
            alert_type,
            location.to_lowercase(),
            observed_at().timestamp()
        ),
        alert_type,
        severity,
        title: format!("{} in {}", alert_type, location),
        description: "test alert".to_string(),
        location_name: location.to_string(),
        latitude: 48.85,
        longitude: 2.35,
        issued_at: observed_at(),
    }
}

pub fn registration(token: &str, latitude: f64, longitude: f64, name: &str) -> DeviceRegistration {
    DeviceRegistration {
        device_id: None,
        channel_token: token.to_string(),
        platform: Platform::Android,
        locations: vec![MonitoredLocation {
            latitude,
            longitude,
            name: name.to_string(),
        }],
    }
}

/// Conditions with only a current temperature set.
pub fn conditions(temperature_c: f64) -> LocationConditions {
    LocationConditions {
        weather: WeatherSnapshot {
            observed_at: observed_at(),
            current: CurrentConditions {
                temperature_c: Some(temperature_c),
                wind_speed_kmh: Some(5.0),
                weather_code: Some(0),
            },
            ..Default::default()
        },
        air_quality: None,
    }
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    devices: HashMap<Uuid, Device>,
    preferences: HashMap<Uuid, DevicePreferences>,
    cooldowns: HashMap<(AlertType, String), DateTime<Utc>>,
    deliveries: HashMap<(String, Uuid), DateTime<Utc>>,
    history: Vec<HistoryEntry>,
    next_history_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing_history: Mutex<HashSet<AlertType>>,
}

impl MemoryStore {
    /// Make `append_history` fail for every entry of `alert_type`.
    pub fn fail_history_for(&self, alert_type: AlertType) {
        self.failing_history.lock().unwrap().insert(alert_type);
    }

    pub fn delivery_count(&self) -> usize {
        self.state.lock().unwrap().deliveries.len()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().unwrap().devices.len()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<Device>, AppError> {
        let state = self.state.lock().unwrap();
        let mut devices: Vec<Device> = state.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.channel_token.clone());
        Ok(devices)
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, AppError> {
        Ok(self.state.lock().unwrap().devices.get(&device_id).cloned())
    }

    async fn register_device(&self, registration: &DeviceRegistration) -> Result<Device, AppError> {
        let mut state = self.state.lock().unwrap();

        let by_token = state
            .devices
            .values()
            .find(|d| d.channel_token == registration.channel_token)
            .map(|d| d.id);

        let id = match registration.device_id {
            Some(id) if state.devices.contains_key(&id) => {
                if let Some(other) = by_token.filter(|other| *other != id) {
                    state.devices.remove(&other);
                    state.preferences.remove(&other);
                }
                id
            }
            _ => by_token.unwrap_or_else(Uuid::new_v4),
        };

        let device = Device {
            id,
            channel_token: registration.channel_token.clone(),
            platform: registration.platform,
            locations: registration.locations.clone(),
        };
        state.devices.insert(id, device.clone());
        Ok(device)
    }

    async fn delete_device(&self, device_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        state.preferences.remove(&device_id);
        Ok(state.devices.remove(&device_id).is_some())
    }

    async fn get_preferences(
        &self,
        device_id: Uuid,
    ) -> Result<Option<DevicePreferences>, AppError> {
        Ok(self.state.lock().unwrap().preferences.get(&device_id).cloned())
    }

    async fn upsert_preferences(&self, preferences: &DevicePreferences) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .preferences
            .insert(preferences.device_id, preferences.clone());
        Ok(())
    }

    async fn last_sent_at(
        &self,
        alert_type: AlertType,
        location_name: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cooldowns
            .get(&(alert_type, location_name.to_string()))
            .copied())
    }

    async fn record_sent(
        &self,
        alert_type: AlertType,
        location_name: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .cooldowns
            .insert((alert_type, location_name.to_string()), sent_at);
        Ok(())
    }

    async fn delivery_exists(&self, alert_id: &str, device_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deliveries
            .contains_key(&(alert_id.to_string(), device_id)))
    }

    async fn record_delivery(
        &self,
        alert_id: &str,
        device_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let key = (alert_id.to_string(), device_id);
        if state.deliveries.contains_key(&key) {
            return Ok(false);
        }
        state.deliveries.insert(key, sent_at);
        Ok(true)
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError> {
        if self.failing_history.lock().unwrap().contains(&entry.alert_type) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.lock().unwrap();
        state.next_history_id += 1;
        let id = state.next_history_id;
        state.history.push(HistoryEntry {
            id,
            alert_type: entry.alert_type,
            severity: entry.severity,
            title: entry.title.clone(),
            description: entry.description.clone(),
            location_name: entry.location_name.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            status: entry.status,
            recipients_notified: entry.recipients_notified,
            created_at: entry.created_at,
        });
        Ok(())
    }

    async fn query_history(&self, query: &HistoryQuery) -> Result<HistoryPage, AppError> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<HistoryEntry> = state
            .history
            .iter()
            .filter(|e| query.severity.is_none_or(|s| e.severity == s))
            .filter(|e| query.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let entries = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Ok(HistoryPage { entries, total })
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, AppError> {
        let mut state = self.state.lock().unwrap();
        let history_before = state.history.len();
        state.history.retain(|e| e.created_at >= cutoff);
        let deliveries_before = state.deliveries.len();
        state.deliveries.retain(|_, sent_at| *sent_at >= cutoff);
        Ok(PurgeCounts {
            history: (history_before - state.history.len()) as u64,
            deliveries: (deliveries_before - state.deliveries.len()) as u64,
        })
    }
}

// ── Push channel ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum FakeResponse {
    InvalidToken,
    Transient,
    /// The channel's own credentials are refused
    Rejected,
    /// Never completes; exercises the send timeout
    Hang,
}

pub struct FakeChannel {
    ready: bool,
    responses: Mutex<HashMap<String, FakeResponse>>,
    attempts: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, PushMessage)>>,
}

impl FakeChannel {
    pub fn ready() -> Self {
        Self {
            ready: true,
            responses: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::ready()
        }
    }

    pub fn respond(&self, token: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(token.to_string(), response);
    }

    pub fn clear_responses(&self) {
        self.responses.lock().unwrap().clear();
    }

    /// Number of send calls made for `token`, successful or not.
    pub fn attempts(&self, token: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == token)
            .count()
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushChannel for FakeChannel {
    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        self.attempts.lock().unwrap().push(token.to_string());
        let response = self.responses.lock().unwrap().get(token).copied();
        match response {
            Some(FakeResponse::InvalidToken) => Err(PushError::InvalidToken(token.to_string())),
            Some(FakeResponse::Transient) => Err(PushError::Transient("unavailable".to_string())),
            Some(FakeResponse::Rejected) => {
                Err(PushError::CredentialsRejected("token expired".to_string()))
            }
            Some(FakeResponse::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            None => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((token.to_string(), message.clone()));
                Ok(())
            }
        }
    }
}

// ── Weather provider ─────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeProvider {
    conditions: Mutex<HashMap<String, LocationConditions>>,
    slow: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn key(latitude: f64, longitude: f64) -> String {
        format!("{:.4}:{:.4}", latitude, longitude)
    }

    pub fn set(&self, latitude: f64, longitude: f64, conditions: LocationConditions) {
        self.conditions
            .lock()
            .unwrap()
            .insert(Self::key(latitude, longitude), conditions);
    }

    /// Make fetches for this coordinate hang until the caller times out.
    pub fn set_slow(&self, latitude: f64, longitude: f64) {
        self.slow
            .lock()
            .unwrap()
            .insert(Self::key(latitude, longitude));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for FakeProvider {
    async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationConditions, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = Self::key(latitude, longitude);

        let slow = self.slow.lock().unwrap().contains(&key);
        if slow {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let found = self.conditions.lock().unwrap().get(&key).cloned();
        found.ok_or_else(|| UpstreamError::Status {
            status: 503,
            body: format!("no conditions for {}", key),
        })
    }
}
