use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of weather hazard the analyzer can raise. One tag per threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    // Instantaneous readings
    ExtremeHeat,
    ExtremeCold,
    StormWind,
    HighWind,

    // Current condition code
    Thunderstorm,
    FreezingPrecip,
    Fog,

    // Tomorrow's forecast
    HeavyPrecip,
    HighUv,
    ForecastHeat,
    ForecastFrost,

    // Air quality
    HazardousAqi,
    UnhealthyAqi,
}

impl AlertType {
    pub const ALL: [AlertType; 13] = [
        AlertType::ExtremeHeat,
        AlertType::ExtremeCold,
        AlertType::StormWind,
        AlertType::HighWind,
        AlertType::Thunderstorm,
        AlertType::FreezingPrecip,
        AlertType::Fog,
        AlertType::HeavyPrecip,
        AlertType::HighUv,
        AlertType::ForecastHeat,
        AlertType::ForecastFrost,
        AlertType::HazardousAqi,
        AlertType::UnhealthyAqi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ExtremeHeat => "extreme_heat",
            AlertType::ExtremeCold => "extreme_cold",
            AlertType::StormWind => "storm_wind",
            AlertType::HighWind => "high_wind",
            AlertType::Thunderstorm => "thunderstorm",
            AlertType::FreezingPrecip => "freezing_precip",
            AlertType::Fog => "fog",
            AlertType::HeavyPrecip => "heavy_precip",
            AlertType::HighUv => "high_uv",
            AlertType::ForecastHeat => "forecast_heat",
            AlertType::ForecastFrost => "forecast_frost",
            AlertType::HazardousAqi => "hazardous_aqi",
            AlertType::UnhealthyAqi => "unhealthy_aqi",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown alert type '{}'", s))
    }
}

/// Alert severity levels, ordered `Moderate < Severe < Extreme`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    Severe,
    Extreme,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Extreme => "extreme",
        }
    }

    /// Push priority used for an alert of this severity.
    pub fn delivery_priority(&self) -> DeliveryPriority {
        match self {
            Severity::Extreme | Severity::Severe => DeliveryPriority::High,
            Severity::Moderate => DeliveryPriority::Normal,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            "extreme" => Ok(Severity::Extreme),
            other => Err(format!(
                "unknown severity '{}' (expected moderate, severe or extreme)",
                other
            )),
        }
    }
}

/// Lifecycle outcome recorded for each evaluated alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Generated,
    Sent,
    Cooldown,
    Filtered,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Generated => "generated",
            AlertStatus::Sent => "sent",
            AlertStatus::Cooldown => "cooldown",
            AlertStatus::Filtered => "filtered",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(AlertStatus::Generated),
            "sent" => Ok(AlertStatus::Sent),
            "cooldown" => Ok(AlertStatus::Cooldown),
            "filtered" => Ok(AlertStatus::Filtered),
            other => Err(format!("unknown alert status '{}'", other)),
        }
    }
}

/// Device platform, used to shape the push payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            other => Err(format!(
                "unknown platform '{}' (expected android, ios or web)",
                other
            )),
        }
    }
}

/// Push delivery priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPriority {
    High,
    Normal,
}

/// A potential notification produced by threshold analysis, before cooldown
/// and preference filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// `{type}:{encoded-location}:{unix-seconds}`, stable for one observation
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub issued_at: DateTime<Utc>,
}

/// A named place a device asked to be alerted about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonitoredLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

/// A registered push endpoint together with the locations it monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub channel_token: String,
    pub platform: Platform,
    pub locations: Vec<MonitoredLocation>,
}

/// Per-device alert settings. Absence of a row means "deliver everything".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePreferences {
    pub device_id: Uuid,
    pub min_severity: Severity,
    /// UTC hour (0-23) at which quiet hours begin
    pub quiet_hours_start: Option<u8>,
    /// UTC hour (0-23) at which quiet hours end (exclusive)
    pub quiet_hours_end: Option<u8>,
    /// `None` or empty means every type is enabled
    pub enabled_types: Option<Vec<AlertType>>,
}

/// One row of the append-only alert history.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
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
