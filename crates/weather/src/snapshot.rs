//! Provider-independent view of the conditions at one location.
//!
//! Every reading is optional: the analyzer treats a missing value as "rule
//! does not apply", so a partial upstream response never fails a cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weather plus (optionally) air quality for one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationConditions {
    pub weather: WeatherSnapshot,
    /// `None` when the air-quality endpoint was unavailable
    pub air_quality: Option<AirQualitySnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Provider timestamp of the `current` block
    pub observed_at: DateTime<Utc>,
    pub current: CurrentConditions,
    pub hourly: HourlySeries,
    pub daily: DailySeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_c: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    /// WMO weather interpretation code
    pub weather_code: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<DateTime<Utc>>,
    pub temperature_c: Vec<Option<f64>>,
    pub precipitation_probability: Vec<Option<f64>>,
}

/// Day-ordered forecast; index 0 is today, index 1 tomorrow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub time: Vec<DateTime<Utc>>,
    pub temperature_max_c: Vec<Option<f64>>,
    pub temperature_min_c: Vec<Option<f64>>,
    pub precipitation_sum_mm: Vec<Option<f64>>,
    pub uv_index_max: Vec<Option<f64>>,
}

impl DailySeries {
    /// Tomorrow's value of a daily series, if the provider returned one.
    pub fn tomorrow(series: &[Option<f64>]) -> Option<f64> {
        series.get(1).copied().flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQualitySnapshot {
    pub us_aqi: Option<f64>,
    pub pm2_5: Option<f64>,
}
