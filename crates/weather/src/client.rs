//! Open-Meteo HTTP client.
//!
//! Fetches the forecast and air-quality endpoints concurrently. Times are
//! requested as unix seconds in GMT so no timezone parsing is needed. An
//! air-quality failure degrades to `None` instead of failing the location.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::UpstreamError;
use crate::snapshot::{
    AirQualitySnapshot, CurrentConditions, DailySeries, HourlySeries, LocationConditions,
    WeatherSnapshot,
};
use crate::WeatherProvider;

const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m,weather_code";
const HOURLY_FIELDS: &str = "temperature_2m,precipitation_probability";
const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum,uv_index_max";
const AIR_QUALITY_FIELDS: &str = "us_aqi,pm2_5";

/// Number of forecast days requested; the analyzer needs today and tomorrow.
const FORECAST_DAYS: &str = "3";

pub struct OpenMeteoClient {
    http: reqwest::Client,
    forecast_url: String,
    air_quality_url: String,
    timeout: Duration,
}

impl OpenMeteoClient {
    pub fn new(
        forecast_url: impl Into<String>,
        air_quality_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nimbus-alerts/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            forecast_url: forecast_url.into(),
            air_quality_url: air_quality_url.into(),
            timeout,
        })
    }

    async fn fetch_weather(&self, latitude: f64, longitude: f64) -> Result<WeatherSnapshot, UpstreamError> {
        let body = self
            .get(
                &self.forecast_url,
                &[
                    ("latitude", latitude.to_string()),
                    ("longitude", longitude.to_string()),
                    ("current", CURRENT_FIELDS.to_string()),
                    ("hourly", HOURLY_FIELDS.to_string()),
                    ("daily", DAILY_FIELDS.to_string()),
                    ("wind_speed_unit", "kmh".to_string()),
                    ("timezone", "GMT".to_string()),
                    ("timeformat", "unixtime".to_string()),
                    ("forecast_days", FORECAST_DAYS.to_string()),
                ],
            )
            .await?;

        parse_forecast(&body)
    }

    async fn fetch_air_quality(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQualitySnapshot, UpstreamError> {
        let body = self
            .get(
                &self.air_quality_url,
                &[
                    ("latitude", latitude.to_string()),
                    ("longitude", longitude.to_string()),
                    ("current", AIR_QUALITY_FIELDS.to_string()),
                    ("timezone", "GMT".to_string()),
                    ("timeformat", "unixtime".to_string()),
                ],
            )
            .await?;

        parse_air_quality(&body)
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, UpstreamError> {
        let response = self.http.get(url).query(query).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationConditions, UpstreamError> {
        let (weather, air_quality) = tokio::join!(
            self.fetch_weather(latitude, longitude),
            self.fetch_air_quality(latitude, longitude)
        );

        let air_quality = match air_quality {
            Ok(aq) => Some(aq),
            Err(e) => {
                tracing::warn!(
                    latitude,
                    longitude,
                    error = %e,
                    "Air quality unavailable, continuing with weather only"
                );
                None
            }
        };

        Ok(LocationConditions {
            weather: weather?,
            air_quality,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<RawCurrent>,
    #[serde(default)]
    hourly: Option<RawHourly>,
    #[serde(default)]
    daily: Option<RawDaily>,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    time: Option<i64>,
    temperature_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    weather_code: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHourly {
    time: Vec<i64>,
    temperature_2m: Vec<Option<f64>>,
    precipitation_probability: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDaily {
    time: Vec<i64>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    uv_index_max: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    current: Option<RawAirQuality>,
}

#[derive(Debug, Deserialize)]
struct RawAirQuality {
    us_aqi: Option<f64>,
    pm2_5: Option<f64>,
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

/// Decode an Open-Meteo forecast body into a snapshot.
///
/// The observation time comes from the body: `current.time`, else the first
/// daily slot, else the first hourly slot. A body carrying none of them is a
/// decode error.
pub fn parse_forecast(body: &str) -> Result<WeatherSnapshot, UpstreamError> {
    let raw: ForecastResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

    let hourly = raw.hourly.unwrap_or_default();
    let daily = raw.daily.unwrap_or_default();

    let observed_at = raw
        .current
        .as_ref()
        .and_then(|c| c.time)
        .or_else(|| daily.time.first().copied())
        .or_else(|| hourly.time.first().copied())
        .and_then(unix_to_utc)
        .ok_or_else(|| UpstreamError::Decode("response carries no observation time".to_string()))?;

    let current = raw
        .current
        .map(|c| CurrentConditions {
            temperature_c: c.temperature_2m,
            wind_speed_kmh: c.wind_speed_10m,
            weather_code: c.weather_code,
        })
        .unwrap_or_default();

    Ok(WeatherSnapshot {
        observed_at,
        current,
        hourly: HourlySeries {
            time: hourly.time.into_iter().filter_map(unix_to_utc).collect(),
            temperature_c: hourly.temperature_2m,
            precipitation_probability: hourly.precipitation_probability,
        },
        daily: DailySeries {
            time: daily.time.into_iter().filter_map(unix_to_utc).collect(),
            temperature_max_c: daily.temperature_2m_max,
            temperature_min_c: daily.temperature_2m_min,
            precipitation_sum_mm: daily.precipitation_sum,
            uv_index_max: daily.uv_index_max,
        },
    })
}

/// Decode an Open-Meteo air-quality body.
pub fn parse_air_quality(body: &str) -> Result<AirQualitySnapshot, UpstreamError> {
    let raw: AirQualityResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

    Ok(raw
        .current
        .map(|c| AirQualitySnapshot {
            us_aqi: c.us_aqi,
            pm2_5: c.pm2_5,
        })
        .unwrap_or_default())
}
