//! Threshold analyzer: turns a weather/air-quality snapshot into alert candidates.
//!
//! Pure and deterministic: no I/O, no clock. Each rule is evaluated
//! independently, so several alerts can fire for one snapshot. A missing
//! reading means the rule does not apply.
//!
//! Rule groups:
//! 1. Instantaneous temperature and wind
//! 2. Current WMO condition code (thunderstorm / freezing precipitation / fog)
//! 3. Tomorrow's forecast (daily index 1), never today's
//! 4. US air-quality index

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use nimbus_common::types::{AlertCandidate, AlertType, MonitoredLocation, Severity};
use nimbus_weather::{AirQualitySnapshot, DailySeries, WeatherSnapshot};

/// WMO codes for thunderstorm, with or without hail.
const THUNDERSTORM_CODES: &[i32] = &[95, 96, 99];
/// WMO codes for freezing drizzle and freezing rain.
const FREEZING_PRECIP_CODES: &[i32] = &[56, 57, 66, 67];
/// WMO codes for fog and depositing rime fog.
const FOG_CODES: &[i32] = &[45, 48];

/// Severe/moderate cut-offs for one forecast metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tier {
    pub severe: f64,
    pub moderate: f64,
}

/// Threshold constants. Units: °C, km/h, mm, UV index, US AQI.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub extreme_heat_c: f64,
    pub extreme_cold_c: f64,
    pub storm_wind_kmh: f64,
    pub high_wind_kmh: f64,
    pub precipitation_mm: Tier,
    pub uv_index: Tier,
    pub forecast_max_c: Tier,
    /// Compared with `<=`, so the values are negative
    pub forecast_min_c: Tier,
    pub hazardous_aqi: f64,
    pub unhealthy_aqi: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            extreme_heat_c: 40.0,
            extreme_cold_c: -25.0,
            storm_wind_kmh: 90.0,
            high_wind_kmh: 60.0,
            precipitation_mm: Tier {
                severe: 50.0,
                moderate: 25.0,
            },
            uv_index: Tier {
                severe: 11.0,
                moderate: 8.0,
            },
            forecast_max_c: Tier {
                severe: 38.0,
                moderate: 35.0,
            },
            forecast_min_c: Tier {
                severe: -15.0,
                moderate: -10.0,
            },
            hazardous_aqi: 300.0,
            unhealthy_aqi: 150.0,
        }
    }
}

/// Stateless analyzer over a fixed set of thresholds.
#[derive(Debug, Clone, Default)]
pub struct ThresholdAnalyzer {
    thresholds: Thresholds,
}

impl ThresholdAnalyzer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate every rule against one location's readings.
    pub fn analyze(
        &self,
        weather: &WeatherSnapshot,
        air_quality: Option<&AirQualitySnapshot>,
        location: &MonitoredLocation,
    ) -> Vec<AlertCandidate> {
        let t = &self.thresholds;
        let mut fired: Vec<(AlertType, Severity, String, String)> = Vec::new();
        let name = &location.name;

        // Instantaneous temperature
        if let Some(temp) = weather.current.temperature_c {
            if temp >= t.extreme_heat_c {
                fired.push((
                    AlertType::ExtremeHeat,
                    Severity::Extreme,
                    format!("Extreme heat in {}", name),
                    format!(
                        "Temperature has reached {:.1}°C. Avoid strenuous activity and stay hydrated.",
                        temp
                    ),
                ));
            } else if temp <= t.extreme_cold_c {
                fired.push((
                    AlertType::ExtremeCold,
                    Severity::Extreme,
                    format!("Extreme cold in {}", name),
                    format!(
                        "Temperature has dropped to {:.1}°C. Limit time outdoors.",
                        temp
                    ),
                ));
            }
        }

        // Instantaneous wind
        if let Some(wind) = weather.current.wind_speed_kmh {
            if wind >= t.storm_wind_kmh {
                fired.push((
                    AlertType::StormWind,
                    Severity::Extreme,
                    format!("Storm-force wind in {}", name),
                    format!(
                        "Wind speed is {:.0} km/h. Stay indoors and away from windows.",
                        wind
                    ),
                ));
            } else if wind >= t.high_wind_kmh {
                fired.push((
                    AlertType::HighWind,
                    Severity::Severe,
                    format!("High wind in {}", name),
                    format!(
                        "Wind speed is {:.0} km/h. Secure loose objects outdoors.",
                        wind
                    ),
                ));
            }
        }

        // Current condition code
        if let Some(code) = weather.current.weather_code {
            if THUNDERSTORM_CODES.contains(&code) {
                fired.push((
                    AlertType::Thunderstorm,
                    Severity::Severe,
                    format!("Thunderstorm in {}", name),
                    "A thunderstorm is in progress. Seek shelter indoors.".to_string(),
                ));
            }
            if FREEZING_PRECIP_CODES.contains(&code) {
                fired.push((
                    AlertType::FreezingPrecip,
                    Severity::Severe,
                    format!("Freezing rain in {}", name),
                    "Freezing precipitation is falling. Roads and walkways may be icy.".to_string(),
                ));
            }
            if FOG_CODES.contains(&code) {
                fired.push((
                    AlertType::Fog,
                    Severity::Moderate,
                    format!("Dense fog in {}", name),
                    "Visibility is reduced by fog. Drive with care.".to_string(),
                ));
            }
        }

        // Tomorrow's forecast
        let daily = &weather.daily;
        if let Some(precip) = DailySeries::tomorrow(&daily.precipitation_sum_mm)
            && let Some(severity) = tier_at_least(precip, t.precipitation_mm)
        {
            fired.push((
                AlertType::HeavyPrecip,
                severity,
                format!("Heavy precipitation expected in {}", name),
                format!("{:.0} mm of precipitation forecast for tomorrow.", precip),
            ));
        }
        if let Some(uv) = DailySeries::tomorrow(&daily.uv_index_max)
            && let Some(severity) = tier_at_least(uv, t.uv_index)
        {
            fired.push((
                AlertType::HighUv,
                severity,
                format!("High UV expected in {}", name),
                format!("UV index is forecast to reach {:.0} tomorrow. Use sun protection.", uv),
            ));
        }
        if let Some(max) = DailySeries::tomorrow(&daily.temperature_max_c)
            && let Some(severity) = tier_at_least(max, t.forecast_max_c)
        {
            fired.push((
                AlertType::ForecastHeat,
                severity,
                format!("Heat expected in {}", name),
                format!("Tomorrow's high is forecast at {:.1}°C.", max),
            ));
        }
        if let Some(min) = DailySeries::tomorrow(&daily.temperature_min_c)
            && let Some(severity) = tier_at_most(min, t.forecast_min_c)
        {
            fired.push((
                AlertType::ForecastFrost,
                severity,
                format!("Hard frost expected in {}", name),
                format!("Tomorrow's low is forecast at {:.1}°C.", min),
            ));
        }

        // Air quality
        if let Some(aqi) = air_quality.and_then(|aq| aq.us_aqi) {
            if aqi >= t.hazardous_aqi {
                fired.push((
                    AlertType::HazardousAqi,
                    Severity::Extreme,
                    format!("Hazardous air quality in {}", name),
                    format!("Air quality index is {:.0}. Avoid all outdoor activity.", aqi),
                ));
            } else if aqi >= t.unhealthy_aqi {
                fired.push((
                    AlertType::UnhealthyAqi,
                    Severity::Severe,
                    format!("Unhealthy air quality in {}", name),
                    format!(
                        "Air quality index is {:.0}. Sensitive groups should stay indoors.",
                        aqi
                    ),
                ));
            }
        }

        fired
            .into_iter()
            .map(|(alert_type, severity, title, description)| AlertCandidate {
                id: Self::alert_id(alert_type, name, weather),
                alert_type,
                severity,
                title,
                description,
                location_name: name.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                issued_at: weather.observed_at,
            })
            .collect()
    }

    /// `{type}:{encoded-location}:{observation-unix-seconds}`.
    ///
    /// Keyed on the observation time so that re-evaluating the same snapshot
    /// yields the same id. The location name is percent-encoded verbatim, so
    /// names that differ only in case or punctuation get distinct ids, the same
    /// as their cooldown keys.
    fn alert_id(alert_type: AlertType, location_name: &str, weather: &WeatherSnapshot) -> String {
        format!(
            "{}:{}:{}",
            alert_type,
            encode_location(location_name),
            weather.observed_at.timestamp()
        )
    }
}

fn tier_at_least(value: f64, tier: Tier) -> Option<Severity> {
    if value >= tier.severe {
        Some(Severity::Severe)
    } else if value >= tier.moderate {
        Some(Severity::Moderate)
    } else {
        None
    }
}

fn tier_at_most(value: f64, tier: Tier) -> Option<Severity> {
    if value <= tier.severe {
        Some(Severity::Severe)
    } else if value <= tier.moderate {
        Some(Severity::Moderate)
    } else {
        None
    }
}

fn encode_location(name: &str) -> String {
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}
