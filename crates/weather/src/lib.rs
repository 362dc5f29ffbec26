//! Weather and air-quality provider access.
//!
//! The alert pipeline only ever reads through the [`WeatherProvider`] trait.
//! [`OpenMeteoClient`] talks to the upstream HTTP API and [`CachedProvider`]
//! fronts any provider with a Redis read-through cache.

pub mod cache;
pub mod client;
pub mod error;
pub mod snapshot;

use async_trait::async_trait;

pub use cache::CachedProvider;
pub use client::OpenMeteoClient;
pub use error::UpstreamError;
pub use snapshot::{
    AirQualitySnapshot, CurrentConditions, DailySeries, HourlySeries, LocationConditions,
    WeatherSnapshot,
};

/// Read-only source of current conditions for a coordinate.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch(&self, latitude: f64, longitude: f64)
    -> Result<LocationConditions, UpstreamError>;
}
