//! Redis read-through cache in front of a [`WeatherProvider`].
//!
//! Alerting tolerates data a few minutes old, so snapshots are stored as JSON
//! with `SET EX` and served until the TTL lapses. Redis problems never fail a
//! fetch: the cache is skipped and the inner provider is queried directly.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::UpstreamError;
use crate::snapshot::LocationConditions;
use crate::WeatherProvider;

pub struct CachedProvider {
    inner: Arc<dyn WeatherProvider>,
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn WeatherProvider>, redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            inner,
            redis,
            ttl_secs,
        }
    }

    /// Cache key for a coordinate, rounded to ~11 m so tiny float noise
    /// from different clients shares an entry.
    pub fn cache_key(latitude: f64, longitude: f64) -> String {
        format!("weather:conditions:{:.4}:{:.4}", latitude, longitude)
    }

    async fn read(&self, key: &str) -> Option<LocationConditions> {
        let mut redis = self.redis.clone();
        let cached: Option<String> = match redis.get(key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "Weather cache read failed");
                return None;
            }
        };

        let json = cached?;
        match serde_json::from_str(&json) {
            Ok(conditions) => Some(conditions),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write(&self, key: &str, conditions: &LocationConditions) {
        let json = match serde_json::to_string(conditions) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode conditions for cache");
                return;
            }
        };

        let mut redis = self.redis.clone();
        if let Err(e) = redis.set_ex::<_, _, ()>(key, json, self.ttl_secs).await {
            tracing::warn!(key, error = %e, "Weather cache write failed");
        }
    }
}

#[async_trait]
impl WeatherProvider for CachedProvider {
    async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationConditions, UpstreamError> {
        let key = Self::cache_key(latitude, longitude);

        if let Some(conditions) = self.read(&key).await {
            tracing::debug!(key = %key, "Weather cache hit");
            return Ok(conditions);
        }

        let conditions = self.inner.fetch(latitude, longitude).await?;
        self.write(&key, &conditions).await;
        Ok(conditions)
    }
}
