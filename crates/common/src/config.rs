use serde::{Deserialize, Serialize};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (weather read-through cache)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP API binds to (default: 3000)
    pub api_port: u16,

    /// Open-Meteo forecast endpoint
    pub weather_api_url: String,

    /// Open-Meteo air-quality endpoint
    pub air_quality_api_url: String,

    /// Per-request timeout for the weather provider, in seconds (default: 10)
    pub upstream_timeout_secs: u64,

    /// How long a fetched snapshot stays in the Redis cache, in seconds (default: 600)
    pub weather_cache_ttl_secs: u64,

    /// Firebase project hosting the FCM sender
    pub fcm_project_id: Option<String>,

    /// OAuth2 bearer token for the FCM HTTP v1 API
    pub fcm_access_token: Option<String>,

    /// Override for the FCM API root, e.g. a local emulator
    pub fcm_api_url: Option<String>,

    /// Per-send timeout for push delivery, in seconds (default: 10)
    pub push_timeout_secs: u64,

    /// Alert scheduler tuning
    pub scheduler: SchedulerConfig,
}

/// Timing knobs for the alert scheduler. Exposed verbatim on the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the periodic timer is armed at startup (default: true)
    pub enabled: bool,

    /// Seconds between alert cycles (default: 1800 = 30 min)
    pub interval_secs: u64,

    /// Minimum hours between two sent alerts of the same type for the same location (default: 4)
    pub cooldown_hours: u64,

    /// Days of alert history kept before cleanup (default: 30)
    pub retention_days: u32,

    /// Hours between retention cleanup runs (default: 24)
    pub cleanup_interval_hours: u64,

    /// Maximum number of locations fetched concurrently in one cycle (default: 8)
    pub fetch_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1800,
            cooldown_hours: 4,
            retention_days: 30,
            cleanup_interval_hours: 24,
            fetch_concurrency: 8,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_env("API_PORT", 3000)?,
            weather_api_url: std::env::var("WEATHER_API_URL")
                .unwrap_or_else(|_| "https://api.open-meteo.com/v1/forecast".to_string()),
            air_quality_api_url: std::env::var("AIR_QUALITY_API_URL").unwrap_or_else(|_| {
                "https://air-quality-api.open-meteo.com/v1/air-quality".to_string()
            }),
            upstream_timeout_secs: parse_env("UPSTREAM_TIMEOUT_SECS", 10)?,
            weather_cache_ttl_secs: parse_env("WEATHER_CACHE_TTL_SECS", 600)?,
            fcm_project_id: std::env::var("FCM_PROJECT_ID").ok(),
            fcm_access_token: std::env::var("FCM_ACCESS_TOKEN").ok(),
            fcm_api_url: std::env::var("FCM_API_URL").ok(),
            push_timeout_secs: parse_env("PUSH_TIMEOUT_SECS", 10)?,
            scheduler: SchedulerConfig {
                enabled: parse_env("SCHEDULER_ENABLED", true)?,
                interval_secs: parse_env("SCHEDULER_INTERVAL_SECS", 1800)?,
                cooldown_hours: parse_env("ALERT_COOLDOWN_HOURS", 4)?,
                retention_days: parse_env("ALERT_HISTORY_RETENTION_DAYS", 30)?,
                cleanup_interval_hours: parse_env("CLEANUP_INTERVAL_HOURS", 24)?,
                fetch_concurrency: parse_env("SCHEDULER_FETCH_CONCURRENCY", 8)?,
            },
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}
