//! Postgres implementation of [`AlertStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use nimbus_common::error::AppError;
use nimbus_common::types::{
    AlertType, Device, DevicePreferences, HistoryEntry, MonitoredLocation, Platform, Severity,
};

use crate::store::{
    AlertStore, DeviceRegistration, HistoryPage, HistoryQuery, NewHistoryEntry, PurgeCounts,
};

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    channel_token: String,
    platform: Platform,
}

#[derive(sqlx::FromRow)]
struct LocationRow {
    device_id: Uuid,
    latitude: f64,
    longitude: f64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct PreferencesRow {
    device_id: Uuid,
    min_severity: String,
    quiet_hours_start: Option<i16>,
    quiet_hours_end: Option<i16>,
    enabled_types: Option<Vec<String>>,
}

impl PreferencesRow {
    /// Bad stored values degrade to the permissive default instead of failing.
    fn decode(self) -> DevicePreferences {
        let min_severity = self.min_severity.parse::<Severity>().unwrap_or_else(|e| {
            tracing::warn!(device_id = %self.device_id, error = %e, "Stored min_severity invalid, using moderate");
            Severity::Moderate
        });

        let enabled_types: Option<Vec<AlertType>> = self
            .enabled_types
            .map(|raw| {
                raw.iter()
                    .filter_map(|name| match name.parse::<AlertType>() {
                        Ok(t) => Some(t),
                        Err(e) => {
                            tracing::warn!(device_id = %self.device_id, error = %e, "Ignoring stored alert type");
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|types| !types.is_empty());

        DevicePreferences {
            device_id: self.device_id,
            min_severity,
            quiet_hours_start: self.quiet_hours_start.and_then(valid_hour),
            quiet_hours_end: self.quiet_hours_end.and_then(valid_hour),
            enabled_types,
        }
    }
}

fn valid_hour(hour: i16) -> Option<u8> {
    u8::try_from(hour).ok().filter(|h| *h <= 23)
}

pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn locations_for(&self, device_id: Uuid) -> Result<Vec<MonitoredLocation>, AppError> {
        let locations: Vec<MonitoredLocation> = sqlx::query_as(
            "SELECT latitude, longitude, name FROM device_locations WHERE device_id = $1 ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    /// Insert a device or take over the row that already owns the token.
    async fn upsert_by_token(
        conn: &mut PgConnection,
        registration: &DeviceRegistration,
    ) -> Result<Uuid, sqlx::Error> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO devices (id, channel_token, platform)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel_token)
            DO UPDATE SET platform = EXCLUDED.platform, updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(registration.device_id.unwrap_or_else(Uuid::new_v4))
        .bind(&registration.channel_token)
        .bind(registration.platform)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn list_devices(&self) -> Result<Vec<Device>, AppError> {
        let rows: Vec<DeviceRow> = sqlx::query_as(
            "SELECT id, channel_token, platform FROM devices ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        let location_rows: Vec<LocationRow> = sqlx::query_as(
            "SELECT device_id, latitude, longitude, name FROM device_locations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_device: HashMap<Uuid, Vec<MonitoredLocation>> = HashMap::new();
        for row in location_rows {
            by_device
                .entry(row.device_id)
                .or_default()
                .push(MonitoredLocation {
                    latitude: row.latitude,
                    longitude: row.longitude,
                    name: row.name,
                });
        }

        Ok(rows
            .into_iter()
            .map(|row| Device {
                locations: by_device.remove(&row.id).unwrap_or_default(),
                id: row.id,
                channel_token: row.channel_token,
                platform: row.platform,
            })
            .collect())
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<Device>, AppError> {
        let row: Option<DeviceRow> =
            sqlx::query_as("SELECT id, channel_token, platform FROM devices WHERE id = $1")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Device {
            locations: self.locations_for(row.id).await?,
            id: row.id,
            channel_token: row.channel_token,
            platform: row.platform,
        }))
    }

    async fn register_device(&self, registration: &DeviceRegistration) -> Result<Device, AppError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> = match registration.device_id {
            Some(id) => {
                sqlx::query_as("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        let device_id = match existing {
            Some((id,)) => {
                // Token moved to a known device: drop whichever row held it before
                sqlx::query("DELETE FROM devices WHERE channel_token = $1 AND id <> $2")
                    .bind(&registration.channel_token)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE devices SET channel_token = $2, platform = $3, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(&registration.channel_token)
                .bind(registration.platform)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => Self::upsert_by_token(&mut *tx, registration).await?,
        };

        sqlx::query("DELETE FROM device_locations WHERE device_id = $1")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        for location in &registration.locations {
            sqlx::query(
                "INSERT INTO device_locations (device_id, latitude, longitude, name) VALUES ($1, $2, $3, $4)",
            )
            .bind(device_id)
            .bind(location.latitude)
            .bind(location.longitude)
            .bind(&location.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Device {
            id: device_id,
            channel_token: registration.channel_token.clone(),
            platform: registration.platform,
            locations: registration.locations.clone(),
        })
    }

    async fn delete_device(&self, device_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_preferences(
        &self,
        device_id: Uuid,
    ) -> Result<Option<DevicePreferences>, AppError> {
        let row: Option<PreferencesRow> = sqlx::query_as(
            r#"
            SELECT device_id, min_severity, quiet_hours_start, quiet_hours_end, enabled_types
            FROM device_alert_preferences
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PreferencesRow::decode))
    }

    async fn upsert_preferences(&self, preferences: &DevicePreferences) -> Result<(), AppError> {
        let enabled_types: Option<Vec<String>> = preferences
            .enabled_types
            .as_ref()
            .map(|types| types.iter().map(|t| t.as_str().to_string()).collect());

        sqlx::query(
            r#"
            INSERT INTO device_alert_preferences
                (device_id, min_severity, quiet_hours_start, quiet_hours_end, enabled_types)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE SET
                min_severity = EXCLUDED.min_severity,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                enabled_types = EXCLUDED.enabled_types,
                updated_at = NOW()
            "#,
        )
        .bind(preferences.device_id)
        .bind(preferences.min_severity.as_str())
        .bind(preferences.quiet_hours_start.map(i16::from))
        .bind(preferences.quiet_hours_end.map(i16::from))
        .bind(enabled_types)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_sent_at(
        &self,
        alert_type: AlertType,
        location_name: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT last_sent_at FROM alert_cooldowns WHERE alert_type = $1 AND location_name = $2",
        )
        .bind(alert_type)
        .bind(location_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(at,)| at))
    }

    async fn record_sent(
        &self,
        alert_type: AlertType,
        location_name: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO alert_cooldowns (alert_type, location_name, last_sent_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (alert_type, location_name)
            DO UPDATE SET last_sent_at = EXCLUDED.last_sent_at
            "#,
        )
        .bind(alert_type)
        .bind(location_name)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delivery_exists(&self, alert_id: &str, device_id: Uuid) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM sent_alerts WHERE alert_id = $1 AND device_id = $2)",
        )
        .bind(alert_id)
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_delivery(
        &self,
        alert_id: &str,
        device_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sent_alerts (alert_id, device_id, sent_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (alert_id, device_id) DO NOTHING
            "#,
        )
        .bind(alert_id)
        .bind(device_id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO alert_history
                (alert_type, severity, title, description, location_name,
                 latitude, longitude, status, recipients_notified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.alert_type)
        .bind(entry.severity)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.location_name)
        .bind(entry.latitude)
        .bind(entry.longitude)
        .bind(entry.status)
        .bind(entry.recipients_notified)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_history(&self, query: &HistoryQuery) -> Result<HistoryPage, AppError> {
        let severity = query.severity.map(|s| s.as_str());
        let status = query.status.map(|s| s.as_str());

        let entries: Vec<HistoryEntry> = sqlx::query_as(
            r#"
            SELECT id, alert_type, severity, title, description, location_name,
                   latitude, longitude, status, recipients_notified, created_at
            FROM alert_history
            WHERE ($1::text IS NULL OR severity = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(severity)
        .bind(status)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM alert_history
            WHERE ($1::text IS NULL OR severity = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(severity)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistoryPage { entries, total })
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, AppError> {
        let history = sqlx::query("DELETE FROM alert_history WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let deliveries = sqlx::query("DELETE FROM sent_alerts WHERE sent_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(PurgeCounts {
            history,
            deliveries,
        })
    }
}
