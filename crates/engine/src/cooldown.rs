//! Cooldown engine: per (alert type, location name) suppression window.
//!
//! After an alert is sent for a place, the same hazard is not re-announced for
//! that place until the window has elapsed. The window is per place, not per
//! recipient; per-recipient throttling is handled by quiet hours.
//!
//! The key is the location *name* string, not its coordinates. Two devices that
//! label the same coordinates differently therefore cool down independently.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use nimbus_common::error::AppError;
use nimbus_common::types::AlertType;

use crate::store::AlertStore;

/// Store-backed cooldown engine.
pub struct CooldownEngine {
    store: Arc<dyn AlertStore>,
    window: Duration,
}

impl CooldownEngine {
    pub fn new(store: Arc<dyn AlertStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Whether an alert of `alert_type` for `location_name` was sent less than
    /// one window before `now`.
    pub async fn is_on_cooldown(
        &self,
        alert_type: AlertType,
        location_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let last_sent = self.store.last_sent_at(alert_type, location_name).await?;
        let suppressed = last_sent.is_some_and(|at| Self::within_window(at, now, self.window));

        if suppressed {
            tracing::debug!(
                alert_type = %alert_type,
                location = location_name,
                window_hours = self.window.num_hours(),
                "Alert suppressed, on cooldown"
            );
        }

        Ok(suppressed)
    }

    /// Record a send, replacing any earlier timestamp for the key.
    pub async fn record_sent(
        &self,
        alert_type: AlertType,
        location_name: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.store
            .record_sent(alert_type, location_name, sent_at)
            .await
    }

    fn within_window(last_sent: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(last_sent) < window
    }
}
