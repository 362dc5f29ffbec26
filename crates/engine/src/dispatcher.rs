//! Delivery dispatcher: one push per (alert, device), at most once.
//!
//! Per pair:
//! 1. Skip if a delivery record already exists (double trigger, retried request)
//! 2. Skip without recording if the channel is not configured
//! 3. Map severity to push priority
//! 4. Send with a timeout; on success write the delivery record
//! 5. On an invalid-token response delete the device so later cycles stop trying
//! 6. On any other failure log and move on; no record, so a later cycle retries

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use nimbus_common::error::AppError;
use nimbus_common::types::{AlertCandidate, Device};
use nimbus_notifier::{PushChannel, PushError, PushMessage};

use crate::store::AlertStore;

/// What happened to one (alert, device) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    AlreadySent,
    ChannelUnavailable,
    /// Token was permanently invalid and the device has been deleted
    RecipientRemoved,
    Failed,
}

pub struct DeliveryDispatcher {
    store: Arc<dyn AlertStore>,
    channel: Arc<dyn PushChannel>,
    send_timeout: Duration,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<dyn AlertStore>,
        channel: Arc<dyn PushChannel>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            send_timeout,
        }
    }

    pub fn channel_ready(&self) -> bool {
        self.channel.is_ready()
    }

    /// Deliver `alert` to `device`. Returns true only if a new send happened.
    pub async fn deliver(&self, device: &Device, alert: &AlertCandidate) -> Result<bool, AppError> {
        Ok(self.dispatch(device, alert).await? == DeliveryOutcome::Sent)
    }

    /// Deliver and report the detailed outcome.
    ///
    /// Only store failures surface as `Err`; channel problems are outcomes.
    pub async fn dispatch(
        &self,
        device: &Device,
        alert: &AlertCandidate,
    ) -> Result<DeliveryOutcome, AppError> {
        if self.store.delivery_exists(&alert.id, device.id).await? {
            tracing::debug!(
                alert_id = %alert.id,
                device_id = %device.id,
                "Already delivered, skipping"
            );
            return Ok(DeliveryOutcome::AlreadySent);
        }

        if !self.channel.is_ready() {
            tracing::warn!(
                alert_id = %alert.id,
                device_id = %device.id,
                "Push channel not configured, delivery deferred"
            );
            return Ok(DeliveryOutcome::ChannelUnavailable);
        }

        let message = Self::build_message(device, alert);
        let result = match tokio::time::timeout(
            self.send_timeout,
            self.channel.send(&device.channel_token, &message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout(self.send_timeout)),
        };

        match result {
            Ok(()) => {
                let inserted = self
                    .store
                    .record_delivery(&alert.id, device.id, Utc::now())
                    .await?;
                if !inserted {
                    tracing::warn!(
                        alert_id = %alert.id,
                        device_id = %device.id,
                        "Delivery record already present after send"
                    );
                }

                tracing::info!(
                    alert_id = %alert.id,
                    device_id = %device.id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    "Alert delivered"
                );
                Ok(DeliveryOutcome::Sent)
            }
            Err(PushError::InvalidToken(reason)) => {
                tracing::warn!(
                    device_id = %device.id,
                    reason = %reason,
                    "Push token permanently invalid, removing device"
                );
                if let Err(e) = self.store.delete_device(device.id).await {
                    tracing::error!(
                        device_id = %device.id,
                        error = %e,
                        "Failed to remove device with invalid token"
                    );
                }
                Ok(DeliveryOutcome::RecipientRemoved)
            }
            Err(PushError::NotConfigured) => Ok(DeliveryOutcome::ChannelUnavailable),
            Err(PushError::CredentialsRejected(reason)) => {
                tracing::error!(
                    alert_id = %alert.id,
                    device_id = %device.id,
                    reason = %reason,
                    "Push credentials rejected, delivery deferred"
                );
                Ok(DeliveryOutcome::ChannelUnavailable)
            }
            Err(e) => {
                tracing::warn!(
                    alert_id = %alert.id,
                    device_id = %device.id,
                    error = %e,
                    "Push delivery failed, will retry next cycle"
                );
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Render the push payload for one device.
    pub fn build_message(device: &Device, alert: &AlertCandidate) -> PushMessage {
        let mut data = BTreeMap::new();
        data.insert("alert_id".to_string(), alert.id.clone());
        data.insert("alert_type".to_string(), alert.alert_type.to_string());
        data.insert("severity".to_string(), alert.severity.to_string());
        data.insert("location_name".to_string(), alert.location_name.clone());
        data.insert("latitude".to_string(), alert.latitude.to_string());
        data.insert("longitude".to_string(), alert.longitude.to_string());
        data.insert("issued_at".to_string(), alert.issued_at.to_rfc3339());

        PushMessage {
            title: alert.title.clone(),
            body: alert.description.clone(),
            priority: alert.severity.delivery_priority(),
            platform: device.platform,
            data,
        }
    }
}
