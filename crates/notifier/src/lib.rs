//! Push notification delivery.
//!
//! The engine talks to devices only through [`PushChannel`]. The production
//! transport is [`FcmChannel`] (Firebase Cloud Messaging HTTP v1), which
//! reaches Android, iOS (via APNs) and web clients with one token format.

pub mod fcm;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use nimbus_common::types::{DeliveryPriority, Platform};

pub use fcm::FcmChannel;

/// A rendered notification for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub priority: DeliveryPriority,
    pub platform: Platform,
    /// String key/value pairs delivered to the app alongside the notification
    pub data: BTreeMap<String, String>,
}

/// Why a push send did not go through.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push channel is not configured")]
    NotConfigured,

    /// The token will never work again; the device should be forgotten.
    #[error("device token rejected as permanently invalid: {0}")]
    InvalidToken(String),

    /// The push service refused our own credentials (expired or revoked).
    #[error("push credentials rejected: {0}")]
    CredentialsRejected(String),

    #[error("push send timed out after {0:?}")]
    Timeout(Duration),

    /// Network trouble, quota, or a service outage. Safe to retry later.
    #[error("push send failed: {0}")]
    Transient(String),
}

/// Transport that accepts a device token and a message.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Whether credentials are present and have not been rejected. Delivery is
    /// skipped (not recorded) while this is false.
    fn is_ready(&self) -> bool;

    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError>;
}
