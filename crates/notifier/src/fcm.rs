//! Firebase Cloud Messaging (HTTP v1) transport.
//!
//! Error mapping follows the FCM error codes:
//! - `UNREGISTERED`, `SENDER_ID_MISMATCH`, and `INVALID_ARGUMENT` responses
//!   that name the registration token mean the token is dead
//! - 401/403 mean the bearer token was rejected; the channel stops reporting
//!   ready until the process is restarted with fresh credentials
//! - everything else (quota, 5xx, network) is transient

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use nimbus_common::types::{DeliveryPriority, Platform};

use crate::{PushChannel, PushError, PushMessage};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1/projects";

/// Android notification channels registered by the mobile app.
const ANDROID_CHANNEL_URGENT: &str = "weather_alerts_urgent";
const ANDROID_CHANNEL_DEFAULT: &str = "weather_alerts";

pub struct FcmChannel {
    http: reqwest::Client,
    project_id: Option<String>,
    access_token: Option<String>,
    base_url: String,
    timeout: Duration,
    credentials_rejected: AtomicBool,
}

impl FcmChannel {
    /// Build the channel. Missing credentials leave it "not ready" rather than
    /// failing startup, so the rest of the service keeps running.
    pub fn new(
        project_id: Option<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transient(format!("failed to build HTTP client: {}", e)))?;

        let channel = Self {
            http,
            project_id: project_id.filter(|p| !p.is_empty()),
            access_token: access_token.filter(|t| !t.is_empty()),
            base_url: FCM_BASE_URL.to_string(),
            timeout,
            credentials_rejected: AtomicBool::new(false),
        };

        if !channel.is_ready() {
            tracing::warn!("FCM credentials missing, push delivery disabled");
        }

        Ok(channel)
    }

    /// Point the channel at a different API root (e.g. a local emulator).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the FCM v1 request body for a message.
    pub fn build_body(token: &str, message: &PushMessage) -> Value {
        let (android_priority, apns_priority, urgency, android_channel) = match message.priority {
            DeliveryPriority::High => ("HIGH", "10", "high", ANDROID_CHANNEL_URGENT),
            DeliveryPriority::Normal => ("NORMAL", "5", "normal", ANDROID_CHANNEL_DEFAULT),
        };

        let mut body = json!({
            "message": {
                "token": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        });

        let platform_block = match message.platform {
            Platform::Android => (
                "android",
                json!({
                    "priority": android_priority,
                    "notification": { "channel_id": android_channel },
                }),
            ),
            Platform::Ios => (
                "apns",
                json!({
                    "headers": { "apns-priority": apns_priority },
                    "payload": { "aps": { "sound": "default" } },
                }),
            ),
            Platform::Web => (
                "webpush",
                json!({
                    "headers": { "Urgency": urgency },
                }),
            ),
        };

        body["message"][platform_block.0] = platform_block.1;
        body
    }

    /// Map a non-2xx FCM response to a [`PushError`].
    pub fn classify_error(status: u16, body: &str) -> PushError {
        #[derive(Deserialize)]
        struct Envelope {
            error: FcmError,
        }

        #[derive(Deserialize)]
        struct FcmError {
            #[serde(default)]
            message: String,
            #[serde(default)]
            status: String,
            #[serde(default)]
            details: Vec<FcmErrorDetail>,
        }

        #[derive(Deserialize)]
        struct FcmErrorDetail {
            #[serde(rename = "errorCode")]
            error_code: Option<String>,
        }

        let auth_failure = matches!(status, 401 | 403);

        let Ok(envelope) = serde_json::from_str::<Envelope>(body) else {
            if auth_failure {
                return PushError::CredentialsRejected(format!("FCM returned status {}", status));
            }
            return PushError::Transient(format!("FCM returned status {}", status));
        };
        let err = envelope.error;

        let codes: Vec<&str> = err
            .details
            .iter()
            .filter_map(|d| d.error_code.as_deref())
            .collect();

        let unregistered = codes.contains(&"UNREGISTERED") || err.status == "NOT_FOUND";
        let mismatched = codes.contains(&"SENDER_ID_MISMATCH");
        let bad_token = (codes.contains(&"INVALID_ARGUMENT") || err.status == "INVALID_ARGUMENT")
            && err.message.to_lowercase().contains("registration token");

        if unregistered || mismatched || bad_token {
            PushError::InvalidToken(err.message)
        } else if auth_failure
            || err.status == "UNAUTHENTICATED"
            || err.status == "PERMISSION_DENIED"
        {
            PushError::CredentialsRejected(format!("FCM {} ({}): {}", status, err.status, err.message))
        } else {
            PushError::Transient(format!("FCM {} ({}): {}", status, err.status, err.message))
        }
    }
}

#[async_trait]
impl PushChannel for FcmChannel {
    fn is_ready(&self) -> bool {
        self.project_id.is_some()
            && self.access_token.is_some()
            && !self.credentials_rejected.load(Ordering::Relaxed)
    }

    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        let (Some(project_id), Some(access_token)) = (&self.project_id, &self.access_token) else {
            return Err(PushError::NotConfigured);
        };

        let url = format!("{}/{}/messages:send", self.base_url, project_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&Self::build_body(token, message))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout(self.timeout)
                } else {
                    PushError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let err = Self::classify_error(status.as_u16(), &body);
        if let PushError::CredentialsRejected(reason) = &err {
            if !self.credentials_rejected.swap(true, Ordering::Relaxed) {
                tracing::error!(
                    reason = %reason,
                    "FCM rejected the access token, push delivery disabled until restart"
                );
            }
        }
        Err(err)
    }
}
