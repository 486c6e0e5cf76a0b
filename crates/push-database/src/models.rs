//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application record - a push-enabled app with its gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    /// Development (sandbox) certificate, PEM encoded.
    pub dev_cert: String,
    /// Production certificate, PEM encoded.
    pub prod_cert: String,
    /// `None` until normalised; the courier defaults it to sandbox.
    pub sandbox_mode: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New application for insertion.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub id: String,
    pub name: String,
    pub dev_cert: String,
    pub prod_cert: String,
    pub sandbox_mode: Option<bool>,
}

/// Notification record - one queued push for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub app_id: String,
    /// Position in the application's queue. Selection order follows it.
    pub sequence_number: i64,
    /// Device token as 64 hex characters.
    pub device_token: String,
    /// JSON body delivered to the device (the `aps` dictionary and extras).
    pub payload: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once the gateway accepted the notification. Never reset.
    pub sent: bool,
    /// Gateway status code of the latest attempt, if any.
    pub result_code: Option<i32>,
    /// Number of times a frame for this notification was written.
    pub attempts: i64,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New notification for insertion.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: String,
    pub app_id: String,
    pub device_token: String,
    pub payload: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    /// Build a new notification with a generated ID and no expiry.
    pub fn new(app_id: &str, device_token: &str, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            device_token: device_token.to_string(),
            payload,
            expires_at: None,
        }
    }
}
