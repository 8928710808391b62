//! Durable notifications.
//!
//! A notification row is the guaranteed delivery path; live SSE pushes
//! are a best-effort accelerant on top of it. Rows are mutated only by
//! the delivery task and deleted only by their owner or the retention
//! cleanup job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
    Push,
}

/// Delivery state machine: `Pending → Sent → Delivered`, or
/// `Pending → Failed` once retries are exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// A persisted notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub channel: NotificationChannel,
    /// Channel-specific address (email address, device token, user id).
    pub address: String,
    pub subject: String,
    pub message: String,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a notification.
#[derive(Clone, Debug)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub channel: NotificationChannel,
    pub address: String,
    pub subject: String,
    pub message: String,
    pub max_retries: u32,
}

impl Notification {
    pub fn from_new(new: NewNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id: new.recipient_id,
            channel: new.channel,
            address: new.address,
            subject: new.subject,
            message: new.message,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            failure_reason: None,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the delivery task should skip this notification entirely.
    pub fn is_settled(&self) -> bool {
        !matches!(self.status, NotificationStatus::Pending)
    }
}
