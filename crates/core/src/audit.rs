//! Audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audited action kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Discharge,
    EmrSync,
}

/// A persisted audit log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: Uuid,
    /// State of the resource after the action, as recorded JSON.
    pub after_state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields required to append an audit log entry.
#[derive(Clone, Debug)]
pub struct NewAuditLogEntry {
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: Uuid,
    pub after_state: serde_json::Value,
}

impl AuditLogEntry {
    pub fn from_new(new: NewAuditLogEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: new.action,
            resource_type: new.resource_type,
            resource_id: new.resource_id,
            after_state: new.after_state,
            created_at: Utc::now(),
        }
    }
}
