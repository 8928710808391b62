//! # CareLink Core
//!
//! Core domain logic for the CareLink hospital administration backend.
//!
//! This crate contains the domain model and the seams to everything the
//! rest of the system treats as a collaborator:
//! - Visits, notifications, vitals readings, audit log entries and staff
//! - Persistence interfaces (`store`) with an in-memory implementation
//! - External collaborator interfaces (`collab`): EMR sync, case-sheet
//!   generation, notification delivery, access policy
//!
//! **No API concerns**: HTTP servers, SSE streaming and the task runtime
//! belong in `api-rest`, `carelink-realtime` and `carelink-tasks`.

#![warn(rust_2018_idioms)]

pub mod audit;
pub mod collab;
pub mod config;
pub mod error;
pub mod memory;
pub mod notification;
pub mod staff;
pub mod store;
pub mod visit;
pub mod vitals;

pub use audit::{AuditAction, AuditLogEntry, NewAuditLogEntry};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use notification::{
    NewNotification, Notification, NotificationChannel, NotificationStatus,
};
pub use staff::{Staff, StaffRole};
pub use store::Stores;
pub use visit::{SyncStatus, Visit, VisitStatus};
pub use vitals::{VitalBreach, VitalThresholds, VitalsReading};

use serde::{Deserialize, Serialize};

/// A non-empty, trimmed text value.
///
/// Used wherever a blank string would be a data error rather than a valid
/// value (patient names, hospital names, notification subjects).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Create a `NonEmptyText`, rejecting empty or whitespace-only input.
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidInput("text cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NonEmptyText {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<NonEmptyText> for String {
    fn from(value: NonEmptyText) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_keeps_value() {
        let text = NonEmptyText::new("  Ward 4  ").expect("should accept non-empty text");
        assert_eq!(text.as_str(), "Ward 4");
    }

    #[test]
    fn non_empty_text_rejects_whitespace_only() {
        let err = NonEmptyText::new("   ").expect_err("should reject whitespace-only text");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
