//! Persistence interfaces.
//!
//! The relational schema and ORM mechanics are outside this system; the
//! realtime core and the task workflows consume persistence through these
//! traits. `memory::MemoryStore` implements all of them for tests and the
//! single-binary deployment.

use crate::audit::{AuditLogEntry, NewAuditLogEntry};
use crate::notification::{NewNotification, Notification};
use crate::staff::Staff;
use crate::visit::Visit;
use crate::vitals::VitalsReading;
use crate::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait VisitStore: Send + Sync {
    async fn insert_visit(&self, visit: Visit) -> CoreResult<()>;

    async fn get_visit(&self, id: Uuid) -> CoreResult<Option<Visit>>;

    async fn list_active_visits(&self) -> CoreResult<Vec<Visit>>;

    /// Transition an active visit to discharged with the given summary.
    ///
    /// # Errors
    /// `NotFound` if the visit does not exist; `InvalidState` if it is not
    /// active.
    async fn discharge_visit(&self, id: Uuid, summary: String) -> CoreResult<Visit>;

    /// Set `is_synced_to_global = true`, `sync_status = Synced`, and append
    /// the given audit entry.
    ///
    /// Contract: both writes happen atomically — an implementation backed
    /// by SQL must use a single transaction, so a crash can never leave a
    /// synced-but-unaudited visit visible.
    async fn mark_visit_synced(&self, id: Uuid, audit: NewAuditLogEntry) -> CoreResult<Visit>;

    /// Record terminal sync failure (`sync_status = Failed`).
    async fn set_visit_sync_failed(&self, id: Uuid) -> CoreResult<()>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, new: NewNotification) -> CoreResult<Notification>;

    async fn get_notification(&self, id: Uuid) -> CoreResult<Option<Notification>>;

    /// Replace the stored notification with the given state.
    async fn update_notification(&self, notification: Notification) -> CoreResult<Notification>;

    async fn list_notifications_for(&self, recipient_id: Uuid) -> CoreResult<Vec<Notification>>;

    /// Ids of all notifications still in `Pending`, oldest first.
    async fn list_pending_notification_ids(&self) -> CoreResult<Vec<Uuid>>;

    /// Delete a notification owned by `recipient_id`. Returns `false` if
    /// no such notification exists (idempotent).
    async fn delete_notification(&self, id: Uuid, recipient_id: Uuid) -> CoreResult<bool>;

    /// Purge settled (delivered or failed) notifications created before
    /// `cutoff`. Returns the number removed.
    async fn purge_notifications_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize>;
}

#[async_trait]
pub trait VitalsStore: Send + Sync {
    async fn record_vitals(&self, reading: VitalsReading) -> CoreResult<()>;

    /// The most recent reading for a visit recorded at or after `cutoff`.
    async fn latest_vitals_since(
        &self,
        visit_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Option<VitalsReading>>;

    /// All readings for a visit, oldest first.
    async fn list_vitals_for_visit(&self, visit_id: Uuid) -> CoreResult<Vec<VitalsReading>>;

    /// Mark a reading abnormal. Returns `false` (and performs no write)
    /// if it is already marked — idempotent.
    async fn mark_vitals_abnormal(&self, reading_id: Uuid) -> CoreResult<bool>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, new: NewAuditLogEntry) -> CoreResult<AuditLogEntry>;

    async fn audit_entries_for(&self, resource_id: Uuid) -> CoreResult<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait StaffStore: Send + Sync {
    async fn insert_staff(&self, staff: Staff) -> CoreResult<()>;

    async fn get_staff(&self, id: Uuid) -> CoreResult<Option<Staff>>;

    /// Administrative staff in scope for a region: global admins plus
    /// admins bound to that region.
    async fn admins_in_scope(&self, region_id: Uuid) -> CoreResult<Vec<Staff>>;
}

/// Aggregate handle to every store, handed to handlers and task
/// executions. One `Stores` value corresponds to one database session in
/// an ORM-backed deployment.
#[derive(Clone)]
pub struct Stores {
    pub visits: Arc<dyn VisitStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub vitals: Arc<dyn VitalsStore>,
    pub audit: Arc<dyn AuditStore>,
    pub staff: Arc<dyn StaffStore>,
}

impl Stores {
    /// Build a `Stores` from a single backend implementing every trait.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: VisitStore + NotificationStore + VitalsStore + AuditStore + StaffStore + 'static,
    {
        Self {
            visits: backend.clone(),
            notifications: backend.clone(),
            vitals: backend.clone(),
            audit: backend.clone(),
            staff: backend,
        }
    }
}
