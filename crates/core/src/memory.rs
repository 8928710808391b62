//! In-memory store backend.
//!
//! Backs tests and the single-binary deployment. All tables live behind
//! one mutex, which makes the multi-write contracts (sync + audit in
//! `mark_visit_synced`) a single critical section.

use crate::audit::{AuditLogEntry, NewAuditLogEntry};
use crate::notification::{NewNotification, Notification, NotificationStatus};
use crate::staff::Staff;
use crate::store::{AuditStore, NotificationStore, StaffStore, VisitStore, VitalsStore};
use crate::visit::{SyncStatus, Visit, VisitStatus};
use crate::vitals::VitalsReading;
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    visits: HashMap<Uuid, Visit>,
    notifications: HashMap<Uuid, Notification>,
    vitals: HashMap<Uuid, VitalsReading>,
    audit: Vec<AuditLogEntry>,
    staff: HashMap<Uuid, Staff>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked writer poisons the lock; the store keeps serving
        // instead of cascading the panic into every caller.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VisitStore for MemoryStore {
    async fn insert_visit(&self, visit: Visit) -> CoreResult<()> {
        self.lock().visits.insert(visit.id, visit);
        Ok(())
    }

    async fn get_visit(&self, id: Uuid) -> CoreResult<Option<Visit>> {
        Ok(self.lock().visits.get(&id).cloned())
    }

    async fn list_active_visits(&self) -> CoreResult<Vec<Visit>> {
        let mut active: Vec<Visit> = self
            .lock()
            .visits
            .values()
            .filter(|v| v.status == VisitStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|v| v.admitted_at);
        Ok(active)
    }

    async fn discharge_visit(&self, id: Uuid, summary: String) -> CoreResult<Visit> {
        let mut inner = self.lock();
        let visit = inner
            .visits
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("visit", id))?;

        if visit.status != VisitStatus::Active {
            return Err(CoreError::InvalidState {
                resource: "visit",
                id: id.to_string(),
                state: format!("{:?}", visit.status),
                expected: "Active".into(),
            });
        }

        visit.status = VisitStatus::Discharged;
        visit.discharge_summary = Some(summary);
        visit.discharged_at = Some(Utc::now());
        Ok(visit.clone())
    }

    async fn mark_visit_synced(&self, id: Uuid, audit: NewAuditLogEntry) -> CoreResult<Visit> {
        let mut inner = self.lock();
        let visit = inner
            .visits
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("visit", id))?;

        visit.is_synced_to_global = true;
        visit.sync_status = SyncStatus::Synced;
        let visit = visit.clone();

        // Same critical section as the flag write: both-or-neither.
        inner.audit.push(AuditLogEntry::from_new(audit));
        Ok(visit)
    }

    async fn set_visit_sync_failed(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock();
        let visit = inner
            .visits
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("visit", id))?;
        visit.sync_status = SyncStatus::Failed;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, new: NewNotification) -> CoreResult<Notification> {
        let notification = Notification::from_new(new);
        self.lock()
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn get_notification(&self, id: Uuid) -> CoreResult<Option<Notification>> {
        Ok(self.lock().notifications.get(&id).cloned())
    }

    async fn update_notification(&self, notification: Notification) -> CoreResult<Notification> {
        let mut inner = self.lock();
        if !inner.notifications.contains_key(&notification.id) {
            return Err(CoreError::not_found("notification", notification.id));
        }
        inner
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn list_notifications_for(&self, recipient_id: Uuid) -> CoreResult<Vec<Notification>> {
        let mut list: Vec<Notification> = self
            .lock()
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        list.sort_by_key(|n| n.created_at);
        Ok(list)
    }

    async fn list_pending_notification_ids(&self) -> CoreResult<Vec<Uuid>> {
        let inner = self.lock();
        let mut pending: Vec<&Notification> = inner
            .notifications
            .values()
            .filter(|n| n.status == NotificationStatus::Pending)
            .collect();
        pending.sort_by_key(|n| n.created_at);
        Ok(pending.iter().map(|n| n.id).collect())
    }

    async fn delete_notification(&self, id: Uuid, recipient_id: Uuid) -> CoreResult<bool> {
        let mut inner = self.lock();
        match inner.notifications.get(&id) {
            Some(n) if n.recipient_id == recipient_id => {
                inner.notifications.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_notifications_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let mut inner = self.lock();
        let before = inner.notifications.len();
        inner.notifications.retain(|_, n| {
            let settled = matches!(
                n.status,
                NotificationStatus::Delivered | NotificationStatus::Failed
            );
            !(settled && n.created_at < cutoff)
        });
        Ok(before - inner.notifications.len())
    }
}

#[async_trait]
impl VitalsStore for MemoryStore {
    async fn record_vitals(&self, reading: VitalsReading) -> CoreResult<()> {
        self.lock().vitals.insert(reading.id, reading);
        Ok(())
    }

    async fn latest_vitals_since(
        &self,
        visit_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Option<VitalsReading>> {
        Ok(self
            .lock()
            .vitals
            .values()
            .filter(|r| r.visit_id == visit_id && r.recorded_at >= cutoff)
            .max_by_key(|r| r.recorded_at)
            .cloned())
    }

    async fn list_vitals_for_visit(&self, visit_id: Uuid) -> CoreResult<Vec<VitalsReading>> {
        let mut list: Vec<VitalsReading> = self
            .lock()
            .vitals
            .values()
            .filter(|r| r.visit_id == visit_id)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.recorded_at);
        Ok(list)
    }

    async fn mark_vitals_abnormal(&self, reading_id: Uuid) -> CoreResult<bool> {
        let mut inner = self.lock();
        let reading = inner
            .vitals
            .get_mut(&reading_id)
            .ok_or_else(|| CoreError::not_found("vitals reading", reading_id))?;
        if reading.is_abnormal {
            return Ok(false);
        }
        reading.is_abnormal = true;
        Ok(true)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, new: NewAuditLogEntry) -> CoreResult<AuditLogEntry> {
        let entry = AuditLogEntry::from_new(new);
        self.lock().audit.push(entry.clone());
        Ok(entry)
    }

    async fn audit_entries_for(&self, resource_id: Uuid) -> CoreResult<Vec<AuditLogEntry>> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StaffStore for MemoryStore {
    async fn insert_staff(&self, staff: Staff) -> CoreResult<()> {
        self.lock().staff.insert(staff.id, staff);
        Ok(())
    }

    async fn get_staff(&self, id: Uuid) -> CoreResult<Option<Staff>> {
        Ok(self.lock().staff.get(&id).cloned())
    }

    async fn admins_in_scope(&self, region_id: Uuid) -> CoreResult<Vec<Staff>> {
        let mut admins: Vec<Staff> = self
            .lock()
            .staff
            .values()
            .filter(|s| {
                s.role.is_admin() && (s.region_id.is_none() || s.region_id == Some(region_id))
            })
            .cloned()
            .collect();
        admins.sort_by_key(|s| s.id);
        Ok(admins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::notification::NotificationChannel;
    use crate::staff::StaffRole;

    fn sample_visit() -> Visit {
        Visit::new(
            Uuid::new_v4(),
            "Sarah Williams",
            "St Mary's",
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn discharge_rejects_non_active_visit() {
        let store = MemoryStore::new();
        let visit = sample_visit();
        let id = visit.id;
        store.insert_visit(visit).await.expect("insert should succeed");

        store
            .discharge_visit(id, "routine".into())
            .await
            .expect("first discharge should succeed");
        let err = store
            .discharge_visit(id, "again".into())
            .await
            .expect_err("second discharge should be rejected");
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn mark_synced_writes_flag_and_audit_together() {
        let store = MemoryStore::new();
        let visit = sample_visit();
        let id = visit.id;
        store.insert_visit(visit).await.expect("insert should succeed");

        let synced = store
            .mark_visit_synced(
                id,
                NewAuditLogEntry {
                    action: AuditAction::EmrSync,
                    resource_type: "visit",
                    resource_id: id,
                    after_state: serde_json::json!({"vitals": 3}),
                },
            )
            .await
            .expect("mark_visit_synced should succeed");

        assert!(synced.is_synced_to_global);
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        let entries = store
            .audit_entries_for(id)
            .await
            .expect("audit lookup should succeed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::EmrSync);
    }

    #[tokio::test]
    async fn mark_abnormal_is_idempotent() {
        let store = MemoryStore::new();
        let reading = VitalsReading::new(Uuid::new_v4(), 37.0, 80, 120, 80, 85);
        let id = reading.id;
        store
            .record_vitals(reading)
            .await
            .expect("record should succeed");

        assert!(store
            .mark_vitals_abnormal(id)
            .await
            .expect("first mark should succeed"));
        assert!(!store
            .mark_vitals_abnormal(id)
            .await
            .expect("second mark should be a no-op"));
    }

    #[tokio::test]
    async fn purge_only_removes_settled_rows_past_cutoff() {
        let store = MemoryStore::new();
        let recipient = Uuid::new_v4();

        let old_delivered = store
            .create_notification(NewNotification {
                recipient_id: recipient,
                channel: NotificationChannel::InApp,
                address: recipient.to_string(),
                subject: "old".into(),
                message: "old".into(),
                max_retries: 3,
            })
            .await
            .expect("create should succeed");
        let mut settled = old_delivered.clone();
        settled.status = NotificationStatus::Delivered;
        settled.created_at = Utc::now() - chrono::Duration::days(120);
        store
            .update_notification(settled)
            .await
            .expect("update should succeed");

        store
            .create_notification(NewNotification {
                recipient_id: recipient,
                channel: NotificationChannel::InApp,
                address: recipient.to_string(),
                subject: "fresh".into(),
                message: "fresh".into(),
                max_retries: 3,
            })
            .await
            .expect("create should succeed");

        let cutoff = Utc::now() - chrono::Duration::days(90);
        let purged = store
            .purge_notifications_before(cutoff)
            .await
            .expect("purge should succeed");
        assert_eq!(purged, 1);
        assert_eq!(
            store
                .list_notifications_for(recipient)
                .await
                .expect("list should succeed")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn admins_in_scope_includes_global_and_region_admins_only() {
        let store = MemoryStore::new();
        let region = Uuid::new_v4();
        let other_region = Uuid::new_v4();

        let global_admin = Staff {
            id: Uuid::new_v4(),
            name: "Priya Anand".into(),
            email: "priya@example.org".into(),
            role: StaffRole::SuperAdmin,
            region_id: None,
        };
        let region_admin = Staff {
            id: Uuid::new_v4(),
            name: "Tom Obi".into(),
            email: "tom@example.org".into(),
            role: StaffRole::RegionAdmin,
            region_id: Some(region),
        };
        let elsewhere_admin = Staff {
            id: Uuid::new_v4(),
            name: "Lena Koch".into(),
            email: "lena@example.org".into(),
            role: StaffRole::HospitalAdmin,
            region_id: Some(other_region),
        };
        let doctor = Staff {
            id: Uuid::new_v4(),
            name: "Ed Hart".into(),
            email: "ed@example.org".into(),
            role: StaffRole::Doctor,
            region_id: Some(region),
        };

        for s in [global_admin.clone(), region_admin.clone(), elsewhere_admin, doctor] {
            store.insert_staff(s).await.expect("insert should succeed");
        }

        let admins = store
            .admins_in_scope(region)
            .await
            .expect("admins_in_scope should succeed");
        let ids: Vec<Uuid> = admins.iter().map(|s| s.id).collect();
        assert_eq!(admins.len(), 2);
        assert!(ids.contains(&global_admin.id));
        assert!(ids.contains(&region_admin.id));
    }
}
