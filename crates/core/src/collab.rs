//! External collaborator interfaces.
//!
//! EMR synchronisation, case-sheet (PDF) generation, channel-specific
//! notification delivery and the authorisation gate are black-box
//! services with narrow call contracts. The workflows depend only on the
//! traits here; the structs below are the in-process implementations used
//! by the single-binary deployment.

use crate::notification::Notification;
use crate::staff::Staff;
use crate::store::VitalsStore;
use crate::visit::Visit;
use crate::vitals::VitalsReading;
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Per-category record counts produced by one EMR copy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmrSyncCounts {
    pub vitals: usize,
    pub labs: usize,
    pub prescriptions: usize,
}

/// Copies a visit's local clinical records into the global cross-facility
/// record.
///
/// Contract: the copy must be safe to repeat — a retry after partial
/// completion must not duplicate global records.
#[async_trait]
pub trait EmrSyncService: Send + Sync {
    async fn copy_visit_records(&self, visit: &Visit) -> CoreResult<EmrSyncCounts>;
}

/// Generates the discharge case-sheet artefact, returning its URL.
#[async_trait]
pub trait CaseSheetService: Send + Sync {
    async fn generate_case_sheet(&self, visit: &Visit) -> CoreResult<String>;
}

/// Channel-specific notification delivery (email gateway, push service,
/// in-app inbox).
#[async_trait]
pub trait DeliveryService: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> CoreResult<()>;
}

/// Actions subject to the authorisation gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    DischargeVisit,
    ReadNotifications,
    DeleteNotification,
    SubscribeEvents,
    SendMessage,
}

/// Authorisation gate: `authorize(staff, action) -> bool`.
///
/// Authentication and RBAC internals are outside this system; handlers
/// consume the decision only.
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, staff: &Staff, action: Action) -> bool;
}

/// Permissive policy for deployments where the gate lives upstream.
#[derive(Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _staff: &Staff, _action: Action) -> bool {
        true
    }
}

/// The absorbed state of one visit in the global record.
#[derive(Clone, Debug, Default)]
pub struct GlobalVisitRecord {
    pub vitals: Vec<VitalsReading>,
}

/// In-process global cross-facility record.
///
/// Upserts by visit id: each copy replaces the visit's record set
/// wholesale, so re-running the copy after a crash cannot duplicate
/// records.
pub struct GlobalRecordSync {
    vitals: Arc<dyn VitalsStore>,
    global: Mutex<HashMap<Uuid, GlobalVisitRecord>>,
}

impl GlobalRecordSync {
    pub fn new(vitals: Arc<dyn VitalsStore>) -> Self {
        Self {
            vitals,
            global: Mutex::new(HashMap::new()),
        }
    }

    /// The global record currently held for a visit, if any.
    pub fn record_for(&self, visit_id: Uuid) -> Option<GlobalVisitRecord> {
        self.global
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&visit_id)
            .cloned()
    }
}

#[async_trait]
impl EmrSyncService for GlobalRecordSync {
    async fn copy_visit_records(&self, visit: &Visit) -> CoreResult<EmrSyncCounts> {
        let vitals = self.vitals.list_vitals_for_visit(visit.id).await?;
        let counts = EmrSyncCounts {
            vitals: vitals.len(),
            // Lab and prescription records live outside this system;
            // their counts stay zero.
            labs: 0,
            prescriptions: 0,
        };

        self.global
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(visit.id, GlobalVisitRecord { vitals });

        tracing::info!(
            visit_id = %visit.id,
            vitals = counts.vitals,
            "copied local records to global EMR"
        );
        Ok(counts)
    }
}

/// Case-sheet service producing URLs under a fixed artefact base.
pub struct LocalCaseSheetService {
    artefact_base_url: String,
}

impl LocalCaseSheetService {
    pub fn new(artefact_base_url: impl Into<String>) -> CoreResult<Self> {
        let artefact_base_url = artefact_base_url.into();
        if artefact_base_url.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "artefact_base_url cannot be empty".into(),
            ));
        }
        Ok(Self { artefact_base_url })
    }
}

#[async_trait]
impl CaseSheetService for LocalCaseSheetService {
    async fn generate_case_sheet(&self, visit: &Visit) -> CoreResult<String> {
        let url = format!(
            "{}/case-sheets/{}.pdf",
            self.artefact_base_url.trim_end_matches('/'),
            visit.id.simple()
        );
        tracing::info!(visit_id = %visit.id, url = %url, "generated discharge case sheet");
        Ok(url)
    }
}

/// Delivery service that records the send in the log only. Stands in for
/// the email/push gateways in development deployments.
#[derive(Default)]
pub struct LogDeliveryService;

#[async_trait]
impl DeliveryService for LogDeliveryService {
    async fn deliver(&self, notification: &Notification) -> CoreResult<()> {
        tracing::info!(
            notification_id = %notification.id,
            channel = ?notification.channel,
            address = %notification.address,
            subject = %notification.subject,
            "delivered notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn global_sync_upserts_by_visit_id() {
        let store = Arc::new(MemoryStore::new());
        let visit = Visit::new(
            Uuid::new_v4(),
            "Sarah Williams",
            "St Mary's",
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        store
            .record_vitals(VitalsReading::new(visit.id, 36.9, 74, 118, 78, 98))
            .await
            .expect("record should succeed");

        let sync = GlobalRecordSync::new(store.clone());
        let first = sync
            .copy_visit_records(&visit)
            .await
            .expect("first copy should succeed");
        assert_eq!(first.vitals, 1);

        // A second run replaces, never appends.
        let second = sync
            .copy_visit_records(&visit)
            .await
            .expect("second copy should succeed");
        assert_eq!(second.vitals, 1);
        let record = sync.record_for(visit.id).expect("record should exist");
        assert_eq!(record.vitals.len(), 1);
    }
}
