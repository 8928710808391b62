//! Visits (patient encounters) and their discharge-sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Active,
    Discharged,
    Cancelled,
}

/// Tri-state discriminator for the discharge EMR synchronisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// A patient visit.
///
/// `sync_status` and `is_synced_to_global` are written only by the
/// discharge sync task. Invariant: `is_synced_to_global == true` implies
/// exactly one `EmrSync` audit log entry exists for this visit and the
/// global cross-facility record has absorbed its local records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub hospital_name: String,
    pub region_id: Uuid,
    pub attending_doctor_id: Uuid,
    pub status: VisitStatus,
    pub discharge_summary: Option<String>,
    pub sync_status: SyncStatus,
    pub is_synced_to_global: bool,
    pub admitted_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
}

impl Visit {
    /// Create a new active visit.
    pub fn new(
        patient_id: Uuid,
        patient_name: impl Into<String>,
        hospital_name: impl Into<String>,
        region_id: Uuid,
        attending_doctor_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            patient_name: patient_name.into(),
            hospital_name: hospital_name.into(),
            region_id,
            attending_doctor_id,
            status: VisitStatus::Active,
            discharge_summary: None,
            sync_status: SyncStatus::Pending,
            is_synced_to_global: false,
            admitted_at: Utc::now(),
            discharged_at: None,
        }
    }
}
