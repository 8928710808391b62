//! Staff members and roles.
//!
//! Roles drive two things in the realtime core: channel-key derivation at
//! SSE connect time, and the "admins in scope" fan-out when a discharge
//! completes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Professional role of a staff member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    /// Global scope; subscribes to `alerts:global`.
    SuperAdmin,
    /// Region scope; subscribes to `alerts:<region-id>`.
    RegionAdmin,
    /// Region scope (a hospital belongs to exactly one region).
    HospitalAdmin,
    Doctor,
    Nurse,
    /// Non-clinical staff; personal channel only.
    Clerk,
}

impl StaffRole {
    /// Whether this role receives administrative discharge notifications.
    pub fn is_admin(self) -> bool {
        matches!(
            self,
            StaffRole::SuperAdmin | StaffRole::RegionAdmin | StaffRole::HospitalAdmin
        )
    }
}

/// A staff member known to the system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Staff {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: StaffRole,
    /// Region the staff member is scoped to. `None` only for global roles.
    pub region_id: Option<Uuid>,
}
