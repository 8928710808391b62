//! Channel keys.
//!
//! Channels are named fan-out groups, colon-delimited on the wire:
//! `alerts:global`, `alerts:<region-id>`, `doctor:<user-id>`,
//! `nurse:<user-id>`, `user:<user-id>`. The key a subscriber lands on is
//! derived once at connect time from their role and stays fixed for the
//! life of the connection.

use carelink_core::{CoreError, CoreResult, Staff, StaffRole};
use uuid::Uuid;

/// A channel key in the colon-delimited namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    AlertsGlobal,
    AlertsRegion(Uuid),
    Doctor(Uuid),
    Nurse(Uuid),
    User(Uuid),
}

impl ChannelKey {
    /// Derive the channel for a staff member. Applied once at connect
    /// time; never re-evaluated mid-stream.
    ///
    /// Global roles get the global alerts channel; region-scoped admin
    /// roles get their region's alerts channel; doctors and nurses get a
    /// role channel keyed by their own id; everyone else gets a personal
    /// channel.
    pub fn for_staff(staff: &Staff) -> Self {
        match staff.role {
            StaffRole::SuperAdmin => ChannelKey::AlertsGlobal,
            StaffRole::RegionAdmin | StaffRole::HospitalAdmin => match staff.region_id {
                Some(region) => ChannelKey::AlertsRegion(region),
                None => ChannelKey::User(staff.id),
            },
            StaffRole::Doctor => ChannelKey::Doctor(staff.id),
            StaffRole::Nurse => ChannelKey::Nurse(staff.id),
            StaffRole::Clerk => ChannelKey::User(staff.id),
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKey::AlertsGlobal => write!(f, "alerts:global"),
            ChannelKey::AlertsRegion(region) => write!(f, "alerts:{}", region.simple()),
            ChannelKey::Doctor(id) => write!(f, "doctor:{}", id.simple()),
            ChannelKey::Nurse(id) => write!(f, "nurse:{}", id.simple()),
            ChannelKey::User(id) => write!(f, "user:{}", id.simple()),
        }
    }
}

impl std::str::FromStr for ChannelKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (scope, rest) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidInput(format!("invalid channel key: {s}")))?;

        if scope == "alerts" && rest == "global" {
            return Ok(ChannelKey::AlertsGlobal);
        }

        let id = Uuid::parse_str(rest)
            .map_err(|_| CoreError::InvalidInput(format!("invalid channel key id: {s}")))?;

        match scope {
            "alerts" => Ok(ChannelKey::AlertsRegion(id)),
            "doctor" => Ok(ChannelKey::Doctor(id)),
            "nurse" => Ok(ChannelKey::Nurse(id)),
            "user" => Ok(ChannelKey::User(id)),
            _ => Err(CoreError::InvalidInput(format!(
                "unknown channel scope: {scope}"
            ))),
        }
    }
}
