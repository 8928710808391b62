//! Task workflows.
//!
//! Each workflow is a named [`crate::runtime::Task`] driven by the queue:
//! discharge EMR synchronisation, vitals-anomaly monitoring, notification
//! delivery (with its sweep) and notification retention cleanup.

pub mod cleanup;
pub mod discharge;
pub mod notify;
pub mod vitals;

pub use cleanup::{NotificationCleanupTask, NOTIFICATION_CLEANUP_TASK};
pub use discharge::{DischargeSyncArgs, DischargeSyncTask, DISCHARGE_SYNC_TASK};
pub use notify::{
    DeliverNotificationArgs, NotificationDeliveryTask, NotificationSweepTask,
    DELIVER_NOTIFICATION_TASK, NOTIFICATION_SWEEP_TASK,
};
pub use vitals::{VitalsMonitorTask, VITALS_MONITOR_TASK};
