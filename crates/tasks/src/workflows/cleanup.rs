//! Notification retention cleanup.
//!
//! Daily job purging settled (delivered or failed) notifications older
//! than the retention window. Pending rows are never touched.

use crate::runtime::{Task, TaskContext, TaskError, TaskOutcome};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

pub const NOTIFICATION_CLEANUP_TASK: &str = "cleanup_old_notifications";

pub struct NotificationCleanupTask {
    retention_days: i64,
}

impl NotificationCleanupTask {
    pub fn new(retention_days: i64) -> Self {
        Self { retention_days }
    }
}

#[async_trait]
impl Task for NotificationCleanupTask {
    fn name(&self) -> &'static str {
        NOTIFICATION_CLEANUP_TASK
    }

    async fn run(&self, ctx: &TaskContext, _args: Value) -> Result<TaskOutcome, TaskError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
        let purged = ctx
            .stores()
            .notifications
            .purge_notifications_before(cutoff)
            .await
            .map_err(TaskError::Retryable)?;

        tracing::info!(purged, retention_days = self.retention_days, "notification cleanup done");
        Ok(TaskOutcome::Completed(json!({ "purged": purged })))
    }
}
