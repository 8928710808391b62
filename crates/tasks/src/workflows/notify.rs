//! Notification delivery and the pending sweep.
//!
//! Delivery moves a notification through `Pending → Sent → Delivered`,
//! or `Pending → Failed` once its own retry budget is spent. The entity's
//! status is the durable record of the outcome: the queue may still
//! re-run the task shell, but a settled notification is always skipped.

use crate::runtime::{parse_args, Task, TaskContext, TaskError, TaskOutcome};
use async_trait::async_trait;
use carelink_core::collab::DeliveryService;
use carelink_core::{CoreError, NotificationChannel, NotificationStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DELIVER_NOTIFICATION_TASK: &str = "deliver_notification";
pub const NOTIFICATION_SWEEP_TASK: &str = "sweep_pending_notifications";

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeliverNotificationArgs {
    pub notification_id: Uuid,
}

/// Delivers one notification through its channel's collaborator.
pub struct NotificationDeliveryTask {
    delivery: HashMap<NotificationChannel, Arc<dyn DeliveryService>>,
}

impl NotificationDeliveryTask {
    pub fn new(delivery: HashMap<NotificationChannel, Arc<dyn DeliveryService>>) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl Task for NotificationDeliveryTask {
    fn name(&self) -> &'static str {
        DELIVER_NOTIFICATION_TASK
    }

    async fn run(&self, ctx: &TaskContext, args: Value) -> Result<TaskOutcome, TaskError> {
        let args: DeliverNotificationArgs = parse_args(args)?;

        let mut notification = ctx
            .stores()
            .notifications
            .get_notification(args.notification_id)
            .await
            .map_err(TaskError::Retryable)?
            .ok_or_else(|| {
                TaskError::Terminal(CoreError::not_found("notification", args.notification_id))
            })?;

        if notification.is_settled() {
            return Ok(TaskOutcome::skipped(format!(
                "notification already {:?}",
                notification.status
            )));
        }

        let service = self.delivery.get(&notification.channel).ok_or_else(|| {
            TaskError::Terminal(CoreError::collaborator(
                "delivery",
                format!("no delivery service for channel {:?}", notification.channel),
            ))
        })?;

        match service.deliver(&notification).await {
            Ok(()) => {
                let now = Utc::now();
                notification.status = NotificationStatus::Delivered;
                notification.sent_at = Some(now);
                notification.delivered_at = Some(now);
                ctx.stores()
                    .notifications
                    .update_notification(notification)
                    .await
                    .map_err(TaskError::Retryable)?;
                Ok(TaskOutcome::Completed(json!({ "status": "delivered" })))
            }
            Err(e) => {
                notification.retry_count += 1;
                if notification.retry_count >= notification.max_retries {
                    // Terminal for this notification: the row records the
                    // failure, no further attempts by this task's logic.
                    notification.status = NotificationStatus::Failed;
                    notification.failure_reason = Some(e.to_string());
                    notification.failed_at = Some(Utc::now());
                    let id = notification.id;
                    ctx.stores()
                        .notifications
                        .update_notification(notification)
                        .await
                        .map_err(TaskError::Retryable)?;
                    tracing::error!(
                        notification_id = %id,
                        error = %e,
                        "notification delivery failed permanently"
                    );
                    Ok(TaskOutcome::Completed(json!({
                        "status": "failed",
                        "reason": e.to_string(),
                    })))
                } else {
                    ctx.stores()
                        .notifications
                        .update_notification(notification)
                        .await
                        .map_err(TaskError::Retryable)?;
                    Err(TaskError::Retryable(e))
                }
            }
        }
    }
}

/// Periodic sweep: re-enqueues delivery for every notification still in
/// `Pending`. Duplicate executions against an already-delivered row are
/// harmless — the delivery task status-checks before acting.
#[derive(Default)]
pub struct NotificationSweepTask;

#[async_trait]
impl Task for NotificationSweepTask {
    fn name(&self) -> &'static str {
        NOTIFICATION_SWEEP_TASK
    }

    async fn run(&self, ctx: &TaskContext, _args: Value) -> Result<TaskOutcome, TaskError> {
        let pending = ctx
            .stores()
            .notifications
            .list_pending_notification_ids()
            .await
            .map_err(TaskError::Retryable)?;

        let mut enqueued = 0usize;
        for notification_id in pending {
            match ctx.enqueue(
                DELIVER_NOTIFICATION_TASK,
                json!(DeliverNotificationArgs { notification_id }),
            ) {
                Ok(_) => enqueued += 1,
                Err(e) => {
                    tracing::warn!(notification_id = %notification_id, error = %e, "failed to enqueue delivery");
                }
            }
        }

        Ok(TaskOutcome::Completed(json!({ "enqueued": enqueued })))
    }
}
