//! Discharge EMR synchronisation.
//!
//! Given a visit id: copy local clinical records to the global
//! cross-facility record, generate the discharge case sheet, mark the
//! visit synced together with its audit entry, then fan out
//! discharge-complete notifications. Idempotent re-entry: a fully-synced
//! visit is a guaranteed no-op.

use crate::runtime::{parse_args, Task, TaskContext, TaskError, TaskOutcome};
use crate::workflows::notify::{DeliverNotificationArgs, DELIVER_NOTIFICATION_TASK};
use async_trait::async_trait;
use carelink_core::collab::{CaseSheetService, EmrSyncService};
use carelink_core::{
    AuditAction, CoreError, NewAuditLogEntry, NewNotification, NotificationChannel, Visit,
    VisitStatus,
};
use carelink_realtime::{BroadcastEvent, ChannelKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const DISCHARGE_SYNC_TASK: &str = "sync_discharged_visit";

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DischargeSyncArgs {
    pub visit_id: Uuid,
}

/// The discharge sync workflow task.
pub struct DischargeSyncTask {
    emr: Arc<dyn EmrSyncService>,
    case_sheets: Arc<dyn CaseSheetService>,
    notification_max_retries: u32,
}

impl DischargeSyncTask {
    pub fn new(
        emr: Arc<dyn EmrSyncService>,
        case_sheets: Arc<dyn CaseSheetService>,
        notification_max_retries: u32,
    ) -> Self {
        Self {
            emr,
            case_sheets,
            notification_max_retries,
        }
    }

    /// Step 5: create one notification per admin in scope and broadcast
    /// the live event. Best-effort — failures are logged and never roll
    /// back the committed sync.
    async fn fan_out(&self, ctx: &TaskContext, visit: &Visit) {
        let admins = match ctx.stores().staff.admins_in_scope(visit.region_id).await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::warn!(visit_id = %visit.id, error = %e, "admin lookup failed, skipping notifications");
                return;
            }
        };

        for admin in admins {
            let created = ctx
                .stores()
                .notifications
                .create_notification(NewNotification {
                    recipient_id: admin.id,
                    channel: NotificationChannel::InApp,
                    address: admin.id.to_string(),
                    subject: "Patient discharged".into(),
                    message: format!(
                        "{} has been discharged from {} and the EMR sync completed.",
                        visit.patient_name, visit.hospital_name
                    ),
                    max_retries: self.notification_max_retries,
                })
                .await;

            match created {
                Ok(notification) => {
                    if let Err(e) = ctx.enqueue(
                        DELIVER_NOTIFICATION_TASK,
                        json!(DeliverNotificationArgs {
                            notification_id: notification.id,
                        }),
                    ) {
                        tracing::warn!(notification_id = %notification.id, error = %e, "failed to enqueue delivery");
                    }
                }
                Err(e) => {
                    tracing::warn!(visit_id = %visit.id, error = %e, "failed to create discharge notification");
                }
            }
        }

        ctx.broadcaster().broadcast(
            &ChannelKey::AlertsRegion(visit.region_id),
            BroadcastEvent::discharge_complete(&visit.patient_name, &visit.hospital_name, visit.id),
        );
    }
}

#[async_trait]
impl Task for DischargeSyncTask {
    fn name(&self) -> &'static str {
        DISCHARGE_SYNC_TASK
    }

    async fn run(&self, ctx: &TaskContext, args: Value) -> Result<TaskOutcome, TaskError> {
        let args: DischargeSyncArgs = parse_args(args)?;

        let visit = ctx
            .stores()
            .visits
            .get_visit(args.visit_id)
            .await
            .map_err(TaskError::Retryable)?
            .ok_or_else(|| TaskError::Terminal(CoreError::not_found("visit", args.visit_id)))?;

        if visit.status != VisitStatus::Discharged {
            return Ok(TaskOutcome::skipped("visit is not discharged"));
        }
        if visit.is_synced_to_global {
            return Ok(TaskOutcome::skipped("visit already synced to global record"));
        }

        // Step 1: copy local records to the global record. The
        // collaborator upserts by natural key, so re-running after a
        // partial failure cannot duplicate records.
        let counts = match self.emr.copy_visit_records(&visit).await {
            Ok(counts) => counts,
            Err(e) => {
                if ctx.final_attempt() {
                    // Durable tri-state reflects exhaustion; the job
                    // record carries the error detail.
                    if let Err(store_err) =
                        ctx.stores().visits.set_visit_sync_failed(visit.id).await
                    {
                        tracing::error!(visit_id = %visit.id, error = %store_err, "failed to record sync failure");
                    }
                }
                return Err(TaskError::Retryable(e));
            }
        };

        // Step 2: case sheet. Non-fatal — clinical sync matters more
        // than the document, so a failure is logged and not retried.
        let pdf_url = match self.case_sheets.generate_case_sheet(&visit).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(visit_id = %visit.id, error = %e, "case sheet generation failed, continuing without PDF");
                None
            }
        };

        // Steps 3 + 4: flag flip and audit entry, both-or-neither.
        let after_state = json!({
            "sync_counts": counts,
            "pdf_url": pdf_url,
        });
        let synced = ctx
            .stores()
            .visits
            .mark_visit_synced(
                visit.id,
                NewAuditLogEntry {
                    action: AuditAction::EmrSync,
                    resource_type: "visit",
                    resource_id: visit.id,
                    after_state: after_state.clone(),
                },
            )
            .await
            .map_err(TaskError::Retryable)?;

        // Step 5, outside the transaction.
        self.fan_out(ctx, &synced).await;

        Ok(TaskOutcome::Completed(json!({
            "visit_id": visit.id,
            "sync_counts": counts,
            "pdf_url": pdf_url,
        })))
    }
}
