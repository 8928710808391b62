//! Vitals-anomaly monitoring.
//!
//! Periodic scan over all active visits: the single most recent reading
//! inside the lookback window is evaluated against the clinical
//! thresholds; a breach raises one emergency alert aggregating every
//! breached metric, pushed through both the durable notification path and
//! the region's live channel. Visits are isolated — one visit's failure
//! never aborts the rest of the scan.

use crate::runtime::{Task, TaskContext, TaskError, TaskOutcome};
use crate::workflows::notify::{DeliverNotificationArgs, DELIVER_NOTIFICATION_TASK};
use async_trait::async_trait;
use carelink_core::{
    CoreResult, NewNotification, NotificationChannel, VitalBreach, VitalThresholds, Visit,
};
use carelink_realtime::{AlertSeverity, BroadcastEvent, ChannelKey};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

pub const VITALS_MONITOR_TASK: &str = "monitor_active_vitals";

/// The periodic vitals monitoring task.
pub struct VitalsMonitorTask {
    thresholds: VitalThresholds,
    window: Duration,
    notification_max_retries: u32,
}

impl VitalsMonitorTask {
    pub fn new(
        thresholds: VitalThresholds,
        window: Duration,
        notification_max_retries: u32,
    ) -> Self {
        Self {
            thresholds,
            window,
            notification_max_retries,
        }
    }

    fn severity(breaches: &[VitalBreach]) -> AlertSeverity {
        let spo2_breached = breaches.iter().any(|b| b.vital_type == "spo2");
        if spo2_breached || breaches.len() > 1 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        }
    }

    /// Check one visit; returns whether an alert was raised.
    async fn check_visit(&self, ctx: &TaskContext, visit: &Visit) -> CoreResult<bool> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::minutes(5));
        let Some(reading) = ctx
            .stores()
            .vitals
            .latest_vitals_since(visit.id, cutoff)
            .await?
        else {
            return Ok(false);
        };

        let breaches = self.thresholds.breaches(&reading);
        if breaches.is_empty() {
            return Ok(false);
        }

        // An already-marked reading has already been alerted on; the
        // idempotent mark doubles as the dedup check across scans.
        if !ctx.stores().vitals.mark_vitals_abnormal(reading.id).await? {
            return Ok(false);
        }

        let metric_summary = breaches
            .iter()
            .map(|b| format!("{} {}", b.vital_type, b.vital_value))
            .collect::<Vec<_>>()
            .join(", ");

        let notification = ctx
            .stores()
            .notifications
            .create_notification(NewNotification {
                recipient_id: visit.attending_doctor_id,
                channel: NotificationChannel::Push,
                address: visit.attending_doctor_id.to_string(),
                subject: format!("Emergency: abnormal vitals for {}", visit.patient_name),
                message: format!(
                    "{} ({}) has abnormal vitals: {}.",
                    visit.patient_name, visit.hospital_name, metric_summary
                ),
                max_retries: self.notification_max_retries,
            })
            .await?;
        if let Err(e) = ctx.enqueue(
            DELIVER_NOTIFICATION_TASK,
            json!(DeliverNotificationArgs {
                notification_id: notification.id,
            }),
        ) {
            tracing::warn!(notification_id = %notification.id, error = %e, "failed to enqueue delivery");
        }

        ctx.broadcaster().broadcast(
            &ChannelKey::AlertsRegion(visit.region_id),
            BroadcastEvent::emergency_vitals(
                Self::severity(&breaches),
                visit.patient_id,
                &visit.patient_name,
                &breaches,
            ),
        );

        Ok(true)
    }
}

#[async_trait]
impl Task for VitalsMonitorTask {
    fn name(&self) -> &'static str {
        VITALS_MONITOR_TASK
    }

    async fn run(&self, ctx: &TaskContext, _args: Value) -> Result<TaskOutcome, TaskError> {
        let visits = ctx
            .stores()
            .visits
            .list_active_visits()
            .await
            .map_err(TaskError::Retryable)?;

        let mut checked = 0usize;
        let mut alerts = 0usize;
        let mut failures = 0usize;

        for visit in &visits {
            checked += 1;
            match self.check_visit(ctx, visit).await {
                Ok(true) => alerts += 1,
                Ok(false) => {}
                Err(e) => {
                    failures += 1;
                    tracing::error!(visit_id = %visit.id, error = %e, "vitals check failed for visit");
                }
            }
        }

        Ok(TaskOutcome::Completed(json!({
            "visits_checked": checked,
            "alerts_raised": alerts,
            "failures": failures,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;
    use carelink_core::store::VitalsStore;
    use carelink_core::VitalsReading;

    fn monitor() -> VitalsMonitorTask {
        VitalsMonitorTask::new(VitalThresholds::default(), Duration::from_secs(300), 3)
    }

    #[tokio::test]
    async fn abnormal_reading_raises_one_aggregated_alert() {
        let fix = Fixture::new();
        let visit = fix.seed_visit().await;
        let mut subscription = fix
            .registry
            .subscribe(ChannelKey::AlertsRegion(visit.region_id));

        fix.store
            .record_vitals(VitalsReading::new(visit.id, 37.0, 150, 120, 80, 82))
            .await
            .expect("record should succeed");

        let outcome = monitor()
            .run(&fix.ctx(), Value::Null)
            .await
            .expect("run should succeed");
        match outcome {
            TaskOutcome::Completed(result) => {
                assert_eq!(result["alerts_raised"], 1);
                assert_eq!(result["failures"], 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let event = subscription.try_recv().expect("alert should be broadcast");
        match event {
            BroadcastEvent::EmergencyVitals {
                severity,
                vital_type,
                action_required,
                ..
            } => {
                assert_eq!(severity, AlertSeverity::Critical);
                assert_eq!(vital_type, "heart_rate, spo2");
                assert!(action_required);
            }
            other => panic!("expected EmergencyVitals, got {other:?}"),
        }

        let notifications = fix
            .stores
            .notifications
            .list_notifications_for(visit.attending_doctor_id)
            .await
            .expect("list should succeed");
        assert_eq!(notifications.len(), 1, "one aggregated notification");
    }

    #[tokio::test]
    async fn second_scan_does_not_realert_the_same_reading() {
        let fix = Fixture::new();
        let visit = fix.seed_visit().await;
        fix.store
            .record_vitals(VitalsReading::new(visit.id, 37.0, 80, 120, 80, 85))
            .await
            .expect("record should succeed");

        let task = monitor();
        task.run(&fix.ctx(), Value::Null)
            .await
            .expect("first scan should succeed");
        let outcome = task
            .run(&fix.ctx(), Value::Null)
            .await
            .expect("second scan should succeed");

        match outcome {
            TaskOutcome::Completed(result) => assert_eq!(result["alerts_raised"], 0),
            other => panic!("expected Completed, got {other:?}"),
        }
        let notifications = fix
            .stores
            .notifications
            .list_notifications_for(visit.attending_doctor_id)
            .await
            .expect("list should succeed");
        assert_eq!(notifications.len(), 1, "no duplicate alert");
    }

    #[tokio::test]
    async fn visits_without_recent_readings_are_skipped() {
        let fix = Fixture::new();
        let visit = fix.seed_visit().await;
        let mut stale = VitalsReading::new(visit.id, 37.0, 80, 120, 80, 70);
        stale.recorded_at = Utc::now() - chrono::Duration::minutes(30);
        fix.store
            .record_vitals(stale)
            .await
            .expect("record should succeed");

        let outcome = monitor()
            .run(&fix.ctx(), Value::Null)
            .await
            .expect("run should succeed");
        match outcome {
            TaskOutcome::Completed(result) => {
                assert_eq!(result["visits_checked"], 1);
                assert_eq!(result["alerts_raised"], 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_moderate_breach_is_high_severity() {
        let fix = Fixture::new();
        let visit = fix.seed_visit().await;
        let mut subscription = fix
            .registry
            .subscribe(ChannelKey::AlertsRegion(visit.region_id));

        // Only systolic out of range; SpO2 fine.
        fix.store
            .record_vitals(VitalsReading::new(visit.id, 37.0, 80, 190, 80, 97))
            .await
            .expect("record should succeed");

        monitor()
            .run(&fix.ctx(), Value::Null)
            .await
            .expect("run should succeed");

        match subscription.try_recv().expect("alert should be broadcast") {
            BroadcastEvent::EmergencyVitals { severity, .. } => {
                assert_eq!(severity, AlertSeverity::High);
            }
            other => panic!("expected EmergencyVitals, got {other:?}"),
        }
    }
}
