//! Periodic task scheduling.
//!
//! Fixed triggers enqueue tasks by name, independent of how long the
//! previous run took. The scheduler is fixed-rate, not fixed-delay, and
//! it never guarantees non-overlap; idempotent task bodies carry that
//! burden.

use crate::queue::TaskQueue;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// When an entry fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed-rate interval, first fire one interval after startup.
    Every(Duration),
    /// Once a day at the given UTC hour.
    DailyAt { hour: u32 },
}

/// One recurring task.
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub task_name: &'static str,
    pub args: Value,
    pub trigger: Trigger,
}

/// The full periodic schedule.
#[derive(Clone, Debug, Default)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// The production schedule: vitals monitoring every 5 minutes, the
    /// pending-notification sweep every minute, notification cleanup
    /// daily (03:00 UTC, off the clinical day's peak).
    pub fn standard() -> Self {
        use crate::workflows::{
            NOTIFICATION_CLEANUP_TASK, NOTIFICATION_SWEEP_TASK, VITALS_MONITOR_TASK,
        };

        Self::new(vec![
            ScheduleEntry {
                task_name: VITALS_MONITOR_TASK,
                args: Value::Null,
                trigger: Trigger::Every(Duration::from_secs(5 * 60)),
            },
            ScheduleEntry {
                task_name: NOTIFICATION_SWEEP_TASK,
                args: Value::Null,
                trigger: Trigger::Every(Duration::from_secs(60)),
            },
            ScheduleEntry {
                task_name: NOTIFICATION_CLEANUP_TASK,
                args: Value::Null,
                trigger: Trigger::DailyAt { hour: 3 },
            },
        ])
    }
}

fn delay_until_first_fire(trigger: &Trigger) -> Duration {
    match trigger {
        Trigger::Every(interval) => *interval,
        Trigger::DailyAt { hour } => {
            let now = Utc::now();
            let today_fire = now
                .date_naive()
                .and_hms_opt(*hour % 24, 0, 0)
                .unwrap_or_else(|| now.naive_utc());
            let mut secs = (today_fire - now.naive_utc()).num_seconds();
            if secs <= 0 {
                secs += 24 * 60 * 60;
            }
            Duration::from_secs(secs.max(0) as u64)
        }
    }
}

fn period_of(trigger: &Trigger) -> Duration {
    match trigger {
        Trigger::Every(interval) => *interval,
        Trigger::DailyAt { .. } => Duration::from_secs(24 * 60 * 60),
    }
}

/// Drive the schedule forever, enqueueing each entry at its trigger
/// times. Enqueue failures are logged and the cadence continues.
pub async fn run_scheduler(queue: Arc<TaskQueue>, schedule: Schedule) {
    if schedule.entries.is_empty() {
        tracing::warn!("scheduler started with an empty schedule");
        std::future::pending::<()>().await;
    }

    let start = Instant::now();
    let mut next_fires: Vec<Instant> = schedule
        .entries
        .iter()
        .map(|e| start + delay_until_first_fire(&e.trigger))
        .collect();

    loop {
        let Some((idx, fire_at)) = next_fires
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|(_, at)| *at)
        else {
            return;
        };

        sleep_until(fire_at).await;

        let entry = &schedule.entries[idx];
        match queue.enqueue(entry.task_name, entry.args.clone()) {
            Ok(job_id) => {
                tracing::debug!(task = entry.task_name, job_id = %job_id, "scheduled run enqueued")
            }
            Err(e) => {
                tracing::error!(task = entry.task_name, error = %e, "failed to enqueue scheduled run")
            }
        }

        // Fixed-rate: the next fire is anchored to the previous fire
        // time, not to task completion.
        next_fires[idx] = fire_at + period_of(&entry.trigger);
    }
}
