//! # CareLink Tasks
//!
//! The asynchronous task-and-retry pipeline: a named-task queue with
//! at-least-once execution, bounded retries with backoff, hard time
//! limits and periodic scheduling, plus the workflows it drives —
//! discharge EMR synchronisation, vitals-anomaly monitoring and
//! notification delivery.
//!
//! Task workers share no in-process state with the request-serving
//! process; live alerts cross that boundary through the
//! [`carelink_realtime::Broadcaster`] trait only, and all durable state
//! goes through the [`carelink_core::Stores`] interfaces.

#![warn(rust_2018_idioms)]

pub mod queue;
pub mod runtime;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod test_util;
pub mod workflows;

pub use queue::{JobRecord, JobState, TaskQueue};
pub use runtime::{Task, TaskContext, TaskError, TaskOutcome, TaskPolicy, WorkerEnv};
pub use scheduler::{run_scheduler, Schedule, ScheduleEntry, Trigger};
