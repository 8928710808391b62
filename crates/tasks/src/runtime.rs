//! Task execution contracts.
//!
//! A task body returns `Result<TaskOutcome, TaskError>`; the worker
//! interprets `Retryable` as "reschedule with backoff" and `Terminal` as
//! "mark failed" — retry policy is data carried in the return value, not
//! inferred from error types downstream.

use carelink_core::{CoreError, Stores};
use carelink_realtime::Broadcaster;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-task execution policy.
#[derive(Clone, Copy, Debug)]
pub struct TaskPolicy {
    /// Retry ceiling: a task runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Base delay between retries; the worker scales it by attempt and
    /// adds jitter.
    pub retry_delay: Duration,
    /// Exceeding this is logged as a warning so the task can be tuned
    /// before it hits the hard limit.
    pub soft_time_limit: Duration,
    /// Forcible termination point; hitting it counts as a retryable
    /// failure.
    pub hard_time_limit: Duration,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            soft_time_limit: Duration::from_secs(240),
            hard_time_limit: Duration::from_secs(300),
        }
    }
}

/// Successful completion of a task invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    /// A precondition was not met; structurally a success, never retried.
    Skipped(String),
}

impl TaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

/// Failure of a task invocation, carrying the retry decision.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Transient infrastructure failure; the worker reschedules until the
    /// retry ceiling.
    #[error("retryable task failure: {0}")]
    Retryable(#[source] CoreError),
    /// Not-found / precondition violations that retrying cannot fix.
    #[error("terminal task failure: {0}")]
    Terminal(#[source] CoreError),
}

/// Ability to enqueue further tasks by name from inside a task body.
pub trait Enqueuer: Send + Sync {
    fn enqueue_json(&self, task_name: &str, args: Value) -> Result<Uuid, CoreError>;
}

/// Everything a worker needs to build per-execution contexts.
#[derive(Clone)]
pub struct WorkerEnv {
    pub stores: Stores,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Per-execution context.
///
/// One context exists for exactly one execution: it is created after the
/// job is claimed and dropped when the execution finishes, whatever the
/// outcome — in an ORM-backed deployment this is the database session
/// boundary, so a session can never leak across a retry.
pub struct TaskContext {
    stores: Stores,
    broadcaster: Arc<dyn Broadcaster>,
    enqueuer: Arc<dyn Enqueuer>,
    attempt: u32,
    max_retries: u32,
}

impl TaskContext {
    pub fn new(
        env: &WorkerEnv,
        enqueuer: Arc<dyn Enqueuer>,
        attempt: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            stores: env.stores.clone(),
            broadcaster: env.broadcaster.clone(),
            enqueuer,
            attempt,
            max_retries,
        }
    }

    /// The execution's data session.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Live-alert transport bridging to the serving process.
    pub fn broadcaster(&self) -> &dyn Broadcaster {
        self.broadcaster.as_ref()
    }

    /// Enqueue a follow-up task; returns its id without blocking for
    /// completion.
    pub fn enqueue(&self, task_name: &str, args: Value) -> Result<Uuid, CoreError> {
        self.enqueuer.enqueue_json(task_name, args)
    }

    /// 1-based attempt number of this execution.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this execution is the last one the retry ceiling allows.
    pub fn final_attempt(&self) -> bool {
        self.attempt >= self.max_retries + 1
    }
}

/// A named unit of asynchronous, durably-queued work.
///
/// Executions are at-least-once: the runtime may run a task more than
/// once for the same arguments, so bodies must be idempotent via
/// status-checking (skip when the entity is already in the target state).
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    fn policy(&self) -> TaskPolicy {
        TaskPolicy::default()
    }

    async fn run(&self, ctx: &TaskContext, args: Value) -> Result<TaskOutcome, TaskError>;
}

/// Decode task arguments, treating malformed input as terminal.
pub fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, TaskError> {
    serde_json::from_value(args)
        .map_err(|e| TaskError::Terminal(CoreError::InvalidInput(format!("bad task args: {e}"))))
}
