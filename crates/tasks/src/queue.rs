//! In-process task queue: broker, result store and worker pool.
//!
//! Jobs move through `Queued → Running → {Succeeded | Retrying → Queued |
//! Failed}`. A job is never silently dropped: exhausting the retry
//! ceiling transitions it to `Failed` with the last error recorded on the
//! job record, where `GET /tasks/{id}` can surface it.
//!
//! Broker timing uses `tokio::time::Instant` so backoff behaviour is
//! fully deterministic under `tokio::time::pause` in tests.

use crate::runtime::{Enqueuer, Task, TaskContext, TaskError, TaskOutcome, TaskPolicy, WorkerEnv};
use carelink_core::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use uuid::Uuid;

/// Broker-side state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    /// Waiting out the backoff delay before requeueing.
    Retrying,
    Succeeded,
    Failed,
}

/// A persisted job record (broker + result store).
#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: Uuid,
    pub task_name: String,
    pub args: Value,
    pub state: JobState,
    /// Executions started so far; 1-based once claimed.
    pub attempt: u32,
    pub max_retries: u32,
    pub run_at: Instant,
    pub enqueued_at: DateTime<Utc>,
    pub outcome: Option<TaskOutcome>,
    pub last_error: Option<String>,
}

struct ClaimedJob {
    id: Uuid,
    task_name: String,
    args: Value,
    attempt: u32,
    max_retries: u32,
}

enum BrokerPoll {
    Claimed(ClaimedJob),
    WaitUntil(Instant),
    Empty,
}

/// The task queue runtime.
///
/// Holds the registry of named tasks and the job table. Execution is
/// at-least-once: workers claim atomically under the broker lock, but a
/// requeued job may re-run work a crashed execution already did — task
/// bodies tolerate that by status-checking.
pub struct TaskQueue {
    tasks: Mutex<HashMap<String, Arc<dyn Task>>>,
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    notify: Notify,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Register a task under its name. Later registrations replace
    /// earlier ones.
    pub fn register(&self, task: Arc<dyn Task>) {
        self.lock_tasks().insert(task.name().to_string(), task);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Task>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.lock_tasks().get(name).cloned()
    }

    /// Enqueue a task invocation by name.
    ///
    /// Returns the job id without blocking for completion.
    ///
    /// # Errors
    /// `CoreError::InvalidInput` if no task is registered under `name`.
    pub fn enqueue(&self, name: &str, args: Value) -> CoreResult<Uuid> {
        self.enqueue_in(name, args, Duration::ZERO)
    }

    /// Enqueue with an initial delay (used by the periodic scheduler and
    /// backoff requeues).
    pub fn enqueue_in(&self, name: &str, args: Value, delay: Duration) -> CoreResult<Uuid> {
        let task = self
            .task(name)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown task: {name}")))?;
        let policy = task.policy();

        let job = JobRecord {
            id: Uuid::new_v4(),
            task_name: name.to_string(),
            args,
            state: JobState::Queued,
            attempt: 0,
            max_retries: policy.max_retries,
            run_at: Instant::now() + delay,
            enqueued_at: Utc::now(),
            outcome: None,
            last_error: None,
        };
        let id = job.id;

        self.lock_jobs().insert(id, job);
        self.notify.notify_one();
        tracing::debug!(task = name, job_id = %id, "enqueued");
        Ok(id)
    }

    /// Fetch a job record by id.
    pub fn job(&self, id: Uuid) -> Option<JobRecord> {
        self.lock_jobs().get(&id).cloned()
    }

    fn poll_due(&self) -> BrokerPoll {
        let mut jobs = self.lock_jobs();
        let now = Instant::now();

        let next = jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Queued | JobState::Retrying))
            .min_by_key(|j| j.run_at)
            .map(|j| (j.id, j.run_at));

        match next {
            None => BrokerPoll::Empty,
            Some((_, run_at)) if run_at > now => BrokerPoll::WaitUntil(run_at),
            Some((id, _)) => {
                let Some(job) = jobs.get_mut(&id) else {
                    return BrokerPoll::Empty;
                };
                job.state = JobState::Running;
                job.attempt += 1;
                BrokerPoll::Claimed(ClaimedJob {
                    id: job.id,
                    task_name: job.task_name.clone(),
                    args: job.args.clone(),
                    attempt: job.attempt,
                    max_retries: job.max_retries,
                })
            }
        }
    }

    async fn execute(self: &Arc<Self>, claim: ClaimedJob, env: &WorkerEnv) {
        let Some(task) = self.task(&claim.task_name) else {
            // Can only happen if a task was deregistered mid-flight.
            self.record_failure(claim.id, "task no longer registered".into());
            return;
        };
        let policy = task.policy();

        tracing::info!(
            task = %claim.task_name,
            job_id = %claim.id,
            attempt = claim.attempt,
            "executing task"
        );

        // Context lifetime == execution lifetime: the data session it
        // carries is released on every exit path below.
        let ctx = TaskContext::new(
            env,
            self.clone() as Arc<dyn Enqueuer>,
            claim.attempt,
            claim.max_retries,
        );

        // The unwind of a panicking task body is contained here; a panic
        // must never take the worker down or strand the job in `Running`.
        let run = AssertUnwindSafe(task.run(&ctx, claim.args.clone())).catch_unwind();

        let started = Instant::now();
        let result = timeout(policy.hard_time_limit, run).await;
        let elapsed = started.elapsed();
        if elapsed > policy.soft_time_limit {
            tracing::warn!(
                task = %claim.task_name,
                job_id = %claim.id,
                ?elapsed,
                "task exceeded its soft time limit"
            );
        }

        match result {
            Ok(Ok(Ok(outcome))) => self.record_success(claim.id, outcome),
            Ok(Ok(Err(TaskError::Terminal(e)))) => self.record_failure(claim.id, e.to_string()),
            Ok(Ok(Err(TaskError::Retryable(e)))) => {
                self.retry_or_fail(claim.id, &policy, e.to_string())
            }
            Ok(Err(panic)) => self.retry_or_fail(
                claim.id,
                &policy,
                format!("task panicked: {}", panic_message(panic.as_ref())),
            ),
            Err(_elapsed) => self.retry_or_fail(
                claim.id,
                &policy,
                format!("hard time limit {:?} exceeded", policy.hard_time_limit),
            ),
        }
    }

    fn record_success(&self, id: Uuid, outcome: TaskOutcome) {
        let mut jobs = self.lock_jobs();
        if let Some(job) = jobs.get_mut(&id) {
            match &outcome {
                TaskOutcome::Completed(_) => {
                    tracing::info!(task = %job.task_name, job_id = %id, "task completed")
                }
                TaskOutcome::Skipped(reason) => {
                    tracing::info!(task = %job.task_name, job_id = %id, reason = %reason, "task skipped")
                }
            }
            job.state = JobState::Succeeded;
            job.outcome = Some(outcome);
        }
    }

    fn record_failure(&self, id: Uuid, error: String) {
        let mut jobs = self.lock_jobs();
        if let Some(job) = jobs.get_mut(&id) {
            tracing::error!(task = %job.task_name, job_id = %id, error = %error, "task failed");
            job.state = JobState::Failed;
            job.last_error = Some(error);
        }
    }

    fn retry_or_fail(&self, id: Uuid, policy: &TaskPolicy, error: String) {
        let mut jobs = self.lock_jobs();
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };

        if job.attempt >= job.max_retries + 1 {
            tracing::error!(
                task = %job.task_name,
                job_id = %id,
                attempts = job.attempt,
                error = %error,
                "task failed after exhausting retries"
            );
            job.state = JobState::Failed;
            job.last_error = Some(error);
            return;
        }

        let jitter = rand::thread_rng().gen_range(Duration::ZERO..Duration::from_millis(1000));
        let delay = policy.retry_delay * job.attempt + jitter;
        tracing::warn!(
            task = %job.task_name,
            job_id = %id,
            attempt = job.attempt,
            ?delay,
            error = %error,
            "task failed, rescheduling"
        );
        job.state = JobState::Retrying;
        job.run_at = Instant::now() + delay;
        job.last_error = Some(error);
        drop(jobs);
        self.notify.notify_one();
    }

    /// Run one worker forever.
    pub async fn worker_loop(self: Arc<Self>, env: WorkerEnv) {
        loop {
            match self.poll_due() {
                BrokerPoll::Claimed(claim) => self.execute(claim, &env).await,
                BrokerPoll::WaitUntil(at) => {
                    tokio::select! {
                        _ = sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                BrokerPoll::Empty => self.notify.notified().await,
            }
        }
    }

    /// Spawn a pool of workers onto the current runtime.
    pub fn spawn_workers(self: &Arc<Self>, count: usize, env: WorkerEnv) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|_| tokio::spawn(self.clone().worker_loop(env.clone())))
            .collect()
    }

    /// Process every job (including scheduled retries) until the queue is
    /// empty. Test and drain helper; pairs with `tokio::time::pause` for
    /// deterministic backoff.
    pub async fn run_until_idle(self: &Arc<Self>, env: &WorkerEnv) {
        loop {
            match self.poll_due() {
                BrokerPoll::Claimed(claim) => self.execute(claim, env).await,
                BrokerPoll::WaitUntil(at) => sleep_until(at).await,
                BrokerPoll::Empty => break,
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl Enqueuer for TaskQueue {
    fn enqueue_json(&self, task_name: &str, args: Value) -> Result<Uuid, CoreError> {
        self.enqueue(task_name, args)
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use carelink_core::memory::MemoryStore;
    use carelink_core::Stores;
    use carelink_realtime::ChannelRegistry;

    pub(crate) fn test_env() -> WorkerEnv {
        WorkerEnv {
            stores: Stores::from_backend(Arc::new(MemoryStore::new())),
            broadcaster: Arc::new(ChannelRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::test_env;
    use super::*;
    use crate::runtime::TaskContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTask {
        runs: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl Task for FlakyTask {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn policy(&self) -> TaskPolicy {
            TaskPolicy {
                max_retries: 3,
                retry_delay: Duration::from_secs(30),
                ..TaskPolicy::default()
            }
        }

        async fn run(
            &self,
            _ctx: &TaskContext,
            _args: Value,
        ) -> Result<TaskOutcome, TaskError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run < self.succeed_on {
                Err(TaskError::Retryable(CoreError::Store("db hiccup".into())))
            } else {
                Ok(TaskOutcome::Completed(json!({ "run": run })))
            }
        }
    }

    struct SlowTask;

    #[async_trait]
    impl Task for SlowTask {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn policy(&self) -> TaskPolicy {
            TaskPolicy {
                max_retries: 0,
                hard_time_limit: Duration::from_secs(1),
                soft_time_limit: Duration::from_millis(500),
                ..TaskPolicy::default()
            }
        }

        async fn run(
            &self,
            _ctx: &TaskContext,
            _args: Value,
        ) -> Result<TaskOutcome, TaskError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(TaskOutcome::Completed(json!({})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_success() {
        let queue = Arc::new(TaskQueue::new());
        queue.register(Arc::new(FlakyTask {
            runs: AtomicU32::new(0),
            succeed_on: 3,
        }));

        let id = queue.enqueue("flaky", json!({})).expect("enqueue should succeed");
        queue.run_until_idle(&test_env()).await;

        let job = queue.job(id).expect("job record should exist");
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt, 3);
        assert_eq!(job.outcome, Some(TaskOutcome::Completed(json!({ "run": 3 }))));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_exhausting_retry_ceiling() {
        let queue = Arc::new(TaskQueue::new());
        queue.register(Arc::new(FlakyTask {
            runs: AtomicU32::new(0),
            succeed_on: u32::MAX,
        }));

        let id = queue.enqueue("flaky", json!({})).expect("enqueue should succeed");
        queue.run_until_idle(&test_env()).await;

        let job = queue.job(id).expect("job record should exist");
        assert_eq!(job.state, JobState::Failed);
        // max_retries = 3 allows 4 executions in total.
        assert_eq!(job.attempt, 4);
        assert!(job.last_error.as_deref().is_some_and(|e| e.contains("db hiccup")));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_time_limit_terminates_runaway_task() {
        let queue = Arc::new(TaskQueue::new());
        queue.register(Arc::new(SlowTask));

        let id = queue.enqueue("slow", json!({})).expect("enqueue should succeed");
        queue.run_until_idle(&test_env()).await;

        let job = queue.job(id).expect("job record should exist");
        assert_eq!(job.state, JobState::Failed);
        assert!(job
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("hard time limit")));
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn policy(&self) -> TaskPolicy {
            TaskPolicy {
                max_retries: 1,
                retry_delay: Duration::from_secs(30),
                ..TaskPolicy::default()
            }
        }

        async fn run(
            &self,
            _ctx: &TaskContext,
            _args: Value,
        ) -> Result<TaskOutcome, TaskError> {
            panic!("lost the plot");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_retried_then_failed() {
        let queue = Arc::new(TaskQueue::new());
        queue.register(Arc::new(PanickingTask));

        let id = queue.enqueue("panicky", json!({})).expect("enqueue should succeed");
        // Returning at all proves the unwind never escaped the executor.
        queue.run_until_idle(&test_env()).await;

        let job = queue.job(id).expect("job record should exist");
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt, 2);
        assert!(job
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("panicked") && e.contains("lost the plot")));

        // The queue still executes later jobs.
        queue.register(Arc::new(FlakyTask {
            runs: AtomicU32::new(0),
            succeed_on: 1,
        }));
        let next = queue.enqueue("flaky", json!({})).expect("enqueue should succeed");
        queue.run_until_idle(&test_env()).await;
        let job = queue.job(next).expect("job record should exist");
        assert_eq!(job.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_task_names() {
        let queue = TaskQueue::new();
        let err = queue
            .enqueue("no_such_task", json!({}))
            .expect_err("unknown task should be rejected");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
