//! Cooperative scheduler for named periodic jobs
//!
//! Every registered job gets one loop on the tokio runtime:
//!
//! 1. call [`Job::run`]
//! 2. on success clear the error counter and record the run time, on
//!    failure (or panic) log it and bump the counter
//! 3. sleep for the job's interval, waking early if shutdown is requested
//!
//! A failed run is never retried immediately. The next tick is the retry.
//!
//! # Example
//!
//! ```no_run
//! use bangumi_dl::scheduler::{TaskScheduler, job_fn};
//! use std::time::Duration;
//!
//! # async fn example() -> bangumi_dl::Result<()> {
//! let scheduler = TaskScheduler::new();
//! scheduler
//!     .register(
//!         "heartbeat",
//!         job_fn(|| async {
//!             tracing::info!("still alive");
//!             Ok(())
//!         }),
//!         Duration::from_secs(30),
//!         3,
//!     )
//!     .await?;
//!
//! scheduler.start_all().await;
//! // ...
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TaskError};
use crate::types::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of periodic work
#[async_trait]
pub trait Job: Send + Sync {
    /// Run one invocation
    async fn run(&self) -> Result<()>;
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn run(&self) -> Result<()> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`Job`]
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// Point-in-time view of one registered task
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatus {
    /// Registered name
    pub name: String,
    /// Current state
    pub state: TaskState,
    /// Consecutive failed invocations
    pub error_count: u32,
    /// Time of the last successful invocation
    pub last_run: Option<DateTime<Utc>>,
    /// Configured sleep between invocations
    #[serde(with = "crate::config::duration_serde")]
    pub interval: Duration,
    /// Consecutive failures after which errors are reported as persistent
    pub max_retries: u32,
}

/// Counters shared between a task's loop and status readers
struct TaskRuntime {
    state: AtomicU8,
    error_count: AtomicU32,
    /// Unix millis of the last success, 0 = never
    last_run: AtomicI64,
}

impl TaskRuntime {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Pending.to_u8()),
            error_count: AtomicU32::new(0),
            last_run: AtomicI64::new(0),
        }
    }

    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn last_run(&self) -> Option<DateTime<Utc>> {
        match self.last_run.load(Ordering::SeqCst) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }
}

struct TaskInfo {
    name: String,
    job: Arc<dyn Job>,
    interval: Duration,
    max_retries: u32,
    runtime: Arc<TaskRuntime>,
    handle: Option<JoinHandle<()>>,
}

/// Runs a fixed set of named periodic jobs
pub struct TaskScheduler {
    tasks: Mutex<Vec<TaskInfo>>,
    shutdown: std::sync::Mutex<CancellationToken>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Add a job in `Pending` state
    ///
    /// Names are unique; registering a name twice is rejected.
    pub async fn register(
        &self,
        name: impl Into<String>,
        job: Arc<dyn Job>,
        interval: Duration,
        max_retries: u32,
    ) -> std::result::Result<(), TaskError> {
        let name = name.into();
        let mut tasks = self.tasks.lock().await;
        if tasks.iter().any(|t| t.name == name) {
            return Err(TaskError::Duplicate(name));
        }

        debug!(task = %name, interval_secs = interval.as_secs_f64(), "task registered");
        tasks.push(TaskInfo {
            name,
            job,
            interval,
            max_retries,
            runtime: Arc::new(TaskRuntime::new()),
            handle: None,
        });
        Ok(())
    }

    /// Start the loop of every `Pending` task
    ///
    /// Returns the number of loops started.
    pub async fn start_all(&self) -> usize {
        let shutdown = self.shutdown_token();
        let mut tasks = self.tasks.lock().await;
        let mut started = 0;

        for task in tasks.iter_mut() {
            if task.runtime.state() != TaskState::Pending {
                continue;
            }
            task.runtime.set_state(TaskState::Running);
            task.handle = Some(tokio::spawn(run_loop(
                task.name.clone(),
                task.job.clone(),
                task.interval,
                task.max_retries,
                task.runtime.clone(),
                shutdown.clone(),
            )));
            info!(task = %task.name, "task started");
            started += 1;
        }

        started
    }

    /// Signal every loop to stop and wait until all of them have exited
    ///
    /// A loop sleeping between invocations exits as `Completed`. A loop
    /// interrupted mid-invocation exits as `Cancelled`.
    pub async fn shutdown(&self) {
        self.shutdown_token().cancel();

        let handles: Vec<(String, Arc<TaskRuntime>, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            tasks
                .iter_mut()
                .filter_map(|t| {
                    t.handle
                        .take()
                        .map(|h| (t.name.clone(), t.runtime.clone(), h))
                })
                .collect()
        };

        for (name, runtime, handle) in handles {
            if let Err(e) = handle.await {
                error!(task = %name, error = %e, "task loop terminated abnormally");
                runtime.set_state(TaskState::Failed);
            }
        }

        info!("scheduler stopped");
    }

    /// Return every task to `Pending` so [`start_all`](Self::start_all) can run them again
    ///
    /// Error counters survive a reset.
    pub async fn reset(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.iter_mut() {
            if let Some(handle) = task.handle.take() {
                handle.abort();
            }
            task.runtime.set_state(TaskState::Pending);
        }

        match self.shutdown.lock() {
            Ok(mut token) => *token = CancellationToken::new(),
            Err(poisoned) => *poisoned.into_inner() = CancellationToken::new(),
        }
        debug!(tasks = tasks.len(), "scheduler reset");
    }

    /// Snapshot of every registered task, in registration order
    pub async fn status(&self) -> Vec<TaskStatus> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|t| TaskStatus {
                name: t.name.clone(),
                state: t.runtime.state(),
                error_count: t.runtime.error_count.load(Ordering::SeqCst),
                last_run: t.runtime.last_run(),
                interval: t.interval,
                max_retries: t.max_retries,
            })
            .collect()
    }

    /// Status of one task by name
    pub async fn task_status(&self, name: &str) -> std::result::Result<TaskStatus, TaskError> {
        self.status()
            .await
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TaskError::Unknown(name.to_string()))
    }

    fn shutdown_token(&self) -> CancellationToken {
        match self.shutdown.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

async fn run_loop(
    name: String,
    job: Arc<dyn Job>,
    interval: Duration,
    max_retries: u32,
    runtime: Arc<TaskRuntime>,
    shutdown: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                runtime.set_state(TaskState::Cancelled);
                info!(task = %name, "task cancelled mid-run");
                return;
            }
            outcome = AssertUnwindSafe(job.run()).catch_unwind() => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                runtime.error_count.store(0, Ordering::SeqCst);
                runtime
                    .last_run
                    .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
            }
            Ok(Err(e)) => record_failure(&name, &runtime, max_retries, &e.to_string()),
            Err(_) => record_failure(&name, &runtime, max_retries, "job panicked"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                runtime.set_state(TaskState::Completed);
                info!(task = %name, "task stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn record_failure(name: &str, runtime: &TaskRuntime, max_retries: u32, error: &str) {
    let errors = runtime.error_count.fetch_add(1, Ordering::SeqCst) + 1;
    if errors >= max_retries {
        error!(task = %name, error, consecutive_errors = errors, "task failing persistently");
    } else {
        warn!(task = %name, error, consecutive_errors = errors, "task run failed");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
