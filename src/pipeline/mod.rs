//! The acquisition pipeline, split into focused submodules.
//!
//! The `Pipeline` struct wires the stages together; each stage lives in
//! its own module:
//! - [`submission`] - Drains the queue into the download agent
//! - [`hash_check`] - Confirms which candidate identifier the agent really tracks
//! - [`progress`] - Polls confirmed transfers until completion or disappearance
//! - [`rename`] - Renames completed items and sweeps for missed completions
//! - [`lifecycle`] - Startup, shutdown and restart
//! - [`control`] - Ingestion, subscription removal and status
//!
//! Stages talk to each other only through the event bus:
//!
//! ```text
//! queue -> submission --DownloadCheck--> hash_check --DownloadStarted--> progress
//!       --DownloadCompleted--> rename --RenameCompleted-->
//! ```

mod control;
mod hash_check;
mod lifecycle;
mod progress;
mod rename;
mod submission;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use control::PipelineStatus;
pub use hash_check::HashResolutionMonitor;
pub use progress::{ProgressMonitor, poll_interval};
pub use rename::{RenameSweep, RenameTrigger};
pub use submission::SubmissionController;

use crate::agent::DownloadAgent;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, HandlerId};
use crate::queue::DownloadQueue;
use crate::renamer::Renamer;
use crate::scheduler::TaskScheduler;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Scheduler name of the submission job
pub const SUBMISSION_TASK: &str = "download_process";
/// Scheduler name of the rename reconciliation sweep
pub const RENAME_SWEEP_TASK: &str = "rename_sweep";

/// Background work owned by one stage
///
/// Every task spawned through a scope observes the scope's cancellation
/// token. [`shutdown`](Self::shutdown) cancels them all, waits for them to
/// exit, then re-arms the scope so the stage can be started again.
#[derive(Clone, Default)]
pub(crate) struct WorkScope {
    tracker: TaskTracker,
    cancel: Arc<std::sync::Mutex<CancellationToken>>,
}

impl WorkScope {
    pub(crate) fn token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Spawn `work`, dropping it if the scope is cancelled first
    pub(crate) fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = work => {}
            }
        })
    }

    /// Number of tasks still running
    pub(crate) fn active(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) async fn shutdown(&self) {
        self.token().cancel();
        self.tracker.close();
        self.tracker.wait().await;

        match self.cancel.lock() {
            Ok(mut token) => *token = CancellationToken::new(),
            Err(poisoned) => *poisoned.into_inner() = CancellationToken::new(),
        }
        self.tracker.reopen();
    }
}

/// State that only exists while the pipeline is running
#[derive(Default)]
struct RuntimeState {
    running: bool,
    handlers: Vec<(EventKind, HandlerId)>,
    dispatcher: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Subscription-driven acquisition pipeline (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Pipeline {
    /// Database instance for persistence
    /// Public so callers can manage subscriptions and inspect items
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) queue: Arc<DownloadQueue>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) submission: Arc<SubmissionController>,
    pub(crate) hash_check: Arc<HashResolutionMonitor>,
    pub(crate) progress: Arc<ProgressMonitor>,
    pub(crate) rename: Arc<RenameTrigger>,
    runtime: Arc<tokio::sync::Mutex<RuntimeState>>,
}

impl Pipeline {
    /// Open the store and wire every stage
    ///
    /// Registers the submission job and, when renaming is enabled, the
    /// rename sweep with the scheduler. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use bangumi_dl::{Pipeline, config::Config, agent::DownloadAgent, renamer::Renamer};
    /// # use std::sync::Arc;
    /// # async fn example(agent: Arc<dyn DownloadAgent>, renamer: Arc<dyn Renamer>) -> bangumi_dl::Result<()> {
    /// let pipeline = Pipeline::new(Config::default(), agent, renamer).await?;
    /// pipeline.start().await?;
    ///
    /// let mut events = pipeline.subscribe();
    /// while let Ok(event) = events.recv().await {
    ///     tracing::info!(kind = ?event.kind(), url = %event.item().url, "pipeline event");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        config: Config,
        agent: Arc<dyn DownloadAgent>,
        renamer: Arc<dyn Renamer>,
    ) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new(config.events.channel_capacity));
        let queue = Arc::new(DownloadQueue::new());

        let submission = Arc::new(SubmissionController::new(
            db.clone(),
            bus.clone(),
            queue.clone(),
            agent.clone(),
            config.submission.clone(),
        ));
        let hash_check = Arc::new(HashResolutionMonitor::new(
            db.clone(),
            bus.clone(),
            agent.clone(),
            config.hash_check.clone(),
        ));
        let progress = Arc::new(ProgressMonitor::new(
            db.clone(),
            bus.clone(),
            agent.clone(),
            config.progress.clone(),
        ));
        let rename = Arc::new(RenameTrigger::new(db.clone(), bus.clone(), renamer));

        let scheduler = Arc::new(TaskScheduler::new());
        scheduler
            .register(
                SUBMISSION_TASK,
                submission.clone(),
                config.submission.interval,
                config.scheduler.max_retries,
            )
            .await?;
        if config.rename.enabled {
            scheduler
                .register(
                    RENAME_SWEEP_TASK,
                    Arc::new(RenameSweep::new(db.clone(), bus.clone())),
                    config.rename.sweep_interval,
                    config.scheduler.max_retries,
                )
                .await?;
        }

        tracing::info!(
            agent = agent.name(),
            database = %config.persistence.database_path.display(),
            rename_enabled = config.rename.enabled,
            "pipeline initialized"
        );

        Ok(Self {
            db,
            config,
            bus,
            queue,
            scheduler,
            submission,
            hash_check,
            progress,
            rename,
            runtime: Arc::new(tokio::sync::Mutex::new(RuntimeState::default())),
        })
    }

    /// Receive a copy of every event flowing through the pipeline
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.observe()
    }

    /// The event bus, for callers that want to attach their own handlers
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The progress monitor, for inspecting or stopping individual transfers
    pub fn progress(&self) -> &ProgressMonitor {
        &self.progress
    }
}
