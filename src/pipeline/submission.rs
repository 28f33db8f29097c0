//! Submission controller: queue -> download agent.

use crate::agent::DownloadAgent;
use crate::config::SubmissionConfig;
use crate::db::Database;
use crate::error::Result;
use crate::events::{DownloadCheck, Event, EventBus};
use crate::queue::DownloadQueue;
use crate::scheduler::Job;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use super::WorkScope;

/// Drains the download queue in batches and hands each item to the agent
///
/// Runs as the `download_process` scheduler job. Items the agent accepts
/// are persisted (unresolved) and announced with a `DownloadCheck` event;
/// items it rejects are logged and dropped. A later feed cycle rediscovers
/// them if they are still published upstream.
pub struct SubmissionController {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    queue: Arc<DownloadQueue>,
    agent: Arc<dyn DownloadAgent>,
    config: SubmissionConfig,
    login_in_flight: Arc<AtomicBool>,
    scope: WorkScope,
}

impl SubmissionController {
    /// Create a controller over the shared queue
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        queue: Arc<DownloadQueue>,
        agent: Arc<dyn DownloadAgent>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            db,
            bus,
            queue,
            agent,
            config,
            login_in_flight: Arc::new(AtomicBool::new(false)),
            scope: WorkScope::default(),
        }
    }

    /// Run one submission cycle
    ///
    /// Returns the number of `DownloadCheck` events emitted. When the agent
    /// is not authenticated the cycle is skipped without touching the queue
    /// and a background login is started (once).
    pub async fn run_cycle(&self) -> Result<usize> {
        if !self.agent.is_authenticated().await {
            warn!(agent = self.agent.name(), "download agent not authenticated, skipping cycle");
            self.spawn_login();
            return Ok(0);
        }

        let batch = self.queue.drain(self.config.batch_size).await;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(batch = batch.len(), remaining = self.queue.size(), "submitting batch");

        // one failing submission must not cancel its siblings
        let results = join_all(
            batch
                .iter()
                .map(|queued| self.agent.submit(&queued.item, &queued.subscription)),
        )
        .await;

        let mut emitted = 0;
        for (queued, result) in batch.into_iter().zip(results) {
            let candidates = match result {
                Ok(candidates) if !candidates.is_empty() => candidates,
                Ok(_) => {
                    warn!(name = %queued.item.name, "agent accepted item without identifiers, dropping");
                    continue;
                }
                Err(e) => {
                    warn!(name = %queued.item.name, error = %e, "submission failed, dropping item");
                    continue;
                }
            };

            let mut item = queued.item;
            match self.db.save_release_item(&item).await {
                Ok(id) => item.id = Some(id),
                Err(e) => {
                    error!(name = %item.name, error = %e, "failed to persist submitted item");
                    continue;
                }
            }

            info!(
                name = %item.name,
                candidates = candidates.len(),
                "item submitted to download agent"
            );
            self.bus.emit(Event::DownloadCheck(DownloadCheck {
                item,
                subscription: queued.subscription,
                candidates,
            }));
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Whether a background login loop is currently running
    pub fn login_in_progress(&self) -> bool {
        self.login_in_flight.load(Ordering::SeqCst)
    }

    /// Start the background login loop unless one is already running
    fn spawn_login(&self) {
        if self
            .login_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("login already in progress");
            return;
        }

        let agent = self.agent.clone();
        let flag = self.login_in_flight.clone();
        let retry_interval = self.config.login_retry_interval;
        let flag_guard = LoginFlagGuard(flag);

        self.scope.spawn(async move {
            let _flag = flag_guard;
            loop {
                match agent.login().await {
                    Ok(()) => {
                        info!(agent = agent.name(), "logged in to download agent");
                        return;
                    }
                    Err(e) => {
                        warn!(agent = agent.name(), error = %e, "login failed, will retry");
                    }
                }
                tokio::time::sleep(retry_interval).await;
            }
        });
    }

    /// Stop the background login loop, if any
    pub(crate) async fn shutdown(&self) {
        self.scope.shutdown().await;
    }
}

/// Clears the login gate however the login loop ends
struct LoginFlagGuard(Arc<AtomicBool>);

impl Drop for LoginFlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Job for SubmissionController {
    async fn run(&self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}
