//! Progress monitor: one poll loop per resolved identifier.
//!
//! ```text
//! start_monitoring ──► wait start_delay ──► probe ─┬─ not found ──► delete item, exit
//!                                           ▲      ├─ complete ───► DownloadCompleted, exit
//!                                           │      └─ in progress ─► mark downloaded (once)
//!                                           └──── sleep poll_interval(eta) ◄┘
//! ```
//!
//! At most one loop runs per identifier. The registration is removed on
//! every exit path, including cancellation.

use crate::agent::DownloadAgent;
use crate::config::ProgressConfig;
use crate::db::Database;
use crate::error::Result;
use crate::events::{DownloadCompleted, Event, EventBus, EventHandler};
use crate::types::{ReleaseItem, Subscription, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::WorkScope;

/// Next poll delay for a transfer with `eta` seconds remaining
///
/// Monotonic step function: the further from completion, the less often
/// the agent is asked.
pub fn poll_interval(eta: i64) -> Duration {
    let secs = match eta {
        ..60 => 10,
        60..300 => 30,
        300..1800 => 120,
        _ => 300,
    };
    Duration::from_secs(secs)
}

struct Registration {
    generation: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    subscription_id: SubscriptionId,
}

type Registry = Arc<std::sync::Mutex<HashMap<String, Registration>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Removes a loop's registration when the loop ends, unless it was replaced
struct RegistrationGuard {
    registry: Registry,
    uid: String,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        if registry
            .get(&self.uid)
            .is_some_and(|r| r.generation == self.generation)
        {
            registry.remove(&self.uid);
        }
    }
}

/// Polls confirmed transfers until they complete or vanish
#[derive(Clone)]
pub struct ProgressMonitor {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    agent: Arc<dyn DownloadAgent>,
    config: Arc<ProgressConfig>,
    registry: Registry,
    next_generation: Arc<AtomicU64>,
    scope: WorkScope,
}

impl ProgressMonitor {
    /// Create a monitor polling through `agent`
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        agent: Arc<dyn DownloadAgent>,
        config: ProgressConfig,
    ) -> Self {
        Self {
            db,
            bus,
            agent,
            config: Arc::new(config),
            registry: Arc::default(),
            next_generation: Arc::new(AtomicU64::new(1)),
            scope: WorkScope::default(),
        }
    }

    /// Start polling `uid`
    ///
    /// Returns `false` without doing anything if `uid` is already monitored.
    pub fn start_monitoring(
        &self,
        uid: &str,
        subscription: Subscription,
        item: ReleaseItem,
    ) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.scope.token().child_token();
        {
            let mut registry = lock(&self.registry);
            if registry.contains_key(uid) {
                debug!(download_uid = %uid, "already monitoring");
                return false;
            }
            registry.insert(
                uid.to_string(),
                Registration {
                    generation,
                    token: token.clone(),
                    handle: None,
                    subscription_id: subscription.id,
                },
            );
        }

        // registered before spawning, so the guard always has an entry to remove
        let guard = RegistrationGuard {
            registry: self.registry.clone(),
            uid: uid.to_string(),
            generation,
        };
        let this = self.clone();
        let loop_uid = uid.to_string();
        let handle = self.scope.spawn(async move {
            let _guard = guard;
            this.poll_loop(&loop_uid, subscription, item, token).await;
        });

        if let Some(registration) = lock(&self.registry)
            .get_mut(uid)
            .filter(|r| r.generation == generation)
        {
            registration.handle = Some(handle);
        }
        info!(download_uid = %uid, "monitoring started");
        true
    }

    /// Cancel the loop for `uid` and wait for it to exit
    ///
    /// Returns whether a loop was registered.
    pub async fn stop_monitoring(&self, uid: &str) -> bool {
        let registration = lock(&self.registry).remove(uid);
        let Some(mut registration) = registration else {
            return false;
        };

        registration.token.cancel();
        if let Some(handle) = registration.handle.take()
            && let Err(e) = handle.await
        {
            error!(download_uid = %uid, error = %e, "poll loop terminated abnormally");
        }
        info!(download_uid = %uid, "monitoring stopped");
        true
    }

    /// Stop every loop belonging to a subscription; returns how many were stopped
    pub async fn stop_for_subscription(&self, subscription_id: SubscriptionId) -> usize {
        let uids: Vec<String> = lock(&self.registry)
            .iter()
            .filter(|(_, r)| r.subscription_id == subscription_id)
            .map(|(uid, _)| uid.clone())
            .collect();

        let mut stopped = 0;
        for uid in uids {
            if self.stop_monitoring(&uid).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Identifiers with an active loop, sorted
    pub fn monitored(&self) -> Vec<String> {
        let mut uids: Vec<String> = lock(&self.registry).keys().cloned().collect();
        uids.sort();
        uids
    }

    /// Whether `uid` has an active loop
    pub fn is_monitoring(&self, uid: &str) -> bool {
        lock(&self.registry).contains_key(uid)
    }

    /// Cancel every loop and wait for all of them to exit
    pub async fn shutdown(&self) {
        let count = lock(&self.registry).len();
        self.scope.shutdown().await;
        lock(&self.registry).clear();
        if count > 0 {
            info!(loops = count, "progress monitor stopped");
        }
    }

    async fn poll_loop(
        &self,
        uid: &str,
        subscription: Subscription,
        mut item: ReleaseItem,
        token: CancellationToken,
    ) {
        if !sleep_unless_cancelled(&token, self.config.start_delay).await {
            return;
        }

        let mut marked_downloaded = item.downloaded;
        loop {
            let probe = tokio::select! {
                _ = token.cancelled() => return,
                probe = self.agent.probe(uid) => probe,
            };

            let next = match probe {
                Ok(None) => {
                    info!(download_uid = %uid, name = %item.name, "transfer gone from agent, removing item");
                    if let Err(e) = self.db.delete_release_item_by_url(&item.url).await {
                        error!(url = %item.url, error = %e, "failed to delete removed item");
                    }
                    return;
                }
                Ok(Some(info)) => {
                    if !marked_downloaded {
                        match self.db.mark_downloaded(uid).await {
                            Ok(_) => marked_downloaded = true,
                            Err(e) => {
                                error!(download_uid = %uid, error = %e, "failed to mark downloaded")
                            }
                        }
                    }

                    if info.is_complete() {
                        item.mark_resolved(uid);
                        item.mark_downloaded();
                        info!(
                            download_uid = %uid,
                            name = %item.name,
                            save_path = %info.save_path.display(),
                            "download completed"
                        );
                        self.bus.emit(Event::DownloadCompleted(DownloadCompleted {
                            item,
                            subscription,
                        }));
                        return;
                    }

                    info.eta
                        .map(poll_interval)
                        .unwrap_or(self.config.fallback_interval)
                }
                Err(e) => {
                    warn!(download_uid = %uid, error = %e, "progress probe failed");
                    self.config.fallback_interval
                }
            };

            debug!(download_uid = %uid, next_poll_secs = next.as_secs(), "transfer in progress");
            if !sleep_unless_cancelled(&token, next).await {
                return;
            }
        }
    }
}

/// Returns `false` if `token` fired before `duration` elapsed
async fn sleep_unless_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[async_trait]
impl EventHandler for ProgressMonitor {
    async fn handle(&self, event: &Event) -> Result<()> {
        let Event::DownloadStarted(started) = event else {
            debug!(kind = ?event.kind(), "progress monitor ignoring event");
            return Ok(());
        };

        let Some(uid) = started.item.download_uid.as_deref() else {
            warn!(url = %started.item.url, "started event without download uid, ignoring");
            return Ok(());
        };

        self.start_monitoring(uid, started.subscription.clone(), started.item.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "progress_monitor"
    }
}
