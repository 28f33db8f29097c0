//! Rename trigger and reconciliation sweep.
//!
//! Two delivery paths, one rename path: the sweep never renames anything
//! itself. It re-announces stuck items as `DownloadStarted`, the progress
//! monitor confirms completion with the agent, and the resulting
//! `DownloadCompleted` lands here like any other.

use crate::db::Database;
use crate::error::Result;
use crate::events::{DownloadStarted, Event, EventBus, EventHandler, RenameCompleted};
use crate::renamer::Renamer;
use crate::scheduler::Job;
use crate::types::{ReleaseItem, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::WorkScope;

type InFlight = Arc<std::sync::Mutex<HashMap<String, (u64, CancellationToken)>>>;

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
    match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Renames items as their downloads complete
#[derive(Clone)]
pub struct RenameTrigger {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    renamer: Arc<dyn Renamer>,
    in_flight: InFlight,
    next_generation: Arc<AtomicU64>,
    scope: WorkScope,
}

impl RenameTrigger {
    /// Create a trigger renaming through `renamer`
    pub fn new(db: Arc<Database>, bus: Arc<EventBus>, renamer: Arc<dyn Renamer>) -> Self {
        Self {
            db,
            bus,
            renamer,
            in_flight: Arc::default(),
            next_generation: Arc::new(AtomicU64::new(1)),
            scope: WorkScope::default(),
        }
    }

    /// Rename one completed item
    ///
    /// The owning subscription is re-read from the store so an edit or a
    /// deletion since submission is honoured. Returns whether the rename
    /// succeeded and was recorded.
    pub async fn rename_item(&self, item: ReleaseItem, subscription: Subscription) -> bool {
        let subscription_id = item.subscription_id.unwrap_or(subscription.id);
        let subscription = match self.db.get_subscription(subscription_id).await {
            Ok(Some(sub)) if !sub.deleted => sub,
            Ok(_) => {
                info!(name = %item.name, subscription_id = %subscription_id, "subscription gone, skipping rename");
                return false;
            }
            Err(e) => {
                error!(name = %item.name, error = %e, "failed to load subscription for rename");
                return false;
            }
        };

        if let Err(e) = self.renamer.rename(&item, &subscription).await {
            error!(
                name = %item.name,
                renamer = self.renamer.name(),
                error = %e,
                "rename failed, leaving item for the sweep"
            );
            return false;
        }

        match self.db.mark_renamed(&item.url).await {
            Ok(true) => {}
            Ok(false) => debug!(url = %item.url, "item already renamed or not downloaded"),
            Err(e) => {
                error!(url = %item.url, error = %e, "failed to record rename");
                return false;
            }
        }

        let mut item = item;
        item.renamed = true;
        info!(name = %item.name, title = %subscription.official_title, "item renamed");
        self.bus
            .emit(Event::RenameCompleted(RenameCompleted { item, subscription }));
        true
    }

    /// Number of renames still in flight
    pub fn pending(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Cancel in-flight renames and wait for them to exit
    pub(crate) async fn shutdown(&self) {
        self.scope.shutdown().await;
        lock(&self.in_flight).clear();
    }

    fn spawn_rename(&self, item: ReleaseItem, subscription: Subscription) {
        let key = item.download_uid.clone().unwrap_or_else(|| item.url.clone());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.scope.token().child_token();

        if let Some((_, previous)) = lock(&self.in_flight).insert(key.clone(), (generation, token.clone())) {
            debug!(key = %key, "superseding in-flight rename");
            previous.cancel();
        }

        let this = self.clone();
        self.scope.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = this.rename_item(item, subscription) => {}
            }
            let mut in_flight = lock(&this.in_flight);
            if in_flight.get(&key).is_some_and(|(g, _)| *g == generation) {
                in_flight.remove(&key);
            }
        });
    }
}

#[async_trait]
impl EventHandler for RenameTrigger {
    async fn handle(&self, event: &Event) -> Result<()> {
        let Event::DownloadCompleted(completed) = event else {
            debug!(kind = ?event.kind(), "rename trigger ignoring event");
            return Ok(());
        };

        self.spawn_rename(completed.item.clone(), completed.subscription.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "rename_trigger"
    }
}

/// Periodic reconciliation of downloaded items that were never renamed
pub struct RenameSweep {
    db: Arc<Database>,
    bus: Arc<EventBus>,
}

impl RenameSweep {
    /// Create a sweep over the store
    pub fn new(db: Arc<Database>, bus: Arc<EventBus>) -> Self {
        Self { db, bus }
    }

    /// Re-announce every downloaded, unrenamed item; returns how many were emitted
    pub async fn sweep(&self) -> Result<usize> {
        let items = self.db.list_downloaded_unrenamed().await?;
        let mut emitted = 0;

        for item in items {
            let (Some(subscription_id), Some(_)) = (item.subscription_id, item.download_uid.as_ref()) else {
                warn!(url = %item.url, "downloaded item without subscription or uid, cannot reconcile");
                continue;
            };

            let subscription = match self.db.get_subscription(subscription_id).await? {
                Some(sub) if !sub.deleted => sub,
                _ => {
                    debug!(url = %item.url, subscription_id = %subscription_id, "subscription gone, not reconciling");
                    continue;
                }
            };

            self.bus
                .emit(Event::DownloadStarted(DownloadStarted { item, subscription }));
            emitted += 1;
        }

        if emitted > 0 {
            info!(items = emitted, "rename sweep re-announced unrenamed items");
        }
        Ok(emitted)
    }
}

#[async_trait]
impl Job for RenameSweep {
    async fn run(&self) -> Result<()> {
        self.sweep().await.map(|_| ())
    }
}
