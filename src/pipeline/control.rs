//! Ingestion, subscription removal and status reporting.

use crate::error::Result;
use crate::matching::find_subscription;
use crate::scheduler::TaskStatus;
use crate::types::{ReleaseItem, Subscription, SubscriptionId};
use serde::Serialize;

use super::Pipeline;

/// Point-in-time view of the pipeline, for dashboards and stuck-item alerts
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    /// Items waiting for submission
    pub queue_size: usize,
    /// Scheduler tasks, in registration order
    pub tasks: Vec<TaskStatus>,
    /// Identifiers with an active progress loop
    pub monitored: Vec<String>,
    /// Persisted items the agent never confirmed
    pub unresolved_items: usize,
}

impl Pipeline {
    /// Match freshly discovered items against the active subscriptions and queue them
    ///
    /// Items whose URL is already stored are skipped, as are items no
    /// subscription claims. Returns the number of items queued.
    pub async fn ingest(&self, items: impl IntoIterator<Item = ReleaseItem>) -> Result<usize> {
        let subscriptions = self.db.list_active_subscriptions().await?;
        if subscriptions.is_empty() {
            tracing::debug!("no active subscriptions, nothing to ingest");
            return Ok(0);
        }

        let mut queued = 0;
        for item in items {
            if self.db.release_item_exists(&item.url).await? {
                tracing::debug!(url = %item.url, "item already known, skipping");
                continue;
            }

            let Some(subscription) = find_subscription(&item.name, &subscriptions) else {
                tracing::debug!(name = %item.name, "no subscription matched");
                continue;
            };

            if self.queue.enqueue(item, subscription.clone()).await {
                queued += 1;
            }
        }

        if queued > 0 {
            tracing::info!(items = queued, queue_size = self.queue.size(), "items queued for submission");
        }
        Ok(queued)
    }

    /// Queue one item for `subscription` without matching
    ///
    /// Returns `false` if an item with the same URL is already queued.
    pub async fn enqueue(&self, item: ReleaseItem, subscription: Subscription) -> bool {
        self.queue.enqueue(item, subscription).await
    }

    /// Soft-delete a subscription and stop polling its in-flight transfers
    ///
    /// Returns whether the subscription existed. Stored items are kept;
    /// completions that still arrive for them are not renamed.
    pub async fn remove_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let deleted = self.db.delete_subscription(id).await?;
        let stopped = self.progress.stop_for_subscription(id).await;
        if deleted {
            tracing::info!(subscription_id = %id, stopped_monitors = stopped, "subscription removed");
        }
        Ok(deleted)
    }

    /// Aggregate status of queue, scheduler, monitors and store
    pub async fn status(&self) -> Result<PipelineStatus> {
        Ok(PipelineStatus {
            queue_size: self.queue.size(),
            tasks: self.scheduler.status().await,
            monitored: self.progress.monitored(),
            unresolved_items: self.db.list_unresolved_release_items().await?.len(),
        })
    }
}
