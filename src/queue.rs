//! In-memory FIFO of release items awaiting submission
//!
//! Many producers (feed ingestion), one consumer (the submission
//! controller). An item whose source URL is already waiting is refused; the
//! URL becomes acceptable again once the item is drained.

use crate::types::{ReleaseItem, Subscription};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// An item paired with the subscription it matched
#[derive(Clone, Debug)]
pub struct QueuedItem {
    /// Item with subscription fields stamped on
    pub item: ReleaseItem,
    /// The matched subscription
    pub subscription: Subscription,
}

#[derive(Default)]
struct QueueInner {
    items: VecDeque<QueuedItem>,
    urls: HashSet<String>,
}

/// Concurrency-safe submission queue
#[derive(Default)]
pub struct DownloadQueue {
    inner: Mutex<QueueInner>,
    /// Mirrors `inner.items.len()` for lock-free size reads
    len: AtomicUsize,
}

impl DownloadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the subscription fields onto `item` and append it
    ///
    /// Returns `false` if an item with the same URL is already queued.
    pub async fn enqueue(&self, mut item: ReleaseItem, subscription: Subscription) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.urls.insert(item.url.clone()) {
            debug!(url = %item.url, "item already queued, skipping");
            return false;
        }

        item.stamp(&subscription);
        debug!(name = %item.name, subscription = %subscription.official_title, "item queued");
        inner.items.push_back(QueuedItem { item, subscription });
        self.len.store(inner.items.len(), Ordering::Release);
        true
    }

    /// Enqueue every item for the same subscription; returns how many were accepted
    pub async fn enqueue_all(
        &self,
        items: impl IntoIterator<Item = ReleaseItem>,
        subscription: &Subscription,
    ) -> usize {
        let mut accepted = 0;
        for item in items {
            if self.enqueue(item, subscription.clone()).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Remove up to `max` items from the front, in insertion order
    pub async fn drain(&self, max: usize) -> Vec<QueuedItem> {
        let mut inner = self.inner.lock().await;
        let take = max.min(inner.items.len());
        let batch: Vec<QueuedItem> = inner.items.drain(..take).collect();
        for queued in &batch {
            inner.urls.remove(&queued.item.url);
        }
        self.len.store(inner.items.len(), Ordering::Release);
        batch
    }

    /// Number of queued items
    ///
    /// Advisory only; concurrent producers may change it immediately.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the queue is (advisorily) empty
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
