//! In-process event bus
//!
//! Typed publish/subscribe hub connecting the pipeline stages. Delivery is
//! in-memory, at-most-once and best-effort: an event published while nobody
//! is subscribed to its kind is dropped.
//!
//! Two entry points exist:
//! - [`EventBus::publish`] delivers immediately and waits for every handler.
//! - [`EventBus::emit`] enqueues onto a bounded queue drained by the
//!   dispatcher task ([`EventBus::spawn_dispatcher`]). A full queue drops the
//!   event rather than growing without bound.

use crate::error::Result;
use crate::types::{ReleaseItem, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Event discriminant used for subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A submission returned candidate identifiers that need confirming
    DownloadCheck,
    /// The agent confirmed a transfer under a resolved identifier
    DownloadStarted,
    /// The agent reported the transfer as finished
    DownloadCompleted,
    /// The rename collaborator finished with a completed item
    RenameCompleted,
}

/// Payload of [`Event::DownloadCheck`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadCheck {
    /// The submitted item, persisted but unresolved
    pub item: ReleaseItem,
    /// Owning subscription
    pub subscription: Subscription,
    /// Identifiers the agent might track the item under, in probe order
    pub candidates: Vec<String>,
}

/// Payload of [`Event::DownloadStarted`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadStarted {
    /// Item with `download_uid` set
    pub item: ReleaseItem,
    /// Owning subscription
    pub subscription: Subscription,
}

/// Payload of [`Event::DownloadCompleted`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadCompleted {
    /// The finished item
    pub item: ReleaseItem,
    /// Owning subscription
    pub subscription: Subscription,
}

/// Payload of [`Event::RenameCompleted`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameCompleted {
    /// The renamed item
    pub item: ReleaseItem,
    /// Owning subscription
    pub subscription: Subscription,
}

/// Pipeline event
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// See [`DownloadCheck`]
    DownloadCheck(DownloadCheck),
    /// See [`DownloadStarted`]
    DownloadStarted(DownloadStarted),
    /// See [`DownloadCompleted`]
    DownloadCompleted(DownloadCompleted),
    /// See [`RenameCompleted`]
    RenameCompleted(RenameCompleted),
}

impl Event {
    /// The kind handlers subscribe to
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DownloadCheck(_) => EventKind::DownloadCheck,
            Event::DownloadStarted(_) => EventKind::DownloadStarted,
            Event::DownloadCompleted(_) => EventKind::DownloadCompleted,
            Event::RenameCompleted(_) => EventKind::RenameCompleted,
        }
    }

    /// The item the event is about
    pub fn item(&self) -> &ReleaseItem {
        match self {
            Event::DownloadCheck(e) => &e.item,
            Event::DownloadStarted(e) => &e.item,
            Event::DownloadCompleted(e) => &e.item,
            Event::RenameCompleted(e) => &e.item,
        }
    }
}

/// Receives events of the kinds it was subscribed for
///
/// Errors are logged by the bus and never reach the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: &Event) -> Result<()>;

    /// Name used in log output
    fn name(&self) -> &str;
}

/// Token returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// Publish/subscribe hub
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
    queue_tx: mpsc::Sender<Event>,
    /// Taken by the running dispatcher and put back when it stops
    queue_rx: std::sync::Mutex<Option<mpsc::Receiver<Event>>>,
    observer: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose dispatch queue and observer buffer hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (observer, _) = broadcast::channel(capacity);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_tx,
            queue_rx: std::sync::Mutex::new(Some(queue_rx)),
            observer,
        }
    }

    /// Register `handler` for events of `kind`
    ///
    /// Handlers of one kind are invoked in registration order, though they
    /// run concurrently and callers must not rely on completion order.
    pub async fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(?kind, handler = handler.name(), "handler subscribed");
        self.handlers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(Registration { id, handler });
        id
    }

    /// Remove a handler; returns whether it was registered
    pub async fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(registrations) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Number of handlers currently registered for `kind`
    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map_or(0, |registrations| registrations.len())
    }

    /// Deliver `event` to every current subscriber of its kind
    ///
    /// Each handler runs in its own task; a handler that fails or panics is
    /// logged and does not affect delivery to the others. Returns the number
    /// of handlers the event was delivered to.
    pub async fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        self.observer.send(event.clone()).ok();

        let targets: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .await
            .get(&kind)
            .map(|registrations| registrations.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            tracing::debug!(?kind, "no subscribers, event dropped");
            return 0;
        }

        let event = Arc::new(event);
        let mut set = JoinSet::new();
        for handler in &targets {
            let handler = handler.clone();
            let event = event.clone();
            set.spawn(async move {
                let result = handler.handle(&event).await;
                (handler, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((handler, Err(e))) => {
                    tracing::error!(?kind, handler = handler.name(), error = %e, "event handler failed");
                }
                Err(e) => {
                    tracing::error!(?kind, error = %e, "event handler panicked");
                }
            }
        }

        targets.len()
    }

    /// Queue `event` for the dispatcher without waiting
    ///
    /// Drops the event with a warning when the queue is full.
    pub fn emit(&self, event: Event) {
        match self.queue_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    kind = ?event.kind(),
                    url = %event.item().url,
                    "event queue full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(kind = ?event.kind(), "event queue closed, event dropped");
            }
        }
    }

    /// Receive a copy of every event delivered through the bus
    pub fn observe(&self) -> broadcast::Receiver<Event> {
        self.observer.subscribe()
    }

    /// Start the task that drains the emit queue into [`publish`](Self::publish)
    ///
    /// Returns `None` if a dispatcher is already running. The dispatcher stops
    /// when `cancel` fires; events still queued stay queued for the next one.
    pub fn spawn_dispatcher(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = match self.queue_rx.lock() {
            Ok(mut slot) => slot.take()?,
            Err(poisoned) => poisoned.into_inner().take()?,
        };
        let bus = Arc::clone(self);

        Some(tokio::spawn(async move {
            tracing::debug!("event dispatcher started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(event) => {
                            bus.publish(event).await;
                        }
                        None => break,
                    },
                }
            }

            match bus.queue_rx.lock() {
                Ok(mut slot) => *slot = Some(rx),
                Err(poisoned) => *poisoned.into_inner() = Some(rx),
            }
            tracing::debug!("event dispatcher stopped");
        }))
    }
}
