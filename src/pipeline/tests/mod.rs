
use super::test_helpers::*;
use super::*;
use crate::error::AgentError;
use crate::events::{DownloadStarted, EventKind};
use crate::types::{ReleaseItem, Subscription};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

/// Start only the dispatcher so emitted events reach observers
fn start_dispatcher(pipeline: &Pipeline) -> CancellationToken {
    let cancel = CancellationToken::new();
    pipeline.bus.spawn_dispatcher(cancel.clone()).unwrap();
    cancel
}

/// Wait (bounded) for the next observed event of `kind`
async fn next_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.kind() == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} event within 2s"))
}

/// Count the events of `kind` observed within `window`
async fn count_events(rx: &mut broadcast::Receiver<Event>, kind: EventKind, window: Duration) -> usize {
    let mut count = 0;
    let _ = tokio::time::timeout(window, async {
        while let Ok(event) = rx.recv().await {
            if event.kind() == kind {
                count += 1;
            }
        }
    })
    .await;
    count
}

/// Persist a matched, unresolved item for `subscription`
async fn stored_item(pipeline: &Pipeline, subscription: &Subscription, url: &str) -> ReleaseItem {
    let mut item = release(&subscription.title_raw, url);
    item.stamp(subscription);
    item.id = Some(pipeline.db.save_release_item(&item).await.unwrap());
    item
}

/// Persist an item already resolved to `uid`
async fn resolved_item(
    pipeline: &Pipeline,
    subscription: &Subscription,
    url: &str,
    uid: &str,
) -> ReleaseItem {
    let mut item = stored_item(pipeline, subscription, url).await;
    assert!(pipeline.db.set_download_uid(url, uid).await.unwrap());
    item.mark_resolved(uid);
    item
}
