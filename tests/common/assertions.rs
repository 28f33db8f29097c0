//! Event assertions for integration tests

use bangumi_dl::{Event, EventKind};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Wait for the next event of `kind` whose item has source `url`
///
/// Returns `None` on timeout or if the channel closes.
pub async fn wait_for_event(
    events: &mut Receiver<Event>,
    kind: EventKind,
    url: &str,
    timeout: Duration,
) -> Option<Event> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if event.kind() == kind && event.item().url == url => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}

/// Collect all events until timeout or predicate is satisfied
pub async fn collect_events_until<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}
