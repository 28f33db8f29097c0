//! Hash resolution: which candidate identifier does the agent really track?
//!
//! Accepting a submission does not mean the agent tracks the transfer under
//! the identifier the submission returned. Magnets can hash either way,
//! and some links are rejected after the fact. This stage probes each
//! candidate in order and promotes the first one the agent knows.

use crate::agent::DownloadAgent;
use crate::config::HashCheckConfig;
use crate::db::Database;
use crate::error::Result;
use crate::events::{DownloadCheck, DownloadStarted, Event, EventBus, EventHandler};
use crate::retry::with_retry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::WorkScope;

/// Handles `DownloadCheck` events
#[derive(Clone)]
pub struct HashResolutionMonitor {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    agent: Arc<dyn DownloadAgent>,
    config: Arc<HashCheckConfig>,
    scope: WorkScope,
}

impl HashResolutionMonitor {
    /// Create a monitor probing through `agent`
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        agent: Arc<dyn DownloadAgent>,
        config: HashCheckConfig,
    ) -> Self {
        Self {
            db,
            bus,
            agent,
            config: Arc::new(config),
            scope: WorkScope::default(),
        }
    }

    /// Resolve one submission and announce it
    ///
    /// Waits the grace period, resolves the candidates, records the winner
    /// on the stored item and emits `DownloadStarted`. Returns the resolved
    /// identifier, or `None` if the item stays unresolved.
    pub async fn check(&self, check: DownloadCheck) -> Option<String> {
        let DownloadCheck {
            mut item,
            subscription,
            candidates,
        } = check;

        if candidates.is_empty() {
            warn!(url = %item.url, "check event without candidate identifiers, ignoring");
            return None;
        }

        tokio::time::sleep(self.config.grace_period).await;

        let Some(uid) = self.resolve(&candidates).await else {
            warn!(
                name = %item.name,
                candidates = ?candidates,
                "no candidate identifier confirmed by agent, item left unresolved"
            );
            return None;
        };

        match self.db.set_download_uid(&item.url, &uid).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(url = %item.url, download_uid = %uid, "item missing or already resolved");
                return None;
            }
            Err(e) => {
                error!(url = %item.url, download_uid = %uid, error = %e, "failed to record download uid");
                return None;
            }
        }

        item.mark_resolved(uid.clone());
        info!(name = %item.name, download_uid = %uid, "download identifier resolved");
        self.bus
            .emit(Event::DownloadStarted(DownloadStarted { item, subscription }));
        Some(uid)
    }

    /// Probe candidates in order; the first one the agent reports wins
    ///
    /// Transport failures are retried per the probe retry policy. A clean
    /// "not found", or a candidate whose retries ran out, moves on to the
    /// next candidate.
    pub async fn resolve(&self, candidates: &[String]) -> Option<String> {
        for uid in candidates {
            match with_retry(&self.config.probe_retry, || self.agent.probe(uid)).await {
                Ok(Some(_)) => return Some(uid.clone()),
                Ok(None) => {
                    debug!(download_uid = %uid, "candidate not known to agent");
                }
                Err(e) => {
                    warn!(download_uid = %uid, error = %e, "candidate probe failed, trying next");
                }
            }
        }
        None
    }

    /// Number of checks still in flight
    pub fn pending(&self) -> usize {
        self.scope.active()
    }

    /// Cancel in-flight checks and wait for them to exit
    pub(crate) async fn shutdown(&self) {
        self.scope.shutdown().await;
    }
}

#[async_trait]
impl EventHandler for HashResolutionMonitor {
    async fn handle(&self, event: &Event) -> Result<()> {
        let Event::DownloadCheck(check) = event else {
            debug!(kind = ?event.kind(), "hash resolution ignoring event");
            return Ok(());
        };

        let this = self.clone();
        let check = check.clone();
        self.scope.spawn(async move {
            this.check(check).await;
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "hash_resolution"
    }
}
