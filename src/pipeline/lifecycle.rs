//! Startup, shutdown and restart coordination.

use crate::error::Result;
use crate::events::{EventHandler, EventKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Pipeline;

impl Pipeline {
    /// Start the pipeline
    ///
    /// Subscribes the monitors to the event bus, starts the dispatcher and
    /// then every scheduler task. Calling `start` on a running pipeline is a
    /// no-op.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.running {
            tracing::debug!("pipeline already running");
            return Ok(());
        }

        let hash_check: Arc<dyn EventHandler> = self.hash_check.clone();
        let progress: Arc<dyn EventHandler> = self.progress.clone();
        let mut subscriptions = vec![
            (EventKind::DownloadCheck, hash_check),
            (EventKind::DownloadStarted, progress),
        ];
        if self.config.rename.enabled {
            let rename: Arc<dyn EventHandler> = self.rename.clone();
            subscriptions.push((EventKind::DownloadCompleted, rename));
        }
        for (kind, handler) in subscriptions {
            let id = self.bus.subscribe(kind, handler).await;
            runtime.handlers.push((kind, id));
        }

        let cancel = CancellationToken::new();
        match self.bus.spawn_dispatcher(cancel.clone()) {
            Some(handle) => runtime.dispatcher = Some((cancel, handle)),
            None => tracing::warn!("event dispatcher already running elsewhere"),
        }

        let started = self.scheduler.start_all().await;
        runtime.running = true;
        tracing::info!(tasks = started, "pipeline started");
        Ok(())
    }

    /// Gracefully shut down the pipeline
    ///
    /// 1. Stops the scheduler (every job loop exits within one interval)
    /// 2. Stops the dispatcher; undelivered events stay queued
    /// 3. Unsubscribes the monitors so no new work is accepted
    /// 4. Cancels and awaits in-flight submission, resolution, polling and
    ///    rename work
    ///
    /// Calling `shutdown` on a stopped pipeline is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if !runtime.running {
            tracing::debug!("pipeline not running");
            return Ok(());
        }
        tracing::info!("initiating pipeline shutdown");

        self.scheduler.shutdown().await;

        if let Some((cancel, handle)) = runtime.dispatcher.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "event dispatcher terminated abnormally");
            }
        }

        for (kind, id) in runtime.handlers.drain(..) {
            self.bus.unsubscribe(kind, id).await;
        }

        self.submission.shutdown().await;
        self.hash_check.shutdown().await;
        self.progress.shutdown().await;
        self.rename.shutdown().await;

        runtime.running = false;
        tracing::info!("pipeline shutdown complete");
        Ok(())
    }

    /// Shut down, reset every scheduler task to `Pending` and start again
    pub async fn restart(&self) -> Result<()> {
        self.shutdown().await?;
        self.scheduler.reset().await;
        self.start().await
    }

    /// Whether [`start`](Self::start) has run without a matching shutdown
    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.running
    }
}
