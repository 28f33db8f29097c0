//! # bangumi-dl
//!
//! Acquisition pipeline for subscription-driven release downloading.
//!
//! Release items discovered upstream are matched against subscriptions,
//! handed to an external download agent, tracked until the agent confirms
//! and finishes the transfer, then renamed into the subscription's layout.
//!
//! ## Design Philosophy
//!
//! bangumi-dl is designed to be:
//! - **Library-first** - No CLI or UI; the agent and renamer are supplied by the embedder
//! - **Event-driven** - Stages communicate only through a typed event bus
//! - **Failure-tolerant** - Nothing escapes a loop boundary; a stuck item stalls, the process does not
//! - **Reconciling** - A periodic sweep recovers renames lost to a crash
//!
//! ## Quick Start
//!
//! ```no_run
//! use bangumi_dl::{Config, Pipeline, ReleaseItem};
//! use bangumi_dl::agent::DownloadAgent;
//! use bangumi_dl::renamer::Renamer;
//! use std::sync::Arc;
//!
//! # async fn example(agent: Arc<dyn DownloadAgent>, renamer: Arc<dyn Renamer>) -> bangumi_dl::Result<()> {
//! let pipeline = Pipeline::new(Config::default(), agent, renamer).await?;
//! pipeline.start().await?;
//!
//! // feed freshly parsed release items in
//! pipeline
//!     .ingest(vec![ReleaseItem::new(
//!         "[Sub] Frieren - 01 [1080p]",
//!         "magnet:?xt=urn:btih:0123456789abcdef",
//!     )])
//!     .await?;
//!
//! bangumi_dl::run_with_shutdown(pipeline).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download agent client interface
pub mod agent;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// In-process event bus
pub mod events;
/// Subscription matching
pub mod matching;
/// Acquisition pipeline (decomposed into focused submodules)
pub mod pipeline;
/// Submission queue
pub mod queue;
/// Rename collaborator interface
pub mod renamer;
/// Retry logic with exponential backoff
pub mod retry;
/// Cooperative periodic task scheduler
pub mod scheduler;
/// Core domain types
pub mod types;

// Re-export commonly used types
pub use agent::{DownloadAgent, TransferInfo};
pub use config::Config;
pub use db::Database;
pub use error::{AgentError, DatabaseError, Error, Result, TaskError};
pub use events::{Event, EventBus, EventKind};
pub use pipeline::{Pipeline, PipelineStatus};
pub use renamer::Renamer;
pub use types::{
    ItemState, NewSubscription, ReleaseItem, ReleaseItemId, Subscription, SubscriptionId,
    TaskState,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use bangumi_dl::{Config, Pipeline, run_with_shutdown};
/// # use bangumi_dl::{DownloadAgent, Renamer};
/// # use std::sync::Arc;
///
/// # async fn example(agent: Arc<dyn DownloadAgent>, renamer: Arc<dyn Renamer>) -> bangumi_dl::Result<()> {
/// let pipeline = Pipeline::new(Config::default(), agent, renamer).await?;
/// pipeline.start().await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(pipeline).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
