//! Download agent client interface
//!
//! The pipeline never speaks the agent's control protocol itself. It is
//! handed something implementing [`DownloadAgent`] and treats every call as
//! an opaque RPC that may fail with an [`AgentError`].

use crate::error::AgentError;
use crate::types::{ReleaseItem, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transfer state reported by the agent for a tracked identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    /// Estimated seconds until completion, if the agent knows
    pub eta: Option<i64>,
    /// Where the agent is writing the files
    pub save_path: PathBuf,
    /// Unix timestamp of completion, `0` while still transferring
    pub completed_at: i64,
}

impl TransferInfo {
    /// Whether the agent reports the transfer as finished
    pub fn is_complete(&self) -> bool {
        self.completed_at != 0
    }
}

/// Client for the external download-management service
///
/// # Examples
///
/// ```no_run
/// use bangumi_dl::agent::DownloadAgent;
///
/// # async fn example(agent: &dyn DownloadAgent) {
/// if !agent.is_authenticated().await {
///     agent.login().await.ok();
/// }
/// match agent.probe("3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0").await {
///     Ok(Some(info)) if info.is_complete() => println!("done at {}", info.completed_at),
///     Ok(Some(info)) => println!("eta {:?}", info.eta),
///     Ok(None) => println!("agent does not know this transfer"),
///     Err(e) => println!("probe failed: {e}"),
/// }
/// # }
/// ```
#[async_trait]
pub trait DownloadAgent: Send + Sync {
    /// Hand one item to the agent
    ///
    /// Returns every identifier the transfer might be tracked under. More
    /// than one candidate is normal when the source only allows the hash to
    /// be derived ambiguously (v1/v2 info-hashes, base32 magnets). An empty
    /// list means the agent accepted nothing.
    async fn submit(
        &self,
        item: &ReleaseItem,
        subscription: &Subscription,
    ) -> Result<Vec<String>, AgentError>;

    /// Query a transfer by identifier
    ///
    /// `Ok(None)` is a clean "not found" and must not be reported as an error.
    async fn probe(&self, uid: &str) -> Result<Option<TransferInfo>, AgentError>;

    /// Whether the current session can issue calls
    async fn is_authenticated(&self) -> bool;

    /// Establish a session
    async fn login(&self) -> Result<(), AgentError>;

    /// Name used in log output
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_completion() {
        let mut info = TransferInfo {
            eta: Some(0),
            save_path: PathBuf::from("/downloads/Frieren/Season 1"),
            completed_at: 0,
        };
        assert!(!info.is_complete());

        info.completed_at = 1_700_000_000;
        assert!(info.is_complete());
    }
}
