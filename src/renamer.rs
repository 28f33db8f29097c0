//! Rename collaborator interface

use crate::error::Result;
use crate::types::{ReleaseItem, Subscription};
use async_trait::async_trait;

/// Moves or renames the files of a completed release into the subscription's layout
///
/// Failure semantics belong to the implementation. The pipeline calls it at
/// most once per completion event and never retries inline; a failed rename
/// is picked up again by the periodic reconciliation sweep. Implementations
/// should therefore be idempotent.
#[async_trait]
pub trait Renamer: Send + Sync {
    /// Rename the files belonging to `item`
    async fn rename(&self, item: &ReleaseItem, subscription: &Subscription) -> Result<()>;

    /// Name used in log output
    fn name(&self) -> &str {
        "renamer"
    }
}
