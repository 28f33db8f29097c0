//! Database layer for bangumi-dl
//!
//! SQLite persistence for subscriptions and release items. This is the
//! only durable state the pipeline shares between components.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`subscriptions`] - Subscription CRUD and soft delete
//! - [`release_items`] - Release item persistence and guarded acquisition-state writes

use crate::types::{ReleaseItem, ReleaseItemId, Subscription, SubscriptionId};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod release_items;
mod subscriptions;

/// Subscription record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Unique database ID
    pub id: i64,
    /// Canonical display title
    pub official_title: String,
    /// Raw title used for matching
    pub title_raw: String,
    /// Season number
    pub season: i32,
    /// Comma-separated include patterns
    pub include_filter: String,
    /// Comma-separated exclude patterns
    pub exclude_filter: String,
    /// Source feed link
    pub rss_link: String,
    /// Storage path override
    pub save_path: Option<String>,
    /// Whether new releases are acquired
    pub enabled: bool,
    /// Finished series kept for history
    pub archived: bool,
    /// Soft-delete flag
    pub deleted: bool,
    /// Unix timestamp when the subscription was created
    pub created_at: i64,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: SubscriptionId(row.id),
            official_title: row.official_title,
            title_raw: row.title_raw,
            season: row.season,
            include_filter: row.include_filter,
            exclude_filter: row.exclude_filter,
            rss_link: row.rss_link,
            save_path: row.save_path.map(PathBuf::from),
            enabled: row.enabled,
            archived: row.archived,
            deleted: row.deleted,
        }
    }
}

/// Release item record from database
#[derive(Debug, Clone, FromRow)]
pub struct ReleaseItemRow {
    /// Unique database ID
    pub id: i64,
    /// Release name
    pub name: String,
    /// Source URL (unique)
    pub url: String,
    /// Owning subscription
    pub subscription_id: Option<i64>,
    /// Owning feed
    pub feed_id: Option<i64>,
    /// Confirmed agent identifier
    pub download_uid: Option<String>,
    /// Terminal acquisition flag
    pub downloaded: bool,
    /// Rename finished
    pub renamed: bool,
    /// Denormalized subscription title
    pub subscription_title: Option<String>,
    /// Denormalized subscription season
    pub subscription_season: Option<i32>,
    /// Denormalized feed link
    pub feed_link: Option<String>,
    /// Unix timestamp when the item was first saved
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl From<ReleaseItemRow> for ReleaseItem {
    fn from(row: ReleaseItemRow) -> Self {
        ReleaseItem {
            id: Some(ReleaseItemId(row.id)),
            name: row.name,
            url: row.url,
            subscription_id: row.subscription_id.map(SubscriptionId),
            feed_id: row.feed_id,
            download_uid: row.download_uid,
            downloaded: row.downloaded,
            renamed: row.renamed,
            subscription_title: row.subscription_title,
            subscription_season: row.subscription_season,
            feed_link: row.feed_link,
        }
    }
}

/// Database handle for bangumi-dl
pub struct Database {
    pool: SqlitePool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
