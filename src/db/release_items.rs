//! Release item persistence.
//!
//! Acquisition state only moves forward: unresolved, resolved (download UID
//! set), downloaded, renamed. Each state write below is a conditional
//! `UPDATE` guarded on the previous state and reports whether a row
//! actually changed, so a late or duplicated write is a no-op.

use crate::error::DatabaseError;
use crate::types::{ReleaseItem, ReleaseItemId, SubscriptionId};
use crate::{Error, Result};

use super::{Database, ReleaseItemRow};

const RELEASE_ITEM_COLUMNS: &str = "id, name, url, subscription_id, feed_id, download_uid, \
     downloaded, renamed, subscription_title, subscription_season, feed_link, created_at, updated_at";

impl Database {
    /// Insert an item, or refresh its descriptive fields if the URL is already stored
    ///
    /// Acquisition state (`download_uid`, `downloaded`, `renamed`) is never
    /// written here.
    pub async fn save_release_item(&self, item: &ReleaseItem) -> Result<ReleaseItemId> {
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO release_items (name, url, subscription_id, feed_id, subscription_title,
                                       subscription_season, feed_link, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                name = excluded.name,
                subscription_id = COALESCE(excluded.subscription_id, release_items.subscription_id),
                feed_id = COALESCE(excluded.feed_id, release_items.feed_id),
                subscription_title = COALESCE(excluded.subscription_title, release_items.subscription_title),
                subscription_season = COALESCE(excluded.subscription_season, release_items.subscription_season),
                feed_link = COALESCE(excluded.feed_link, release_items.feed_link),
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&item.name)
        .bind(&item.url)
        .bind(item.subscription_id)
        .bind(item.feed_id)
        .bind(&item.subscription_title)
        .bind(item.subscription_season)
        .bind(&item.feed_link)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save release item: {}",
                e
            )))
        })?;

        Ok(ReleaseItemId(id))
    }

    /// Get a release item by ID
    pub async fn get_release_item(&self, id: ReleaseItemId) -> Result<Option<ReleaseItem>> {
        self.fetch_one_item("id = ?", id.get(), "get release item")
            .await
    }

    /// Find a release item by its source URL
    pub async fn find_release_item_by_url(&self, url: &str) -> Result<Option<ReleaseItem>> {
        let row = sqlx::query_as::<_, ReleaseItemRow>(&format!(
            "SELECT {RELEASE_ITEM_COLUMNS} FROM release_items WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find release item by url: {}",
                e
            )))
        })?;

        Ok(row.map(ReleaseItem::from))
    }

    /// Find a release item by its confirmed agent identifier
    pub async fn find_release_item_by_uid(&self, uid: &str) -> Result<Option<ReleaseItem>> {
        let row = sqlx::query_as::<_, ReleaseItemRow>(&format!(
            "SELECT {RELEASE_ITEM_COLUMNS} FROM release_items WHERE download_uid = ? LIMIT 1"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find release item by uid: {}",
                e
            )))
        })?;

        Ok(row.map(ReleaseItem::from))
    }

    /// Whether an item with this source URL is stored
    pub async fn release_item_exists(&self, url: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM release_items WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check release item: {}",
                    e
                )))
            })?;

        Ok(count > 0)
    }

    /// All items owned by a subscription
    pub async fn list_release_items_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<ReleaseItem>> {
        self.fetch_items(
            "subscription_id = ?",
            Some(subscription_id.get()),
            "list release items for subscription",
        )
        .await
    }

    /// Persisted items that never got a confirmed agent identifier
    pub async fn list_unresolved_release_items(&self) -> Result<Vec<ReleaseItem>> {
        self.fetch_items(
            "download_uid IS NULL AND downloaded = 0",
            None,
            "list unresolved release items",
        )
        .await
    }

    /// Items marked downloaded whose rename has not happened yet
    pub async fn list_downloaded_unrenamed(&self) -> Result<Vec<ReleaseItem>> {
        self.fetch_items(
            "downloaded = 1 AND renamed = 0",
            None,
            "list downloaded but unrenamed items",
        )
        .await
    }

    /// Record the confirmed agent identifier
    ///
    /// Only applies to an unresolved item. Returns whether the row changed.
    pub async fn set_download_uid(&self, url: &str, uid: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE release_items SET download_uid = ?, updated_at = ?
            WHERE url = ? AND download_uid IS NULL AND downloaded = 0
            "#,
        )
        .bind(uid)
        .bind(now)
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set download uid: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip the downloaded flag of the item tracked under `uid`
    ///
    /// Only applies to a resolved, not yet downloaded item. Returns whether
    /// the row changed.
    pub async fn mark_downloaded(&self, uid: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE release_items SET downloaded = 1, updated_at = ?
            WHERE download_uid = ? AND downloaded = 0
            "#,
        )
        .bind(now)
        .bind(uid)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark downloaded: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a finished rename
    ///
    /// Only applies to a downloaded item. Returns whether the row changed.
    pub async fn mark_renamed(&self, url: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE release_items SET renamed = 1, updated_at = ?
            WHERE url = ? AND downloaded = 1 AND renamed = 0
            "#,
        )
        .bind(now)
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark renamed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete the item with this source URL; returns whether it existed
    pub async fn delete_release_item_by_url(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM release_items WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete release item: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_one_item(
        &self,
        condition: &str,
        param: i64,
        what: &str,
    ) -> Result<Option<ReleaseItem>> {
        let row = sqlx::query_as::<_, ReleaseItemRow>(&format!(
            "SELECT {RELEASE_ITEM_COLUMNS} FROM release_items WHERE {condition}"
        ))
        .bind(param)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to {}: {}",
                what, e
            )))
        })?;

        Ok(row.map(ReleaseItem::from))
    }

    async fn fetch_items(
        &self,
        condition: &str,
        param: Option<i64>,
        what: &str,
    ) -> Result<Vec<ReleaseItem>> {
        let sql = format!(
            "SELECT {RELEASE_ITEM_COLUMNS} FROM release_items WHERE {condition} ORDER BY id ASC"
        );
        let mut query = sqlx::query_as::<_, ReleaseItemRow>(&sql);
        if let Some(param) = param {
            query = query.bind(param);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to {}: {}",
                what, e
            )))
        })?;

        Ok(rows.into_iter().map(ReleaseItem::from).collect())
    }
}
