//! Subscription CRUD operations.

use crate::error::DatabaseError;
use crate::types::{NewSubscription, Subscription, SubscriptionId};
use crate::{Error, Result};

use super::{Database, SubscriptionRow};

const SUBSCRIPTION_COLUMNS: &str = "id, official_title, title_raw, season, include_filter, \
     exclude_filter, rss_link, save_path, enabled, archived, deleted, created_at";

impl Database {
    /// Insert a new subscription, enabled and not archived
    pub async fn insert_subscription(&self, new: &NewSubscription) -> Result<SubscriptionId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (official_title, title_raw, season, include_filter,
                                       exclude_filter, rss_link, save_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.official_title)
        .bind(&new.title_raw)
        .bind(new.season)
        .bind(&new.include_filter)
        .bind(&new.exclude_filter)
        .bind(&new.rss_link)
        .bind(new.save_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert subscription: {}",
                e
            )))
        })?;

        Ok(SubscriptionId(result.last_insert_rowid()))
    }

    /// Get a subscription by ID, including soft-deleted ones
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get subscription: {}",
                e
            )))
        })?;

        Ok(row.map(Subscription::from))
    }

    /// All subscriptions that are not soft-deleted
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE deleted = 0 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list subscriptions: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Subscriptions new releases should be matched against
    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE enabled = 1 AND archived = 0 AND deleted = 0
            ORDER BY id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list active subscriptions: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Overwrite the user-editable fields of a subscription
    ///
    /// The deleted flag is left alone; use [`delete_subscription`](Self::delete_subscription).
    pub async fn update_subscription(&self, subscription: &Subscription) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET official_title = ?, title_raw = ?, season = ?, include_filter = ?,
                exclude_filter = ?, rss_link = ?, save_path = ?, enabled = ?, archived = ?
            WHERE id = ? AND deleted = 0
            "#,
        )
        .bind(&subscription.official_title)
        .bind(&subscription.title_raw)
        .bind(subscription.season)
        .bind(&subscription.include_filter)
        .bind(&subscription.exclude_filter)
        .bind(&subscription.rss_link)
        .bind(
            subscription
                .save_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(subscription.enabled)
        .bind(subscription.archived)
        .bind(subscription.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update subscription: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Archive or unarchive a subscription
    pub async fn set_subscription_archived(
        &self,
        id: SubscriptionId,
        archived: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE subscriptions SET archived = ? WHERE id = ? AND deleted = 0")
            .bind(archived)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set subscription archived: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a subscription
    ///
    /// The row stays so release items keep their history. Returns `false`
    /// if the subscription does not exist or was already deleted.
    pub async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query("UPDATE subscriptions SET deleted = 1 WHERE id = ? AND deleted = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete subscription: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
