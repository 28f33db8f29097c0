//! Core types for bangumi-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw row id
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

id_type!(
    /// Unique identifier for a subscription
    SubscriptionId
);

id_type!(
    /// Unique identifier for a persisted release item
    ReleaseItemId
);

/// A user's standing rule for a tracked release series
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Store identifier
    pub id: SubscriptionId,
    /// Canonical display title
    pub official_title: String,
    /// Raw title as it appears in release names, used for matching
    pub title_raw: String,
    /// Season number
    pub season: i32,
    /// Comma-separated regexes; a release must match at least one (empty = accept all)
    pub include_filter: String,
    /// Comma-separated regexes; a release must match none
    pub exclude_filter: String,
    /// Feed the subscription was discovered from
    pub rss_link: String,
    /// Storage path override for completed files
    pub save_path: Option<PathBuf>,
    /// Whether new releases are acquired
    pub enabled: bool,
    /// Finished series kept for history
    pub archived: bool,
    /// Soft-delete flag
    pub deleted: bool,
}

impl Subscription {
    /// Whether new releases should be matched against this subscription
    pub fn is_active(&self) -> bool {
        self.enabled && !self.archived && !self.deleted
    }
}

/// Fields needed to create a subscription
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Canonical display title
    pub official_title: String,
    /// Raw title used for matching
    pub title_raw: String,
    /// Season number
    pub season: i32,
    /// Comma-separated include regexes
    #[serde(default)]
    pub include_filter: String,
    /// Comma-separated exclude regexes
    #[serde(default)]
    pub exclude_filter: String,
    /// Source feed link
    #[serde(default)]
    pub rss_link: String,
    /// Storage path override
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

/// Acquisition state of a release item
///
/// The only legal progression is `Unresolved -> Resolved -> Downloaded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Submitted (or not yet), no confirmed agent identifier
    Unresolved,
    /// The agent confirmed the item under `download_uid`
    Resolved,
    /// The agent reported the transfer; terminal acquisition state
    Downloaded,
}

/// A discovered downloadable candidate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseItem {
    /// Store identifier, `None` until persisted
    pub id: Option<ReleaseItemId>,
    /// Release name as published in the feed
    pub name: String,
    /// Source URL (torrent file or magnet link); unique per item
    pub url: String,
    /// Owning subscription, set once matched
    pub subscription_id: Option<SubscriptionId>,
    /// Owning feed
    pub feed_id: Option<i64>,
    /// Confirmed external-agent identifier
    pub download_uid: Option<String>,
    /// Terminal acquisition flag
    pub downloaded: bool,
    /// Set after the rename collaborator succeeded
    pub renamed: bool,
    /// Denormalized subscription title, stamped on enqueue
    pub subscription_title: Option<String>,
    /// Denormalized subscription season, stamped on enqueue
    pub subscription_season: Option<i32>,
    /// Denormalized feed link, stamped on enqueue
    pub feed_link: Option<String>,
}

impl ReleaseItem {
    /// A fresh, unpersisted and unmatched item
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            url: url.into(),
            subscription_id: None,
            feed_id: None,
            download_uid: None,
            downloaded: false,
            renamed: false,
            subscription_title: None,
            subscription_season: None,
            feed_link: None,
        }
    }

    /// Current acquisition state
    pub fn state(&self) -> ItemState {
        if self.downloaded {
            ItemState::Downloaded
        } else if self.download_uid.is_some() {
            ItemState::Resolved
        } else {
            ItemState::Unresolved
        }
    }

    /// Record the confirmed agent identifier
    ///
    /// Only valid from `Unresolved`. Returns `false` and leaves the item
    /// untouched otherwise.
    pub fn mark_resolved(&mut self, uid: impl Into<String>) -> bool {
        if self.state() != ItemState::Unresolved {
            return false;
        }
        self.download_uid = Some(uid.into());
        true
    }

    /// Flip the downloaded flag
    ///
    /// Only valid from `Resolved`. Returns `false` and leaves the item
    /// untouched otherwise.
    pub fn mark_downloaded(&mut self) -> bool {
        if self.state() != ItemState::Resolved {
            return false;
        }
        self.downloaded = true;
        true
    }

    /// Copy the subscription fields downstream consumers need
    pub fn stamp(&mut self, subscription: &Subscription) {
        self.subscription_id = Some(subscription.id);
        self.subscription_title = Some(subscription.official_title.clone());
        self.subscription_season = Some(subscription.season);
        self.feed_link = Some(subscription.rss_link.clone());
    }
}

/// Scheduler task state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Registered, loop not started
    Pending,
    /// Loop is active
    Running,
    /// Loop exited after a shutdown signal
    Completed,
    /// Loop died unexpectedly (panicked job)
    Failed,
    /// Loop was cancelled mid-invocation
    Cancelled,
}

impl TaskState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed => 2,
            TaskState::Failed => 3,
            TaskState::Cancelled => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            4 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    /// Whether the loop has exited
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}
