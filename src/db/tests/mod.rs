mod subscriptions;

use super::*;
use crate::types::{NewSubscription, ReleaseItem, SubscriptionId};
use tempfile::NamedTempFile;

/// Helper: create a fresh database with migrations applied
pub(super) async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Helper: insert a subscription with sensible defaults, returning its ID
pub(super) async fn insert_test_subscription(db: &Database, title: &str) -> SubscriptionId {
    db.insert_subscription(&NewSubscription {
        official_title: title.to_string(),
        title_raw: title.to_string(),
        season: 1,
        rss_link: format!("https://mikan.example/rss/{title}"),
        ..Default::default()
    })
    .await
    .unwrap()
}

/// Helper: a matched item for `subscription_id`
pub(super) fn test_item(url: &str, subscription_id: SubscriptionId) -> ReleaseItem {
    let mut item = ReleaseItem::new(format!("[Sub] {url}"), url);
    item.subscription_id = Some(subscription_id);
    item.subscription_title = Some("Test".to_string());
    item.subscription_season = Some(1);
    item
}
