use super::*;
use std::path::PathBuf;

#[tokio::test]
async fn test_insert_and_get_subscription() {
    let (db, _temp) = setup_db().await;

    let id = db
        .insert_subscription(&NewSubscription {
            official_title: "Sousou no Frieren".into(),
            title_raw: "Frieren".into(),
            season: 2,
            include_filter: "1080p".into(),
            exclude_filter: "720,HEVC".into(),
            rss_link: "https://mikan.example/rss/1".into(),
            save_path: Some(PathBuf::from("/media/anime/Frieren")),
        })
        .await
        .unwrap();

    let sub = db.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.id, id);
    assert_eq!(sub.official_title, "Sousou no Frieren");
    assert_eq!(sub.title_raw, "Frieren");
    assert_eq!(sub.season, 2);
    assert_eq!(sub.include_filter, "1080p");
    assert_eq!(sub.exclude_filter, "720,HEVC");
    assert_eq!(sub.save_path, Some(PathBuf::from("/media/anime/Frieren")));
    assert!(sub.enabled);
    assert!(!sub.archived);
    assert!(!sub.deleted);
}

#[tokio::test]
async fn test_get_missing_subscription() {
    let (db, _temp) = setup_db().await;
    assert!(db.get_subscription(SubscriptionId(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_and_active_filtering() {
    let (db, _temp) = setup_db().await;
    let a = insert_test_subscription(&db, "A").await;
    let b = insert_test_subscription(&db, "B").await;
    let c = insert_test_subscription(&db, "C").await;
    let d = insert_test_subscription(&db, "D").await;

    assert!(db.set_subscription_archived(b, true).await.unwrap());
    assert!(db.delete_subscription(c).await.unwrap());
    let mut disabled = db.get_subscription(d).await.unwrap().unwrap();
    disabled.enabled = false;
    assert!(db.update_subscription(&disabled).await.unwrap());

    let listed: Vec<_> = db
        .list_subscriptions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, vec![a, b, d], "soft-deleted rows are hidden");

    let active: Vec<_> = db
        .list_active_subscriptions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(active, vec![a]);
}

#[tokio::test]
async fn test_update_subscription_filters() {
    let (db, _temp) = setup_db().await;
    let id = insert_test_subscription(&db, "Dandadan").await;

    let mut sub = db.get_subscription(id).await.unwrap().unwrap();
    sub.exclude_filter = "720".into();
    sub.season = 2;
    assert!(db.update_subscription(&sub).await.unwrap());

    let reloaded = db.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(reloaded.exclude_filter, "720");
    assert_eq!(reloaded.season, 2);
}

#[tokio::test]
async fn test_soft_delete_keeps_row() {
    let (db, _temp) = setup_db().await;
    let id = insert_test_subscription(&db, "Dungeon Meshi").await;

    assert!(db.delete_subscription(id).await.unwrap());
    assert!(!db.delete_subscription(id).await.unwrap(), "already deleted");

    let sub = db.get_subscription(id).await.unwrap().unwrap();
    assert!(sub.deleted);
    assert!(!sub.is_active());

    // deleted subscriptions are frozen
    let mut edited = sub.clone();
    edited.title_raw = "changed".into();
    assert!(!db.update_subscription(&edited).await.unwrap());
    assert!(!db.set_subscription_archived(id, true).await.unwrap());
}
