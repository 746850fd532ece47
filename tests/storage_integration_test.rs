use chrono::{Duration, TimeZone, Utc};
use linkhop::analytics::{BucketKey, ClickDimensions};
use linkhop::models::{NewLink, RedirectType};
use linkhop::storage::{
    CachedStorage, ListPosition, ListQuery, SqliteStorage, Storage, StorageError,
};
use std::sync::Arc;

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn new_link(shortcode: &str, owner: Option<&str>, created_offset_ms: i64) -> NewLink {
    NewLink {
        shortcode: shortcode.to_string(),
        url: "https://example.com/".to_string(),
        title: None,
        description: None,
        tags: vec!["docs".to_string()],
        password_hash: None,
        activates_at: None,
        expires_at: None,
        redirect_type: RedirectType::Found,
        archived: false,
        created_by: owner.map(str::to_string),
        created: Utc.timestamp_millis_opt(1_700_000_000_000 + created_offset_ms).unwrap(),
    }
}

fn bucket(shortcode: &str, hour: i64, source: Option<&str>) -> BucketKey {
    BucketKey {
        shortcode: shortcode.to_string(),
        hour,
        dims: ClickDimensions {
            utm_source: source.map(str::to_string),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_create_get_update_delete() {
    let storage = create_test_storage().await;

    let created = storage.create(&new_link("crud", Some("alice"), 0)).await.unwrap();
    assert_eq!(created.shortcode, "crud");
    assert_eq!(created.clicks, 0);
    assert_eq!(created.tags, vec!["docs".to_string()]);
    assert_eq!(created.created_by.as_deref(), Some("alice"));

    let mut link = storage.get("crud").await.unwrap().unwrap();
    link.url = "https://example.org/moved".to_string();
    link.expires_at = Some(link.created + Duration::days(1));
    link.redirect_type = RedirectType::PermanentRedirect;
    link.archived = true;
    assert!(storage.update(&link).await.unwrap());

    let reloaded = storage.get_authoritative("crud").await.unwrap().unwrap();
    assert_eq!(reloaded.url, "https://example.org/moved");
    assert_eq!(reloaded.expires_at, link.expires_at);
    assert_eq!(reloaded.redirect_type, RedirectType::PermanentRedirect);
    assert!(reloaded.archived);

    assert!(storage.delete("crud").await.unwrap());
    assert!(!storage.delete("crud").await.unwrap());
    assert!(storage.get("crud").await.unwrap().is_none());

    let mut ghost = link.clone();
    ghost.shortcode = "ghost".to_string();
    assert!(!storage.update(&ghost).await.unwrap());
}

#[tokio::test]
async fn test_duplicate_create_is_conflict() {
    let storage = create_test_storage().await;
    storage.create(&new_link("dup", None, 0)).await.unwrap();

    let result = storage.create(&new_link("dup", None, 1)).await;
    assert!(matches!(result, Err(StorageError::Conflict)));
}

#[tokio::test]
async fn test_concurrent_create_same_shortcode() {
    let storage = create_test_storage().await;

    let mut handles = vec![];
    for i in 0..10 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.create(&new_link("race", None, i)).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(StorageError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(successes, 1, "Exactly one create should succeed");
    assert_eq!(conflicts, 9, "All other creates should conflict");
}

#[tokio::test]
async fn test_increment_clicks() {
    let storage = create_test_storage().await;
    storage.create(&new_link("hits", None, 0)).await.unwrap();

    let mut handles = vec![];
    for _ in 0..20 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.increment_clicks("hits", 1).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    storage.increment_clicks("hits", 5).await.unwrap();

    let link = storage.get("hits").await.unwrap().unwrap();
    assert_eq!(link.clicks, 25);
}

#[tokio::test]
async fn test_keyset_listing() {
    let storage = create_test_storage().await;
    for i in 0..5 {
        let owner = if i % 2 == 0 { "alice" } else { "bob" };
        storage
            .create(&new_link(&format!("l{}", i), Some(owner), i))
            .await
            .unwrap();
    }
    // same creation instant as l4, ordered by id
    storage.create(&new_link("l5", Some("bob"), 4)).await.unwrap();

    let first = storage
        .list(&ListQuery {
            limit: 3,
            after: None,
            owner: None,
        })
        .await
        .unwrap();
    let codes: Vec<&str> = first.iter().map(|l| l.shortcode.as_str()).collect();
    assert_eq!(codes, vec!["l5", "l4", "l3"]);

    let last = first.last().unwrap();
    let rest = storage
        .list(&ListQuery {
            limit: 10,
            after: Some(ListPosition {
                created_at: last.created.timestamp_millis(),
                id: last.id,
            }),
            owner: None,
        })
        .await
        .unwrap();
    let codes: Vec<&str> = rest.iter().map(|l| l.shortcode.as_str()).collect();
    assert_eq!(codes, vec!["l2", "l1", "l0"]);

    let alices = storage
        .list(&ListQuery {
            limit: 10,
            after: None,
            owner: Some("alice".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(alices.len(), 3);

    assert_eq!(storage.count(None).await.unwrap(), 6);
    assert_eq!(storage.count(Some("bob")).await.unwrap(), 3);

    let mut owned = storage.owned_shortcodes("bob").await.unwrap();
    owned.sort();
    assert_eq!(owned, vec!["l1", "l3", "l5"]);
}

#[tokio::test]
async fn test_click_buckets_accumulate() {
    let storage = create_test_storage().await;
    storage.create(&new_link("a", None, 0)).await.unwrap();
    storage.create(&new_link("b", None, 1)).await.unwrap();
    let hour = 1_700_000_000 / 3600 * 3600;

    storage
        .upsert_click_buckets(&[
            (bucket("a", hour, Some("twitter")), 2),
            (bucket("a", hour, None), 1),
        ])
        .await
        .unwrap();
    storage
        .upsert_click_buckets(&[
            (bucket("a", hour, Some("twitter")), 3),
            (bucket("b", hour + 3600, None), 4),
        ])
        .await
        .unwrap();

    let mut loaded = storage.load_click_buckets().await.unwrap();
    loaded.sort_by(|x, y| {
        (x.0.shortcode.as_str(), x.0.hour, &x.0.dims.utm_source)
            .cmp(&(y.0.shortcode.as_str(), y.0.hour, &y.0.dims.utm_source))
    });
    assert_eq!(
        loaded,
        vec![
            (bucket("a", hour, None), 1),
            (bucket("a", hour, Some("twitter")), 5),
            (bucket("b", hour + 3600, None), 4),
        ]
    );

    assert!(storage.delete("a").await.unwrap());
    let loaded = storage.load_click_buckets().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0.shortcode, "b");
}

#[tokio::test]
async fn test_delete_removes_click_buckets() {
    let storage = create_test_storage().await;
    storage.create(&new_link("gone", None, 0)).await.unwrap();
    storage
        .upsert_click_buckets(&[(bucket("gone", 0, None), 9)])
        .await
        .unwrap();

    assert!(storage.delete("gone").await.unwrap());
    assert!(storage.load_click_buckets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_buckets_without_link_are_skipped() {
    let storage = create_test_storage().await;
    storage.create(&new_link("live", None, 0)).await.unwrap();

    let skipped = storage
        .upsert_click_buckets(&[
            (bucket("live", 0, None), 2),
            (bucket("deleted", 0, None), 5),
            (bucket("deleted", 3600, None), 1),
        ])
        .await
        .unwrap();
    assert_eq!(skipped, vec!["deleted".to_string()]);

    let loaded = storage.load_click_buckets().await.unwrap();
    assert_eq!(loaded, vec![(bucket("live", 0, None), 2)]);
}

#[tokio::test]
async fn test_cached_storage_buffers_clicks() {
    let base = create_test_storage().await;
    base.create(&new_link("buffered", None, 0)).await.unwrap();
    let cached = CachedStorage::new(Arc::clone(&base), 100, 300, 3600);

    for _ in 0..3 {
        cached.increment_clicks("buffered", 1).await.unwrap();
    }

    assert_eq!(base.get("buffered").await.unwrap().unwrap().clicks, 0);
    assert_eq!(
        cached.get_authoritative("buffered").await.unwrap().unwrap().clicks,
        3
    );

    cached.flush().await.unwrap();
    assert_eq!(base.get("buffered").await.unwrap().unwrap().clicks, 3);
    assert_eq!(
        cached.get_authoritative("buffered").await.unwrap().unwrap().clicks,
        3
    );
    cached.shutdown().await;
}
