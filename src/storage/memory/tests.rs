use serde_json::json;

use super::*;
use crate::interfaces::{item_not_exists, ConflictReason};

fn attrs(value: serde_json::Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

fn listing_index() -> IndexDefinition {
    IndexDefinition::new("GSI1", "GSI1PK", "GSI1SK")
}

#[tokio::test]
async fn test_put_then_get() {
    let store = InMemoryStore::new();
    let key = ItemKey::new("STORY#s1", "STORY#s1");

    store
        .put(&key, attrs(json!({"title": "Dragons"})), None)
        .await
        .unwrap();

    let item = store.get(&key).await.unwrap();
    assert_eq!(item.get_str("title"), Some("Dragons"));
    assert_eq!(store.item_count().await, 1);
}

#[tokio::test]
async fn test_fail_on_write_leaves_state_untouched() {
    let store = InMemoryStore::new();
    let key = ItemKey::new("STORY#s1", "STORY#s1");
    store.set_fail_on_write(true).await;

    let err = store.put(&key, Attributes::new(), None).await.unwrap_err();
    assert!(err.is_transient());
    assert!(store.peek(&key).await.is_none());

    store.set_fail_on_write(false).await;
    store.put(&key, Attributes::new(), None).await.unwrap();
}

#[tokio::test]
async fn test_fail_writes_to_targets_one_key() {
    let store = InMemoryStore::new();
    let bad = ItemKey::new("STORY#s1", "COMMENT#parent");
    let good = ItemKey::new("STORY#s1", "STORY#s1");
    store.put(&bad, Attributes::new(), None).await.unwrap();
    store.put(&good, Attributes::new(), None).await.unwrap();
    store.fail_writes_to(bad.clone()).await;

    let err = store
        .update(&bad, &[UpdateOp::add("stats.replyCount", 1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));

    let updated = store
        .update(&good, &[UpdateOp::add("stats.commentCount", 1)], None)
        .await
        .unwrap();
    assert_eq!(updated.get_i64("stats.commentCount"), Some(1));
}

#[tokio::test]
async fn test_fail_next_writes_counts_down() {
    let store = InMemoryStore::new();
    let key = ItemKey::new("A", "B");
    store.fail_next_writes(2).await;

    assert!(store.put(&key, Attributes::new(), None).await.is_err());
    assert!(store.put(&key, Attributes::new(), None).await.is_err());
    assert!(store.put(&key, Attributes::new(), None).await.is_ok());
}

#[tokio::test]
async fn test_fail_on_read() {
    let store = InMemoryStore::new();
    let key = ItemKey::new("A", "B");
    store.put(&key, Attributes::new(), None).await.unwrap();
    store.set_fail_on_read(true).await;

    assert!(store.get(&key).await.unwrap_err().is_transient());
    store.clear_faults().await;
    assert!(store.get(&key).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_conditional_puts_admit_exactly_one() {
    let store = std::sync::Arc::new(InMemoryStore::new());
    let key = ItemKey::new("USER#u1", "VOTE#c1");
    let precondition = Precondition::new(item_not_exists(), ConflictReason::DUPLICATE_VOTE);

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let key = key.clone();
        let precondition = precondition.clone();
        tokio::spawn(async move { store.put(&key, Attributes::new(), Some(&precondition)).await })
    });
    let results = futures::future::join_all(attempts).await;

    let admitted = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_index_query_follows_updates() {
    let store = InMemoryStore::with_indexes(vec![listing_index()]);
    let key = ItemKey::new("STORY#s1", "STORY#s1");
    store
        .put(
            &key,
            attrs(json!({"GSI1PK": "STORIES", "GSI1SK": "2026-01-01#s1"})),
            None,
        )
        .await
        .unwrap();

    let request = QueryRequest::partition("STORIES").on_index("GSI1");
    assert_eq!(store.query(&request).await.unwrap().items.len(), 1);

    store
        .update(&key, &[UpdateOp::remove("GSI1PK")], None)
        .await
        .unwrap();
    assert!(store.query(&request).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_unknown_index_is_invalid() {
    let store = InMemoryStore::new();
    let request = QueryRequest::partition("STORIES").on_index("GSI9");
    assert!(matches!(
        store.query(&request).await,
        Err(StoreError::InvalidOperation(_))
    ));
}
