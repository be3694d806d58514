//! KeyValueStore interface tests.
//!
//! These tests verify the contract of the KeyValueStore trait.
//! Each storage implementation should run these tests against a store
//! declaring the `GSI1` listing index. Every test works in its own
//! partition so one store can run the whole suite.

use serde_json::{json, Value};

use stashflow::interfaces::{
    field_equals, field_greater_than, item_exists, item_not_exists, Attributes,
    ConflictReason, ItemKey, KeyValueStore, Precondition, QueryRequest, StoreError, UpdateOp,
};

/// Build attributes from a JSON object literal.
pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

fn sort_keys(items: &[stashflow::Item]) -> Vec<&str> {
    items.iter().map(|i| i.key.sort_key.as_str()).collect()
}

// =============================================================================
// get / put
// =============================================================================

pub async fn test_put_and_get<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_put_get", "ITEM#1");

    let written = store
        .put(&key, attrs(json!({"title": "A", "stats": {"n": 1}})), None)
        .await
        .expect("put should succeed");
    assert_eq!(written.get_str("title"), Some("A"));

    let item = store.get(&key).await.expect("get should succeed");
    assert_eq!(item.key, key);
    assert_eq!(item.get_i64("stats.n"), Some(1));
}

pub async fn test_get_missing_is_not_found<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_get_missing", "ITEM#1");
    match store.get(&key).await {
        Err(StoreError::NotFound { key: missing }) => assert_eq!(missing, key),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

pub async fn test_put_replaces_whole_item<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_put_replace", "ITEM#1");
    store
        .put(&key, attrs(json!({"a": 1, "b": 2})), None)
        .await
        .unwrap();
    store.put(&key, attrs(json!({"c": 3})), None).await.unwrap();

    let item = store.get(&key).await.unwrap();
    assert!(item.get("a").is_none());
    assert_eq!(item.get_i64("c"), Some(3));
}

pub async fn test_put_if_not_exists_conflicts<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_put_once", "VOTE#1");
    let once = Precondition::new(item_not_exists(), ConflictReason::DUPLICATE_VOTE);

    store
        .put(&key, attrs(json!({"v": 1})), Some(&once))
        .await
        .expect("first put should succeed");

    match store.put(&key, attrs(json!({"v": 2})), Some(&once)).await {
        Err(StoreError::PreconditionFailed { key: k, reason }) => {
            assert_eq!(k, key);
            assert_eq!(reason, ConflictReason::DUPLICATE_VOTE);
        }
        other => panic!("expected PreconditionFailed, got {:?}", other),
    }

    let item = store.get(&key).await.unwrap();
    assert_eq!(item.get_i64("v"), Some(1), "failed put must not write");
}

pub async fn test_first_failing_clause_names_reason<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_clauses", "COMMENT#1");
    store
        .put(
            &key,
            attrs(json!({"authorId": "u1", "editableUntil": "2026-01-01T00:15:00.000Z"})),
            None,
        )
        .await
        .unwrap();

    let precondition = |subject: &str, now: &str| {
        Precondition::new(field_equals("authorId", subject), ConflictReason::NOT_AUTHOR).and(
            field_greater_than("editableUntil", now),
            ConflictReason::EDIT_WINDOW_EXPIRED,
        )
    };
    let edit = [UpdateOp::set("content", "new")];

    let reason = |result: stashflow::interfaces::Result<stashflow::Item>| match result {
        Err(StoreError::PreconditionFailed { reason, .. }) => reason,
        other => panic!("expected PreconditionFailed, got {:?}", other),
    };

    let late = "2026-01-01T01:00:00.000Z";
    let early = "2026-01-01T00:05:00.000Z";
    assert_eq!(
        reason(store.update(&key, &edit, Some(&precondition("u2", late))).await),
        ConflictReason::NOT_AUTHOR
    );
    assert_eq!(
        reason(store.update(&key, &edit, Some(&precondition("u1", late))).await),
        ConflictReason::EDIT_WINDOW_EXPIRED
    );
    store
        .update(&key, &edit, Some(&precondition("u1", early)))
        .await
        .expect("author inside window may edit");
}

// =============================================================================
// update
// =============================================================================

pub async fn test_update_missing_is_not_found<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_update_missing", "ITEM#1");
    let guard = Precondition::from(item_exists());

    let result = store
        .update(&key, &[UpdateOp::add("n", 1)], Some(&guard))
        .await;
    assert!(
        matches!(result, Err(StoreError::NotFound { .. })),
        "missing item is NotFound before the precondition, got {:?}",
        result
    );
    assert!(matches!(
        store.get(&key).await,
        Err(StoreError::NotFound { .. })
    ));
}

pub async fn test_update_add_semantics<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_update_add", "ITEM#1");
    store
        .put(&key, attrs(json!({"stats": {"upvotes": 2}})), None)
        .await
        .unwrap();

    let item = store
        .update(
            &key,
            &[
                UpdateOp::add("stats.upvotes", 1),
                UpdateOp::add("stats.replyCount", 1),
                UpdateOp::add("score", serde_json::Number::from_f64(0.5).unwrap()),
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(item.get_i64("stats.upvotes"), Some(3));
    assert_eq!(item.get_i64("stats.replyCount"), Some(1), "absent is zero");
    assert_eq!(item.get("score").and_then(Value::as_f64), Some(0.5));

    let item = store
        .update(&key, &[UpdateOp::add("stats.upvotes", -5)], None)
        .await
        .unwrap();
    assert_eq!(item.get_i64("stats.upvotes"), Some(-2), "no clamping");
}

pub async fn test_update_add_non_numeric_is_invalid<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_update_invalid", "ITEM#1");
    store
        .put(&key, attrs(json!({"title": "x", "n": 1})), None)
        .await
        .unwrap();

    let result = store
        .update(
            &key,
            &[UpdateOp::add("n", 1), UpdateOp::add("title", 1)],
            None,
        )
        .await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

    let item = store.get(&key).await.unwrap();
    assert_eq!(item.get_i64("n"), Some(1), "ops apply all or nothing");
}

pub async fn test_update_set_and_remove_paths<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_update_paths", "ITEM#1");
    store
        .put(&key, attrs(json!({"title": "x", "tmp": true})), None)
        .await
        .unwrap();

    let item = store
        .update(
            &key,
            &[
                UpdateOp::set("meta.tags.first", "a"),
                UpdateOp::remove("tmp"),
                UpdateOp::remove("never.there"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(item.get_str("meta.tags.first"), Some("a"));
    assert!(item.get("tmp").is_none());

    let result = store
        .update(&key, &[UpdateOp::set("title.inner", 1)], None)
        .await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
}

// =============================================================================
// delete
// =============================================================================

pub async fn test_delete<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_delete", "ITEM#1");
    store
        .put(&key, attrs(json!({"owner": "u1"})), None)
        .await
        .unwrap();

    let guard = Precondition::new(field_equals("owner", "u2"), ConflictReason::NOT_AUTHOR);
    assert!(matches!(
        store.delete(&key, Some(&guard)).await,
        Err(StoreError::PreconditionFailed { .. })
    ));

    let removed = store.delete(&key, None).await.unwrap();
    assert_eq!(removed.map(|i| i.key), Some(key.clone()));
    assert!(store.delete(&key, None).await.unwrap().is_none());
}

// =============================================================================
// query
// =============================================================================

pub async fn test_query_empty_partition<S: KeyValueStore>(store: &S) {
    let page = store
        .query(&QueryRequest::partition("test_query_empty").with_prefix("COMMENT#"))
        .await
        .expect("empty query should succeed");
    assert!(page.items.is_empty());
    assert!(page.next_continuation_token.is_none());
}

pub async fn test_query_prefix_and_order<S: KeyValueStore>(store: &S) {
    let pk = "test_query_prefix";
    for sk in ["COMMENT#b", "CHAPTER#x", "COMMENT#a", "COMMENT#c", "VOTE#1"] {
        store
            .put(&ItemKey::new(pk, sk), Attributes::new(), None)
            .await
            .unwrap();
    }

    let page = store
        .query(&QueryRequest::partition(pk).with_prefix("COMMENT#"))
        .await
        .unwrap();
    assert_eq!(
        sort_keys(&page.items),
        vec!["COMMENT#a", "COMMENT#b", "COMMENT#c"]
    );
    assert!(page.next_continuation_token.is_none());

    let page = store
        .query(&QueryRequest::partition(pk).with_prefix("COMMENT#").descending())
        .await
        .unwrap();
    assert_eq!(
        sort_keys(&page.items),
        vec!["COMMENT#c", "COMMENT#b", "COMMENT#a"]
    );
}

pub async fn test_query_pages_cover_everything_once<S: KeyValueStore>(store: &S) {
    let pk = "test_query_paging";
    for i in 0..7 {
        store
            .put(&ItemKey::new(pk, format!("ITEM#{:02}", i)), Attributes::new(), None)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut token = None;
    let mut pages = 0;
    loop {
        let page = store
            .query(&QueryRequest::partition(pk).with_limit(3).after(token))
            .await
            .unwrap();
        pages += 1;
        seen.extend(page.items.iter().map(|i| i.key.sort_key.clone()));
        token = page.next_continuation_token;
        if token.is_none() {
            break;
        }
    }

    assert_eq!(pages, 3);
    let expected: Vec<String> = (0..7).map(|i| format!("ITEM#{:02}", i)).collect();
    assert_eq!(seen, expected);
}

pub async fn test_query_exact_page_has_no_token<S: KeyValueStore>(store: &S) {
    let pk = "test_query_exact";
    for i in 0..3 {
        store
            .put(&ItemKey::new(pk, format!("ITEM#{}", i)), Attributes::new(), None)
            .await
            .unwrap();
    }

    let page = store
        .query(&QueryRequest::partition(pk).with_limit(3))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 3);
    assert!(page.next_continuation_token.is_none());
}

pub async fn test_query_unbounded_limit_returns_everything<S: KeyValueStore>(store: &S) {
    let pk = "test_query_unbounded";
    for i in 0..3 {
        store
            .put(&ItemKey::new(pk, format!("ITEM#{}", i)), Attributes::new(), None)
            .await
            .unwrap();
    }

    let page = store
        .query(&QueryRequest::partition(pk).with_limit(usize::MAX))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 3);
    assert!(page.next_continuation_token.is_none());

    let descending = store
        .query(&QueryRequest::partition(pk).with_limit(usize::MAX).descending())
        .await
        .unwrap();
    assert_eq!(descending.items[0].key.sort_key, "ITEM#2");
}

pub async fn test_query_rejects_bad_input<S: KeyValueStore>(store: &S) {
    let malformed = store
        .query(&QueryRequest::partition("test_query_bad").after(Some("!!not-a-token".to_string())))
        .await;
    assert!(matches!(malformed, Err(StoreError::InvalidOperation(_))));

    let unknown = store
        .query(&QueryRequest::partition("test_query_bad").on_index("NOPE"))
        .await;
    assert!(matches!(unknown, Err(StoreError::InvalidOperation(_))));
}

pub async fn test_index_follows_writes<S: KeyValueStore>(store: &S) {
    let listing = "test_index_listing";
    let first = ItemKey::new("test_index_s1", "STORY");
    let second = ItemKey::new("test_index_s2", "STORY");

    store
        .put(&first, attrs(json!({"GSI1PK": listing, "GSI1SK": "2026-01-02"})), None)
        .await
        .unwrap();
    store
        .put(&second, attrs(json!({"GSI1PK": listing, "GSI1SK": "2026-01-01"})), None)
        .await
        .unwrap();

    let query = QueryRequest::partition(listing).on_index("GSI1");
    let page = store.query(&query).await.unwrap();
    let keys: Vec<&ItemKey> = page.items.iter().map(|i| &i.key).collect();
    assert_eq!(keys, vec![&second, &first]);

    store
        .update(&second, &[UpdateOp::set("GSI1SK", "2026-01-03")], None)
        .await
        .unwrap();
    let page = store.query(&query).await.unwrap();
    let keys: Vec<&ItemKey> = page.items.iter().map(|i| &i.key).collect();
    assert_eq!(keys, vec![&first, &second], "projection re-sorted on update");

    store
        .update(&first, &[UpdateOp::remove("GSI1PK")], None)
        .await
        .unwrap();
    store.delete(&second, None).await.unwrap();
    let page = store.query(&query).await.unwrap();
    assert!(page.items.is_empty(), "projection removed with its attributes");
}

pub async fn test_concurrent_conditional_puts<S: KeyValueStore>(store: &S) {
    let key = ItemKey::new("test_concurrent", "VOTE#1");
    let once = Precondition::new(item_not_exists(), ConflictReason::DUPLICATE_VOTE);

    let attempts = (0..8).map(|i| {
        let key = key.clone();
        let once = once.clone();
        async move { store.put(&key, attrs(json!({"attempt": i})), Some(&once)).await }
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::PreconditionFailed { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
    assert!(store.get(&key).await.unwrap().get("attempt").is_some());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all KeyValueStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_kv_store_tests {
    ($store:expr) => {
        use $crate::storage::kv_store_tests::*;

        test_put_and_get($store).await;
        println!("  test_put_and_get: PASSED");

        test_get_missing_is_not_found($store).await;
        println!("  test_get_missing_is_not_found: PASSED");

        test_put_replaces_whole_item($store).await;
        println!("  test_put_replaces_whole_item: PASSED");

        test_put_if_not_exists_conflicts($store).await;
        println!("  test_put_if_not_exists_conflicts: PASSED");

        test_first_failing_clause_names_reason($store).await;
        println!("  test_first_failing_clause_names_reason: PASSED");

        test_update_missing_is_not_found($store).await;
        println!("  test_update_missing_is_not_found: PASSED");

        test_update_add_semantics($store).await;
        println!("  test_update_add_semantics: PASSED");

        test_update_add_non_numeric_is_invalid($store).await;
        println!("  test_update_add_non_numeric_is_invalid: PASSED");

        test_update_set_and_remove_paths($store).await;
        println!("  test_update_set_and_remove_paths: PASSED");

        test_delete($store).await;
        println!("  test_delete: PASSED");

        test_query_empty_partition($store).await;
        println!("  test_query_empty_partition: PASSED");

        test_query_prefix_and_order($store).await;
        println!("  test_query_prefix_and_order: PASSED");

        test_query_pages_cover_everything_once($store).await;
        println!("  test_query_pages_cover_everything_once: PASSED");

        test_query_exact_page_has_no_token($store).await;
        println!("  test_query_exact_page_has_no_token: PASSED");

        test_query_unbounded_limit_returns_everything($store).await;
        println!("  test_query_unbounded_limit_returns_everything: PASSED");

        test_query_rejects_bad_input($store).await;
        println!("  test_query_rejects_bad_input: PASSED");

        test_index_follows_writes($store).await;
        println!("  test_index_follows_writes: PASSED");

        test_concurrent_conditional_puts($store).await;
        println!("  test_concurrent_conditional_puts: PASSED");
    };
}
