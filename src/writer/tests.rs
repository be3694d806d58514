use serde_json::json;

use super::*;
use crate::interfaces::{field_equals, item_not_exists};
use crate::storage::InMemoryStore;

fn attrs(value: serde_json::Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

fn writer() -> (Arc<InMemoryStore>, ConditionalWriter) {
    let store = Arc::new(InMemoryStore::new());
    let writer = ConditionalWriter::new(store.clone());
    (store, writer)
}

#[tokio::test]
async fn test_failed_precondition_maps_to_conflict_with_reason() {
    let (_, writer) = writer();
    let key = ItemKey::new("USER#u1", "VOTE#c1");
    let create = StoreOperation::put(key.clone(), Attributes::new()).when(Precondition::new(
        item_not_exists(),
        ConflictReason::DUPLICATE_VOTE,
    ));

    writer.execute(&create).await.unwrap();
    let err = writer.execute(&create).await.unwrap_err();

    assert_eq!(
        err,
        OperationError::Conflict(ConflictError {
            reason: ConflictReason::DUPLICATE_VOTE,
            key,
        })
    );
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::DUPLICATE_VOTE));
}

#[tokio::test]
async fn test_missing_item_maps_to_not_found() {
    let (_, writer) = writer();
    let key = ItemKey::new("STORY#s1", "COMMENT#missing");

    let err = writer.execute(&StoreOperation::get(key.clone())).await.unwrap_err();
    assert_eq!(err, OperationError::NotFound(key));
}

#[tokio::test]
async fn test_injected_fault_maps_to_unavailable() {
    let (store, writer) = writer();
    store.set_fail_on_write(true).await;

    let err = writer
        .execute(&StoreOperation::put(ItemKey::new("A", "B"), Attributes::new()))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_update_applies_ops_under_precondition() {
    let (_, writer) = writer();
    let key = ItemKey::new("STORY#s1", "COMMENT#c1");
    writer
        .put(&key, attrs(json!({"authorId": "u1", "content": "a"})), None)
        .await
        .unwrap();

    let op = StoreOperation::update(key.clone(), vec![UpdateOp::set("content", "b")]).when(
        Precondition::new(field_equals("authorId", "u1"), ConflictReason::NOT_AUTHOR),
    );
    let output = writer.execute(&op).await.unwrap();
    assert_eq!(output.item().and_then(|i| i.get_str("content")), Some("b"));

    let denied = StoreOperation::update(key, vec![UpdateOp::set("content", "c")]).when(
        Precondition::new(field_equals("authorId", "u2"), ConflictReason::NOT_AUTHOR),
    );
    let err = writer.execute(&denied).await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::NOT_AUTHOR));
}

#[tokio::test]
async fn test_delete_without_item_is_none() {
    let (_, writer) = writer();
    let output = writer
        .execute(&StoreOperation::delete(ItemKey::new("A", "B")))
        .await
        .unwrap();
    assert_eq!(output, StoreOutput::Deleted(None));
    assert_eq!(output.to_value(), serde_json::Value::Null);
}

#[tokio::test]
async fn test_query_output_renders_page() {
    let (_, writer) = writer();
    writer
        .put(&ItemKey::new("STORY#s1", "COMMENT#1"), Attributes::new(), None)
        .await
        .unwrap();

    let output = writer
        .execute(&StoreOperation::Query(
            QueryRequest::partition("STORY#s1").with_prefix("COMMENT#"),
        ))
        .await
        .unwrap();

    let value = output.to_value();
    assert_eq!(value["items"][0]["SK"], json!("COMMENT#1"));
    assert_eq!(value["nextContinuationToken"], serde_json::Value::Null);
}

#[test]
fn test_when_is_ignored_by_reads() {
    let op = StoreOperation::get(ItemKey::new("A", "B")).when(item_not_exists().into());
    assert_eq!(op, StoreOperation::get(ItemKey::new("A", "B")));
    assert!(op.is_read());
}
