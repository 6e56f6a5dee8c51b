mod common;

use std::{sync::Arc, time::Duration};

use common::{eventually, start, with_timeout, Harness};
use enrich_worker::{
    consumer::{handle, Completion, Consumer, Outcome},
    enrichment::{score_text, LatencyEnrichment},
    record::{MessageType, Record, Status, StatusRecord},
    store::SqliteResultStore,
};
use serde_json::{json, Value};

fn consumer(harness: &Harness) -> Consumer {
    Consumer::builder()
        .context(harness.context())
        .concurrency(4)
        .max_retries(3)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_end_to_end() {
    let harness = Harness::new();
    harness.transport.push(
        json!({"msg_id": "msg_1", "type": "update", "text": "a b", "user_id": "u_1"}).to_string(),
        0,
    );

    let running = start(consumer(&harness));
    assert!(eventually(Duration::from_secs(5), || harness.transport.acked().len() == 1).await);
    with_timeout(running.stop()).await;

    let stored = harness.store.document("msg_1").expect("document stored");
    let mut keys: Vec<_> = stored.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["msg_id", "score", "text", "timestamp", "user_id"]);
    assert_eq!(stored["user_id"], "u_1");
    assert_eq!(stored["text"], "a b");
    assert_eq!(stored["timestamp"], Value::Null);
    assert_eq!(stored["score"], score_text("a b"));

    assert_eq!(
        harness.publisher.published(),
        vec![StatusRecord {
            msg_id: "msg_1".to_owned(),
            kind: MessageType::Update,
            status: Status::Done,
        }]
    );
    assert_eq!(
        serde_json::to_value(&harness.publisher.published()[0]).unwrap(),
        json!({"msg_id": "msg_1", "type": "update", "status": "done"})
    );
    assert!(harness.transport.dead_letters().is_empty());
    assert!(harness.transport.republished().is_empty());
}

#[tokio::test]
async fn test_update_without_text_stores_null_score() {
    let harness = Harness::new();
    let record = Record::decode(r#"{"msg_id":"msg_003","type":"update"}"#).unwrap();

    let outcome = handle(&harness.context(), record).await;
    assert!(matches!(outcome, Outcome::Success(Completion::Updated)));

    let stored = harness.store.document("msg_003").unwrap();
    assert_eq!(stored["score"], Value::Null);
    assert_eq!(stored["text"], Value::Null);
    assert_eq!(harness.publisher.published()[0].status, Status::Done);
}

#[tokio::test]
async fn test_update_keeps_extra_fields_out_of_status() {
    let harness = Harness::new();
    let record = Record::decode(
        json!({
            "msg_id": "msg_002",
            "type": "update",
            "text": "extra test",
            "lang": "fr",
            "meta": {"source": "test_gen"},
        })
        .to_string(),
    )
    .unwrap();

    handle(&harness.context(), record).await;

    let stored = harness.store.document("msg_002").unwrap();
    assert_eq!(stored["lang"], "fr");
    assert_eq!(stored["meta"], json!({"source": "test_gen"}));
    for key in ["type", "status", "duration"] {
        assert!(!stored.contains_key(key), "{key} must not be stored");
    }

    let published = serde_json::to_value(&harness.publisher.published()[0]).unwrap();
    assert_eq!(
        published,
        json!({"msg_id": "msg_002", "type": "update", "status": "done"})
    );
}

#[tokio::test]
async fn test_delete_never_upserts() {
    let harness = Harness::new();
    let record = Record::decode(r#"{"msg_id":"msg_001","type":"delete"}"#).unwrap();

    let outcome = handle(&harness.context(), record).await;

    assert!(matches!(outcome, Outcome::Success(Completion::Deleted)));
    assert_eq!(harness.store.upsert_calls(), 0);
    assert_eq!(harness.store.delete_calls(), 1);
    assert_eq!(
        serde_json::to_value(&harness.publisher.published()[0]).unwrap(),
        json!({"msg_id": "msg_001", "type": "delete", "status": "deleted"})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_removes_stored_document() {
    let harness = Harness::new();
    harness
        .transport
        .push(json!({"msg_id": "m", "type": "update", "text": "x"}).to_string(), 0);

    let running = start(consumer(&harness));
    assert!(eventually(Duration::from_secs(5), || harness.store.len() == 1).await);

    harness
        .transport
        .push(json!({"msg_id": "m", "type": "delete"}).to_string(), 0);
    assert!(eventually(Duration::from_secs(5), || harness.transport.acked().len() == 2).await);
    with_timeout(running.stop()).await;

    assert!(harness.store.is_empty());
    assert_eq!(harness.store.delete_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_type_is_acknowledged() {
    let harness = Harness::new();
    harness
        .transport
        .push(json!({"msg_id": "xx", "type": "archive"}).to_string(), 0);

    let running = start(consumer(&harness));
    assert!(eventually(Duration::from_secs(5), || harness.transport.acked().len() == 1).await);
    with_timeout(running.stop()).await;

    assert!(harness.store.is_empty());
    assert_eq!(harness.store.upsert_calls(), 0);
    assert!(harness.publisher.published().is_empty());
    assert!(harness.transport.republished().is_empty());
    assert!(harness.transport.dead_letters().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loosely_typed_messages_are_processed() {
    let harness = Harness::new();
    harness.transport.push(
        json!({
            "msg_id": "n1",
            "type": "update",
            "user_id": 42,
            "text": "hi",
            "timestamp": 1700000000,
        })
        .to_string(),
        0,
    );
    harness
        .transport
        .push(json!({"msg_id": "n2", "type": 7}).to_string(), 0);

    let running = start(consumer(&harness));
    assert!(eventually(Duration::from_secs(5), || harness.transport.acked().len() == 2).await);
    with_timeout(running.stop()).await;

    assert!(harness.transport.dead_letters().is_empty());

    let stored = harness.store.document("n1").unwrap();
    assert_eq!(stored["user_id"], 42);
    assert_eq!(stored["timestamp"], 1700000000);
    assert_eq!(stored["score"], score_text("hi"));

    assert!(harness.store.document("n2").is_none());
    assert_eq!(harness.publisher.published().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_messages_are_dead_lettered() {
    let harness = Harness::new();
    harness.transport.push(r#"{"type":"update"}"#, 2);
    harness.transport.push(r#"{"msg_id":"no_type"}"#, 0);
    harness.transport.push("garbage", 0);

    let running = start(consumer(&harness));
    assert!(eventually(Duration::from_secs(5), || harness.transport.dead_letters().len() == 3).await);
    with_timeout(running.stop()).await;

    // Dead-letter sends run concurrently, so arrival order is not fixed.
    let retry_count_of = |body: &str| {
        harness
            .transport
            .dead_letters()
            .into_iter()
            .find(|dead| dead.body == body)
            .map(|dead| dead.retry_count)
    };
    assert_eq!(
        retry_count_of(r#"{"type":"update"}"#),
        Some(2),
        "decode failures never bump the count"
    );
    assert_eq!(retry_count_of(r#"{"msg_id":"no_type"}"#), Some(0));
    assert_eq!(retry_count_of("garbage"), Some(0));
    assert!(harness.transport.republished().is_empty());
    assert!(harness.transport.acked().is_empty());
    assert_eq!(harness.transport.unacked_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redelivery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.db").to_string_lossy().to_string();
    let store = SqliteResultStore::connect(Some(&path)).await.unwrap();

    let harness = Harness::new();
    let body = json!({"msg_id": "dup", "type": "update", "text": "same"}).to_string();
    harness.transport.push(body.clone(), 0);
    harness.transport.push(body, 0);

    let consumer = Consumer::builder()
        .context(harness.context_with_store(
            Arc::new(LatencyEnrichment::immediate()),
            Arc::new(store.clone()),
        ))
        .concurrency(1)
        .max_retries(3)
        .build();

    let running = start(consumer);
    assert!(eventually(Duration::from_secs(5), || harness.transport.acked().len() == 2).await);
    with_timeout(running.stop()).await;

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(harness.publisher.published().len(), 2);
}
