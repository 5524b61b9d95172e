//! Snapshot creation, selection and stream resumption.

use eventkv::errors::{EventstoreError, ValidationError};
use eventkv::snapshot::NewSnapshot;
use eventkv::types::{Paging, Query, RevisionRange};
use eventkv_integration_tests::{commit_payloads, memory_eventstore};
use serde_json::json;

#[tokio::test]
async fn snapshot_without_later_events_reports_its_revision() {
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", (0..4).map(|i| json!({"i": i})))
        .await
        .unwrap();
    eventstore
        .create_snapshot(NewSnapshot::new("A1", 4, json!({"count": 4})))
        .await
        .unwrap();

    let (snapshot, stream) = eventstore.get_from_snapshot("A1", None).await.unwrap();

    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot.payload, json!({"count": 4}));
    assert!(stream.events().is_empty());
    assert_eq!(stream.current_revision(), 4);
}

#[tokio::test]
async fn resumed_stream_commits_after_the_snapshot() {
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", (0..3).map(|i| json!({"i": i})))
        .await
        .unwrap();
    eventstore
        .create_snapshot(NewSnapshot::new("A1", 3, json!({})))
        .await
        .unwrap();

    let (_, mut stream) = eventstore.get_from_snapshot("A1", None).await.unwrap();
    stream.add_event(json!({"i": 3}));
    eventstore.commit(&mut stream).await.unwrap();

    let (_, resumed) = eventstore.get_from_snapshot("A1", None).await.unwrap();
    assert_eq!(resumed.events().len(), 1);
    assert_eq!(resumed.events()[0].stream_revision, 4);
}

#[tokio::test]
async fn commit_on_resumed_stream_keeps_the_aggregate_in_order() {
    let eventstore = memory_eventstore();
    for _ in 0..8 {
        eventstore.get_new_id().await.unwrap();
    }
    let first = commit_payloads(&eventstore, "A1", [json!({"i": 0})])
        .await
        .unwrap();
    eventstore
        .create_snapshot(NewSnapshot::new("A1", 1, json!({})))
        .await
        .unwrap();

    let (_, mut stream) = eventstore.get_from_snapshot("A1", None).await.unwrap();
    stream.add_event(json!({"i": 1}));
    eventstore.commit(&mut stream).await.unwrap();

    assert_eq!(first.events()[0].id, "9-0");
    assert_eq!(stream.events()[0].id, "11-0");
    assert!(stream.events()[0].commit_stamp > first.events()[0].commit_stamp);

    let page = eventstore.get_events("A1", Paging::all()).await.unwrap();
    let ids: Vec<&str> = page.events().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["9-0", "11-0"]);
    let last = eventstore.get_last_event("A1").await.unwrap().unwrap();
    assert_eq!(last.stream_revision, 2);
    let reloaded = eventstore
        .get_event_stream("A1", RevisionRange::all())
        .await
        .unwrap();
    assert_eq!(reloaded.current_revision(), 2);
}

#[tokio::test]
async fn newest_snapshot_within_bound_wins() {
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", (0..10).map(|i| json!({"i": i})))
        .await
        .unwrap();
    for revision in [2, 5, 9] {
        eventstore
            .create_snapshot(NewSnapshot::new("A1", revision, json!({"at": revision})))
            .await
            .unwrap();
    }

    let (latest, full) = eventstore.get_from_snapshot("A1", None).await.unwrap();
    let (bounded, partial) = eventstore.get_from_snapshot("A1", Some(6)).await.unwrap();
    let (none, from_start) = eventstore.get_from_snapshot("A1", Some(1)).await.unwrap();

    assert_eq!(latest.unwrap().revision, 9);
    assert_eq!(full.events().len(), 1);
    assert_eq!(bounded.unwrap().revision, 5);
    assert_eq!(
        partial.events().iter().map(|e| e.stream_revision).collect::<Vec<_>>(),
        vec![6]
    );
    assert!(none.is_none());
    assert_eq!(from_start.events().len(), 1);
    assert_eq!(from_start.current_revision(), 1);
}

#[tokio::test]
async fn stream_id_is_accepted_as_aggregate_id() {
    let eventstore = memory_eventstore();
    let input = NewSnapshot {
        stream_id: Some("A1".to_string()),
        context: Some("sales".to_string()),
        revision: 0,
        data: json!({"empty": true}),
        ..NewSnapshot::default()
    };

    let stored = eventstore.create_snapshot(input).await.unwrap();

    assert_eq!(stored.aggregate_id, "A1");
    assert_eq!(stored.stream_id, "A1");
    let (loaded, stream) = eventstore.get_from_snapshot("A1", None).await.unwrap();
    assert_eq!(loaded.unwrap().id, stored.id);
    assert_eq!(stream.context(), "sales");
}

#[tokio::test]
async fn snapshot_needs_an_aggregate_id() {
    let eventstore = memory_eventstore();

    let err = eventstore
        .create_snapshot(NewSnapshot::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EventstoreError::from(ValidationError::MissingAggregateId)
    );
    assert_eq!(eventstore.get_new_id().await.unwrap(), "1");
}

#[tokio::test]
async fn snapshot_scope_narrows_the_lookup() {
    let eventstore = memory_eventstore();
    eventstore
        .create_snapshot(NewSnapshot::new("42", 1, json!("sales")).with_context("sales"))
        .await
        .unwrap();
    eventstore
        .create_snapshot(NewSnapshot::new("42", 1, json!("billing")).with_context("billing"))
        .await
        .unwrap();

    let (snapshot, _) = eventstore
        .get_from_snapshot(Query::aggregate_id("42").with_context("sales"), None)
        .await
        .unwrap();

    assert_eq!(snapshot.unwrap().payload, json!("sales"));
}
