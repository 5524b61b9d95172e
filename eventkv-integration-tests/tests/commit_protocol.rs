//! End-to-end behaviour of the commit path and the basic queries.

use eventkv::errors::{EventstoreError, Operation, StoreError, ValidationError};
use eventkv::event::EventMappings;
use eventkv::store::StoreAdapter;
use eventkv::types::{Paging, Query, RevisionRange};
use eventkv_integration_tests::{
    chaos_eventstore, commit_payloads, init_tracing, memory_backend, memory_eventstore,
    memory_eventstore_on,
};
use eventkv_testing::ChaosConfig;
use serde_json::json;
use std::collections::HashSet;

#[tokio::test]
async fn last_event_of_three_has_revision_three() {
    init_tracing();
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", (1..=3).map(|n| json!({"n": n})))
        .await
        .unwrap();

    let last = eventstore.get_last_event("A1").await.unwrap().unwrap();

    assert_eq!(last.stream_revision, 3);
    assert_eq!(last.payload, json!({"n": 3}));
    assert_eq!(last.rest_in_commit_stream, 0);
}

#[tokio::test]
async fn unknown_aggregate_reads_as_empty() {
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", [json!({})]).await.unwrap();

    let page = eventstore.get_events("B", Paging::all()).await.unwrap();

    assert!(page.is_empty());
    assert!(eventstore.get_last_event("B").await.unwrap().is_none());
}

#[tokio::test]
async fn event_without_aggregate_id_is_rejected_and_nothing_is_written() {
    let backend = memory_backend();
    let eventstore = memory_eventstore_on(backend.clone());
    let mut events = commit_payloads(&eventstore, "A1", [json!({}), json!({})])
        .await
        .unwrap()
        .events()
        .to_vec();
    let before = backend.len();
    for event in &mut events {
        event.commit_id = "99".to_string();
    }
    events[1].aggregate_id = String::new();

    let err = eventstore.store().add_events(&events).await.unwrap_err();

    assert_eq!(
        err,
        EventstoreError::from(ValidationError::MissingAggregateId)
    );
    assert_eq!(backend.len(), before);
}

#[tokio::test]
async fn commits_share_id_and_stamp_and_continue_revisions() {
    let eventstore = memory_eventstore();
    let mut stream = eventstore
        .get_event_stream("A1", RevisionRange::all())
        .await
        .unwrap();

    stream.add_events([json!({"step": 1}), json!({"step": 2})]);
    eventstore.commit(&mut stream).await.unwrap();
    stream.add_events([json!({"step": 3}), json!({"step": 4}), json!({"step": 5})]);
    eventstore.commit(&mut stream).await.unwrap();

    let events = stream.events();
    let (first, second) = events.split_at(2);
    for commit in [first, second] {
        assert!(commit.iter().all(|e| e.commit_id == commit[0].commit_id));
        assert!(commit.iter().all(|e| e.commit_stamp == commit[0].commit_stamp));
        let sequences: Vec<u32> = commit.iter().map(|e| e.commit_sequence).collect();
        assert_eq!(sequences, (0..u32::try_from(commit.len()).unwrap()).collect::<Vec<_>>());
    }
    assert_ne!(first[0].commit_id, second[0].commit_id);
    assert!(second[0].commit_stamp > first[0].commit_stamp);
    assert_eq!(second[0].id, format!("{}-0", second[0].commit_id));

    let reloaded = eventstore
        .get_event_stream("A1", RevisionRange::all())
        .await
        .unwrap();
    assert_eq!(reloaded.events(), stream.events());
    assert_eq!(reloaded.current_revision(), 5);
}

#[tokio::test]
async fn streams_are_isolated_by_context_and_aggregate() {
    let eventstore = memory_eventstore();
    let sales = Query::aggregate_id("42").with_context("sales").with_aggregate("order");
    let billing = Query::aggregate_id("42").with_context("billing").with_aggregate("invoice");
    commit_payloads(&eventstore, sales.clone(), [json!({"a": 1}), json!({"a": 2})])
        .await
        .unwrap();
    commit_payloads(&eventstore, billing.clone(), [json!({"b": 1})])
        .await
        .unwrap();

    let sales_stream = eventstore
        .get_event_stream(sales, RevisionRange::all())
        .await
        .unwrap();
    let billing_stream = eventstore
        .get_event_stream(billing, RevisionRange::all())
        .await
        .unwrap();
    let everything = eventstore.get_events("42", Paging::all()).await.unwrap();

    assert_eq!(sales_stream.current_revision(), 2);
    assert_eq!(billing_stream.current_revision(), 1);
    assert_eq!(billing_stream.events()[0].context, "billing");
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn mappings_copy_store_fields_into_payloads() {
    let eventstore = memory_eventstore().define_event_mappings(
        EventMappings::new()
            .with_id("id")
            .with_commit_id("meta.commitId")
            .with_commit_sequence("meta.sequence")
            .with_commit_stamp("meta.stamp")
            .with_stream_revision("meta.revision"),
    );

    let stream = commit_payloads(&eventstore, "A1", [json!({"kind": "Created"}), json!("plain")])
        .await
        .unwrap();

    let first = &stream.events()[0];
    assert_eq!(first.payload["id"], json!(first.id));
    assert_eq!(first.payload["meta"]["commitId"], json!(first.commit_id));
    assert_eq!(first.payload["meta"]["sequence"], 0);
    assert_eq!(first.payload["meta"]["revision"], 1);
    assert!(first.payload["meta"]["stamp"].is_string());
    assert_eq!(stream.events()[1].payload, json!("plain"));
}

#[tokio::test]
async fn failed_write_keeps_pending_events_for_a_retry() {
    let eventstore = chaos_eventstore(ChaosConfig::default());
    eventstore.store().connect().await.unwrap();
    let mut stream = eventstore
        .get_event_stream("A1", RevisionRange::all())
        .await
        .unwrap();
    stream.add_events([json!({"n": 1}), json!({"n": 2})]);
    eventstore.store().backend().fail_operation(Operation::MultiSet);

    let err = eventstore.commit(&mut stream).await.unwrap_err();

    assert!(matches!(
        err,
        EventstoreError::Store(StoreError::Backend {
            operation: Operation::MultiSet,
            ..
        })
    ));
    assert_eq!(stream.uncommitted_events().len(), 2);
    assert!(stream.events().is_empty());
    assert!(eventstore
        .get_events(Query::all(), Paging::all())
        .await
        .unwrap()
        .is_empty());

    eventstore.store().backend().heal();
    eventstore.commit(&mut stream).await.unwrap();
    assert_eq!(stream.current_revision(), 2);
}

#[tokio::test]
async fn failed_id_draw_keeps_pending_events() {
    let eventstore = chaos_eventstore(ChaosConfig::default().with_failing_operation(Operation::Increment));
    let mut stream = eventstore
        .get_event_stream("A1", RevisionRange::all())
        .await
        .unwrap();
    stream.add_event(json!({}));

    assert!(eventstore.commit(&mut stream).await.is_err());
    assert_eq!(stream.uncommitted_events().len(), 1);
}

#[tokio::test]
async fn ids_are_unique_across_stores_sharing_a_backend() {
    let backend = memory_backend();
    let first = memory_eventstore_on(backend.clone());
    let second = memory_eventstore_on(backend);

    let mut handles = Vec::new();
    for store in [first, second] {
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..25 {
                ids.push(store.get_new_id().await.unwrap());
            }
            ids
        }));
    }
    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(all.insert(id));
        }
    }

    assert_eq!(all.len(), 50);
}

#[tokio::test]
async fn last_event_as_stream_continues_the_history() {
    let eventstore = memory_eventstore();
    commit_payloads(&eventstore, "A1", [json!({}), json!({})])
        .await
        .unwrap();

    let mut stream = eventstore.get_last_event_as_stream("A1").await.unwrap();
    assert_eq!(stream.events().len(), 1);
    stream.add_event(json!({"after": true}));
    eventstore.commit(&mut stream).await.unwrap();

    let last = eventstore.get_last_event("A1").await.unwrap().unwrap();
    assert_eq!(last.stream_revision, 3);
}

#[tokio::test]
async fn clear_wipes_the_namespace() {
    let backend = memory_backend();
    let eventstore = memory_eventstore_on(backend.clone());
    commit_payloads(&eventstore, "A1", [json!({})]).await.unwrap();
    assert!(!backend.is_empty());

    eventstore.store().clear().await.unwrap();

    assert!(backend.is_empty());
    assert_eq!(eventstore.get_new_id().await.unwrap(), "1");
}
