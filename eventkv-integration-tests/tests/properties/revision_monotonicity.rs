//! Stream revisions stay gapless and increasing whatever the commit sizes.

use eventkv::types::{Query, RevisionRange};
use eventkv_integration_tests::{commit_payloads, memory_eventstore};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn revisions_count_up_across_commits(
        commit_sizes in prop::collection::vec(1usize..6, 1..8),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let eventstore = memory_eventstore();
            let mut expected_revision = 0u64;

            for (commit, size) in commit_sizes.iter().enumerate() {
                let payloads = (0..*size).map(|i| json!({ "commit": commit, "n": i }));
                let stream = commit_payloads(&eventstore, "A1", payloads).await.unwrap();
                expected_revision += *size as u64;
                prop_assert_eq!(stream.current_revision(), expected_revision);
            }

            let events = eventstore
                .get_events_by_revision("A1", RevisionRange::all())
                .await
                .unwrap()
                .into_events();
            prop_assert_eq!(events.len() as u64, expected_revision);
            for (index, event) in events.iter().enumerate() {
                prop_assert_eq!(event.stream_revision, index as u64 + 1);
            }

            // Every commit shares one stamp and counts its tail down to zero.
            let mut offset = 0;
            for size in &commit_sizes {
                let commit = &events[offset..offset + size];
                prop_assert!(commit.iter().all(|e| e.commit_id == commit[0].commit_id));
                prop_assert!(commit.iter().all(|e| e.commit_stamp == commit[0].commit_stamp));
                for (sequence, event) in commit.iter().enumerate() {
                    prop_assert_eq!(event.commit_sequence as usize, sequence);
                    prop_assert_eq!(event.rest_in_commit_stream as usize, size - sequence - 1);
                }
                offset += size;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn revision_window_returns_exactly_its_revisions(
        total in 1u64..15,
        min in 0u64..18,
        width in 0u64..8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let eventstore = memory_eventstore();
            let payloads = (0..total).map(|n| json!({ "n": n }));
            let _ = commit_payloads(&eventstore, Query::aggregate_id("A1"), payloads)
                .await
                .unwrap();

            let max = min + width;
            let events = eventstore
                .get_events_by_revision("A1", RevisionRange::new(min, max))
                .await
                .unwrap()
                .into_events();

            let first = min.max(1);
            let expected: Vec<u64> = (first..=max.min(total)).collect();
            let revisions: Vec<u64> = events.iter().map(|e| e.stream_revision).collect();
            prop_assert_eq!(revisions, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
