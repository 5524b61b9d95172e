//! Walking pages with `next` sees the same events as direct skip/limit reads.

use eventkv::types::{Paging, Query};
use eventkv_integration_tests::{commit_payloads, memory_eventstore};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn next_page_matches_direct_window(
        commits in prop::collection::vec((0usize..3, 1usize..4), 1..6),
        limit in 1usize..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let eventstore = memory_eventstore();
            let aggregates = ["A1", "B2", "C3"];
            for (aggregate, size) in &commits {
                let payloads = (0..*size).map(|n| json!({ "n": n }));
                let _ = commit_payloads(&eventstore, aggregates[*aggregate], payloads)
                    .await
                    .unwrap();
            }

            let everything = eventstore
                .get_events(Query::all(), Paging::all())
                .await
                .unwrap()
                .into_events();
            let total: usize = commits.iter().map(|(_, size)| size).sum();
            prop_assert_eq!(everything.len(), total);

            let mut walked = Vec::new();
            let mut page = eventstore
                .get_events(Query::all(), Paging::new(0, limit))
                .await
                .unwrap();
            let mut skip = 0;
            while !page.is_empty() {
                let direct = eventstore
                    .get_events(Query::all(), Paging::new(skip, limit))
                    .await
                    .unwrap();
                prop_assert_eq!(page.events(), direct.events());
                walked.extend(page.events().iter().cloned());
                skip += limit;
                page = page.next().await.unwrap();
            }

            prop_assert_eq!(walked, everything);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
