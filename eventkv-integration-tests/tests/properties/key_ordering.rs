//! Sorting event keys as strings orders events by commit stamp, then sequence.

use eventkv::config::StoreConfig;
use eventkv::event::Event;
use eventkv::key::{EventCollection, EventKey, KeyCodec};
use eventkv::types::Timestamp;
use proptest::prelude::*;
use serde_json::Value;

fn event(millis: i64, sequence: u32, aggregate_id: &str) -> Event {
    Event {
        id: Event::derive_id("7", sequence),
        stream_id: aggregate_id.to_string(),
        aggregate_id: aggregate_id.to_string(),
        aggregate: "order".to_string(),
        context: "sales".to_string(),
        commit_id: "7".to_string(),
        commit_sequence: sequence,
        commit_stamp: Timestamp::from_millis(millis).unwrap(),
        stream_revision: 1,
        rest_in_commit_stream: 0,
        payload: Value::Null,
    }
}

proptest! {
    #[test]
    fn string_order_is_chronological(
        entries in prop::collection::vec(
            (0i64..9_999_999_999_999, any::<u32>(), "[A-Z][0-9]{1,3}"),
            1..30,
        ),
    ) {
        let codec = KeyCodec::from_config(&StoreConfig::default());
        let mut keys: Vec<String> = entries
            .iter()
            .map(|(millis, sequence, id)| {
                codec.event_key(EventCollection::Events, &event(*millis, *sequence, id))
            })
            .collect();
        keys.sort();

        let decoded: Vec<(i64, u32)> = keys
            .iter()
            .map(|key| {
                let parsed = EventKey::parse(key).unwrap();
                (parsed.stamp_millis, parsed.commit_sequence)
            })
            .collect();
        let mut expected: Vec<(i64, u32)> =
            entries.iter().map(|(millis, sequence, _)| (*millis, *sequence)).collect();
        expected.sort_unstable();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn keys_decode_to_their_event(
        millis in 0i64..9_999_999_999_999,
        sequence in any::<u32>(),
        id in "[a-z0-9]{1,12}",
    ) {
        let codec = KeyCodec::from_config(&StoreConfig::default());
        let event = event(millis, sequence, &id);

        for collection in [EventCollection::Events, EventCollection::Undispatched] {
            let key = codec.event_key(collection, &event);
            let parsed = EventKey::parse(&key).unwrap();
            prop_assert_eq!(parsed.stamp_millis, millis);
            prop_assert_eq!(parsed.commit_sequence, sequence);
            prop_assert_eq!(parsed.aggregate_id, id.as_str());
            prop_assert_eq!(parsed.event_id, event.id.as_str());
        }
    }
}

#[test]
fn undispatched_keys_mirror_event_keys() {
    let codec = KeyCodec::from_config(&StoreConfig::default());
    let event = event(1_700_000_000_123, 4, "A1");

    insta::assert_snapshot!(
        codec.event_key(EventCollection::Undispatched, &event),
        @"eventstore:undispatched_events:1700000000123:0000000004:sales:order:A1:7-4"
    );
}
