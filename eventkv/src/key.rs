//! Composite key codec.
//!
//! Event keys have the form
//!
//! ```text
//! <prefix>:<collection>:<commitStampMillis>:<commitSequence>:<context>:<aggregate>:<aggregateId>:<eventId>
//! ```
//!
//! and snapshot keys drop the sequence segment. Stamp and sequence are
//! zero-padded so that sorting keys as strings yields chronological order,
//! then intra-commit order. Every range and pagination query depends on that.

use crate::config::StoreConfig;
use crate::errors::ValidationError;
use crate::event::Event;
use crate::snapshot::Snapshot;
use crate::types::{CollectionName, KeyPrefix, Query};
use crate::validation;

/// Width of the zero-padded commit stamp (epoch millis up to year 2286).
pub const STAMP_WIDTH: usize = 13;
/// Width of the zero-padded commit sequence (any `u32`).
pub const SEQUENCE_WIDTH: usize = 10;

const DELIMITER: char = ':';
const ANY: &str = "*";
const UNDISPATCHED_PREFIX: &str = "undispatched_";
const COUNTER_KEY: &str = "nextItemId";

/// Which event collection a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCollection {
    /// The main event log
    Events,
    /// Mirror of events not yet confirmed as dispatched
    Undispatched,
}

/// Builds keys and scan patterns for one store namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: KeyPrefix,
    events: CollectionName,
    snapshots: CollectionName,
}

impl KeyCodec {
    /// Creates a codec for the given namespace.
    pub const fn new(prefix: KeyPrefix, events: CollectionName, snapshots: CollectionName) -> Self {
        Self {
            prefix,
            events,
            snapshots,
        }
    }

    /// Creates a codec from store configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.prefix.clone(),
            config.events_collection_name.clone(),
            config.snapshots_collection_name.clone(),
        )
    }

    fn collection(&self, collection: EventCollection) -> String {
        match collection {
            EventCollection::Events => self.events.to_string(),
            EventCollection::Undispatched => format!("{UNDISPATCHED_PREFIX}{}", self.events),
        }
    }

    /// Key of `event` in `collection`.
    pub fn event_key(&self, collection: EventCollection, event: &Event) -> String {
        format!(
            "{}:{}:{:0stamp$}:{:0seq$}:{}:{}:{}:{}",
            self.prefix,
            self.collection(collection),
            event.commit_stamp.as_millis(),
            event.commit_sequence,
            event.context,
            event.aggregate,
            event.aggregate_id,
            event.id,
            stamp = STAMP_WIDTH,
            seq = SEQUENCE_WIDTH,
        )
    }

    /// Key of `snapshot`.
    pub fn snapshot_key(&self, snapshot: &Snapshot) -> String {
        format!(
            "{}:{}:{:0stamp$}:{}:{}:{}:{}",
            self.prefix,
            self.snapshots,
            snapshot.commit_stamp.as_millis(),
            snapshot.context,
            snapshot.aggregate,
            snapshot.aggregate_id,
            snapshot.id,
            stamp = STAMP_WIDTH,
        )
    }

    /// Pattern matching every event of `collection` selected by `query`.
    pub fn event_pattern(
        &self,
        collection: EventCollection,
        query: &Query,
    ) -> Result<String, ValidationError> {
        let (context, aggregate, aggregate_id) = query_segments(query)?;
        Ok(format!(
            "{}:{}:{ANY}:{ANY}:{context}:{aggregate}:{aggregate_id}:{ANY}",
            self.prefix,
            self.collection(collection),
        ))
    }

    /// Pattern matching the undispatched mirror of one event, whatever its other segments.
    pub fn undispatched_id_pattern(&self, event_id: &str) -> Result<String, ValidationError> {
        let event_id = validation::key_segment("id", event_id)?;
        Ok(format!(
            "{}:{}:{ANY}:{ANY}:{ANY}:{ANY}:{ANY}:{event_id}",
            self.prefix,
            self.collection(EventCollection::Undispatched),
        ))
    }

    /// Pattern matching every snapshot selected by `query`.
    pub fn snapshot_pattern(&self, query: &Query) -> Result<String, ValidationError> {
        let (context, aggregate, aggregate_id) = query_segments(query)?;
        Ok(format!(
            "{}:{}:{ANY}:{context}:{aggregate}:{aggregate_id}:{ANY}",
            self.prefix, self.snapshots,
        ))
    }

    /// Pattern matching every key of the namespace.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:{ANY}", self.prefix)
    }

    /// Key of the id counter. Lives outside the namespace pattern.
    pub fn counter_key(&self) -> String {
        format!("{COUNTER_KEY}:{}", self.prefix)
    }
}

fn query_segments(query: &Query) -> Result<(&str, &str, &str), ValidationError> {
    let context = validation::optional_segment("context", query.context_filter())?;
    let aggregate = validation::optional_segment("aggregate", query.aggregate_filter())?;
    let aggregate_id = validation::optional_segment("aggregateId", query.aggregate_id_filter())?;
    Ok((
        context.unwrap_or(ANY),
        aggregate.unwrap_or(ANY),
        aggregate_id.unwrap_or(ANY),
    ))
}

/// The segments of a decoded event key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKey<'a> {
    /// Commit stamp in epoch millis
    pub stamp_millis: i64,
    /// Commit sequence
    pub commit_sequence: u32,
    /// Context segment
    pub context: &'a str,
    /// Aggregate segment
    pub aggregate: &'a str,
    /// Aggregate id segment
    pub aggregate_id: &'a str,
    /// Event id segment
    pub event_id: &'a str,
}

impl<'a> EventKey<'a> {
    /// Decodes an event key of either event collection.
    pub fn parse(key: &'a str) -> Option<Self> {
        let parts: Vec<&str> = key.split(DELIMITER).collect();
        let [_prefix, _collection, stamp, sequence, context, aggregate, aggregate_id, event_id] =
            parts.as_slice()
        else {
            return None;
        };
        Some(Self {
            stamp_millis: stamp.parse().ok()?,
            commit_sequence: sequence.parse().ok()?,
            context,
            aggregate,
            aggregate_id,
            event_id,
        })
    }
}
