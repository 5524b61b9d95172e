//! Event types for the event store.
//!
//! An [`Event`] is the committed, immutable record of something that happened
//! to one aggregate. All store-assigned fields (ids, sequence, stamp,
//! revision) are filled in by the commit protocol; dispatch bookkeeping lives
//! in a separate key collection and never touches the event body.

use crate::errors::ValidationError;
use crate::types::Timestamp;
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A committed domain event.
///
/// Serialized with camelCase field names; this JSON body is what the store
/// keeps under each event key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id, derived from the commit id and the commit sequence
    pub id: String,
    /// Stream id; always equal to `aggregate_id`
    pub stream_id: String,
    /// Id of the aggregate instance this event belongs to
    pub aggregate_id: String,
    /// Logical aggregate type name
    pub aggregate: String,
    /// Bounded-context name
    pub context: String,
    /// Id shared by all events committed together
    pub commit_id: String,
    /// 0-based position within the commit
    pub commit_sequence: u32,
    /// Commit instant, shared by all events of the commit
    pub commit_stamp: Timestamp,
    /// 1-based position within the aggregate's full history
    pub stream_revision: u64,
    /// Number of events after this one in the same commit
    #[serde(default)]
    pub rest_in_commit_stream: u32,
    /// Opaque domain data
    pub payload: Value,
}

impl Event {
    /// Event id for position `sequence` of commit `commit_id`.
    pub fn derive_id(commit_id: &str, sequence: u32) -> String {
        format!("{commit_id}-{sequence}")
    }

    /// Checks that the event can be keyed.
    ///
    /// An event without an aggregate id, or with key segments containing the
    /// delimiter or glob metacharacters, is rejected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::aggregate_id(Some(&self.aggregate_id))?;
        validation::key_segment("aggregate", &self.aggregate)?;
        validation::key_segment("context", &self.context)?;
        validation::key_segment("id", &self.id)?;
        Ok(())
    }

    /// Whether this is the last event of its commit.
    pub const fn closes_commit(&self) -> bool {
        self.rest_in_commit_stream == 0
    }
}

/// Dotted payload paths that receive store-assigned fields at commit time.
///
/// With `commit_id: Some("meta.commitId")`, committing an event whose payload
/// is `{"meta": {}}` produces `{"meta": {"commitId": "<id>"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMappings {
    /// Target path for the event id
    #[serde(default)]
    pub id: Option<String>,
    /// Target path for the commit id
    #[serde(default)]
    pub commit_id: Option<String>,
    /// Target path for the commit sequence
    #[serde(default)]
    pub commit_sequence: Option<String>,
    /// Target path for the commit stamp
    #[serde(default)]
    pub commit_stamp: Option<String>,
    /// Target path for the stream revision
    #[serde(default)]
    pub stream_revision: Option<String>,
}

impl EventMappings {
    /// Mappings that copy nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event id path.
    #[must_use]
    pub fn with_id(mut self, path: impl Into<String>) -> Self {
        self.id = Some(path.into());
        self
    }

    /// Sets the commit id path.
    #[must_use]
    pub fn with_commit_id(mut self, path: impl Into<String>) -> Self {
        self.commit_id = Some(path.into());
        self
    }

    /// Sets the commit sequence path.
    #[must_use]
    pub fn with_commit_sequence(mut self, path: impl Into<String>) -> Self {
        self.commit_sequence = Some(path.into());
        self
    }

    /// Sets the commit stamp path.
    #[must_use]
    pub fn with_commit_stamp(mut self, path: impl Into<String>) -> Self {
        self.commit_stamp = Some(path.into());
        self
    }

    /// Sets the stream revision path.
    #[must_use]
    pub fn with_stream_revision(mut self, path: impl Into<String>) -> Self {
        self.stream_revision = Some(path.into());
        self
    }

    /// Whether no field is mapped.
    pub const fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.commit_id.is_none()
            && self.commit_sequence.is_none()
            && self.commit_stamp.is_none()
            && self.stream_revision.is_none()
    }

    /// Copies the configured fields of `event` into its payload.
    pub fn apply(&self, event: &mut Event) {
        if self.is_empty() {
            return;
        }
        if !event.payload.is_object() {
            debug!(event_id = %event.id, "payload is not an object, skipping event mappings");
            return;
        }

        let values = [
            (&self.id, Value::from(event.id.clone())),
            (&self.commit_id, Value::from(event.commit_id.clone())),
            (&self.commit_sequence, Value::from(event.commit_sequence)),
            (
                &self.commit_stamp,
                serde_json::to_value(event.commit_stamp).unwrap_or(Value::Null),
            ),
            (&self.stream_revision, Value::from(event.stream_revision)),
        ];

        for (path, value) in values {
            if let Some(path) = path {
                put_path(&mut event.payload, path, value);
            }
        }
    }
}

/// Writes `value` at a dotted `path`, creating intermediate objects.
///
/// Intermediate values that are not objects are replaced.
pub fn put_path(target: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
    let mut cursor = target;

    while let Some(segment) = segments.next() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        if segments.peek().is_none() {
            let _ = map.insert(segment.to_string(), value);
            return;
        }
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
