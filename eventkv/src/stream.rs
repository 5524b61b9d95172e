//! The working set of one aggregate's events.
//!
//! An [`EventStream`] is created either empty (first event of a new
//! aggregate) or by rehydration from the store, collects new payloads via
//! [`add_event`](EventStream::add_event), and is handed to
//! [`Eventstore::commit`](crate::eventstore::Eventstore::commit). It is owned
//! by one caller for one business transaction and is not meant to be shared.

use crate::errors::ValidationError;
use crate::event::{Event, EventMappings};
use crate::types::{Query, Timestamp, DEFAULT_SCOPE};
use crate::validation;
use serde_json::Value;

/// Committed and pending events for one (context, aggregate, aggregateId).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStream {
    context: String,
    aggregate: String,
    aggregate_id: String,
    events: Vec<Event>,
    uncommitted_events: Vec<Value>,
    events_to_dispatch: Vec<Event>,
    base_revision: u64,
    latest_stamp: Option<Timestamp>,
}

impl EventStream {
    /// An empty stream for the aggregate named by `query`.
    ///
    /// Missing context and aggregate default to `_general`.
    pub fn new(query: &Query) -> Result<Self, ValidationError> {
        Self::from_events(query, Vec::new())
    }

    /// A stream over already committed `events`.
    ///
    /// Context and aggregate missing from `query` are taken from the loaded
    /// events, then default to `_general`.
    pub fn from_events(query: &Query, events: Vec<Event>) -> Result<Self, ValidationError> {
        let aggregate_id = validation::aggregate_id(query.aggregate_id_filter())?.to_string();
        let context = validation::optional_segment("context", query.context_filter())?
            .map(str::to_string)
            .or_else(|| events.first().map(|e| e.context.clone()))
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
        let aggregate = validation::optional_segment("aggregate", query.aggregate_filter())?
            .map(str::to_string)
            .or_else(|| events.first().map(|e| e.aggregate.clone()))
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        Ok(Self {
            context,
            aggregate,
            aggregate_id,
            events,
            uncommitted_events: Vec::new(),
            events_to_dispatch: Vec::new(),
            base_revision: 0,
            latest_stamp: None,
        })
    }

    /// Bounded-context name.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Aggregate type name.
    pub fn aggregate(&self) -> &str {
        &self.aggregate
    }

    /// Aggregate instance id.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// The query selecting exactly this stream.
    pub fn query(&self) -> Query {
        Query::aggregate_id(self.aggregate_id.clone())
            .with_context(self.context.clone())
            .with_aggregate(self.aggregate.clone())
    }

    /// Committed events, oldest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Payloads waiting for the next commit.
    pub fn uncommitted_events(&self) -> &[Value] {
        &self.uncommitted_events
    }

    /// Events committed without an active dispatcher, left for the caller to publish.
    pub fn events_to_dispatch(&self) -> &[Event] {
        &self.events_to_dispatch
    }

    /// Hands over the events left for manual dispatch.
    pub fn take_events_to_dispatch(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events_to_dispatch)
    }

    /// The newest committed event.
    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Revision of the snapshot this stream resumes from, 0 for none.
    pub const fn base_revision(&self) -> u64 {
        self.base_revision
    }

    /// Revision of the newest committed event, or the base revision if there is none.
    pub fn current_revision(&self) -> u64 {
        self.events
            .last()
            .map_or(0, |e| e.stream_revision)
            .max(self.base_revision)
    }

    /// Queues a payload for the next commit.
    pub fn add_event(&mut self, payload: Value) {
        self.uncommitted_events.push(payload);
    }

    /// Queues several payloads for the next commit, in order.
    pub fn add_events(&mut self, payloads: impl IntoIterator<Item = Value>) {
        self.uncommitted_events.extend(payloads);
    }

    pub(crate) fn set_base_revision(&mut self, revision: u64) {
        self.base_revision = revision;
    }

    /// Records a commit stamp of this aggregate that was not loaded into the stream.
    pub(crate) fn observe_commit_stamp(&mut self, stamp: Timestamp) {
        self.latest_stamp = Some(self.latest_stamp.map_or(stamp, |known| known.max(stamp)));
    }

    /// Stamp for the next commit: `now`, pushed past the newest known commit stamp if needed.
    pub(crate) fn next_commit_stamp(&self, now: Timestamp) -> Timestamp {
        let newest = self
            .events
            .last()
            .map(|last| last.commit_stamp)
            .into_iter()
            .chain(self.latest_stamp)
            .max();
        match newest {
            Some(newest) if newest >= now => newest.next_millisecond(),
            _ => now,
        }
    }

    /// Builds the events of the next commit without changing the stream.
    pub(crate) fn build_commit(
        &self,
        commit_id: &str,
        commit_stamp: Timestamp,
        mappings: &EventMappings,
    ) -> Vec<Event> {
        let len = self.uncommitted_events.len();
        let mut revision = self.current_revision();

        self.uncommitted_events
            .iter()
            .zip(0u32..)
            .map(|(payload, sequence)| {
                revision += 1;
                let rest = u32::try_from(len).unwrap_or(u32::MAX) - sequence - 1;
                let mut event = Event {
                    id: Event::derive_id(commit_id, sequence),
                    stream_id: self.aggregate_id.clone(),
                    aggregate_id: self.aggregate_id.clone(),
                    aggregate: self.aggregate.clone(),
                    context: self.context.clone(),
                    commit_id: commit_id.to_string(),
                    commit_sequence: sequence,
                    commit_stamp,
                    stream_revision: revision,
                    rest_in_commit_stream: rest,
                    payload: payload.clone(),
                };
                mappings.apply(&mut event);
                event
            })
            .collect()
    }

    /// Moves a persisted commit from the pending list into the committed events.
    pub(crate) fn complete_commit(&mut self, committed: Vec<Event>, dispatch_manually: bool) {
        self.uncommitted_events.clear();
        if dispatch_manually {
            self.events_to_dispatch.extend(committed.iter().cloned());
        }
        self.events.extend(committed);
    }
}
