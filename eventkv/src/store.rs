//! Store adapter: event-store operations over a flat key/value backend.
//!
//! [`StoreAdapter`] is the contract the eventstore core consumes.
//! [`KeyValueStore`] implements it on top of any [`KeyValueBackend`] by
//! encoding events and snapshots into sortable composite keys (see
//! [`key`](crate::key)) and answering queries with the same four steps:
//!
//! 1. scan every page of keys matching a wildcard pattern,
//! 2. sort the accumulated keys (lexicographic order is chronological order),
//! 3. slice the sorted list by paging or revision bounds,
//! 4. bulk-fetch and decode the selected values.
//!
//! Keys that disappear between the scan and the fetch are skipped.

use crate::backend::{ConnectionEvent, KeyValueBackend, SCAN_START};
use crate::config::StoreConfig;
use crate::errors::{ConnectionError, EventstoreResult, Operation, StoreError, ValidationError};
use crate::event::Event;
use crate::key::{EventCollection, EventKey, KeyCodec};
use crate::snapshot::Snapshot;
use crate::types::{Paging, Query, RevisionRange, Timestamp};
use crate::validation;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const CONNECTION_EVENT_CAPACITY: usize = 16;

/// Persistence contract consumed by the eventstore core.
///
/// Every query returns an empty result, never an error, when nothing
/// matches. Operations that need an aggregate id fail with
/// [`ValidationError::MissingAggregateId`] before touching the backend.
#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
    /// Opens the backend connection. Idempotent.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Closes the backend connection. Idempotent.
    async fn disconnect(&self) -> Result<(), ConnectionError>;

    /// Subscribes to connect/disconnect notifications.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Deletes the id counter and every key under the namespace.
    async fn clear(&self) -> EventstoreResult<()>;

    /// Returns the next value of the store-wide id counter.
    async fn get_new_id(&self) -> EventstoreResult<String>;

    /// Persists one commit, in the event log and the undispatched index, in one atomic write.
    async fn add_events(&self, events: &[Event]) -> EventstoreResult<()>;

    /// Events matching `query`, oldest first, windowed by `paging`.
    async fn get_events(&self, query: &Query, paging: Paging) -> EventstoreResult<Vec<Event>>;

    /// Events committed at or after `since`, oldest first, windowed by `paging`.
    async fn get_events_since(
        &self,
        since: Timestamp,
        paging: Paging,
    ) -> EventstoreResult<Vec<Event>>;

    /// Events of one aggregate within `range`. Requires an aggregate id.
    async fn get_events_by_revision(
        &self,
        query: &Query,
        range: RevisionRange,
    ) -> EventstoreResult<Vec<Event>>;

    /// The newest event of one aggregate. Requires an aggregate id.
    async fn get_last_event(&self, query: &Query) -> EventstoreResult<Option<Event>>;

    /// Events not yet marked as dispatched, ordered by commit stamp then commit sequence.
    async fn get_undispatched_events(&self, query: &Query) -> EventstoreResult<Vec<Event>>;

    /// Removes an event from the undispatched index. Unknown ids are ignored.
    async fn set_event_to_dispatched(&self, event_id: &str) -> EventstoreResult<()>;

    /// Persists a snapshot.
    async fn add_snapshot(&self, snapshot: &Snapshot) -> EventstoreResult<()>;

    /// The newest snapshot with `revision <= max_revision` (any revision when `None`).
    async fn get_snapshot(
        &self,
        query: &Query,
        max_revision: Option<u64>,
    ) -> EventstoreResult<Option<Snapshot>>;
}

/// [`StoreAdapter`] over a [`KeyValueBackend`].
#[derive(Debug)]
pub struct KeyValueStore<B> {
    backend: B,
    codec: KeyCodec,
    connected: AtomicBool,
    notifications: broadcast::Sender<ConnectionEvent>,
}

impl<B: KeyValueBackend> KeyValueStore<B> {
    /// Creates a store writing into the namespace described by `config`.
    pub fn new(backend: B, config: &StoreConfig) -> Self {
        Self::with_codec(backend, KeyCodec::from_config(config))
    }

    /// Creates a store with an explicit key codec.
    pub fn with_codec(backend: B, codec: KeyCodec) -> Self {
        let (notifications, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        Self {
            backend,
            codec,
            connected: AtomicBool::new(false),
            notifications,
        }
    }

    /// The underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The key codec.
    pub const fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Runs a scan to completion and returns every matched key.
    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut cursor = SCAN_START;
        loop {
            let page = self.backend.scan(cursor, pattern).await?;
            keys.extend(page.keys);
            if page.cursor == SCAN_START {
                break;
            }
            cursor = page.cursor;
        }
        // A backend may report a key on more than one page.
        keys.sort();
        keys.dedup();
        debug!(pattern, matched = keys.len(), "[store.scan] scan complete");
        Ok(keys)
    }

    /// Bulk-fetches and decodes `keys`, skipping keys that no longer exist.
    async fn fetch<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<T>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = self.backend.mget(keys).await?;
        let mut decoded = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(raw) => decoded.push(decode(key, &raw)?),
                None => debug!(key, "[store.fetch] key vanished before fetch"),
            }
        }
        Ok(decoded)
    }

    async fn fetch_events(&self, keys: &[String]) -> Result<Vec<Event>, StoreError> {
        self.fetch(keys).await
    }

    fn notify(&self, event: ConnectionEvent) {
        // No subscriber is fine.
        let _ = self.notifications.send(event);
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|error| StoreError::Corrupt {
        key: key.to_string(),
        detail: error.to_string(),
    })
}

fn encode<T: serde::Serialize>(value: &T, operation: Operation) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|error| StoreError::backend(operation, error.to_string()))
}

fn slice<T>(items: &[T], (start, end): (usize, usize)) -> &[T] {
    &items[start..end]
}

fn require_aggregate_id(query: &Query) -> Result<(), ValidationError> {
    validation::aggregate_id(query.aggregate_id_filter()).map(|_| ())
}

#[async_trait]
impl<B: KeyValueBackend> StoreAdapter for KeyValueStore<B> {
    #[instrument(name = "store.connect", skip(self))]
    async fn connect(&self) -> Result<(), ConnectionError> {
        self.backend.connect().await?;
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("[store.connect] backend connected");
            self.notify(ConnectionEvent::Connected);
        }
        Ok(())
    }

    #[instrument(name = "store.disconnect", skip(self))]
    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.backend.disconnect().await?;
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("[store.disconnect] backend disconnected");
            self.notify(ConnectionEvent::Disconnected);
        }
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.notifications.subscribe()
    }

    #[instrument(name = "store.clear", skip(self))]
    async fn clear(&self) -> EventstoreResult<()> {
        let mut keys = self.scan_all(&self.codec.namespace_pattern()).await?;
        keys.push(self.codec.counter_key());
        let deleted = self.backend.del(&keys).await?;
        warn!(deleted, "[store.clear] namespace cleared");
        Ok(())
    }

    #[instrument(name = "store.get_new_id", skip(self))]
    async fn get_new_id(&self) -> EventstoreResult<String> {
        let id = self.backend.incr(&self.codec.counter_key()).await?;
        Ok(id.to_string())
    }

    #[instrument(name = "store.add_events", skip(self, events), fields(event_count = events.len()))]
    async fn add_events(&self, events: &[Event]) -> EventstoreResult<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };

        for event in events {
            event.validate()?;
            if event.commit_id != first.commit_id {
                return Err(ValidationError::MixedCommit {
                    expected: first.commit_id.clone(),
                    found: event.commit_id.clone(),
                }
                .into());
            }
        }

        let mut entries = Vec::with_capacity(events.len() * 2);
        for event in events {
            let body = encode(event, Operation::MultiSet)?;
            entries.push((
                self.codec.event_key(EventCollection::Events, event),
                body.clone(),
            ));
            entries.push((
                self.codec.event_key(EventCollection::Undispatched, event),
                body,
            ));
        }

        self.backend.mset(entries).await?;
        info!(
            commit_id = %first.commit_id,
            aggregate_id = %first.aggregate_id,
            "[store.add_events] commit persisted"
        );
        Ok(())
    }

    #[instrument(name = "store.get_events", skip(self))]
    async fn get_events(&self, query: &Query, paging: Paging) -> EventstoreResult<Vec<Event>> {
        let pattern = self.codec.event_pattern(EventCollection::Events, query)?;
        let keys = self.scan_all(&pattern).await?;
        let selected = slice(&keys, paging.bounds(keys.len()));
        Ok(self.fetch_events(selected).await?)
    }

    #[instrument(name = "store.get_events_since", skip(self))]
    async fn get_events_since(
        &self,
        since: Timestamp,
        paging: Paging,
    ) -> EventstoreResult<Vec<Event>> {
        let pattern = self
            .codec
            .event_pattern(EventCollection::Events, &Query::all())?;
        let threshold = since.as_millis();
        let keys: Vec<String> = self
            .scan_all(&pattern)
            .await?
            .into_iter()
            .filter(|key| EventKey::parse(key).is_some_and(|k| k.stamp_millis >= threshold))
            .collect();
        let selected = slice(&keys, paging.bounds(keys.len()));
        Ok(self.fetch_events(selected).await?)
    }

    #[instrument(name = "store.get_events_by_revision", skip(self))]
    async fn get_events_by_revision(
        &self,
        query: &Query,
        range: RevisionRange,
    ) -> EventstoreResult<Vec<Event>> {
        require_aggregate_id(query)?;
        let pattern = self.codec.event_pattern(EventCollection::Events, query)?;
        let keys = self.scan_all(&pattern).await?;
        let selected = slice(&keys, range.bounds(keys.len()));
        Ok(self.fetch_events(selected).await?)
    }

    #[instrument(name = "store.get_last_event", skip(self))]
    async fn get_last_event(&self, query: &Query) -> EventstoreResult<Option<Event>> {
        require_aggregate_id(query)?;
        let pattern = self.codec.event_pattern(EventCollection::Events, query)?;
        let keys = self.scan_all(&pattern).await?;
        let Some(last) = keys.last() else {
            return Ok(None);
        };
        match self.backend.get(last).await? {
            Some(raw) => Ok(Some(decode(last, &raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(name = "store.get_undispatched_events", skip(self))]
    async fn get_undispatched_events(&self, query: &Query) -> EventstoreResult<Vec<Event>> {
        let pattern = self
            .codec
            .event_pattern(EventCollection::Undispatched, query)?;
        let keys = self.scan_all(&pattern).await?;
        let mut events = self.fetch_events(&keys).await?;
        events.sort_by(|a, b| {
            (a.commit_stamp, a.commit_sequence).cmp(&(b.commit_stamp, b.commit_sequence))
        });
        debug!(count = events.len(), "[store.get_undispatched_events] loaded");
        Ok(events)
    }

    #[instrument(name = "store.set_event_to_dispatched", skip(self))]
    async fn set_event_to_dispatched(&self, event_id: &str) -> EventstoreResult<()> {
        let pattern = self.codec.undispatched_id_pattern(event_id)?;
        let keys = self.scan_all(&pattern).await?;
        if keys.is_empty() {
            debug!(event_id, "[store.set_event_to_dispatched] already dispatched");
            return Ok(());
        }
        let _ = self.backend.del(&keys).await?;
        Ok(())
    }

    #[instrument(name = "store.add_snapshot", skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, revision = snapshot.revision))]
    async fn add_snapshot(&self, snapshot: &Snapshot) -> EventstoreResult<()> {
        snapshot.validate()?;
        let body = encode(snapshot, Operation::Set)?;
        self.backend
            .set(&self.codec.snapshot_key(snapshot), body)
            .await?;
        Ok(())
    }

    #[instrument(name = "store.get_snapshot", skip(self))]
    async fn get_snapshot(
        &self,
        query: &Query,
        max_revision: Option<u64>,
    ) -> EventstoreResult<Option<Snapshot>> {
        require_aggregate_id(query)?;
        let pattern = self.codec.snapshot_pattern(query)?;
        let keys = self.scan_all(&pattern).await?;
        let mut snapshots: Vec<Snapshot> = self.fetch(&keys).await?;
        snapshots.sort_by(|a, b| (b.commit_stamp, b.revision).cmp(&(a.commit_stamp, a.revision)));
        Ok(snapshots
            .into_iter()
            .find(|s| !max_revision.is_some_and(|max| s.revision > max)))
    }
}
