//! The public eventstore API.
//!
//! [`Eventstore`] ties a [`StoreAdapter`] to an optional [`Dispatcher`]:
//!
//! ```rust,ignore
//! let mut eventstore = Eventstore::new(KeyValueStore::new(backend, &config))
//!     .use_event_publisher(EventPublisher::acknowledging(publish))
//!     .define_event_mappings(EventMappings::new().with_commit_id("meta.commitId"));
//! eventstore.init().await?;
//!
//! let mut stream = eventstore.get_event_stream("order-1", RevisionRange::all()).await?;
//! stream.add_event(json!({"type": "ItemAdded"}));
//! eventstore.commit(&mut stream).await?;
//! ```
//!
//! # Commit protocol
//!
//! 1. Draw a commit id from the store-wide counter.
//! 2. Number the pending events: id `<commitId>-<i>`, commit sequence `i`,
//!    events remaining in the commit, one shared commit stamp, and stream
//!    revisions continuing from the stream's current revision.
//! 3. Copy mapped fields into the payloads.
//! 4. Persist the whole commit with one atomic write.
//! 5. Hand the events to the running dispatcher, or leave them on the
//!    stream as `events_to_dispatch` when there is none.
//! 6. Move the events from pending to committed.
//!
//! A failure in step 1 or 4 is returned with the stream untouched, so the
//! commit can be retried.

use crate::backend::ConnectionEvent;
use crate::config::StoreConfig;
use crate::dispatcher::{Dispatcher, DispatcherConfig, DispatcherState, EventPublisher};
use crate::errors::{ConnectionError, EventstoreResult};
use crate::event::{Event, EventMappings};
use crate::retry::RetryConfig;
use crate::snapshot::{NewSnapshot, Snapshot};
use crate::store::StoreAdapter;
use crate::stream::EventStream;
use crate::types::{Paging, Query, RevisionRange, Timestamp};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Eventstore behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventstoreOptions {
    /// How long `init` keeps retrying a failed connection; zero means one attempt
    pub init_timeout: Duration,
    /// Backoff between connection attempts during `init`
    pub connect_retry: RetryConfig,
    /// Dispatcher settings
    pub dispatcher: DispatcherConfig,
}

impl Default for EventstoreOptions {
    fn default() -> Self {
        Self {
            init_timeout: Duration::ZERO,
            connect_retry: RetryConfig::default().with_max_attempts(u32::MAX),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl EventstoreOptions {
    /// Options taking the init window from store configuration.
    pub fn from_store_config(config: &StoreConfig) -> Self {
        Self::default().with_init_timeout(config.timeout())
    }

    /// Sets the init retry window.
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Sets the backoff between connection attempts.
    #[must_use]
    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Sets the dispatcher settings.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

/// Event store facade: commits, queries, snapshots and dispatch.
#[derive(Debug)]
pub struct Eventstore<S: StoreAdapter> {
    store: Arc<S>,
    options: EventstoreOptions,
    mappings: EventMappings,
    publisher: Option<EventPublisher>,
    dispatcher: Option<Dispatcher<S>>,
}

impl<S: StoreAdapter> Eventstore<S> {
    /// Creates an eventstore over `store`. Call [`init`](Self::init) before use.
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Creates an eventstore over a store that is shared with other owners.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            options: EventstoreOptions::default(),
            mappings: EventMappings::default(),
            publisher: None,
            dispatcher: None,
        }
    }

    /// Registers the publisher that receives every committed event.
    #[must_use]
    pub fn use_event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Configures which store-assigned fields are copied into payloads.
    #[must_use]
    pub fn define_event_mappings(mut self, mappings: EventMappings) -> Self {
        self.mappings = mappings;
        self
    }

    /// Replaces the behaviour settings.
    #[must_use]
    pub fn with_options(mut self, options: EventstoreOptions) -> Self {
        self.options = options;
        self
    }

    /// The store adapter.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The dispatcher, once `init` started one.
    pub const fn dispatcher(&self) -> Option<&Dispatcher<S>> {
        self.dispatcher.as_ref()
    }

    /// Subscribes to connect/disconnect notifications of the store.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.store.connection_events()
    }

    /// Connects the store and, if a publisher is registered, starts the dispatcher.
    ///
    /// Connection failures are retried with backoff until `init_timeout`
    /// has elapsed.
    #[instrument(name = "eventstore.init", skip(self))]
    pub async fn init(&mut self) -> EventstoreResult<()> {
        self.connect_with_tolerance().await?;

        let Some(publisher) = self.publisher.clone() else {
            info!("[eventstore.init] no publisher registered, dispatch is left to the caller");
            return Ok(());
        };
        if self
            .dispatcher
            .as_ref()
            .is_some_and(|d| d.state() != DispatcherState::Stopped)
        {
            return Ok(());
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            publisher,
            self.options.dispatcher.clone(),
        );
        dispatcher.start().await?;
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    async fn connect_with_tolerance(&self) -> Result<(), ConnectionError> {
        let window = self.options.init_timeout;
        let deadline = Instant::now() + window;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.store.connect().await {
                Ok(()) => {
                    info!(attempt, "[eventstore.init] store connected");
                    return Ok(());
                }
                Err(error) => error,
            };

            let now = Instant::now();
            if window.is_zero() {
                error!(%error, "[eventstore.init] could not connect");
                return Err(error);
            }
            if now >= deadline || attempt >= self.options.connect_retry.attempts() {
                error!(attempt, %error, "[eventstore.init] giving up on connecting");
                return Err(ConnectionError::TimedOut {
                    timeout: window,
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self
                .options
                .connect_retry
                .delay_for(attempt)
                .min(deadline - now);
            warn!(attempt, ?delay, %error, "[eventstore.init] connection failed, retrying");
            sleep(delay).await;
        }
    }

    /// Stops the dispatcher and disconnects the store.
    #[instrument(name = "eventstore.close", skip(self))]
    pub async fn close(&mut self) -> EventstoreResult<()> {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop().await;
        }
        self.store.disconnect().await?;
        Ok(())
    }

    /// Events matching `query`, oldest first.
    ///
    /// A string converts into an aggregate id query; [`Query::all`] matches everything.
    pub async fn get_events(
        &self,
        query: impl Into<Query>,
        paging: Paging,
    ) -> EventstoreResult<EventPage<'_, S>> {
        self.load_page(PageRequest::Query {
            query: query.into(),
            paging,
        })
        .await
    }

    /// Events committed at or after `since`, oldest first.
    pub async fn get_events_since(
        &self,
        since: Timestamp,
        paging: Paging,
    ) -> EventstoreResult<EventPage<'_, S>> {
        self.load_page(PageRequest::Since { since, paging }).await
    }

    /// Events of one aggregate within `range`.
    pub async fn get_events_by_revision(
        &self,
        query: impl Into<Query>,
        range: RevisionRange,
    ) -> EventstoreResult<EventPage<'_, S>> {
        self.load_page(PageRequest::Revision {
            query: query.into(),
            range,
        })
        .await
    }

    async fn load_page(&self, request: PageRequest) -> EventstoreResult<EventPage<'_, S>> {
        debug!(?request, "[eventstore.load_page] loading events");
        let events = match &request {
            PageRequest::Query { query, paging } => self.store.get_events(query, *paging).await?,
            PageRequest::Since { since, paging } => {
                self.store.get_events_since(*since, *paging).await?
            }
            PageRequest::Revision { query, range } => {
                self.store.get_events_by_revision(query, *range).await?
            }
        };
        Ok(EventPage {
            eventstore: self,
            request,
            events,
        })
    }

    /// Loads an aggregate's events within `range` into a stream.
    #[instrument(name = "eventstore.get_event_stream", skip(self, query))]
    pub async fn get_event_stream(
        &self,
        query: impl Into<Query>,
        range: RevisionRange,
    ) -> EventstoreResult<EventStream> {
        let query = query.into();
        validation::aggregate_id(query.aggregate_id_filter())?;
        let events = self.store.get_events_by_revision(&query, range).await?;
        let partial = range.max.is_some() || (range.min > 1 && events.is_empty());
        let mut stream = EventStream::from_events(&query, events)?;
        // Commits must stamp past the aggregate's newest event even when it was not loaded.
        if partial {
            if let Some(last) = self.store.get_last_event(&query).await? {
                stream.observe_commit_stamp(last.commit_stamp);
            }
        }
        Ok(stream)
    }

    /// Loads the newest snapshot at or below `max_revision` and the events after it.
    ///
    /// The returned stream's current revision is the snapshot revision when no
    /// event followed the snapshot.
    #[instrument(name = "eventstore.get_from_snapshot", skip(self, query))]
    pub async fn get_from_snapshot(
        &self,
        query: impl Into<Query>,
        max_revision: Option<u64>,
    ) -> EventstoreResult<(Option<Snapshot>, EventStream)> {
        let mut query = query.into();
        validation::aggregate_id(query.aggregate_id_filter())?;

        let snapshot = self.store.get_snapshot(&query, max_revision).await?;
        let resume_from = snapshot.as_ref().map_or(0, |s| s.revision + 1);
        if let Some(snapshot) = &snapshot {
            if query.context_filter().is_none() {
                query.context = Some(snapshot.context.clone());
            }
            if query.aggregate_filter().is_none() {
                query.aggregate = Some(snapshot.aggregate.clone());
            }
        }

        let range = RevisionRange {
            min: resume_from,
            max: max_revision,
        };
        let mut stream = self.get_event_stream(query, range).await?;
        if let Some(snapshot) = &snapshot {
            stream.set_base_revision(snapshot.revision);
        }
        debug!(
            snapshot_revision = snapshot.as_ref().map(|s| s.revision),
            events = stream.events().len(),
            "[eventstore.get_from_snapshot] stream rehydrated"
        );
        Ok((snapshot, stream))
    }

    /// Stores a snapshot under a fresh id, stamped with the current time.
    #[instrument(name = "eventstore.create_snapshot", skip(self, input))]
    pub async fn create_snapshot(&self, input: NewSnapshot) -> EventstoreResult<Snapshot> {
        input.resolved_aggregate_id()?;
        let id = self.store.get_new_id().await?;
        let snapshot = input.into_snapshot(id, Timestamp::now())?;
        self.store.add_snapshot(&snapshot).await?;
        info!(
            aggregate_id = %snapshot.aggregate_id,
            revision = snapshot.revision,
            "[eventstore.create_snapshot] snapshot stored"
        );
        Ok(snapshot)
    }

    /// Commits the stream's pending events.
    ///
    /// Committing a stream without pending events does nothing.
    #[instrument(
        name = "eventstore.commit",
        skip(self, stream),
        fields(aggregate_id = %stream.aggregate_id(), pending = stream.uncommitted_events().len())
    )]
    pub async fn commit(&self, stream: &mut EventStream) -> EventstoreResult<()> {
        if stream.uncommitted_events().is_empty() {
            return Ok(());
        }

        let commit_id = self.store.get_new_id().await?;
        let commit_stamp = stream.next_commit_stamp(Timestamp::now());
        let events = stream.build_commit(&commit_id, commit_stamp, &self.mappings);
        self.store.add_events(&events).await?;

        let dispatch_manually = match self.running_dispatcher() {
            Some(dispatcher) => match dispatcher.add_undispatched_events(events.clone()) {
                Ok(()) => false,
                Err(error) => {
                    warn!(%error, "[eventstore.commit] dispatcher refused events, leaving them on the stream");
                    true
                }
            },
            None => true,
        };

        let count = events.len();
        stream.complete_commit(events, dispatch_manually);
        info!(
            commit_id = %commit_id,
            event_count = count,
            revision = stream.current_revision(),
            "[eventstore.commit] commit complete"
        );
        Ok(())
    }

    fn running_dispatcher(&self) -> Option<&Dispatcher<S>> {
        self.dispatcher
            .as_ref()
            .filter(|d| d.state() == DispatcherState::Running)
    }

    /// Events not yet confirmed as delivered.
    pub async fn get_undispatched_events(
        &self,
        query: impl Into<Query>,
    ) -> EventstoreResult<Vec<Event>> {
        self.store.get_undispatched_events(&query.into()).await
    }

    /// Confirms delivery of an event. Repeated calls are harmless.
    pub async fn set_event_to_dispatched(&self, event_id: &str) -> EventstoreResult<()> {
        self.store.set_event_to_dispatched(event_id).await
    }

    /// The newest event of one aggregate.
    pub async fn get_last_event(&self, query: impl Into<Query>) -> EventstoreResult<Option<Event>> {
        self.store.get_last_event(&query.into()).await
    }

    /// A stream holding only the newest event of one aggregate, ready for new commits.
    pub async fn get_last_event_as_stream(
        &self,
        query: impl Into<Query>,
    ) -> EventstoreResult<EventStream> {
        let query = query.into();
        let last = self.store.get_last_event(&query).await?;
        Ok(EventStream::from_events(&query, last.into_iter().collect())?)
    }

    /// Next value of the store-wide id counter.
    pub async fn get_new_id(&self) -> EventstoreResult<String> {
        self.store.get_new_id().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageRequest {
    Query { query: Query, paging: Paging },
    Since { since: Timestamp, paging: Paging },
    Revision { query: Query, range: RevisionRange },
}

impl PageRequest {
    fn advance(&self) -> Self {
        match self {
            Self::Query { query, paging } => Self::Query {
                query: query.clone(),
                paging: paging.next(),
            },
            Self::Since { since, paging } => Self::Since {
                since: *since,
                paging: paging.next(),
            },
            Self::Revision { query, range } => Self::Revision {
                query: query.clone(),
                range: range.next(),
            },
        }
    }
}

/// One page of query results that knows how to load the following page.
#[derive(Debug)]
pub struct EventPage<'a, S: StoreAdapter> {
    eventstore: &'a Eventstore<S>,
    request: PageRequest,
    events: Vec<Event>,
}

impl<'a, S: StoreAdapter> EventPage<'a, S> {
    /// Events on this page.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Takes the events out of the page.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Runs the same query for the window after this one.
    pub async fn next(&self) -> EventstoreResult<EventPage<'a, S>> {
        self.eventstore.load_page(self.request.advance()).await
    }
}

impl<S: StoreAdapter> Deref for EventPage<'_, S> {
    type Target = [Event];

    fn deref(&self) -> &Self::Target {
        &self.events
    }
}
