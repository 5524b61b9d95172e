//! Delivery of committed events to the registered publisher.
//!
//! Every committed event is also written to the undispatched index. The
//! [`Dispatcher`] drains that index: on [`start`](Dispatcher::start) it loads
//! the backlog oldest-first, then it accepts freshly committed events through
//! [`add_undispatched_events`](Dispatcher::add_undispatched_events). A single
//! worker task delivers events one at a time in the order they were queued,
//! which keeps each aggregate's events in commit order.
//!
//! After the publisher acknowledges an event it is removed from the
//! undispatched index. A publisher failure is retried with exponential
//! backoff; once the attempt budget is spent the event is dead-lettered and
//! its aggregate is blocked for the rest of the run: later events of that
//! aggregate are parked instead of delivered, while other aggregates keep
//! flowing. Dead-lettered and parked events stay in the undispatched index
//! and are delivered again, in commit order, on the next start, so delivery
//! is at-least-once.

use crate::errors::{DispatchError, EventstoreResult};
use crate::event::Event;
use crate::retry::RetryConfig;
use crate::store::StoreAdapter;
use crate::types::Query;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Future returned by an acknowledging publisher.
pub type PublishFuture = BoxFuture<'static, Result<(), DispatchError>>;

/// Callback receiving committed events.
///
/// Only the acknowledging form can report failure, so only it gets retries.
#[derive(Clone)]
pub enum EventPublisher {
    /// Called once per event; delivery counts as successful when it returns.
    FireAndForget(Arc<dyn Fn(&Event) + Send + Sync>),
    /// Called once per attempt; delivery succeeds when the future resolves to `Ok`.
    Acknowledging(Arc<dyn Fn(Event) -> PublishFuture + Send + Sync>),
}

impl EventPublisher {
    /// Wraps a callback that cannot report failure.
    pub fn fire_and_forget<F>(publish: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self::FireAndForget(Arc::new(publish))
    }

    /// Wraps a callback that acknowledges each event.
    pub fn acknowledging<F, Fut>(publish: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        Self::Acknowledging(Arc::new(move |event: Event| -> PublishFuture {
            publish(event).boxed()
        }))
    }

    /// Delivers one event.
    pub async fn publish(&self, event: &Event) -> Result<(), DispatchError> {
        match self {
            Self::FireAndForget(publish) => {
                publish(event);
                Ok(())
            }
            Self::Acknowledging(publish) => publish(event.clone()).await,
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FireAndForget(_) => f.write_str("EventPublisher::FireAndForget"),
            Self::Acknowledging(_) => f.write_str("EventPublisher::Acknowledging"),
        }
    }
}

/// Lifecycle state of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    /// No worker; events are not accepted
    Stopped,
    /// Loading the undispatched backlog
    Starting,
    /// Accepting and delivering events
    Running,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        })
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Retry policy for publisher failures
    pub retry: RetryConfig,
}

impl DispatcherConfig {
    /// Uses `retry` for publisher failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// An event whose delivery was given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The undelivered event
    pub event: Event,
    /// Why delivery was abandoned; always [`DispatchError::Exhausted`]
    pub error: DispatchError,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Events acknowledged by the publisher
    pub delivered: u64,
    /// Retries after publisher failures
    pub retries: u64,
    /// Events given up after the last attempt
    pub dead_lettered: u64,
    /// Events held back because an earlier event of their aggregate was dead-lettered
    pub parked: u64,
    /// Acknowledged events that could not be removed from the undispatched index
    pub mark_failures: u64,
}

#[derive(Debug)]
struct Shared {
    state: watch::Sender<DispatcherState>,
    pending: watch::Sender<usize>,
    stats: Mutex<DispatcherStats>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, DispatcherStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dead_letters(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Debug)]
struct Worker {
    queue: mpsc::UnboundedSender<Event>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Identity of one aggregate's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    context: String,
    aggregate: String,
    aggregate_id: String,
}

impl From<&Event> for StreamKey {
    fn from(event: &Event) -> Self {
        Self {
            context: event.context.clone(),
            aggregate: event.aggregate.clone(),
            aggregate_id: event.aggregate_id.clone(),
        }
    }
}

enum Delivery {
    Delivered,
    DeadLettered,
    Interrupted,
}

/// Sequential, retrying event dispatcher.
#[derive(Debug)]
pub struct Dispatcher<S> {
    store: Arc<S>,
    publisher: EventPublisher,
    config: DispatcherConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl<S: StoreAdapter> Dispatcher<S> {
    /// Creates a stopped dispatcher.
    pub fn new(store: Arc<S>, publisher: EventPublisher, config: DispatcherConfig) -> Self {
        let (state, _) = watch::channel(DispatcherState::Stopped);
        let (pending, _) = watch::channel(0);
        Self {
            store,
            publisher,
            config,
            shared: Arc::new(Shared {
                state,
                pending,
                stats: Mutex::new(DispatcherStats::default()),
                dead_letters: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatcherState {
        *self.shared.state.borrow()
    }

    /// Delivery counters since creation.
    pub fn stats(&self) -> DispatcherStats {
        *self.shared.stats()
    }

    /// Events given up since creation.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters().clone()
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the worker and queues the undispatched backlog, oldest first.
    ///
    /// Returns once the backlog is queued; delivery continues in the background.
    #[instrument(name = "dispatcher.start", skip(self))]
    pub async fn start(&self) -> EventstoreResult<()> {
        let current = self.state();
        if current != DispatcherState::Stopped {
            return Err(DispatchError::InvalidState {
                from: current,
                to: DispatcherState::Starting,
            }
            .into());
        }
        let _ = self.shared.state.send_replace(DispatcherState::Starting);

        let backlog = match self.store.get_undispatched_events(&Query::all()).await {
            Ok(events) => events,
            Err(error) => {
                let _ = self.shared.state.send_replace(DispatcherState::Stopped);
                return Err(error);
            }
        };

        let (queue, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_signal) = watch::channel(false);
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.store),
            self.publisher.clone(),
            self.config.retry.clone(),
            Arc::clone(&self.shared),
            receiver,
            shutdown_signal,
        ));
        *self.worker() = Some(Worker {
            queue,
            shutdown,
            handle,
        });

        let backlog_len = backlog.len();
        self.enqueue(backlog)?;
        let _ = self.shared.state.send_replace(DispatcherState::Running);
        info!(backlog = backlog_len, "[dispatcher.start] dispatcher running");
        Ok(())
    }

    /// Queues freshly committed events for delivery, in order.
    pub fn add_undispatched_events(&self, events: Vec<Event>) -> Result<(), DispatchError> {
        if self.state() != DispatcherState::Running {
            return Err(DispatchError::NotRunning);
        }
        self.enqueue(events)
    }

    fn enqueue(&self, events: Vec<Event>) -> Result<(), DispatchError> {
        let worker = self.worker();
        let Some(worker) = worker.as_ref() else {
            return Err(DispatchError::NotRunning);
        };
        for event in events {
            self.shared.pending.send_modify(|n| *n += 1);
            if worker.queue.send(event).is_err() {
                self.shared.finish_one();
                return Err(DispatchError::NotRunning);
            }
        }
        Ok(())
    }

    /// Resolves once every queued event was delivered or dead-lettered.
    pub async fn wait_idle(&self) {
        let mut pending = self.shared.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Stops the worker after the event in flight.
    ///
    /// Queued events that were not delivered remain in the undispatched
    /// index and are picked up by the next start.
    #[instrument(name = "dispatcher.stop", skip(self))]
    pub async fn stop(&self) {
        let worker = self.worker().take();
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.shutdown.send(true);
        drop(worker.queue);
        if let Err(error) = worker.handle.await {
            error!(%error, "[dispatcher.stop] worker task failed");
        }
        let _ = self.shared.pending.send_replace(0);
        let _ = self.shared.state.send_replace(DispatcherState::Stopped);
        info!("[dispatcher.stop] dispatcher stopped");
    }
}

async fn run_worker<S: StoreAdapter>(
    store: Arc<S>,
    publisher: EventPublisher,
    retry: RetryConfig,
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("[dispatcher.worker] worker started");
    let mut blocked: HashSet<StreamKey> = HashSet::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let stream = StreamKey::from(&event);
        if blocked.contains(&stream) {
            warn!(
                event_id = %event.id,
                aggregate_id = %event.aggregate_id,
                "[dispatcher.worker] earlier event of this aggregate was dead-lettered, parking event"
            );
            shared.stats().parked += 1;
            shared.finish_one();
            continue;
        }

        let outcome = deliver(&*store, &publisher, &retry, &shared, &event, &mut shutdown).await;
        shared.finish_one();
        match outcome {
            Delivery::Delivered => {}
            Delivery::DeadLettered => {
                let _ = blocked.insert(stream);
            }
            Delivery::Interrupted => break,
        }
    }
    debug!("[dispatcher.worker] worker finished");
}

async fn deliver<S: StoreAdapter>(
    store: &S,
    publisher: &EventPublisher,
    retry: &RetryConfig,
    shared: &Shared,
    event: &Event,
    shutdown: &mut watch::Receiver<bool>,
) -> Delivery {
    let attempts = retry.attempts();
    let mut attempt = 1;

    let last_error = loop {
        match publisher.publish(event).await {
            Ok(()) => break None,
            Err(error) if attempt >= attempts => break Some(error),
            Err(error) => {
                let delay = retry.delay_for(attempt);
                warn!(
                    event_id = %event.id,
                    attempt,
                    max_attempts = attempts,
                    ?delay,
                    %error,
                    "[dispatcher.deliver] publisher failed, retrying"
                );
                shared.stats().retries += 1;
                attempt += 1;
                tokio::select! {
                    () = sleep(delay) => {}
                    _ = shutdown.changed() => return Delivery::Interrupted,
                }
            }
        }
    };

    if let Some(error) = last_error {
        let error = DispatchError::Exhausted {
            event_id: event.id.clone(),
            attempts,
            last_error: error.to_string(),
        };
        error!(
            event_id = %event.id,
            aggregate_id = %event.aggregate_id,
            %error,
            "[dispatcher.deliver] giving up on event"
        );
        shared.stats().dead_lettered += 1;
        shared.dead_letters().push(DeadLetter {
            event: event.clone(),
            error,
        });
        return Delivery::DeadLettered;
    }

    shared.stats().delivered += 1;
    if let Err(error) = store.set_event_to_dispatched(&event.id).await {
        error!(
            event_id = %event.id,
            %error,
            "[dispatcher.deliver] could not mark event as dispatched, it will be redelivered"
        );
        shared.stats().mark_failures += 1;
    }
    Delivery::Delivered
}
