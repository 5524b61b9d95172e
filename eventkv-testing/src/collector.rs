//! Test publisher that records delivered events.
//!
//! `EventCollector` hands out [`EventPublisher`]s that push every delivered
//! event into shared storage, so a test can register a publisher with the
//! eventstore and later assert on what was delivered and in which order.
//!
//! ```ignore
//! let collector = EventCollector::new().failing_first(2);
//! let mut eventstore = Eventstore::new(store).use_event_publisher(collector.acknowledging());
//! eventstore.init().await?;
//! // ... commit ...
//! assert!(collector.wait_for(3, Duration::from_secs(1)).await);
//! ```

use eventkv::dispatcher::EventPublisher;
use eventkv::errors::DispatchError;
use eventkv::event::Event;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Shared record of delivered events. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<Event>>>,
    attempts: Arc<AtomicU32>,
    failures_left: Arc<AtomicU32>,
}

impl EventCollector {
    /// A collector that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the first `count` acknowledging deliveries before accepting any.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Publisher that acknowledges (or rejects) each delivery.
    pub fn acknowledging(&self) -> EventPublisher {
        let collector = self.clone();
        EventPublisher::acknowledging(move |event: Event| {
            let collector = collector.clone();
            async move { collector.receive(event) }
        })
    }

    /// Publisher that records without acknowledging; it cannot fail.
    pub fn fire_and_forget(&self) -> EventPublisher {
        let collector = self.clone();
        EventPublisher::fire_and_forget(move |event: &Event| {
            let _ = collector.attempts.fetch_add(1, Ordering::SeqCst);
            collector.storage().push(event.clone());
        })
    }

    fn receive(&self, event: Event) -> Result<(), DispatchError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(DispatchError::rejected(format!(
                "collector refused {}",
                event.id
            )));
        }
        self.storage().push(event);
        Ok(())
    }

    fn storage(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a clone of all delivered events, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.storage().clone()
    }

    /// Ids of delivered events, in delivery order.
    pub fn event_ids(&self) -> Vec<String> {
        self.storage().iter().map(|e| e.id.clone()).collect()
    }

    /// Number of delivered events.
    pub fn len(&self) -> usize {
        self.storage().len()
    }

    /// Whether nothing was delivered yet.
    pub fn is_empty(&self) -> bool {
        self.storage().is_empty()
    }

    /// Publisher invocations, rejected ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` events were delivered; false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}
