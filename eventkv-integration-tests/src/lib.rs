//! Integration tests for `EventKV`
//!
//! This crate holds the end-to-end tests that run the eventstore core on
//! the in-memory backend, with and without fault injection, plus the
//! fixtures they share.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventkv::config::StoreConfig;
use eventkv::errors::EventstoreResult;
use eventkv::eventstore::Eventstore;
use eventkv::retry::RetryConfig;
use eventkv::store::{KeyValueStore, StoreAdapter};
use eventkv::stream::EventStream;
use eventkv::types::{Query, RevisionRange};
use eventkv_memory::InMemoryBackend;
use eventkv_testing::{ChaosBackend, ChaosBackendExt, ChaosConfig};
use serde_json::Value;
use std::time::Duration;

/// Eventstore over a plain in-memory backend.
pub type MemoryEventstore = Eventstore<KeyValueStore<InMemoryBackend>>;

/// Eventstore over an in-memory backend wrapped for fault injection.
pub type ChaosEventstore = Eventstore<KeyValueStore<ChaosBackend<InMemoryBackend>>>;

/// Scan page size used by the fixtures, small enough that most queries span several pages.
pub const FIXTURE_PAGE_SIZE: usize = 3;

/// A fresh in-memory backend with small scan pages.
pub fn memory_backend() -> InMemoryBackend {
    InMemoryBackend::new().with_page_size(FIXTURE_PAGE_SIZE)
}

/// An eventstore on its own fresh keyspace.
pub fn memory_eventstore() -> MemoryEventstore {
    memory_eventstore_on(memory_backend())
}

/// An eventstore on `backend`; clones of one backend share their keyspace.
pub fn memory_eventstore_on(backend: InMemoryBackend) -> MemoryEventstore {
    Eventstore::new(KeyValueStore::new(backend, &StoreConfig::default()))
}

/// An eventstore whose backend fails as `config` says.
pub fn chaos_eventstore(config: ChaosConfig) -> ChaosEventstore {
    let backend = memory_backend().with_chaos(config);
    Eventstore::new(KeyValueStore::new(backend, &StoreConfig::default()))
}

/// Retry policy with millisecond delays and no jitter.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_delays(Duration::from_millis(1), Duration::from_millis(4))
        .with_jitter(false)
}

/// Loads the stream for `query`, adds `payloads` and commits them.
pub async fn commit_payloads<S: StoreAdapter>(
    eventstore: &Eventstore<S>,
    query: impl Into<Query>,
    payloads: impl IntoIterator<Item = Value>,
) -> EventstoreResult<EventStream> {
    let mut stream = eventstore
        .get_event_stream(query, RevisionRange::all())
        .await?;
    stream.add_events(payloads);
    eventstore.commit(&mut stream).await?;
    Ok(stream)
}

/// Installs a test subscriber honouring `RUST_LOG`; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
