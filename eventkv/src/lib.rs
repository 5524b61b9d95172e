//! `EventKV` - Event store over sorted-key-scan key/value backends
//!
//! Events are grouped into per-aggregate streams, committed atomically in
//! batches, kept in an undispatched index until a publisher acknowledges
//! them, and can be rehydrated from snapshots. Any backend offering
//! wildcard key scans, bulk reads, atomic bulk writes and an atomic
//! counter can carry the store; see [`backend::KeyValueBackend`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod eventstore;
pub mod key;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod types;

mod validation;

#[cfg(test)]
mod test_support;

pub use backend::{ConnectionEvent, KeyValueBackend, ScanPage, SCAN_START};
pub use config::StoreConfig;
pub use dispatcher::{
    DeadLetter, Dispatcher, DispatcherConfig, DispatcherState, DispatcherStats, EventPublisher,
    PublishFuture,
};
pub use errors::{
    ConnectionError, DispatchError, EventstoreError, EventstoreResult, Operation, StoreError,
    ValidationError,
};
pub use event::{Event, EventMappings};
pub use eventstore::{EventPage, Eventstore, EventstoreOptions};
pub use key::{EventCollection, KeyCodec};
pub use retry::RetryConfig;
pub use snapshot::{NewSnapshot, Snapshot};
pub use store::{KeyValueStore, StoreAdapter};
pub use stream::EventStream;
pub use types::{CollectionName, KeyPrefix, Paging, Query, RevisionRange, Timestamp, DEFAULT_SCOPE};
