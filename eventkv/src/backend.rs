//! Key/value backend abstraction.
//!
//! A backend only needs what a Redis-style server offers: cursor scans over
//! a glob pattern, single and bulk reads, an atomic bulk write, deletion and
//! an atomic counter. Everything event-specific is built on top of these
//! primitives by [`KeyValueStore`](crate::store::KeyValueStore).

use crate::errors::{ConnectionError, StoreError};
use async_trait::async_trait;

/// Cursor value that starts a scan and, when returned, ends it.
pub const SCAN_START: u64 = 0;

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; [`SCAN_START`] when the scan is complete
    pub cursor: u64,
    /// Keys matched on this page, in no particular order
    pub keys: Vec<String>,
}

impl ScanPage {
    /// Whether this was the last page.
    pub const fn is_last(&self) -> bool {
        self.cursor == SCAN_START
    }
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The backend connection was established
    Connected,
    /// The backend connection was closed
    Disconnected,
}

/// Flat string key/value store with Redis semantics.
///
/// Implementations must make [`mset`](Self::mset) all-or-nothing and
/// [`incr`](Self::incr) atomic across every client sharing the backend.
/// `connect` and `disconnect` must be idempotent.
#[async_trait]
pub trait KeyValueBackend: Send + Sync + 'static {
    /// Opens the connection.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<(), ConnectionError>;

    /// Returns one page of keys matching `pattern`, starting at `cursor`.
    ///
    /// Patterns use `*` for any run of characters and `?` for exactly one.
    /// A page may be empty while the cursor is not yet exhausted.
    async fn scan(&self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError>;

    /// Reads one key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Reads many keys; the result is positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Writes one key.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Writes every pair or none of them.
    async fn mset(&self, entries: Vec<(String, String)>) -> Result<(), StoreError>;

    /// Deletes keys and returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Atomically increments the integer at `key` (missing counts as 0) and returns the new value.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;
}
