//! In-memory backend for `EventKV`
//!
//! This crate provides an in-memory implementation of the
//! [`KeyValueBackend`] trait with Redis semantics, useful for testing and
//! development scenarios where persistence is not required. Clones share
//! one keyspace, so several store instances can be pointed at the same
//! "server".

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use async_trait::async_trait;
use eventkv::backend::{KeyValueBackend, ScanPage, SCAN_START};
use eventkv::errors::{ConnectionError, Operation, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Keys returned per scan page unless configured otherwise, like Redis `COUNT`.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 10;

/// Thread-safe in-memory key/value backend.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<HashMap<String, String>>>,
    connected: Arc<AtomicBool>,
    page_size: usize,
    require_connection: bool,
}

impl InMemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            require_connection: false,
        }
    }

    /// Sets how many keys a scan page holds at most. Zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Makes every data operation fail with [`StoreError::NotConnected`]
    /// outside `connect`/`disconnect`.
    #[must_use]
    pub const fn requiring_connection(mut self) -> Self {
        self.require_connection = true;
        self
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Whether a `connect` is in effect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.require_connection && !self.is_connected() {
            return Err(StoreError::NotConnected);
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// Scan order is the order of a fixed-key hash, so it looks random but stays
// stable while keys come and go, and the cursor is the next hash to visit.
fn scan_position(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Glob match supporting `*` (any run, including empty) and `?` (one character).
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.chars().collect::<Vec<_>>();
    let text = candidate.chars().collect::<Vec<_>>();
    let (mut p_idx, mut t_idx) = (0usize, 0usize);
    let mut star_idx: Option<usize> = None;
    let mut match_idx = 0usize;

    while t_idx < text.len() {
        if p_idx < pattern.len() && (pattern[p_idx] == text[t_idx] || pattern[p_idx] == '?') {
            p_idx += 1;
            t_idx += 1;
        } else if p_idx < pattern.len() && pattern[p_idx] == '*' {
            star_idx = Some(p_idx);
            match_idx = t_idx;
            p_idx += 1;
        } else if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            t_idx = match_idx;
        } else {
            return false;
        }
    }

    while p_idx < pattern.len() && pattern[p_idx] == '*' {
        p_idx += 1;
    }

    p_idx == pattern.len()
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        self.ensure_connected()?;
        let data = self.data.read();

        let mut remaining: Vec<(u64, &String)> = data
            .keys()
            .map(|key| (scan_position(key), key))
            .filter(|(position, _)| *position >= cursor)
            .collect();
        remaining.sort_unstable();

        // Never split keys sharing a position across pages.
        let mut end = remaining.len().min(self.page_size);
        while end > 0 && end < remaining.len() && remaining[end].0 == remaining[end - 1].0 {
            end += 1;
        }

        let next = match remaining.get(end) {
            Some(_) => remaining[end - 1].0 + 1,
            None => SCAN_START,
        };
        let keys: Vec<String> = remaining[..end]
            .iter()
            .filter(|(_, key)| glob_matches(pattern, key))
            .map(|(_, key)| (*key).clone())
            .collect();

        debug!(cursor, next, matched = keys.len(), "[memory.scan] page served");
        Ok(ScanPage { cursor: next, keys })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_connected()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.ensure_connected()?;
        let data = self.data.read();
        Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let _ = self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn mset(&self, entries: Vec<(String, String)>) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.data.write().extend(entries);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let mut data = self.data.write();
        let removed = keys.iter().filter(|key| data.remove(*key).is_some()).count();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let mut data = self.data.write();
        let current = match data.get(key) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                StoreError::backend(Operation::Increment, "value is not an integer")
            })?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::backend(Operation::Increment, "increment would overflow"))?;
        let _ = data.insert(key.to_string(), next.to_string());
        Ok(next)
    }
}
