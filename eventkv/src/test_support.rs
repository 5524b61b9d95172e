//! Backend used by this crate's unit tests.

use crate::backend::{KeyValueBackend, ScanPage};
use crate::errors::{ConnectionError, Operation, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<String, String>,
    counter: u64,
    failing: Vec<Operation>,
    refused_connects: u32,
    connect_calls: u32,
}

/// Ordered map backend that serves scans two keys per page, newest first,
/// so callers must accumulate pages and sort.
#[derive(Debug, Clone, Default)]
pub(crate) struct PagedBackend {
    state: Arc<Mutex<State>>,
}

impl PagedBackend {
    pub(crate) fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.state.lock().data.keys().cloned().collect()
    }

    pub(crate) fn fail(&self, operation: Operation) {
        self.state.lock().failing.push(operation);
    }

    pub(crate) fn heal(&self) {
        self.state.lock().failing.clear();
    }

    pub(crate) fn refuse_connects(&self, count: u32) {
        self.state.lock().refused_connects = count;
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        if self.state.lock().failing.contains(&operation) {
            return Err(StoreError::backend(operation, "injected failure"));
        }
        Ok(())
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split(':').collect();
    let segments: Vec<&str> = key.split(':').collect();
    if let [namespace, "*"] = parts.as_slice() {
        return segments.len() > 1 && segments[0] == *namespace;
    }
    parts.len() == segments.len() && parts.iter().zip(&segments).all(|(p, s)| *p == "*" || p == s)
}

#[async_trait]
impl KeyValueBackend for PagedBackend {
    async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.refused_connects > 0 {
            state.refused_connects -= 1;
            return Err(ConnectionError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        self.check(Operation::Scan)?;
        let mut keys: Vec<String> = self
            .state
            .lock()
            .data
            .keys()
            .filter(|k| matches(pattern, k))
            .cloned()
            .collect();
        keys.reverse();
        let start = usize::try_from(cursor).unwrap().min(keys.len());
        let end = (start + 2).min(keys.len());
        let next = if end >= keys.len() {
            0
        } else {
            u64::try_from(end).unwrap()
        };
        Ok(ScanPage {
            cursor: next,
            keys: keys[start..end].to_vec(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(Operation::Get)?;
        Ok(self.state.lock().data.get(key).cloned())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.check(Operation::MultiGet)?;
        let state = self.state.lock();
        Ok(keys.iter().map(|k| state.data.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.check(Operation::Set)?;
        let _ = self.state.lock().data.insert(key.to_string(), value);
        Ok(())
    }

    async fn mset(&self, entries: Vec<(String, String)>) -> Result<(), StoreError> {
        self.check(Operation::MultiSet)?;
        self.state.lock().data.extend(entries);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check(Operation::Delete)?;
        let mut state = self.state.lock();
        let removed = keys.iter().filter(|k| state.data.remove(*k).is_some()).count();
        Ok(u64::try_from(removed).unwrap())
    }

    async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
        self.check(Operation::Increment)?;
        let mut state = self.state.lock();
        state.counter += 1;
        Ok(state.counter)
    }
}
