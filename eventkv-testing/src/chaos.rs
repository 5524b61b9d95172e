//! Fault injection for key/value backends.
//!
//! [`ChaosBackend`] wraps any [`KeyValueBackend`] and fails operations either
//! at random (seedable for reproducible runs) or on demand, so tests can
//! exercise the store's error paths and the eventstore's init tolerance.
//!
//! ```ignore
//! use eventkv_testing::chaos::{ChaosBackendExt, ChaosConfig};
//!
//! let backend = InMemoryBackend::new().with_chaos(
//!     ChaosConfig::deterministic()
//!         .with_failing_connects(2)
//!         .with_failing_operation(Operation::MultiSet),
//! );
//! ```

use async_trait::async_trait;
use eventkv::backend::{KeyValueBackend, ScanPage};
use eventkv::errors::{ConnectionError, Operation, StoreError};
use nutype::nutype;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Probability value for chaos injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// ```ignore
/// let config = ChaosConfig::deterministic()
///     .with_failure_probability(Probability::try_new(0.5).unwrap());
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// What a [`ChaosBackend`] should break.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Option<Probability>,
    failing_connects: u32,
    failing_operations: HashSet<Operation>,
}

impl ChaosConfig {
    /// A configuration with a fixed seed, for reproducible random failures.
    pub fn deterministic() -> Self {
        Self::seeded(0)
    }

    /// A configuration with the given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            deterministic_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Fails every data operation with this probability.
    #[must_use]
    pub const fn with_failure_probability(mut self, probability: Probability) -> Self {
        self.failure_probability = Some(probability);
        self
    }

    /// Refuses the next `count` connection attempts.
    #[must_use]
    pub const fn with_failing_connects(mut self, count: u32) -> Self {
        self.failing_connects = count;
        self
    }

    /// Always fails `operation` until healed.
    #[must_use]
    pub fn with_failing_operation(mut self, operation: Operation) -> Self {
        let _ = self.failing_operations.insert(operation);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: None,
            failing_connects: 0,
            failing_operations: HashSet::new(),
        }
    }
}

/// Adds [`with_chaos`](ChaosBackendExt::with_chaos) to every backend.
pub trait ChaosBackendExt: Sized {
    /// Wraps the backend in a [`ChaosBackend`].
    fn with_chaos(self, config: ChaosConfig) -> ChaosBackend<Self>;
}

impl<B: KeyValueBackend> ChaosBackendExt for B {
    fn with_chaos(self, config: ChaosConfig) -> ChaosBackend<Self> {
        ChaosBackend::new(self, config)
    }
}

/// Backend wrapper that injects failures.
#[derive(Debug)]
pub struct ChaosBackend<B> {
    backend: B,
    failure_probability: Option<Probability>,
    rng: Mutex<StdRng>,
    failing_connects: AtomicU32,
    failing_operations: Mutex<HashSet<Operation>>,
    connect_attempts: AtomicU32,
    injected: AtomicU64,
}

impl<B> ChaosBackend<B> {
    /// Wraps `backend`.
    pub fn new(backend: B, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            backend,
            failure_probability: config.failure_probability,
            rng: Mutex::new(rng),
            failing_connects: AtomicU32::new(config.failing_connects),
            failing_operations: Mutex::new(config.failing_operations),
            connect_attempts: AtomicU32::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// The wrapped backend.
    pub const fn inner(&self) -> &B {
        &self.backend
    }

    /// Starts failing `operation`.
    pub fn fail_operation(&self, operation: Operation) {
        let _ = self.failing_operations().insert(operation);
    }

    /// Refuses the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Stops every on-demand failure. Random failures keep their probability.
    pub fn heal(&self) {
        self.failing_operations().clear();
        self.failing_connects.store(0, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Failures injected so far.
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn failing_operations(&self) -> MutexGuard<'_, HashSet<Operation>> {
        self.failing_operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn should_inject(&self) -> bool {
        let Some(probability) = self.failure_probability else {
            return false;
        };
        let probability: f32 = probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_bool(f64::from(probability))
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        if self.failing_operations().contains(&operation) || self.should_inject() {
            let _ = self.injected.fetch_add(1, Ordering::SeqCst);
            debug!(%operation, "[chaos.check] injecting failure");
            return Err(StoreError::backend(operation, "chaos: injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl<B: KeyValueBackend> KeyValueBackend for ChaosBackend<B> {
    async fn connect(&self) -> Result<(), ConnectionError> {
        let _ = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            let _ = self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(ConnectionError::Unreachable(
                "chaos: connection refused".to_string(),
            ));
        }
        self.backend.connect().await
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.backend.disconnect().await
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        self.check(Operation::Scan)?;
        self.backend.scan(cursor, pattern).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(Operation::Get)?;
        self.backend.get(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.check(Operation::MultiGet)?;
        self.backend.mget(keys).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.check(Operation::Set)?;
        self.backend.set(key, value).await
    }

    async fn mset(&self, entries: Vec<(String, String)>) -> Result<(), StoreError> {
        self.check(Operation::MultiSet)?;
        self.backend.mset(entries).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check(Operation::Delete)?;
        self.backend.del(keys).await
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        self.check(Operation::Increment)?;
        self.backend.incr(key).await
    }
}
