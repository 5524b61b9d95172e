//! Behaviour every [`KeyValueBackend`] must show for the store to work.
//!
//! Each scenario connects a fresh backend from the factory, works in its own
//! random namespace (so it can run against a shared server) and removes its
//! keys again. Use [`backend_contract_suite`] or the
//! [`backend_contract_tests!`](crate::backend_contract_tests) macro.

use eventkv::backend::{KeyValueBackend, SCAN_START};
use eventkv::errors::{ConnectionError, StoreError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

const MAX_SCAN_CALLS: usize = 10_000;

/// A contract scenario that did not hold.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: &StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn connection_error(scenario: &'static str, error: &ConnectionError) -> Self {
        Self::new(scenario, format!("connect failed: {error}"))
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

struct Scenario<B> {
    name: &'static str,
    backend: Arc<B>,
    namespace: String,
}

impl<B: KeyValueBackend> Scenario<B> {
    async fn start(name: &'static str, backend: B) -> Result<Self, ContractTestFailure> {
        backend
            .connect()
            .await
            .map_err(|e| ContractTestFailure::connection_error(name, &e))?;
        let namespace = format!("contract-{name}-{:016x}", rand::random::<u64>());
        Ok(Self {
            name,
            backend: Arc::new(backend),
            namespace,
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.namespace)
    }

    fn step<T>(
        &self,
        operation: &'static str,
        result: Result<T, StoreError>,
    ) -> Result<T, ContractTestFailure> {
        result.map_err(|e| ContractTestFailure::store_error(self.name, operation, &e))
    }

    fn check(&self, holds: bool, detail: impl FnOnce() -> String) -> ContractTestResult {
        if holds {
            Ok(())
        } else {
            Err(ContractTestFailure::assertion(self.name, detail()))
        }
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, ContractTestFailure> {
        let mut cursor = SCAN_START;
        let mut keys = Vec::new();
        for _ in 0..MAX_SCAN_CALLS {
            let page = self.step("scan", self.backend.scan(cursor, pattern).await)?;
            keys.extend(page.keys);
            cursor = page.cursor;
            if cursor == SCAN_START {
                return Ok(keys);
            }
        }
        Err(ContractTestFailure::assertion(
            self.name,
            format!("scan of {pattern} did not terminate after {MAX_SCAN_CALLS} calls"),
        ))
    }

    async fn finish(self) -> ContractTestResult {
        let keys = self.scan_all(&format!("{}:*", self.namespace)).await?;
        if !keys.is_empty() {
            let _ = self.step("del", self.backend.del(&keys).await)?;
        }
        self.backend
            .disconnect()
            .await
            .map_err(|e| ContractTestFailure::connection_error(self.name, &e))
    }
}

/// Single-key writes are readable and missing keys read as `None`.
pub async fn test_set_get<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    let s = Scenario::start("set_get", make_backend()).await?;

    s.step("set", s.backend.set(&s.key("a"), "one".to_string()).await)?;
    s.step("set", s.backend.set(&s.key("a"), "two".to_string()).await)?;
    let value = s.step("get", s.backend.get(&s.key("a")).await)?;
    s.check(value.as_deref() == Some("two"), || {
        format!("expected overwritten value `two`, read {value:?}")
    })?;

    let missing = s.step("get", s.backend.get(&s.key("missing")).await)?;
    s.check(missing.is_none(), || format!("missing key read as {missing:?}"))?;

    s.finish().await
}

/// Bulk writes land together and bulk reads stay aligned with the requested keys.
pub async fn test_mset_mget<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    let s = Scenario::start("mset_mget", make_backend()).await?;

    let entries: Vec<(String, String)> = (0..5)
        .map(|i| (s.key(&format!("k{i}")), i.to_string()))
        .collect();
    s.step("mset", s.backend.mset(entries).await)?;

    let keys = vec![s.key("k0"), s.key("absent"), s.key("k4"), s.key("k2")];
    let values = s.step("mget", s.backend.mget(&keys).await)?;
    let expected = vec![
        Some("0".to_string()),
        None,
        Some("4".to_string()),
        Some("2".to_string()),
    ];
    s.check(values == expected, || {
        format!("expected {expected:?}, mget returned {values:?}")
    })?;

    let empty = s.step("mget", s.backend.mget(&[]).await)?;
    s.check(empty.is_empty(), || "mget of no keys returned values".to_string())?;

    s.finish().await
}

/// A complete scan returns every matching key and nothing else, across pages.
pub async fn test_scan_covers_every_match<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    let s = Scenario::start("scan_covers_every_match", make_backend()).await?;

    let wanted: HashSet<String> = (0..60).map(|i| s.key(&format!("evt:{i:03}"))).collect();
    let mut entries: Vec<(String, String)> =
        wanted.iter().map(|k| (k.clone(), String::new())).collect();
    entries.extend((0..7).map(|i| (s.key(&format!("other:{i}")), String::new())));
    s.step("mset", s.backend.mset(entries).await)?;

    let found = s.scan_all(&s.key("evt:*")).await?;
    let distinct: HashSet<String> = found.iter().cloned().collect();
    s.check(distinct == wanted, || {
        format!(
            "scan returned {} distinct keys, expected {}",
            distinct.len(),
            wanted.len()
        )
    })?;

    let single = s.scan_all(&s.key("other:?")).await?;
    s.check(single.iter().collect::<HashSet<_>>().len() == 7, || {
        format!("`?` pattern matched {single:?}")
    })?;

    let none = s.scan_all(&s.key("nothing:*")).await?;
    s.check(none.is_empty(), || format!("empty pattern matched {none:?}"))?;

    s.finish().await
}

/// Deletes report how many keys existed.
pub async fn test_del_counts_existing<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    let s = Scenario::start("del_counts_existing", make_backend()).await?;

    s.step("set", s.backend.set(&s.key("a"), "1".to_string()).await)?;
    let removed = s.step("del", s.backend.del(&[s.key("a"), s.key("b")]).await)?;
    s.check(removed == 1, || format!("expected 1 deleted key, got {removed}"))?;

    let value = s.step("get", s.backend.get(&s.key("a")).await)?;
    s.check(value.is_none(), || "deleted key is still readable".to_string())?;

    s.finish().await
}

/// Concurrent increments never hand out the same value twice.
pub async fn test_incr_is_atomic<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    const CALLERS: u64 = 32;

    let s = Scenario::start("incr_is_atomic", make_backend()).await?;
    let counter = s.key("counter");

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let backend = Arc::clone(&s.backend);
            let counter = counter.clone();
            tokio::spawn(async move { backend.incr(&counter).await })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        let result = handle.await.map_err(|e| {
            ContractTestFailure::assertion(s.name, format!("incr task failed: {e}"))
        })?;
        values.push(s.step("incr", result)?);
    }
    values.sort_unstable();

    let expected: Vec<u64> = (1..=CALLERS).collect();
    s.check(values == expected, || {
        format!("increments were not unique and gapless: {values:?}")
    })?;

    s.finish().await
}

/// Runs every scenario in order and stops at the first failure.
pub async fn backend_contract_suite<F, B>(make_backend: F) -> ContractTestResult
where
    F: Fn() -> B,
    B: KeyValueBackend,
{
    test_set_get(&make_backend).await?;
    test_mset_mget(&make_backend).await?;
    test_scan_covers_every_match(&make_backend).await?;
    test_del_counts_existing(&make_backend).await?;
    test_incr_is_atomic(&make_backend).await
}

/// Generates one `#[tokio::test]` per contract scenario.
///
/// ```ignore
/// eventkv_testing::backend_contract_tests! {
///     suite = in_memory,
///     make_backend = || InMemoryBackend::new().with_page_size(4),
/// }
/// ```
#[macro_export]
macro_rules! backend_contract_tests {
    (suite = $suite:ident, make_backend = $make_backend:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            #[allow(unused_imports)]
            use super::*;
            use $crate::contract::{
                test_del_counts_existing, test_incr_is_atomic, test_mset_mget,
                test_scan_covers_every_match, test_set_get,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn set_get_contract() {
                test_set_get($make_backend)
                    .await
                    .expect("backend contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn mset_mget_contract() {
                test_mset_mget($make_backend)
                    .await
                    .expect("backend contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn scan_covers_every_match_contract() {
                test_scan_covers_every_match($make_backend)
                    .await
                    .expect("backend contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn del_counts_existing_contract() {
                test_del_counts_existing($make_backend)
                    .await
                    .expect("backend contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn incr_is_atomic_contract() {
                test_incr_is_atomic($make_backend)
                    .await
                    .expect("backend contract failed");
            }
        }
    };
}
