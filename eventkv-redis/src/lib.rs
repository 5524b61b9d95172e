//! Redis backend for `EventKV`
//!
//! [`RedisBackend`] implements [`KeyValueBackend`] on a [`fred`] client.
//! Scans are issued as raw `SCAN cursor MATCH pattern COUNT n` commands so
//! the store can drive the cursor itself; bulk writes use `MSET`, which
//! Redis applies atomically.
//!
//! ```rust,ignore
//! let config = StoreConfig::default().with_url("redis://localhost:6379/2");
//! let backend = RedisBackend::from_config(&config)?;
//! let mut eventstore = Eventstore::new(KeyValueStore::new(backend, &config));
//! eventstore.init().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use eventkv::backend::{KeyValueBackend, ScanPage};
use eventkv::config::StoreConfig;
use eventkv::errors::{ConnectionError, Operation, StoreError};
use fred::cmd;
use fred::prelude::*;
use std::fmt;
use tracing::{debug, info, instrument};

/// Keys Redis is asked to examine per `SCAN` call.
pub const DEFAULT_SCAN_COUNT: u32 = 100;

const RECONNECT_MIN_DELAY_MS: u32 = 100;
const RECONNECT_MAX_DELAY_MS: u32 = 30_000;
const RECONNECT_MULTIPLIER: u32 = 2;

/// Key/value backend over a Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    scan_count: u32,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("client", &self.client.id())
            .field("scan_count", &self.scan_count)
            .finish()
    }
}

impl RedisBackend {
    /// Builds an unconnected client from store configuration.
    ///
    /// `url` wins over host, port, credentials and database when set.
    /// `max_attempts` bounds reconnection after a lost connection.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConnectionError> {
        let url = config.redis_url();
        let redis_config = Config::from_url(&url)
            .map_err(|e| ConnectionError::Configuration(format!("invalid redis url: {e}")))?;
        let policy = ReconnectPolicy::new_exponential(
            config.max_attempts,
            RECONNECT_MIN_DELAY_MS,
            RECONNECT_MAX_DELAY_MS,
            RECONNECT_MULTIPLIER,
        );
        let client = Builder::from_config(redis_config)
            .set_policy(policy)
            .build()
            .map_err(|e| ConnectionError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            scan_count: DEFAULT_SCAN_COUNT,
        })
    }

    /// Sets the `COUNT` hint sent with every scan.
    #[must_use]
    pub fn with_scan_count(mut self, count: u32) -> Self {
        self.scan_count = count.max(1);
        self
    }

    /// The underlying client.
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

fn store_error(operation: Operation) -> impl FnOnce(Error) -> StoreError {
    move |e| StoreError::backend(operation, e.to_string())
}

fn parse_scan_reply(reply: Value) -> Result<ScanPage, StoreError> {
    let malformed = |detail: String| StoreError::backend(Operation::Scan, detail);

    let Value::Array(mut parts) = reply else {
        return Err(malformed(format!("unexpected SCAN reply {reply:?}")));
    };
    if parts.len() != 2 {
        return Err(malformed(format!("SCAN reply has {} parts", parts.len())));
    }
    let keys = parts.pop().unwrap_or(Value::Null);
    let cursor = parts.pop().unwrap_or(Value::Null);

    let cursor: String = cursor.convert().map_err(store_error(Operation::Scan))?;
    let cursor = cursor
        .parse::<u64>()
        .map_err(|e| malformed(format!("bad SCAN cursor {cursor}: {e}")))?;
    let keys: Vec<String> = keys.convert().map_err(store_error(Operation::Scan))?;

    Ok(ScanPage { cursor, keys })
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    #[instrument(name = "redis.connect", skip(self))]
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.client.is_connected() {
            return Ok(());
        }
        let _ = self
            .client
            .init()
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        info!("[redis.connect] connected");
        Ok(())
    }

    #[instrument(name = "redis.disconnect", skip(self))]
    async fn disconnect(&self) -> Result<(), ConnectionError> {
        if !self.client.is_connected() {
            return Ok(());
        }
        self.client
            .quit()
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        info!("[redis.disconnect] connection closed");
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        let args: Vec<Value> = vec![
            cursor.to_string().into(),
            "MATCH".into(),
            pattern.into(),
            "COUNT".into(),
            i64::from(self.scan_count).into(),
        ];
        let reply: Value = self
            .client
            .custom(cmd!("SCAN"), args)
            .await
            .map_err(store_error(Operation::Scan))?;
        let page = parse_scan_reply(reply)?;
        debug!(cursor, next = page.cursor, matched = page.keys.len(), "[redis.scan] page read");
        Ok(page)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.client
            .get(key)
            .await
            .map_err(store_error(Operation::Get))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.client
            .mget(keys.to_vec())
            .await
            .map_err(store_error(Operation::MultiGet))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _: () = self
            .client
            .set(key, value, None, None, false)
            .await
            .map_err(store_error(Operation::Set))?;
        Ok(())
    }

    async fn mset(&self, entries: Vec<(String, String)>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let _: () = self
            .client
            .mset(entries)
            .await
            .map_err(store_error(Operation::MultiSet))?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.client
            .del(keys.to_vec())
            .await
            .map_err(store_error(Operation::Delete))
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let value: i64 = self
            .client
            .incr(key)
            .await
            .map_err(store_error(Operation::Increment))?;
        u64::try_from(value).map_err(|_| {
            StoreError::backend(Operation::Increment, format!("counter went negative: {value}"))
        })
    }
}
