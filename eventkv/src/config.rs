//! Store configuration.
//!
//! [`StoreConfig`] accepts both snake_case field names and the camelCase
//! option names used by existing deployments (`eventsCollectionName`,
//! `snapshotsCollectionName`, `maxAttempts`), so a JSON or TOML options
//! document can be deserialized directly.

use crate::errors::ValidationError;
use crate::types::{CollectionName, KeyPrefix};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_PREFIX: &str = "eventstore";
const DEFAULT_EVENTS: &str = "events";
const DEFAULT_SNAPSHOTS: &str = "snapshots";

/// Connection and keyspace settings for a key/value backed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend host (default: localhost)
    pub host: String,
    /// Backend port (default: 6379)
    pub port: u16,
    /// Namespace prefix of every key (default: eventstore)
    pub prefix: KeyPrefix,
    /// Name of the event collection (default: events)
    #[serde(alias = "eventsCollectionName")]
    pub events_collection_name: CollectionName,
    /// Name of the snapshot collection (default: snapshots)
    #[serde(alias = "snapshotsCollectionName")]
    pub snapshots_collection_name: CollectionName,
    /// Reconnection attempts the backend client makes after a dropped connection (default: 1)
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
    /// Connection string overriding host, port, credentials and db
    pub url: Option<String>,
    /// Logical database index
    pub db: Option<u8>,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Window in milliseconds during which `init` keeps retrying the connection (default: 0)
    pub timeout: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: KeyPrefix::try_new(DEFAULT_PREFIX).expect("default prefix is always valid"),
            events_collection_name: CollectionName::try_new(DEFAULT_EVENTS)
                .expect("default events collection name is always valid"),
            snapshots_collection_name: CollectionName::try_new(DEFAULT_SNAPSHOTS)
                .expect("default snapshots collection name is always valid"),
            max_attempts: 1,
            url: None,
            db: None,
            username: None,
            password: None,
            timeout: 0,
        }
    }
}

impl StoreConfig {
    /// Configuration with every option at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets host and port.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the key namespace.
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self, ValidationError> {
        self.prefix = KeyPrefix::try_new(prefix).map_err(|e| ValidationError::Config {
            field: "prefix",
            reason: e.to_string(),
        })?;
        Ok(self)
    }

    /// Sets the event collection name.
    pub fn with_events_collection(mut self, name: &str) -> Result<Self, ValidationError> {
        self.events_collection_name =
            CollectionName::try_new(name).map_err(|e| ValidationError::Config {
                field: "eventsCollectionName",
                reason: e.to_string(),
            })?;
        Ok(self)
    }

    /// Sets the snapshot collection name.
    pub fn with_snapshots_collection(mut self, name: &str) -> Result<Self, ValidationError> {
        self.snapshots_collection_name =
            CollectionName::try_new(name).map_err(|e| ValidationError::Config {
                field: "snapshotsCollectionName",
                reason: e.to_string(),
            })?;
        Ok(self)
    }

    /// Sets a connection string that overrides host, port, credentials and db.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Selects a logical database.
    #[must_use]
    pub const fn with_db(mut self, db: u8) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Sets the backend reconnection attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the init retry window.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The init retry window.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Connection string for a Redis-protocol backend.
    ///
    /// Returns `url` verbatim when set, otherwise assembles
    /// `redis://[user[:password]@]host:port[/db]`.
    pub fn redis_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (None, Some(password)) => format!(":{password}@"),
            (Some(user), None) => format!("{user}@"),
            (None, None) => String::new(),
        };
        let db = self.db.map(|db| format!("/{db}")).unwrap_or_default();
        format!("redis://{auth}{}:{}{db}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6379);
        assert_eq!(config.prefix.as_ref(), "eventstore");
        assert_eq!(config.events_collection_name.as_ref(), "events");
        assert_eq!(config.snapshots_collection_name.as_ref(), "snapshots");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.timeout(), Duration::ZERO);
        assert_eq!(config.redis_url(), "redis://localhost:6379");
    }

    #[test]
    fn camel_case_option_names_are_accepted() {
        let config: StoreConfig = serde_json::from_value(serde_json::json!({
            "prefix": "shop",
            "eventsCollectionName": "commits",
            "snapshotsCollectionName": "snaps",
            "maxAttempts": 5,
            "timeout": 1500,
        }))
        .unwrap();

        assert_eq!(config.prefix.as_ref(), "shop");
        assert_eq!(config.events_collection_name.as_ref(), "commits");
        assert_eq!(config.snapshots_collection_name.as_ref(), "snaps");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn invalid_prefix_is_rejected_when_deserializing() {
        let result: Result<StoreConfig, _> =
            serde_json::from_value(serde_json::json!({"prefix": "a:b"}));
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_unsafe_names() {
        let err = StoreConfig::new().with_prefix("ev*").unwrap_err();
        assert!(matches!(err, ValidationError::Config { field: "prefix", .. }));
    }

    #[test]
    fn url_overrides_address_and_auth() {
        let config = StoreConfig::new()
            .with_address("cache", 7000)
            .with_db(2)
            .with_credentials(None, "secret");
        assert_eq!(config.redis_url(), "redis://:secret@cache:7000/2");

        let config = config.with_url("redis://other:6380/1");
        assert_eq!(config.redis_url(), "redis://other:6380/1");
    }
}
