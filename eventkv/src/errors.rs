//! Error types for EventKV.
//!
//! Failures are split by the layer that produces them so callers can decide
//! what to retry:
//!
//! - **ValidationError**: bad input (missing aggregateId, unsafe key segment).
//!   Raised before any I/O and never worth retrying unchanged.
//! - **ConnectionError**: the backend could not be reached. `init` retries
//!   these up to the configured timeout before giving up.
//! - **StoreError**: an I/O failure during scan/get/set/increment. Surfaced to
//!   the caller unchanged; the store layer does not retry.
//! - **DispatchError**: a publisher failed to acknowledge an event. Owned by
//!   the dispatcher, which retries internally and never reports it to the
//!   committing caller.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use eventkv::errors::{EventstoreError, ValidationError};
//!
//! match eventstore.get_event_stream(query, RevisionRange::all()).await {
//!     Ok(stream) => replay(stream),
//!     Err(EventstoreError::Validation(ValidationError::MissingAggregateId)) => {
//!         // caller bug, fix the query
//!     }
//!     Err(EventstoreError::Store(err)) => retry_later(err),
//!     Err(other) => return Err(other),
//! }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when input fails validation.
///
/// Validation happens before the store is touched, so a `ValidationError`
/// guarantees nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An event, snapshot or query that requires an aggregate id had none.
    #[error("an aggregateId should be passed")]
    MissingAggregateId,

    /// A value that becomes part of a composite key is not key-safe.
    #[error("{field} must be non-empty and free of ':' and glob metacharacters (was {value:?})")]
    InvalidKeySegment {
        /// Which field carried the value
        field: &'static str,
        /// The rejected value
        value: String,
    },

    /// Events handed to the store in one batch belong to different commits.
    #[error("events of one commit must share a commit id (expected {expected}, found {found})")]
    MixedCommit {
        /// Commit id of the first event in the batch
        expected: String,
        /// The deviating commit id
        found: String,
    },

    /// A configuration value was rejected.
    #[error("invalid configuration for {field}: {reason}")]
    Config {
        /// The offending option
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors raised while establishing or tearing down the backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The backend refused or dropped the connection.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The connection settings could not be turned into a client.
    #[error("invalid connection configuration: {0}")]
    Configuration(String),

    /// Connection attempts kept failing for the whole init window.
    #[error("could not connect within {timeout:?} after {attempts} attempts: {last_error}")]
    TimedOut {
        /// The configured init window
        timeout: Duration,
        /// How many attempts were made
        attempts: u32,
        /// The error reported by the last attempt
        last_error: String,
    },
}

/// Backend operation that produced a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Cursor-based key enumeration
    Scan,
    /// Single-key read
    Get,
    /// Bulk read
    MultiGet,
    /// Single-key write
    Set,
    /// Atomic bulk write
    MultiSet,
    /// Key deletion
    Delete,
    /// Atomic counter increment
    Increment,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Get => "get",
            Self::MultiGet => "multi-get",
            Self::Set => "set",
            Self::MultiSet => "multi-set",
            Self::Delete => "delete",
            Self::Increment => "increment",
        };
        f.write_str(name)
    }
}

/// Errors raised by the key/value backend during normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend reported a failure for an operation.
    #[error("{operation} operation failed: {detail}")]
    Backend {
        /// The failing operation
        operation: Operation,
        /// Backend supplied detail
        detail: String,
    },

    /// A stored value could not be decoded.
    #[error("stored value at {key} is corrupt: {detail}")]
    Corrupt {
        /// Key holding the bad value
        key: String,
        /// Decoder message
        detail: String,
    },

    /// An operation was issued before `connect` or after `disconnect`.
    #[error("store is not connected")]
    NotConnected,
}

impl StoreError {
    /// Shorthand for [`StoreError::Backend`].
    pub fn backend(operation: Operation, detail: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            detail: detail.into(),
        }
    }
}

/// Errors raised while delivering events to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The publisher reported that it could not handle the event.
    #[error("publisher rejected event: {0}")]
    Rejected(String),

    /// Every delivery attempt for an event failed.
    #[error("event {event_id} not delivered after {attempts} attempts: {last_error}")]
    Exhausted {
        /// The undeliverable event
        event_id: String,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// Events were handed to a dispatcher that is not running.
    #[error("dispatcher is not running")]
    NotRunning,

    /// A lifecycle call was made in the wrong state.
    #[error("dispatcher cannot go from {from} to {to}")]
    InvalidState {
        /// Current state
        from: crate::dispatcher::DispatcherState,
        /// Requested state
        to: crate::dispatcher::DispatcherState,
    },
}

impl DispatchError {
    /// Shorthand used by publishers to refuse an event.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Umbrella error returned by the public eventstore API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventstoreError {
    /// Input was rejected before any I/O.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend could not be reached.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A backend operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Dispatcher lifecycle failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Type alias for eventstore results.
pub type EventstoreResult<T> = Result<T, EventstoreError>;
