//! Core types for EventKV.
//!
//! Values that end up inside composite keys use smart constructors so a
//! malformed prefix or collection name can never reach the key codec.

use crate::validation::is_key_safe;
use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Context/aggregate name used when none was given.
pub const DEFAULT_SCOPE: &str = "_general";

/// Namespace prefix shared by every key the store writes.
///
/// Non-empty, at most 64 characters, no `:` and no glob metacharacters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64, predicate = is_key_safe),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct KeyPrefix(String);

/// Name of a key collection (events, snapshots).
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64, predicate = is_key_safe),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CollectionName(String);

/// A UTC instant with millisecond precision.
///
/// Commit stamps are encoded as epoch milliseconds in keys, so timestamps are
/// kept at that precision to make the key and the stored body agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from a UTC `DateTime`, dropping sub-millisecond precision.
    pub fn new(datetime: DateTime<Utc>) -> Self {
        Self::from_millis(datetime.timestamp_millis()).unwrap_or(Self(datetime))
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Creates a timestamp from epoch milliseconds.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Epoch milliseconds, as encoded in keys.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The timestamp one millisecond later.
    #[must_use]
    pub fn next_millisecond(&self) -> Self {
        Self::from_millis(self.as_millis().saturating_add(1)).unwrap_or(*self)
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Filter over the (context, aggregate, aggregateId) triple.
///
/// Unset fields, and fields set to the empty string, match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Bounded-context name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Aggregate type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
    /// Aggregate instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
}

impl Query {
    /// A query matching everything.
    pub const fn all() -> Self {
        Self {
            context: None,
            aggregate: None,
            aggregate_id: None,
        }
    }

    /// A query for one aggregate instance.
    pub fn aggregate_id(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: Some(aggregate_id.into()),
            ..Self::all()
        }
    }

    /// Restricts the query to a bounded context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Restricts the query to an aggregate type.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    pub(crate) fn context_filter(&self) -> Option<&str> {
        self.context.as_deref().filter(|s| !s.is_empty())
    }

    pub(crate) fn aggregate_filter(&self) -> Option<&str> {
        self.aggregate.as_deref().filter(|s| !s.is_empty())
    }

    pub(crate) fn aggregate_id_filter(&self) -> Option<&str> {
        self.aggregate_id.as_deref().filter(|s| !s.is_empty())
    }
}

impl From<&str> for Query {
    fn from(aggregate_id: &str) -> Self {
        Self::aggregate_id(aggregate_id)
    }
}

impl From<String> for Query {
    fn from(aggregate_id: String) -> Self {
        Self::aggregate_id(aggregate_id)
    }
}

impl From<&Query> for Query {
    fn from(query: &Query) -> Self {
        query.clone()
    }
}

/// Offset window over a sorted result list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    /// Number of leading results to drop
    pub skip: usize,
    /// Maximum number of results, `None` for "to the end"
    pub limit: Option<usize>,
}

impl Paging {
    /// Everything.
    pub const fn all() -> Self {
        Self {
            skip: 0,
            limit: None,
        }
    }

    /// `limit` results after skipping `skip`.
    pub const fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }

    /// Everything after skipping `skip`.
    pub const fn skip(skip: usize) -> Self {
        Self { skip, limit: None }
    }

    /// The window directly after this one.
    ///
    /// An unbounded window already reaches the end, so its successor starts
    /// past any possible result.
    #[must_use]
    pub const fn next(self) -> Self {
        match self.limit {
            Some(limit) => Self {
                skip: self.skip.saturating_add(limit),
                limit: Some(limit),
            },
            None => Self {
                skip: usize::MAX,
                limit: None,
            },
        }
    }

    /// Index bounds of the window within `len` items.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let start = self.skip.min(len);
        let end = self
            .limit
            .map_or(len, |limit| start.saturating_add(limit).min(len));
        (start, end)
    }
}

/// Inclusive range of 1-based stream revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevisionRange {
    /// First revision to include; `0` behaves like `1`
    pub min: u64,
    /// Last revision to include, `None` for "to the end"
    pub max: Option<u64>,
}

impl RevisionRange {
    /// The complete history.
    pub const fn all() -> Self {
        Self { min: 0, max: None }
    }

    /// Revisions `min..=max`.
    pub const fn new(min: u64, max: u64) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Revisions from `min` to the end.
    pub const fn starting_at(min: u64) -> Self {
        Self { min, max: None }
    }

    /// The window of equal width directly after this one.
    ///
    /// An open-ended range already reaches the end, so its successor is empty.
    #[must_use]
    pub const fn next(self) -> Self {
        match self.max {
            Some(max) => {
                let min = if self.min == 0 { 1 } else { self.min };
                let width = if max >= min { max - min + 1 } else { 0 };
                Self {
                    min: max.saturating_add(1),
                    max: Some(max.saturating_add(width)),
                }
            }
            None => Self {
                min: u64::MAX,
                max: None,
            },
        }
    }

    /// Index bounds within a revision-ordered list of `len` events.
    ///
    /// Revision `r` sits at index `r - 1`.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let start = usize::try_from(self.min.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .min(len);
        let end = self.max.map_or(len, |max| {
            usize::try_from(max).unwrap_or(usize::MAX).min(len)
        });
        (start, end.max(start))
    }
}
