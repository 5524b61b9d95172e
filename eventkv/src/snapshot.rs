//! Snapshot types.
//!
//! A snapshot at revision `R` stands in for replaying every event of its
//! aggregate up to and including revision `R`.

use crate::errors::ValidationError;
use crate::types::{Timestamp, DEFAULT_SCOPE};
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored point-in-time aggregate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Store-assigned id
    pub id: String,
    /// Stream id; always equal to `aggregate_id`
    pub stream_id: String,
    /// Aggregate instance id
    pub aggregate_id: String,
    /// Aggregate type name
    pub aggregate: String,
    /// Bounded-context name
    pub context: String,
    /// Last revision folded into `payload`
    pub revision: u64,
    /// When the snapshot was taken
    pub commit_stamp: Timestamp,
    /// Materialized aggregate state
    pub payload: Value,
}

impl Snapshot {
    /// Checks that the snapshot can be keyed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::aggregate_id(Some(&self.aggregate_id))?;
        validation::key_segment("aggregate", &self.aggregate)?;
        validation::key_segment("context", &self.context)?;
        validation::key_segment("id", &self.id)?;
        Ok(())
    }
}

/// Caller input for creating a snapshot.
///
/// `stream_id` is accepted as an alias for `aggregate_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot {
    /// Aggregate instance id
    #[serde(default)]
    pub aggregate_id: Option<String>,
    /// Alias for `aggregate_id`
    #[serde(default)]
    pub stream_id: Option<String>,
    /// Aggregate type name, defaults to `_general`
    #[serde(default)]
    pub aggregate: Option<String>,
    /// Bounded-context name, defaults to `_general`
    #[serde(default)]
    pub context: Option<String>,
    /// Last revision folded into `data`
    pub revision: u64,
    /// Materialized aggregate state
    pub data: Value,
}

impl NewSnapshot {
    /// Snapshot input for `aggregate_id` at `revision`.
    pub fn new(aggregate_id: impl Into<String>, revision: u64, data: Value) -> Self {
        Self {
            aggregate_id: Some(aggregate_id.into()),
            revision,
            data,
            ..Self::default()
        }
    }

    /// Sets the bounded context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the aggregate type.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    /// Resolves the aggregate id, falling back to `stream_id`.
    pub fn resolved_aggregate_id(&self) -> Result<&str, ValidationError> {
        let id = self
            .aggregate_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or(self.stream_id.as_deref());
        validation::aggregate_id(id)
    }

    /// Turns the input into a storable snapshot.
    pub fn into_snapshot(
        self,
        id: String,
        commit_stamp: Timestamp,
    ) -> Result<Snapshot, ValidationError> {
        let aggregate_id = self.resolved_aggregate_id()?.to_string();
        let snapshot = Snapshot {
            id,
            stream_id: aggregate_id.clone(),
            aggregate_id,
            aggregate: scope_or_default(self.aggregate),
            context: scope_or_default(self.context),
            revision: self.revision,
            commit_stamp,
            payload: self.data,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

fn scope_or_default(value: Option<String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SCOPE.to_string())
}
