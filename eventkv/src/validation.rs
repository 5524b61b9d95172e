//! Shared validation predicates for key segments.
//!
//! Every value that ends up inside a composite key is checked here. The key
//! delimiter `:` would shift segments and break key parsing; glob
//! metacharacters (*, ?, [, ]) would turn a literal lookup into a pattern
//! during scans.

use crate::errors::ValidationError;

/// Validation predicate: reject glob metacharacters.
pub(crate) fn no_glob_metacharacters(s: &str) -> bool {
    !s.contains(['*', '?', '[', ']'])
}

/// Validation predicate: value can be embedded in a composite key.
pub(crate) fn is_key_safe(s: &str) -> bool {
    !s.contains(':') && no_glob_metacharacters(s)
}

/// Checks a required key segment.
pub(crate) fn key_segment<'a>(
    field: &'static str,
    value: &'a str,
) -> Result<&'a str, ValidationError> {
    if value.trim().is_empty() || !is_key_safe(value) {
        return Err(ValidationError::InvalidKeySegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Checks an optional query segment; `None` and `""` both mean "any".
pub(crate) fn optional_segment<'a>(
    field: &'static str,
    value: Option<&'a str>,
) -> Result<Option<&'a str>, ValidationError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => key_segment(field, v).map(Some),
    }
}

/// Checks the aggregate id of an event, snapshot or query.
pub(crate) fn aggregate_id(value: Option<&str>) -> Result<&str, ValidationError> {
    match value {
        Some(id) if !id.trim().is_empty() => key_segment("aggregateId", id),
        _ => Err(ValidationError::MissingAggregateId),
    }
}
