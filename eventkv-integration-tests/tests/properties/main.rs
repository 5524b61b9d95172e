//! Property tests for the eventstore core on the in-memory backend.

mod key_ordering;
mod pagination_equivalence;
mod revision_monotonicity;
