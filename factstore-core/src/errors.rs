use thiserror::Error;

use crate::types::FactId;

/// Errors that abort an operation before any outcome can be reported.
///
/// Per the two-group taxonomy: these are permanent, never retried by the
/// caller as-is (the request itself was invalid). Transactional outcomes
/// that are a normal, expected result of a *valid* request — `Appended`,
/// `AlreadyApplied`, `AppendConditionViolated` — are reported as
/// [`crate::types::AppendResult`] values, never as a `StoreError`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more facts in the request collide with an id already stored,
    /// or with another fact's id within the same request. Carries every
    /// colliding id, not just the first.
    #[error("duplicate fact id(s): {}", ids_to_string(.0))]
    DuplicateFactId(Vec<FactId>),

    /// A streaming cursor (`After(factId)`) or a tag-query condition's
    /// `after` reference named a fact id that does not exist in this store.
    #[error("unknown fact id used as cursor: {0}")]
    InvalidStreamingCursor(FactId),

    /// A constructor-level validation failed: blank type, blank tag key,
    /// an empty query item list, or an empty tag list within an item.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The underlying transactional engine signaled an optimistic conflict
    /// on commit. The retry loop in [`crate::appender::Appender::append`]
    /// catches this variant and reruns the whole attempt; it should never
    /// escape to a caller. Read-only transactions never produce this
    /// variant, so [`crate::finder::Finder`] has no retry loop of its own.
    #[error("transaction conflict, retry")]
    Conflict,

    /// Any other error surfaced by the underlying engine (I/O, corruption,
    /// serialization). The core never attempts to interpret or mask these.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

fn ids_to_string(ids: &[FactId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, StoreError>;
