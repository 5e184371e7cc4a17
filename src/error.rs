//! Error taxonomy for the index: parameter validation, resource exhaustion,
//! timeout, semantic no-op, and internal invariant breach.

use crate::Label;

/// Errors surfaced to callers. Background jobs never produce these directly;
/// a job that hits a vanished index or a raced-out repair target drops
/// silently instead (see `crate::tiered::jobs`).
#[derive(Debug, thiserror::Error)]
pub enum VecSimError {
    #[error("invalid construction parameter: {0}")]
    InvalidParams(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("label {0} not found")]
    LabelNotFound(Label),

    #[error("index capacity exhausted")]
    CapacityExhausted,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, VecSimError>;

/// Status code returned alongside query results. `OK` is the common
/// case; `TimedOut` means the caller's `timed_out` predicate fired mid-beam
/// and the returned results are a well-formed but possibly incomplete prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    TimedOut,
}
