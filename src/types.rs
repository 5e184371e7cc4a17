//! Shared result and parameter types used across the HNSW core, the flat
//! buffer, and the tiered controller.

use crate::Label;

/// One scored match: a caller label paired with its distance under the
/// index's configured metric (lower is always better here — Cosine/IP are
/// already folded to `1 - <a,b>` by [`crate::distance::Metric`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub label: Label,
    pub score: f32,
}

impl SearchResult {
    pub fn new(label: Label, score: f32) -> Self {
        Self { label, score }
    }
}

/// Per-query overrides of the index's default runtime parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParams {
    pub ef_runtime: Option<usize>,
    pub epsilon: Option<f64>,
    pub timeout_ctx: Option<crate::runtime::TimeoutCtx>,
}

/// Ordering requested from the batch iterator's `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    ByScore,
    ById,
}

/// Which strategy the pre-filter heuristic picked for a
/// subset-constrained KNN query, recorded for `info()`/observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    None,
    AdHocBruteForce,
    BatchedGraphScan,
}

/// Observability snapshot returned by `info()`.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub algorithm: &'static str,
    pub dim: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub count: usize,
    pub num_marked_deleted: usize,
    pub max_level: Option<usize>,
    pub last_query_mode: QueryMode,
}
