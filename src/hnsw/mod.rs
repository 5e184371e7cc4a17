//! HNSW core.
//!
//! Construction, layer-local beam search, the neighbor-selection heuristic,
//! deletion/repair, the batch iterator, and KNN/range queries all live under
//! this module, split the way the algorithm's phases are split: `heuristic`,
//! `search`, `insert`, `delete`, `iterator`, and `prefilter` (the
//! subset pre-filter heuristic).

mod delete;
mod heuristic;
mod insert;
mod iterator;
mod prefilter;
mod search;

pub use delete::DeleteMode;
pub use heuristic::{select_neighbors, HeuristicResult, ScoredId};
pub use iterator::BatchIterator;
pub use prefilter::decide_query_mode;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::HnswParams;
use crate::distance::{Element, Metric};
use crate::error::{Result, VecSimError};
use crate::graph::GraphStorage;
use crate::label_map::LabelMap;
use crate::types::QueryMode;
use crate::visited::VisitedPool;
use crate::Id;

/// Fields guarded by the shared/exclusive index-data lock:
/// entry point, max level, runtime-tunable beam widths, the tombstone
/// counter, and the label map (whose resize events are covered by the same
/// guard).
pub(crate) struct IndexData {
    pub entrypoint: Option<Id>,
    pub max_level: Option<usize>,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub epsilon: f64,
    pub num_marked_deleted: usize,
    pub label_map: LabelMap,
}

/// One level's outgoing/incoming edge sets, as returned by
/// [`HnswIndex::info_iterator`].
#[derive(Debug, Clone)]
pub struct LevelSnapshot {
    pub neighbors: Vec<Id>,
    pub incoming: Vec<Id>,
}

/// A point-in-time read of one node's graph state, as returned by
/// `info_iterator`.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: Id,
    pub top_level: usize,
    pub is_deleted: bool,
    pub is_in_process: bool,
    pub levels: Vec<LevelSnapshot>,
}

/// A concurrent HNSW index over elements of type `T`.
pub struct HnswIndex<T: Element> {
    pub(crate) dim: usize,
    pub(crate) metric: Metric,
    pub(crate) m: usize,
    pub(crate) level_multiplier: f64,
    pub(crate) data: RwLock<IndexData>,
    pub(crate) graph: GraphStorage<T>,
    pub(crate) visited: VisitedPool,
    pub(crate) rng: Mutex<StdRng>,
    pub(crate) last_query_mode: Mutex<QueryMode>,
    pub(crate) timeout_counter: AtomicU64,
}

impl<T: Element> HnswIndex<T> {
    pub fn new(params: HnswParams) -> Result<Self> {
        params.validate()?;
        let label_map = match params.multi {
            crate::config::MultiMode::Single => LabelMap::new_single(),
            crate::config::MultiMode::Multi => LabelMap::new_multi(),
        };
        Ok(Self {
            dim: params.dim,
            metric: metric_from_config(params.metric),
            m: params.m,
            level_multiplier: params.level_multiplier(),
            data: RwLock::new(IndexData {
                entrypoint: None,
                max_level: None,
                ef_construction: params.ef_construction,
                ef_runtime: params.ef_runtime,
                epsilon: params.epsilon,
                num_marked_deleted: 0,
                label_map,
            }),
            graph: GraphStorage::new(params.dim, params.block_size.max(1)),
            visited: VisitedPool::new(params.initial_capacity.max(params.block_size)),
            rng: Mutex::new(StdRng::seed_from_u64(params.random_seed)),
            last_query_mode: Mutex::new(QueryMode::None),
            timeout_counter: AtomicU64::new(0),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn info(&self) -> crate::types::IndexInfo {
        let data = self.data.read();
        crate::types::IndexInfo {
            algorithm: "hnsw",
            dim: self.dim,
            m: self.m,
            ef_construction: data.ef_construction,
            ef_runtime: data.ef_runtime,
            count: self.graph.len(),
            num_marked_deleted: data.num_marked_deleted,
            max_level: data.max_level,
            last_query_mode: *self.last_query_mode.lock(),
        }
    }

    /// Current entry point id, if the index is non-empty.
    pub fn entrypoint(&self) -> Option<Id> {
        self.data.read().entrypoint
    }

    /// Label owning `id`, if any.
    pub fn label_of(&self, id: Id) -> Option<crate::Label> {
        self.data.read().label_map.label_for(id)
    }

    /// Per-node observability snapshot: every live id's level, flags, and
    /// per-level neighbor/incoming sets. Not
    /// cheap -- intended for diagnostics and tests, not the hot query path.
    pub fn info_iterator(&self) -> Vec<NodeSnapshot> {
        (0..self.graph.len() as Id)
            .filter_map(|id| {
                let node = self.graph.node(id)?;
                let levels = node
                    .links()
                    .iter()
                    .map(|l| LevelSnapshot {
                        neighbors: l.neighbors.clone(),
                        incoming: l.incoming.iter().copied().collect(),
                    })
                    .collect();
                Some(NodeSnapshot {
                    id,
                    top_level: node.top_level,
                    is_deleted: node.is_deleted(),
                    is_in_process: node.is_in_process(),
                    levels,
                })
            })
            .collect()
    }

    /// Direct metric between a label's stored vector(s) and a probe. In
    /// MULTI mode this returns the minimum distance across the label's ids.
    pub fn distance_from(&self, label: crate::Label, query: &[T]) -> Result<f32> {
        self.check_dim(query)?;
        let ids = self.data.read().label_map.ids_for(label);
        if ids.is_empty() {
            return Err(VecSimError::LabelNotFound(label));
        }
        let best = ids
            .into_iter()
            .map(|id| self.graph.distance_to_query(self.metric, id, query))
            .fold(f32::MAX, f32::min);
        Ok(best)
    }

    pub(crate) fn check_dim(&self, v: &[T]) -> Result<()> {
        if v.len() != self.dim {
            return Err(VecSimError::DimensionMismatch {
                expected: self.dim,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Draw the top level for a newly inserted node from an exponential
    /// distribution with mean `1/ln(M)`.
    pub(crate) fn sample_level(&self) -> usize {
        let uniform: f64 = {
            let mut rng = self.rng.lock();
            rand::Rng::random_range(&mut *rng, f64::MIN_POSITIVE..1.0)
        };
        let level = (-uniform.ln() * self.level_multiplier).floor();
        level.max(0.0) as usize
    }

    pub(crate) fn next_timeout_tick(&self) -> crate::runtime::TimeoutCtx {
        self.timeout_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn normalize_if_needed(&self, v: &mut [T]) {
        if self.metric.needs_normalization() {
            crate::distance::normalize(v);
        }
    }
}

fn metric_from_config(m: crate::config::Metric) -> Metric {
    match m {
        crate::config::Metric::L2 => Metric::L2,
        crate::config::Metric::Ip => Metric::Ip,
        crate::config::Metric::Cosine => Metric::Cosine,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HnswParams, Metric as CfgMetric};

    #[test]
    fn construction_rejects_bad_params() {
        let params = HnswParams::new(4, CfgMetric::L2).with_m(1);
        assert!(HnswIndex::<f32>::new(params).is_err());
    }

    #[test]
    fn fresh_index_is_empty() {
        let params = HnswParams::new(4, CfgMetric::L2);
        let index = HnswIndex::<f32>::new(params).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn distance_from_unknown_label_errors() {
        let params = HnswParams::new(4, CfgMetric::L2);
        let index = HnswIndex::<f32>::new(params).unwrap();
        let err = index.distance_from(99, &[0.0, 0.0, 0.0, 0.0]);
        assert!(err.is_err());
    }
}
