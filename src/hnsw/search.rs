//! Greedy descent, layer-local beam search (including the range-search
//! variant), and the public KNN/range query entry points.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use crate::distance::Element;
use crate::error::{Result, StatusCode};
use crate::hnsw::HnswIndex;
use crate::runtime::{timed_out, TimeoutCtx};
use crate::types::{QueryParams, SearchResult};
use crate::util::OrderedF32;
use crate::Id;

impl<T: Element> HnswIndex<T> {
    /// Greedy single-best descent at one layer. `filter_candidates`
    /// is true during insertion (skip `IN_PROCESS`/`DELETE_MARK` nodes when
    /// choosing the closer neighbor) and false during query (tombstoned
    /// intermediates are tolerated; only the final layer-0 result is
    /// filtered).
    pub(crate) fn greedy_descend_layer(
        &self,
        query: &[T],
        entry: Id,
        level: usize,
        filter_candidates: bool,
    ) -> Id {
        let mut current = entry;
        let mut current_dist = self.graph.distance_to_query(self.metric, current, query);
        loop {
            let Some(node) = self.graph.node(current) else {
                break;
            };
            let neighbors: Vec<Id> = {
                let links = node.links();
                links
                    .get(level)
                    .map(|l| l.neighbors.clone())
                    .unwrap_or_default()
            };
            let mut moved = false;
            for nb in neighbors {
                if filter_candidates {
                    if let Some(n) = self.graph.node(nb) {
                        if n.is_in_process() || n.is_deleted() {
                            continue;
                        }
                    }
                }
                let d = self.graph.distance_to_query(self.metric, nb, query);
                if d < current_dist {
                    current_dist = d;
                    current = nb;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        current
    }

    /// Descend from the entry point down to layer 1 (or `target_level + 1`
    /// during insertion), returning the id to continue from.
    pub(crate) fn descend_to(
        &self,
        query: &[T],
        mut current: Id,
        from_level: usize,
        down_to: usize,
        filter_candidates: bool,
    ) -> Id {
        for level in (down_to + 1..=from_level).rev() {
            current = self.greedy_descend_layer(query, current, level, filter_candidates);
        }
        current
    }

    /// Layer-local beam search bounded to `ef` results. Tombstoned
    /// nodes are still traversed (so the graph stays connected through a
    /// hole) but are excluded from the returned candidate set whenever
    /// `has_marked_deleted` is true.
    pub(crate) fn search_layer(
        &self,
        query: &[T],
        entry: Id,
        ef: usize,
        level: usize,
        has_marked_deleted: bool,
        timeout_ctx: TimeoutCtx,
    ) -> (Vec<(f32, Id)>, StatusCode) {
        let mut visited = self.visited.acquire();
        let mut candidates: BinaryHeap<Reverse<(OrderedF32, Id)>> = BinaryHeap::new();
        let mut top: BinaryHeap<(OrderedF32, Id)> = BinaryHeap::new();

        let entry_dist = self.graph.distance_to_query(self.metric, entry, query);
        visited.mark_visited(entry);
        candidates.push(Reverse((OrderedF32(entry_dist), entry)));
        if !has_marked_deleted || !self.is_deleted(entry) {
            top.push((OrderedF32(entry_dist), entry));
        }

        let mut status = StatusCode::Ok;
        while let Some(Reverse((OrderedF32(current_dist), current_id))) = candidates.pop() {
            if timed_out(timeout_ctx) {
                status = StatusCode::TimedOut;
                break;
            }
            if let Some(&(OrderedF32(worst), _)) = top.peek() {
                if top.len() >= ef && current_dist > worst {
                    break;
                }
            }
            let Some(node) = self.graph.node(current_id) else {
                continue;
            };
            let neighbors: Vec<Id> = {
                let links = node.links();
                links
                    .get(level)
                    .map(|l| l.neighbors.clone())
                    .unwrap_or_default()
            };
            for nb in neighbors {
                if visited.is_visited(nb) {
                    continue;
                }
                let Some(nb_node) = self.graph.node(nb) else {
                    continue;
                };
                if nb_node.is_in_process() {
                    continue;
                }
                visited.mark_visited(nb);
                let dist = self.graph.distance_to_query(self.metric, nb, query);
                let worst = top.peek().map(|&(OrderedF32(d), _)| d).unwrap_or(f32::MAX);
                if top.len() < ef || dist < worst {
                    candidates.push(Reverse((OrderedF32(dist), nb)));
                    if !has_marked_deleted || !nb_node.is_deleted() {
                        top.push((OrderedF32(dist), nb));
                        if top.len() > ef {
                            top.pop();
                        }
                    }
                }
            }
        }

        let mut result: Vec<(f32, Id)> = top.into_iter().map(|(OrderedF32(d), id)| (d, id)).collect();
        result.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        (result, status)
    }

    /// Range variant of the beam step: admits into `results` iff
    /// `dist <= radius`, keeps exploring while `dist < dyn_range`, where
    /// `dyn_range = max(radius, best_distance) * (1 + epsilon)`.
    pub(crate) fn search_layer_range(
        &self,
        query: &[T],
        entry: Id,
        radius: f32,
        epsilon: f64,
        level: usize,
        has_marked_deleted: bool,
        timeout_ctx: TimeoutCtx,
    ) -> (Vec<(f32, Id)>, StatusCode) {
        let mut visited = self.visited.acquire();
        let mut candidates: BinaryHeap<Reverse<(OrderedF32, Id)>> = BinaryHeap::new();
        let mut results: Vec<(f32, Id)> = Vec::new();

        let mut best_distance = self.graph.distance_to_query(self.metric, entry, query);
        let mut dyn_range = (radius.max(best_distance) as f64 * (1.0 + epsilon)) as f32;
        visited.mark_visited(entry);
        candidates.push(Reverse((OrderedF32(best_distance), entry)));

        let mut status = StatusCode::Ok;
        while let Some(Reverse((OrderedF32(current_dist), current_id))) = candidates.pop() {
            if timed_out(timeout_ctx) {
                status = StatusCode::TimedOut;
                break;
            }
            if current_dist > dyn_range {
                break;
            }
            if current_dist <= radius && (!has_marked_deleted || !self.is_deleted(current_id)) {
                results.push((current_dist, current_id));
            }
            let Some(node) = self.graph.node(current_id) else {
                continue;
            };
            let neighbors: Vec<Id> = {
                let links = node.links();
                links
                    .get(level)
                    .map(|l| l.neighbors.clone())
                    .unwrap_or_default()
            };
            for nb in neighbors {
                if visited.is_visited(nb) {
                    continue;
                }
                let Some(nb_node) = self.graph.node(nb) else {
                    continue;
                };
                if nb_node.is_in_process() {
                    continue;
                }
                visited.mark_visited(nb);
                let dist = self.graph.distance_to_query(self.metric, nb, query);
                if dist < best_distance {
                    best_distance = dist;
                    dyn_range = (radius.max(best_distance) as f64 * (1.0 + epsilon)) as f32;
                }
                if dist < dyn_range {
                    candidates.push(Reverse((OrderedF32(dist), nb)));
                }
            }
        }

        (results, status)
    }

    pub(crate) fn is_deleted(&self, id: Id) -> bool {
        self.graph.node(id).map(|n| n.is_deleted()).unwrap_or(false)
    }

    pub(crate) fn has_marked_deleted(&self) -> bool {
        self.data.read().num_marked_deleted > 0
    }

    fn dedup_by_label(&self, ids: Vec<(f32, Id)>) -> Vec<SearchResult> {
        let data = self.data.read();
        let mut best: HashMap<crate::Label, f32> = HashMap::new();
        for (dist, id) in ids {
            if let Some(label) = data.label_map.label_for(id) {
                best.entry(label)
                    .and_modify(|d| {
                        if dist < *d {
                            *d = dist;
                        }
                    })
                    .or_insert(dist);
            }
        }
        let mut results: Vec<SearchResult> =
            best.into_iter().map(|(label, score)| SearchResult::new(label, score)).collect();
        results.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Top-K query.
    pub fn top_k(
        &self,
        query: &[T],
        k: usize,
        params: Option<QueryParams>,
    ) -> Result<(Vec<SearchResult>, StatusCode)> {
        self.check_dim(query)?;
        let mut probe = query.to_vec();
        if self.metric.needs_normalization() {
            crate::distance::normalize(&mut probe);
        }

        let (entry, max_level, ef_runtime) = {
            let data = self.data.read();
            (
                data.entrypoint,
                data.max_level.unwrap_or(0),
                params.and_then(|p| p.ef_runtime).unwrap_or(data.ef_runtime),
            )
        };
        let Some(entry) = entry else {
            return Ok((Vec::new(), StatusCode::Ok));
        };
        let timeout_ctx = params
            .and_then(|p| p.timeout_ctx)
            .unwrap_or_else(|| self.next_timeout_tick());

        let current = self.descend_to(&probe, entry, max_level, 0, false);
        let ef = ef_runtime.max(k);
        let (candidates, status) =
            self.search_layer(&probe, current, ef, 0, self.has_marked_deleted(), timeout_ctx);

        let mut results = self.dedup_by_label(candidates);
        results.truncate(k);
        Ok((results, status))
    }

    /// Range query.
    pub fn range(
        &self,
        query: &[T],
        radius: f32,
        params: Option<QueryParams>,
    ) -> Result<(Vec<SearchResult>, StatusCode)> {
        self.check_dim(query)?;
        let mut probe = query.to_vec();
        if self.metric.needs_normalization() {
            crate::distance::normalize(&mut probe);
        }

        let (entry, max_level, epsilon) = {
            let data = self.data.read();
            (
                data.entrypoint,
                data.max_level.unwrap_or(0),
                params.and_then(|p| p.epsilon).unwrap_or(data.epsilon),
            )
        };
        let Some(entry) = entry else {
            return Ok((Vec::new(), StatusCode::Ok));
        };
        let timeout_ctx = params
            .and_then(|p| p.timeout_ctx)
            .unwrap_or_else(|| self.next_timeout_tick());

        let current = self.descend_to(&probe, entry, max_level, 0, false);
        let (candidates, status) = self.search_layer_range(
            &probe,
            current,
            radius,
            epsilon,
            0,
            self.has_marked_deleted(),
            timeout_ctx,
        );

        let results = self.dedup_by_label(candidates);
        Ok((results, status))
    }
}
