//! Resumable batch KNN iterator.
//!
//! Captures the entry point on the first call, keeps a persistent visited
//! tag across the whole iteration, and drains a "spare results" heap before
//! continuing the graph scan so a caller can page through results `n` at a
//! time without restarting the search.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::distance::Element;
use crate::hnsw::HnswIndex;
use crate::types::{BatchOrder, SearchResult};
use crate::util::OrderedF32;
use crate::visited::VisitedHandle;
use crate::Id;
use crate::Label;

pub struct BatchIterator<'a, T: Element> {
    index: &'a HnswIndex<T>,
    query: Vec<T>,
    ef_runtime: usize,
    entry: Option<Id>,
    started: bool,
    depleted: bool,
    visited: Option<VisitedHandle<'a>>,
    /// Graph-scan frontier still to expand (min-heap by distance).
    candidates: BinaryHeap<Reverse<(OrderedF32, Id)>>,
    /// Current top-ef window of the scan (max-heap, worst on top, trimmed to
    /// `ef` just like `search_layer`).
    extras: BinaryHeap<(OrderedF32, Id)>,
    /// Results already resolved to labels, popped from `extras` in a batch
    /// larger than the caller asked for, waiting to be handed out.
    spare: BinaryHeap<Reverse<(OrderedF32, Label)>>,
    lower_bound: f32,
    emitted: HashSet<Label>,
}

impl<'a, T: Element> BatchIterator<'a, T> {
    pub(crate) fn new(index: &'a HnswIndex<T>, query: &[T], ef_runtime: usize) -> Self {
        Self {
            index,
            query: query.to_vec(),
            ef_runtime,
            entry: None,
            started: false,
            depleted: false,
            visited: None,
            candidates: BinaryHeap::new(),
            extras: BinaryHeap::new(),
            spare: BinaryHeap::new(),
            lower_bound: f32::MAX,
            emitted: HashSet::new(),
        }
    }

    pub fn has_next(&self) -> bool {
        !self.spare.is_empty() || !self.depleted
    }

    /// Worst distance accepted into the current scan window, for callers
    /// that want to reason about how exhaustive the iteration has been.
    pub fn lower_bound(&self) -> f32 {
        self.lower_bound
    }

    /// The entry point this iteration is anchored to, captured on the first
    /// `next()` call.
    pub fn entry_point(&self) -> Option<Id> {
        self.entry
    }

    /// Rewind to the entry point and refresh the visited tag; the caller can
    /// page through the same query again from scratch.
    pub fn reset(&mut self) {
        self.entry = None;
        self.started = false;
        self.depleted = false;
        self.visited = None;
        self.candidates.clear();
        self.extras.clear();
        self.spare.clear();
        self.lower_bound = f32::MAX;
        self.emitted.clear();
    }

    fn ensure_started(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let (entry, max_level) = {
            let data = self.index.data.read();
            (data.entrypoint, data.max_level.unwrap_or(0))
        };
        let Some(entry) = entry else {
            self.depleted = true;
            return;
        };
        let current = self.index.descend_to(&self.query, entry, max_level, 0, false);
        self.entry = Some(current);

        let mut visited = self.index.visited.acquire();
        let entry_dist = self.index.graph.distance_to_query(self.index.metric, current, &self.query);
        visited.mark_visited(current);
        self.candidates.push(Reverse((OrderedF32(entry_dist), current)));
        self.visited = Some(visited);
    }

    /// Run one bounded graph-scan round, growing `self.extras` toward `ef`
    /// entries, mirroring `search_layer`'s admission rule but checkpointing
    /// the frontier (`candidates`) for the next call instead of discarding
    /// it.
    fn scan_round(&mut self, ef: usize) {
        let Some(visited) = self.visited.as_mut() else { return };
        let has_marked_deleted = self.index.has_marked_deleted();

        while let Some(Reverse((OrderedF32(current_dist), current_id))) = self.candidates.pop() {
            if let Some(&(OrderedF32(worst), _)) = self.extras.peek() {
                if self.extras.len() >= ef && current_dist > worst {
                    self.candidates.push(Reverse((OrderedF32(current_dist), current_id)));
                    self.lower_bound = worst;
                    return;
                }
            }
            let Some(node) = self.index.graph.node(current_id) else {
                continue;
            };
            if !has_marked_deleted || !node.is_deleted() {
                self.extras.push((OrderedF32(current_dist), current_id));
                if self.extras.len() > ef {
                    self.extras.pop();
                }
            }
            let neighbors: Vec<Id> = {
                let links = node.links();
                links.get(0).map(|l| l.neighbors.clone()).unwrap_or_default()
            };
            for nb in neighbors {
                if visited.is_visited(nb) {
                    continue;
                }
                let Some(nb_node) = self.index.graph.node(nb) else {
                    continue;
                };
                if nb_node.is_in_process() {
                    continue;
                }
                visited.mark_visited(nb);
                let dist = self.index.graph.distance_to_query(self.index.metric, nb, &self.query);
                self.candidates.push(Reverse((OrderedF32(dist), nb)));
            }
        }
        // Frontier exhausted: the entry point's whole reachable component
        // has been scanned.
        if let Some(&(OrderedF32(worst), _)) = self.extras.peek() {
            self.lower_bound = worst;
        }
        self.depleted = true;
    }

    /// Drain `n` fresh label-deduplicated results out of `self.extras` into
    /// `self.spare`, resolving ids to labels and keeping the minimum
    /// distance per label.
    fn drain_extras_into_spare(&mut self) {
        let mut resolved: Vec<(f32, Label)> = Vec::new();
        while let Some((OrderedF32(dist), id)) = self.extras.pop() {
            if let Some(label) = self.index.data.read().label_map.label_for(id) {
                if !self.emitted.contains(&label) {
                    resolved.push((dist, label));
                }
            }
        }
        resolved.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        resolved.dedup_by(|a, b| a.1 == b.1);
        for (dist, label) in resolved {
            self.spare.push(Reverse((OrderedF32(dist), label)));
        }
    }

    /// Produce the next batch of up to `n` results ordered by `order`.
    /// Drains the spare heap first, then scans further into the graph as
    /// needed.
    pub fn next(&mut self, n: usize, order: BatchOrder) -> Vec<SearchResult> {
        if n == 0 {
            return Vec::new();
        }
        self.ensure_started();

        let mut out: Vec<SearchResult> = Vec::new();
        while out.len() < n {
            if let Some(Reverse((OrderedF32(dist), label))) = self.spare.pop() {
                if self.emitted.insert(label) {
                    out.push(SearchResult::new(label, dist));
                }
                continue;
            }
            if self.depleted {
                break;
            }
            let ef = self.ef_runtime.max(n);
            self.scan_round(ef);
            self.drain_extras_into_spare();
            if self.spare.is_empty() && self.depleted {
                break;
            }
        }

        match order {
            BatchOrder::ByScore => {
                out.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            }
            BatchOrder::ById => out.sort_by_key(|r| r.label),
        }
        out
    }
}

impl<T: Element> HnswIndex<T> {
    pub fn batch_iterator(&self, query: &[T]) -> crate::error::Result<BatchIterator<'_, T>> {
        self.check_dim(query)?;
        let mut probe = query.to_vec();
        if self.metric.needs_normalization() {
            crate::distance::normalize(&mut probe);
        }
        let ef_runtime = self.data.read().ef_runtime;
        Ok(BatchIterator::new(self, &probe, ef_runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HnswParams, Metric as CfgMetric};

    fn build(n: u64) -> HnswIndex<f32> {
        let params = HnswParams::new(2, CfgMetric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..n {
            index.insert(&[label as f32, label as f32], label).unwrap();
        }
        index
    }

    #[test]
    fn pages_through_all_labels_without_duplicates() {
        let index = build(20);
        let mut it = index.batch_iterator(&[0.0, 0.0]).unwrap();
        let mut seen = HashSet::new();
        while it.has_next() {
            let batch = it.next(3, BatchOrder::ByScore);
            if batch.is_empty() {
                break;
            }
            for r in &batch {
                assert!(seen.insert(r.label), "label {} emitted twice", r.label);
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn reset_allows_a_second_full_pass() {
        let index = build(5);
        let mut it = index.batch_iterator(&[0.0, 0.0]).unwrap();
        let first_pass = it.next(5, BatchOrder::ByScore);
        assert_eq!(first_pass.len(), 5);
        it.reset();
        let second_pass = it.next(5, BatchOrder::ByScore);
        assert_eq!(second_pass.len(), 5);
    }

    #[test]
    fn empty_index_has_no_next() {
        let params = HnswParams::new(2, CfgMetric::L2);
        let index = HnswIndex::<f32>::new(params).unwrap();
        let mut it = index.batch_iterator(&[0.0, 0.0]).unwrap();
        let batch = it.next(3, BatchOrder::ByScore);
        assert!(batch.is_empty());
        assert!(!it.has_next());
    }
}
