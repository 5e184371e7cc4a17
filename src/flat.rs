//! Flat (brute-force) buffer.
//!
//! A simple block-allocated append index used as the tiered controller's
//! immediate write-visible tier: every `add` is visible to `search` the
//! instant it returns, well before the background worker pool promotes the
//! vector into the HNSW graph.

use parking_lot::RwLock;

use crate::distance::{Element, Metric};
use crate::label_map::LabelMap;
use crate::types::SearchResult;
use crate::{Id, Label};

struct FlatInner<T: Element> {
    dim: usize,
    block_size: usize,
    blocks: Vec<Vec<T>>,
    count: usize,
    label_map: LabelMap,
}

impl<T: Element> FlatInner<T> {
    fn block_slot(&self, id: Id) -> (usize, usize) {
        let id = id as usize;
        (id / self.block_size, (id % self.block_size) * self.dim)
    }

    fn vector_slice(&self, id: Id) -> &[T] {
        let (block, offset) = self.block_slot(id);
        &self.blocks[block][offset..offset + self.dim]
    }

    fn vector_slice_mut(&mut self, id: Id) -> &mut [T] {
        let (block, offset) = self.block_slot(id);
        &mut self.blocks[block][offset..offset + self.dim]
    }

    fn ensure_block_for(&mut self, id: Id) {
        let (block, _) = self.block_slot(id);
        while self.blocks.len() <= block {
            self.blocks.push(vec![T::default(); self.block_size * self.dim]);
        }
    }

    fn release_empty_tail_blocks(&mut self) {
        while !self.blocks.is_empty() && (self.blocks.len() - 1) * self.block_size >= self.count {
            self.blocks.pop();
        }
    }

    /// Swap-with-last removal mirroring the graph arena's reclamation:
    /// move the last live id's blob into the freed slot and rename its label
    /// map entry accordingly.
    fn remove_and_swap(&mut self, id: Id) {
        let last = self.count as Id - 1;
        if id != last {
            let tmp: Vec<T> = self.vector_slice(last).to_vec();
            self.vector_slice_mut(id).copy_from_slice(&tmp);
            self.label_map.rename_id(last, id);
        }
        self.count -= 1;
        self.release_empty_tail_blocks();
    }
}

/// A block-allocated brute-force index with the same label semantics as the
/// HNSW tier (SINGLE or MULTI).
pub struct FlatIndex<T: Element> {
    metric: Metric,
    inner: RwLock<FlatInner<T>>,
}

impl<T: Element> FlatIndex<T> {
    pub fn new(dim: usize, metric: Metric, multi: crate::config::MultiMode, block_size: usize) -> Self {
        let label_map = match multi {
            crate::config::MultiMode::Single => LabelMap::new_single(),
            crate::config::MultiMode::Multi => LabelMap::new_multi(),
        };
        Self {
            metric,
            inner: RwLock::new(FlatInner {
                dim,
                block_size: block_size.max(1),
                blocks: Vec::new(),
                count: 0,
                label_map,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `vector` under `label`, immediately queryable. Returns the
    /// freshly allocated flat-local id.
    pub fn insert(&self, vector: &[T], label: Label) -> Id {
        let mut inner = self.inner.write();
        let id = inner.count as Id;
        inner.ensure_block_for(id);
        inner.vector_slice_mut(id).copy_from_slice(vector);
        inner.count += 1;
        inner.label_map.insert(label, id);
        id
    }

    /// Remove every id owned by `label`, compacting each hole with the
    /// current last element. Returns the count removed.
    pub fn delete(&self, label: Label) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.label_map.remove_label(label);
        let mut ids = ids;
        // Removing highest ids first keeps the "last" reference stable
        // across repeated swaps within this call.
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in &ids {
            inner.remove_and_swap(*id);
        }
        ids.len()
    }

    /// Retract exactly one id's label mapping, used by the tiered
    /// controller once that id has been promoted into HNSW. Deliberately
    /// leaves a hole rather than
    /// compacting with swap-with-last: other in-flight `InsertJob`s capture
    /// a flat id by value, and renaming ids out from under them would stale
    /// those captures. The hole is simply invisible to `search` (which only
    /// considers ids with a live label mapping); it's only reclaimed for
    /// real by a user-initiated `delete`, which isn't racing a promotion.
    pub fn retire(&self, id: Id) {
        let mut inner = self.inner.write();
        if (id as usize) >= inner.count {
            return;
        }
        inner.label_map.remove_id(id);
    }

    /// Copy out the vector stored at `id`, or `None` if out of range.
    pub fn vector(&self, id: Id) -> Option<Vec<T>> {
        let inner = self.inner.read();
        if (id as usize) >= inner.count {
            return None;
        }
        Some(inner.vector_slice(id).to_vec())
    }

    /// Exact linear scan for the `k` nearest, de-duplicated by label keeping
    /// the minimum distance per label in MULTI mode.
    pub fn search(&self, query: &[T], k: usize) -> Vec<SearchResult> {
        let inner = self.inner.read();
        let mut best: std::collections::HashMap<Label, f32> = std::collections::HashMap::new();
        for id in 0..inner.count as Id {
            let dist = self.metric.distance(inner.vector_slice(id), query);
            if let Some(label) = inner.label_map.label_for(id) {
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
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiMode;

    #[test]
    fn insert_and_search_returns_nearest_first() {
        let flat = FlatIndex::<f32>::new(2, Metric::L2, MultiMode::Single, 4);
        flat.insert(&[0.0, 0.0], 1);
        flat.insert(&[5.0, 5.0], 2);
        let results = flat.search(&[0.1, 0.1], 2);
        assert_eq!(results[0].label, 1);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn delete_compacts_and_hides_label() {
        let flat = FlatIndex::<f32>::new(2, Metric::L2, MultiMode::Single, 4);
        flat.insert(&[0.0, 0.0], 1);
        flat.insert(&[1.0, 1.0], 2);
        flat.insert(&[2.0, 2.0], 3);
        let removed = flat.delete(2);
        assert_eq!(removed, 1);
        assert_eq!(flat.len(), 2);
        let results = flat.search(&[1.0, 1.0], 5);
        assert!(results.iter().all(|r| r.label != 2));
    }

    #[test]
    fn multi_mode_dedups_to_minimum_distance() {
        let flat = FlatIndex::<f32>::new(2, Metric::L2, MultiMode::Multi, 4);
        flat.insert(&[0.0, 0.0], 9);
        flat.insert(&[10.0, 10.0], 9);
        let results = flat.search(&[0.0, 0.0], 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, 9);
        assert_eq!(results[0].score, 0.0);
    }
}
