//! Deletion: marking, entry-point replacement, single-node repair, and the
//! swap-with-last reclamation that keeps ids a contiguous prefix.

use crate::distance::Element;
use crate::hnsw::{select_neighbors, HnswIndex, IndexData};
use crate::Id;

/// Marked deletion defers physical reclamation to the tiered job pipeline;
/// in-place deletion repairs and reclaims synchronously on the calling
/// thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Marked,
    InPlace,
}

impl<T: Element> HnswIndex<T> {
    /// Set `DELETE_MARK`, replace the entry point if `id` held it, and
    /// return every `(affected_node, level)` pair that now needs repair --
    /// every outgoing and incoming neighbor of the tombstone, at each level
    /// it participated in.
    pub(crate) fn mark_deleted_internal(&self, id: Id) -> Vec<(Id, usize)> {
        let Some(node) = self.graph.node(id) else { return Vec::new() };
        node.mark_deleted();
        tracing::debug!(id, "marked node deleted");

        let affected: Vec<(Id, usize)> = {
            let guard = node.links();
            guard
                .iter()
                .enumerate()
                .flat_map(|(level, links)| {
                    links
                        .neighbors
                        .iter()
                        .copied()
                        .chain(links.incoming.iter().copied())
                        .map(move |n| (n, level))
                })
                .collect()
        };

        {
            let mut data = self.data.write();
            if data.entrypoint == Some(id) {
                self.replace_entry_point(&mut data, id);
            }
            data.num_marked_deleted += 1;
        }

        affected
    }

    /// The entry point must never be a deleted node. Scan the current top
    /// level for a live replacement, descending a level at a time until one
    /// is found or the graph is empty of live nodes.
    fn replace_entry_point(&self, data: &mut IndexData, deleted: Id) {
        let count = self.graph.len() as Id;
        let mut level = data.max_level.unwrap_or(0);
        loop {
            let replacement = (0..count).find(|&candidate| {
                candidate != deleted
                    && self
                        .graph
                        .node(candidate)
                        .map(|n| !n.is_deleted() && n.top_level >= level)
                        .unwrap_or(false)
            });
            if let Some(found) = replacement {
                tracing::debug!(deleted, replacement = found, level, "replaced entry point");
                data.entrypoint = Some(found);
                data.max_level = Some(level);
                return;
            }
            if level == 0 {
                tracing::warn!(deleted, "no live replacement entry point; index is now empty");
                data.entrypoint = None;
                data.max_level = None;
                return;
            }
            level -= 1;
        }
    }

    /// Repair the neighborhood of a single live node `n` at `level` after
    /// one or more of its neighbors were tombstoned. Safe to call on a node
    /// with no deleted neighbors (no-op).
    pub(crate) fn repair_node_connections(&self, n: Id, level: usize) {
        let Some(node) = self.graph.node(n) else { return };
        if node.is_deleted() {
            return;
        }

        let original: Vec<Id> = {
            let guard = node.links();
            guard.get(level).map(|l| l.neighbors.clone()).unwrap_or_default()
        };

        let mut live: Vec<Id> = Vec::new();
        let mut deleted_neighbors: Vec<Id> = Vec::new();
        for &nb in &original {
            match self.graph.node(nb) {
                Some(nb_node) if nb_node.is_deleted() => deleted_neighbors.push(nb),
                Some(nb_node) if !nb_node.is_in_process() => live.push(nb),
                _ => {}
            }
        }
        if deleted_neighbors.is_empty() {
            return;
        }
        tracing::debug!(n, level, holes = deleted_neighbors.len(), "repairing node connections");

        let mut candidate_set: Vec<Id> = live.clone();
        for &dn in &deleted_neighbors {
            if let Some(dn_node) = self.graph.node(dn) {
                let dn_neighbors: Vec<Id> = {
                    let guard = dn_node.links();
                    guard.get(level).map(|l| l.neighbors.clone()).unwrap_or_default()
                };
                for cand in dn_neighbors {
                    if cand != n && !candidate_set.contains(&cand) {
                        candidate_set.push(cand);
                    }
                }
            }
        }

        let cap = self.m_max(level);
        let new_outgoing: Vec<Id> = if candidate_set.len() > cap {
            let scored: Vec<(f32, Id)> = candidate_set
                .iter()
                .map(|&c| (self.graph.distance(self.metric, n, c), c))
                .collect();
            select_neighbors(&self.graph, self.metric, n, scored, cap)
                .selected
                .into_iter()
                .map(|(_, id)| id)
                .collect()
        } else {
            candidate_set
        };

        let dropped: Vec<Id> = original.iter().copied().filter(|id| !new_outgoing.contains(id)).collect();
        let added: Vec<Id> = new_outgoing.iter().copied().filter(|id| !original.contains(id)).collect();

        let mut lock_ids = dropped.clone();
        lock_ids.extend(added.iter().copied());
        lock_ids.push(n);
        let (ids, handles) = self.sorted_node_handles(lock_ids);
        let mut guards: Vec<_> = handles.iter().map(|h| h.links()).collect();
        let idx_of = |id: Id| ids.iter().position(|&x| x == id);

        for &x in &dropped {
            let Some(x_idx) = idx_of(x) else { continue };
            let x_has_reciprocal =
                guards[x_idx].get(level).map(|l| l.neighbors.contains(&n)).unwrap_or(false);
            if x_has_reciprocal {
                if let Some(n_idx) = idx_of(n)
                    && let Some(l) = guards[n_idx].get_mut(level)
                {
                    l.incoming.insert(x);
                }
            } else if let Some(l) = guards[x_idx].get_mut(level) {
                l.incoming.remove(&n);
            }
        }

        for &x in &added {
            let Some(x_idx) = idx_of(x) else { continue };
            let x_points_back =
                guards[x_idx].get(level).map(|l| l.neighbors.contains(&n)).unwrap_or(false);
            if !x_points_back
                && let Some(l) = guards[x_idx].get_mut(level)
            {
                l.incoming.insert(n);
            }
        }

        if let Some(n_idx) = idx_of(n)
            && let Some(l) = guards[n_idx].get_mut(level)
        {
            l.neighbors = new_outgoing;
        }
    }

    /// Delete every id owned by `label`. `Marked` only sets the tombstone
    /// and returns the affected neighbors for the caller (the tiered
    /// controller) to enqueue repair jobs for; `InPlace` repairs and
    /// reclaims synchronously before returning.
    pub fn delete(&self, label: crate::Label, mode: DeleteMode) -> usize {
        let ids = self.data.write().label_map.remove_label(label);
        let count = ids.len();
        for id in ids {
            let affected = self.mark_deleted_internal(id);
            if mode == DeleteMode::InPlace {
                for (n, level) in affected {
                    self.repair_node_connections(n, level);
                }
                self.swap_delete(id);
            }
        }
        count
    }

    /// Same as `delete` but returns the count of ids removed plus, per
    /// tombstoned id, the `(node, level)` repair obligations that id's
    /// removal created -- instead of servicing them inline, for a caller
    /// that owns its own job queue (tiered controller). Keeping each
    /// tombstone's obligations grouped separately (rather than flattened
    /// together) is what lets the caller key its pending-repair bookkeeping,
    /// and the eventual `SwapDeleteJob`, by the tombstone itself rather than
    /// by one of its repaired neighbors.
    pub(crate) fn mark_deleted_for_label(
        &self,
        label: crate::Label,
    ) -> (usize, Vec<(Id, Vec<(Id, usize)>)>) {
        let ids = self.data.write().label_map.remove_label(label);
        let count = ids.len();
        let affected = ids.into_iter().map(|id| (id, self.mark_deleted_internal(id))).collect();
        (count, affected)
    }

    /// Physically reclaim `id` via swap-with-last, rewriting every
    /// edge, incoming-set entry, label-map entry, and the entry point if it
    /// pointed at the moved id. Runs entirely under the exclusive
    /// index-data lock, matching the tiered controller's `SwapDeleteJob`
    /// contract of locking the whole operation.
    pub(crate) fn swap_delete(&self, id: Id) {
        let mut data = self.data.write();
        if let Some(moved_from) = self.graph.remove_and_swap(id) {
            self.rename_references(moved_from, id);
            data.label_map.rename_id(moved_from, id);
            if data.entrypoint == Some(moved_from) {
                data.entrypoint = Some(id);
            }
            tracing::debug!(id, moved_from, "swap-deleted node");
        } else {
            tracing::debug!(id, "swap-deleted last node");
        }
        data.num_marked_deleted = data.num_marked_deleted.saturating_sub(1);
    }

    /// Rewrite every edge and incoming-set entry that referenced `old` to
    /// reference `new` instead. `new` is the slot `old`'s node entry now
    /// lives at (same `Arc`, swapped in place by `GraphStorage`).
    fn rename_references(&self, old: Id, new: Id) {
        let Some(node) = self.graph.node(new) else { return };
        let per_level = node.links().clone();
        for (level, links) in per_level.iter().enumerate() {
            for &nb in &links.neighbors {
                if let Some(nb_node) = self.graph.node(nb) {
                    let mut guard = nb_node.links();
                    if let Some(l) = guard.get_mut(level) {
                        for e in l.neighbors.iter_mut() {
                            if *e == old {
                                *e = new;
                            }
                        }
                        if l.incoming.remove(&old) {
                            l.incoming.insert(new);
                        }
                    }
                }
            }
            for &src in &links.incoming {
                if let Some(src_node) = self.graph.node(src) {
                    let mut guard = src_node.links();
                    if let Some(l) = guard.get_mut(level) {
                        for e in l.neighbors.iter_mut() {
                            if *e == old {
                                *e = new;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HnswParams, Metric as CfgMetric};

    #[test]
    fn deleting_unknown_label_is_a_noop() {
        let params = HnswParams::new(4, CfgMetric::L2);
        let index = HnswIndex::<f32>::new(params).unwrap();
        assert_eq!(index.delete(999, DeleteMode::InPlace), 0);
    }

    #[test]
    fn in_place_delete_reclaims_id_and_stays_queryable() {
        let params = HnswParams::new(4, CfgMetric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..6u64 {
            index.insert(&[label as f32; 4], label).unwrap();
        }
        let removed = index.delete(3, DeleteMode::InPlace);
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 5);

        let (results, _) = index.top_k(&[3.0, 3.0, 3.0, 3.0], 6, None).unwrap();
        assert!(results.iter().all(|r| r.label != 3));
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn deleting_entry_point_picks_a_live_replacement() {
        let params = HnswParams::new(4, CfgMetric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..8u64 {
            index.insert(&[label as f32; 4], label).unwrap();
        }
        let entry = index.data.read().entrypoint.unwrap();
        let entry_label = index.data.read().label_map.label_for(entry).unwrap();
        index.delete(entry_label, DeleteMode::InPlace);

        let data = index.data.read();
        if index.len() > 0 {
            let new_entry = data.entrypoint.expect("replacement entry point");
            assert!(!index.graph.node(new_entry).unwrap().is_deleted());
        }
    }

    #[test]
    fn marked_delete_leaves_tombstone_out_of_results_before_reclamation() {
        let params = HnswParams::new(4, CfgMetric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..5u64 {
            index.insert(&[label as f32; 4], label).unwrap();
        }
        index.delete(2, DeleteMode::Marked);
        // Physical id is still present (not reclaimed), but hidden by the
        // tombstone.
        assert_eq!(index.len(), 5);
        let (results, _) = index.top_k(&[2.0, 2.0, 2.0, 2.0], 5, None).unwrap();
        assert!(results.iter().all(|r| r.label != 2));
    }
}
