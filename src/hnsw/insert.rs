//! Insertion, and the revisit-neighbor-connections protocol that runs when a
//! chosen neighbor is already at its degree cap.

use std::sync::Arc;

use crate::distance::Element;
use crate::error::Result;
use crate::graph::NodeEntry;
use crate::hnsw::{select_neighbors, HnswIndex};
use crate::Id;
use crate::Label;

impl<T: Element> HnswIndex<T> {
    pub(crate) fn m_max(&self, level: usize) -> usize {
        if level == 0 { self.m * 2 } else { self.m }
    }

    /// Lock helper: resolve ids to their `Arc<NodeEntry>` handles sorted
    /// ascending, so a caller that then locks each handle's mutex in order
    /// follows the crate-wide ascending-id lock ordering rule.
    pub(crate) fn sorted_node_handles(&self, mut ids: Vec<Id>) -> (Vec<Id>, Vec<Arc<NodeEntry>>) {
        ids.sort_unstable();
        ids.dedup();
        let handles: Vec<Arc<NodeEntry>> =
            ids.iter().filter_map(|&id| self.graph.node(id)).collect();
        (ids, handles)
    }

    pub fn insert(&self, vector: &[T], label: Label) -> Result<()> {
        self.check_dim(vector)?;
        let mut v = vector.to_vec();
        self.normalize_if_needed(&mut v);

        let top_level = self.sample_level();

        // Allocate the id, copy the blob, register the label, and decide
        // whether this node becomes the new entry point -- all under the
        // exclusive index-data lock.
        let (id, prior_entry, prior_max_level) = {
            let mut data = self.data.write();
            let id = self.graph.push(&v, top_level);
            self.visited.grow(id as usize + 1);
            data.label_map.insert(label, id);
            let prior_entry = data.entrypoint;
            let prior_max_level = data.max_level;
            if prior_entry.is_none() || top_level > prior_max_level.unwrap_or(0) {
                data.entrypoint = Some(id);
                data.max_level = Some(top_level);
            }
            (id, prior_entry, prior_max_level)
        };

        if let Some(prior_entry) = prior_entry {
            let prior_max_level = prior_max_level.unwrap_or(0);
            let mut current =
                self.descend_to(&v, prior_entry, prior_max_level, top_level.min(prior_max_level), true);

            for level in (0..=top_level.min(prior_max_level)).rev() {
                let ef_construction = self.data.read().ef_construction;
                let (candidates, _status) =
                    self.search_layer(&v, current, ef_construction, level, false, self.next_timeout_tick());

                let cap = self.m_max(level);
                let result = select_neighbors(&self.graph, self.metric, id, candidates, cap);

                if let Some(&(_, nearest)) = result.selected.first() {
                    current = nearest;
                }

                for (_, neighbor_id) in &result.selected {
                    self.connect_or_revisit(id, *neighbor_id, level, cap);
                }
            }
        }

        if let Some(node) = self.graph.node(id) {
            node.clear_in_process();
        }
        tracing::debug!(id, label, top_level, "inserted node");
        Ok(())
    }

    /// Try to add a bidirectional edge between `new_id` and `neighbor_id` at
    /// `level`. If the neighbor has no room left under its degree cap, falls
    /// through to the revisit protocol instead.
    fn connect_or_revisit(&self, new_id: Id, neighbor_id: Id, level: usize, cap: usize) {
        let Some(new_node) = self.graph.node(new_id) else { return };
        let Some(neighbor_node) = self.graph.node(neighbor_id) else { return };

        let (lo_node, hi_node, lo_id) = if new_id < neighbor_id {
            (&new_node, &neighbor_node, new_id)
        } else {
            (&neighbor_node, &new_node, neighbor_id)
        };
        let mut lo_guard = lo_node.links();
        let mut hi_guard = hi_node.links();

        let neighbor_is_lo = neighbor_id == lo_id;
        let neighbor_len = if neighbor_is_lo {
            lo_guard.get(level).map(|l| l.neighbors.len())
        } else {
            hi_guard.get(level).map(|l| l.neighbors.len())
        };
        let Some(neighbor_len) = neighbor_len else { return };
        let has_room = neighbor_len < cap;

        if has_room {
            let new_is_lo = new_id == lo_id;
            if new_is_lo {
                if let Some(l) = lo_guard.get_mut(level) {
                    l.neighbors.push(neighbor_id);
                }
                if let Some(l) = hi_guard.get_mut(level) {
                    l.neighbors.push(new_id);
                }
            } else {
                if let Some(l) = hi_guard.get_mut(level) {
                    l.neighbors.push(neighbor_id);
                }
                if let Some(l) = lo_guard.get_mut(level) {
                    l.neighbors.push(new_id);
                }
            }
        }
        drop(lo_guard);
        drop(hi_guard);

        if !has_room {
            self.revisit_neighbor_connections(new_id, neighbor_id, level, cap);
        }
    }

    /// The chosen neighbor is at its degree cap. Re-run the heuristic over
    /// `neighbor`'s existing neighbors plus the new node, reconcile dropped
    /// edges against the edge-duality invariant, and possibly connect the
    /// new node anyway if the neighbor's own selection still makes room or
    /// keeps it.
    fn revisit_neighbor_connections(&self, new_id: Id, neighbor_id: Id, level: usize, cap: usize) {
        let Some(neighbor_node) = self.graph.node(neighbor_id) else { return };
        if self.graph.node(new_id).is_none() {
            return;
        }

        let existing: Vec<Id> = {
            let guard = neighbor_node.links();
            guard.get(level).map(|l| l.neighbors.clone()).unwrap_or_default()
        };
        let mut candidate_ids = existing.clone();
        if !candidate_ids.contains(&new_id) {
            candidate_ids.push(new_id);
        }
        let candidates: Vec<(f32, Id)> = candidate_ids
            .iter()
            .map(|&cid| (self.graph.distance(self.metric, neighbor_id, cid), cid))
            .collect();

        let result = select_neighbors(&self.graph, self.metric, neighbor_id, candidates, cap);
        let selected_ids: std::collections::HashSet<Id> =
            result.selected.iter().map(|&(_, id)| id).collect();
        let new_is_selected = selected_ids.contains(&new_id);

        // Lock order: neighbor, every node whose edge to/from neighbor is
        // about to change, and the new node -- all ascending by id. Dropped
        // candidates that are pre-existing neighbors need their
        // incoming-edge bookkeeping touched; `new_id` is handled separately.
        let mut lock_set: Vec<Id> = result
            .rejected
            .iter()
            .map(|&(_, id)| id)
            .filter(|&id| id != new_id)
            .collect();
        lock_set.push(neighbor_id);
        lock_set.push(new_id);
        let (ids, handles) = self.sorted_node_handles(lock_set);
        let mut guards: Vec<_> = handles.iter().map(|h| h.links()).collect();
        let idx_of = |id: Id| ids.iter().position(|&x| x == id);

        // Reconcile every dropped (neighbor -> x) edge against the
        // edge-duality invariant.
        for &(_, x) in &result.rejected {
            if x == new_id || !existing.contains(&x) {
                continue;
            }
            let Some(x_idx) = idx_of(x) else { continue };
            let x_has_reciprocal = guards[x_idx]
                .get(level)
                .map(|l| l.neighbors.contains(&neighbor_id))
                .unwrap_or(false);
            let Some(neighbor_idx) = idx_of(neighbor_id) else { continue };
            if x_has_reciprocal {
                // Was bidirectional; now uni (x -> neighbor only). Record it
                // at the target's (neighbor's) incoming set.
                if let Some(l) = guards[neighbor_idx].get_mut(level) {
                    l.incoming.insert(x);
                }
            } else {
                // Was uni (neighbor -> x only), recorded at x's incoming
                // set; the edge is now gone entirely, so drop the record.
                if let Some(l) = guards[x_idx].get_mut(level) {
                    l.incoming.remove(&neighbor_id);
                }
            }
        }

        // Replace neighbor's outgoing set at this level with the heuristic
        // result.
        if let Some(neighbor_idx) = idx_of(neighbor_id)
            && let Some(l) = guards[neighbor_idx].get_mut(level)
        {
            l.neighbors = result.selected.iter().map(|&(_, id)| id).collect();
        }

        // Connect the new node to neighbor if it still has room, regardless
        // of whether the heuristic kept it.
        let neighbor_deleted = self.graph.node(neighbor_id).map(|n| n.is_deleted()).unwrap_or(true);
        let new_deleted = self.graph.node(new_id).map(|n| n.is_deleted()).unwrap_or(true);
        if !neighbor_deleted && !new_deleted
            && let Some(new_idx) = idx_of(new_id)
        {
            let new_degree = guards[new_idx].get(level).map(|l| l.neighbors.len()).unwrap_or(0);
            if new_degree < self.m_max(level) {
                if let Some(l) = guards[new_idx].get_mut(level) {
                    l.neighbors.push(neighbor_id);
                }
                if new_is_selected {
                    // Bidirectional: neighbor's outgoing already includes
                    // new_id via the replacement above.
                } else if let Some(neighbor_idx) = idx_of(neighbor_id)
                    && let Some(l) = guards[neighbor_idx].get_mut(level)
                {
                    l.incoming.insert(new_id);
                }
            }
        }

        drop(guards);
    }
}
