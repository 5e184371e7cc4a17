//! Neighbor-selection heuristic.
//!
//! Given candidates scored by distance to a center id and a cap `m`, keeps a
//! diverse, direction-spread subset: a candidate is accepted only if it is
//! strictly closer to the query than to every already-accepted neighbor.
//! This is the invariant every edge mutation in the graph ultimately goes
//! through.

use crate::distance::{Element, Metric};
use crate::graph::GraphStorage;
use crate::Id;

/// `(distance_to_center, id)` pairs, sorted ascending by distance once
/// selection runs.
pub type ScoredId = (f32, Id);

/// Result of running the heuristic: the accepted set (capped at `m`, ordered
/// ascending by distance to center) and everything rejected. Repair paths
/// need the rejected set to know which edges to tear down.
pub struct HeuristicResult {
    pub selected: Vec<ScoredId>,
    pub rejected: Vec<ScoredId>,
}

/// Tie-break on equal distance is an open implementation choice; this uses
/// a stable sort, so candidates that arrive tied keep their relative input
/// order rather than being reshuffled.
pub fn select_neighbors<T: Element>(
    graph: &GraphStorage<T>,
    metric: Metric,
    center: Id,
    mut candidates: Vec<ScoredId>,
    m: usize,
) -> HeuristicResult {
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<ScoredId> = Vec::with_capacity(m.min(candidates.len()));
    let mut rejected: Vec<ScoredId> = Vec::new();

    for (dist_to_center, cand) in candidates {
        if cand == center {
            continue;
        }
        if selected.len() >= m {
            rejected.push((dist_to_center, cand));
            continue;
        }
        let accepted = selected
            .iter()
            .all(|&(_, s)| graph.distance(metric, cand, s) > dist_to_center);
        if accepted {
            selected.push((dist_to_center, cand));
        } else {
            rejected.push((dist_to_center, cand));
        }
    }

    HeuristicResult { selected, rejected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStorage;

    fn graph_line(points: &[f32]) -> GraphStorage<f32> {
        let g = GraphStorage::new(1, 16);
        for &p in points {
            g.push(&[p], 0);
        }
        g
    }

    #[test]
    fn caps_at_m_and_prefers_diverse_spread() {
        // Points on a line at 0 (center), 1, 1.1, 10. The heuristic should
        // reject the near-duplicate of an already-accepted neighbor.
        let g = graph_line(&[0.0, 1.0, 1.1, 10.0]);
        let candidates = vec![(1.0, 1u32), (1.1, 2u32), (10.0, 3u32)];
        let result = select_neighbors(&g, Metric::L2, 0, candidates, 2);
        assert_eq!(result.selected.len(), 2);
        let ids: Vec<Id> = result.selected.iter().map(|&(_, id)| id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3), "should skip the redundant neighbor at 1.1");
        assert!(result.rejected.iter().any(|&(_, id)| id == 2));
    }

    #[test]
    fn never_selects_the_center_itself() {
        let g = graph_line(&[0.0, 1.0]);
        let candidates = vec![(0.0, 0u32), (1.0, 1u32)];
        let result = select_neighbors(&g, Metric::L2, 0, candidates, 5);
        assert_eq!(result.selected, vec![(1.0, 1)]);
    }
}
