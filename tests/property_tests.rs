//! Property-based tests for the HNSW index invariants.
//!
//! Uses proptest to verify the density, edge-duality, and degree-cap
//! invariants hold after random sequences of adds and deletes.

use proptest::prelude::*;
use vecsim_core::{DeleteMode, HnswIndex, HnswParams, Metric, NodeSnapshot};

const DIM: usize = 8;

fn vector_strategy() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0f32, DIM..=DIM)
}

fn label_strategy() -> impl Strategy<Value = u64> {
    0u64..200
}

/// Every live id `a`'s outgoing edge to `b` at a level is either
/// reciprocated by `b`, or recorded in `b`'s incoming set -- never both,
/// never neither.
fn check_edge_duality(nodes: &[NodeSnapshot]) -> Result<(), String> {
    let by_id: std::collections::HashMap<u32, &NodeSnapshot> =
        nodes.iter().map(|n| (n.id, n)).collect();
    for a in nodes {
        for (level, links) in a.levels.iter().enumerate() {
            for &b in &links.neighbors {
                let Some(node_b) = by_id.get(&b) else {
                    return Err(format!("{} -> {b} at level {level} points at a missing node", a.id));
                };
                let Some(b_links) = node_b.levels.get(level) else {
                    return Err(format!("{} -> {b} at level {level} but {b} has no such level", a.id));
                };
                let reciprocated = b_links.neighbors.contains(&a.id);
                let recorded_uni = b_links.incoming.contains(&a.id);
                if reciprocated && recorded_uni {
                    return Err(format!("{} <-> {b} at level {level} is both reciprocated and recorded as uni-directional", a.id));
                }
                if !reciprocated && !recorded_uni {
                    return Err(format!("{} -> {b} at level {level} is reciprocated by neither edge nor incoming set", a.id));
                }
            }
        }
    }
    Ok(())
}

fn check_degree_cap(nodes: &[NodeSnapshot], m: usize) -> Result<(), String> {
    for node in nodes {
        for (level, links) in node.levels.iter().enumerate() {
            let cap = if level == 0 { m * 2 } else { m };
            if links.neighbors.len() > cap {
                return Err(format!(
                    "id {} level {level} has {} neighbors, cap is {cap}",
                    node.id,
                    links.neighbors.len()
                ));
            }
        }
    }
    Ok(())
}

proptest! {
    /// Density: after any sequence of adds the live id set is exactly
    /// `[0, count)`.
    #[test]
    fn density_holds_after_inserts(
        vectors in prop::collection::vec((label_strategy(), vector_strategy()), 1..60)
    ) {
        let params = HnswParams::new(DIM, Metric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for (label, v) in &vectors {
            index.insert(v, *label).unwrap();
        }
        prop_assert_eq!(index.len(), vectors.len());
        let ids: std::collections::HashSet<u32> =
            index.info_iterator().into_iter().map(|n| n.id).collect();
        prop_assert_eq!(ids, (0..vectors.len() as u32).collect());
    }

    /// Edge duality and the degree cap both hold throughout a mixed
    /// sequence of inserts.
    #[test]
    fn edge_duality_and_degree_cap_hold(
        vectors in prop::collection::vec((label_strategy(), vector_strategy()), 1..80)
    ) {
        let m = 6;
        let params = HnswParams::new(DIM, Metric::L2).with_m(m);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for (label, v) in &vectors {
            index.insert(v, *label).unwrap();
        }
        let nodes = index.info_iterator();
        prop_assert_eq!(check_edge_duality(&nodes), Ok(()));
        prop_assert_eq!(check_degree_cap(&nodes, m), Ok(()));
    }

    /// Delete-query consistency: once `delete(label)` returns, `top_k`
    /// never returns that label again, even before physical reclamation
    /// (Marked mode).
    #[test]
    fn deleted_label_never_resurfaces(
        vectors in prop::collection::vec((label_strategy(), vector_strategy()), 5..40),
        victim_idx in 0usize..5
    ) {
        let params = HnswParams::new(DIM, Metric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        let mut labels: Vec<u64> = Vec::new();
        for (label, v) in &vectors {
            if !labels.contains(label) {
                index.insert(v, *label).unwrap();
                labels.push(*label);
            }
        }
        prop_assume!(!labels.is_empty());
        let victim = labels[victim_idx % labels.len()];
        let victim_vector = vectors.iter().find(|(l, _)| *l == victim).unwrap().1.clone();

        index.delete(victim, DeleteMode::Marked);
        let (results, _) = index.top_k(&victim_vector, labels.len(), None).unwrap();
        prop_assert!(results.iter().all(|r| r.label != victim));

        // The entry point is never the deleted node.
        let entry = index.entrypoint();
        prop_assert!(entry.is_none() || index.label_of(entry.unwrap()).is_some());
    }

    /// Density continues to hold after in-place deletion physically
    /// reclaims ids.
    #[test]
    fn density_holds_after_in_place_deletes(
        vectors in prop::collection::vec((label_strategy(), vector_strategy()), 5..50),
        victim_idx in 0usize..5
    ) {
        let params = HnswParams::new(DIM, Metric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        let mut labels: Vec<u64> = Vec::new();
        for (label, v) in &vectors {
            if !labels.contains(label) {
                index.insert(v, *label).unwrap();
                labels.push(*label);
            }
        }
        prop_assume!(!labels.is_empty());
        let victim = labels[victim_idx % labels.len()];
        index.delete(victim, DeleteMode::InPlace);

        prop_assert_eq!(index.len(), labels.len() - 1);
        let ids: std::collections::HashSet<u32> =
            index.info_iterator().into_iter().map(|n| n.id).collect();
        prop_assert_eq!(ids, (0..index.len() as u32).collect());
    }

    /// The degree cap alone, swept over a range of M values.
    #[test]
    fn degree_cap_holds_across_m_values(
        m in 2usize..20,
        vectors in prop::collection::vec((label_strategy(), vector_strategy()), 1..60)
    ) {
        let params = HnswParams::new(DIM, Metric::L2).with_m(m);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for (label, v) in &vectors {
            index.insert(v, *label).unwrap();
        }
        prop_assert_eq!(check_degree_cap(&index.info_iterator(), m), Ok(()));
    }
}

#[cfg(test)]
mod deterministic_tests {
    use super::*;

    /// End-to-end example: dim=4, L2, M=16.
    #[test]
    fn scenario_top_k_literal_distances() {
        let params = HnswParams::new(4, Metric::L2).with_m(16);
        let index = HnswIndex::<f32>::new(params).unwrap();
        index.insert(&[1.0, 1.0, 1.0, 1.0], 1).unwrap();
        index.insert(&[2.0, 2.0, 2.0, 2.0], 2).unwrap();
        index.insert(&[3.0, 3.0, 3.0, 3.0], 3).unwrap();

        let (results, _) = index.top_k(&[1.1, 1.1, 1.1, 1.1], 2, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label, 1);
        assert!((results[0].score - 0.04).abs() < 1e-3);
        assert_eq!(results[1].label, 2);
    }

    /// Add then delete then requery finds the next-nearest.
    #[test]
    fn scenario_add_delete_requery() {
        let params = HnswParams::new(4, Metric::L2).with_m(16);
        let index = HnswIndex::<f32>::new(params).unwrap();
        index.insert(&[1.0, 1.0, 1.0, 1.0], 1).unwrap();
        index.insert(&[3.0, 3.0, 3.0, 3.0], 3).unwrap();
        index.insert(&[5.0, 5.0, 5.0, 5.0], 5).unwrap();

        index.delete(5, DeleteMode::InPlace);
        let (results, _) = index.top_k(&[5.0, 5.0, 5.0, 5.0], 1, None).unwrap();
        assert_eq!(results[0].label, 3);
        assert!((results[0].score - 16.0).abs() < 1e-3);
    }

    /// Boundary case: empty index returns empty with OK.
    #[test]
    fn empty_index_returns_empty_ok() {
        let params = HnswParams::new(4, Metric::L2);
        let index = HnswIndex::<f32>::new(params).unwrap();
        let (results, status) = index.top_k(&[0.0, 0.0, 0.0, 0.0], 5, None).unwrap();
        assert!(results.is_empty());
        assert_eq!(status, vecsim_core::StatusCode::Ok);
    }

    /// Boundary case: delete every element then reinsert new labels over
    /// the same vectors; recall still finds them.
    #[test]
    fn reinsert_after_deleting_everything() {
        let params = HnswParams::new(4, Metric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..10u64 {
            index.insert(&[label as f32; 4], label).unwrap();
        }
        for label in 0..10u64 {
            index.delete(label, DeleteMode::InPlace);
        }
        assert!(index.is_empty());

        for label in 100..110u64 {
            index.insert(&[(label - 100) as f32; 4], label).unwrap();
        }
        let (results, _) = index.top_k(&[5.0, 5.0, 5.0, 5.0], 1, None).unwrap();
        assert_eq!(results[0].label, 105);
    }

    /// Deleting the entry point triggers replacement, and the new entry
    /// point, if any, still resolves to a live label.
    #[test]
    fn deleting_entry_point_gets_live_replacement() {
        let params = HnswParams::new(4, Metric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..12u64 {
            index.insert(&[label as f32; 4], label).unwrap();
        }
        let entry = index.entrypoint().unwrap();
        let entry_label = index.label_of(entry).unwrap();
        index.delete(entry_label, DeleteMode::Marked);

        let new_entry = index.entrypoint();
        assert!(new_entry.is_none() || index.label_of(new_entry.unwrap()).is_some());
    }

    /// A label reinserted under MULTI with a different id set returns the
    /// new ids, not the old.
    #[test]
    fn multi_label_reinsertion_tracks_new_ids() {
        use vecsim_core::MultiMode;
        let params = HnswParams::new(4, Metric::L2).with_m(8).with_multi(MultiMode::Multi);
        let index = HnswIndex::<f32>::new(params).unwrap();
        index.insert(&[1.0, 1.0, 1.0, 1.0], 9).unwrap();
        index.delete(9, DeleteMode::InPlace);
        index.insert(&[2.0, 2.0, 2.0, 2.0], 9).unwrap();

        let (results, _) = index.top_k(&[2.0, 2.0, 2.0, 2.0], 1, None).unwrap();
        assert_eq!(results[0].label, 9);
        assert!(results[0].score.abs() < 1e-5);
    }

    /// Cosine self-similarity is near zero after the folded `1 - <a,b>`.
    #[test]
    fn cosine_self_similarity_is_near_zero() {
        let params = HnswParams::new(4, Metric::Cosine);
        let index = HnswIndex::<f32>::new(params).unwrap();
        index.insert(&[1.0, 0.0, 0.0, 0.0], 7).unwrap();
        let (results, _) = index.top_k(&[10.0, 0.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].label, 7);
        assert!(results[0].score.abs() < 1e-4);
    }
}
