//! Pre-filter heuristic.
//!
//! A top-K query restricted to a caller-supplied subset of labels can either
//! scan the subset directly (ad-hoc brute force, cheap when the subset is a
//! small slice of the index) or page through the graph via the batch
//! iterator and keep only subset members (cheap when the subset is most of
//! the index, since a brute scan would touch nearly every vector anyway).
//! The decision is a pure function of index size, `M`, and `k` against the
//! subset ratio `r = |subset| / count`; the exact thresholds are
//! implementation freedom, fixed here and exercised by the tests below.

use crate::distance::Element;
use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::types::{BatchOrder, QueryMode, QueryParams, SearchResult};
use crate::Label;
use std::collections::HashSet;

/// Decide ad-hoc brute force vs batched graph scan for a subset-constrained
/// top-K query. `count` is the index's current element count (not the
/// subset size); `subset_size` is `|subset|`.
pub fn decide_query_mode(count: usize, m: usize, k: usize, subset_size: usize) -> QueryMode {
    if count == 0 || subset_size == 0 {
        return QueryMode::AdHocBruteForce;
    }
    let r = subset_size as f64 / count as f64;
    // A larger M makes the graph relatively more expensive to traverse per
    // result found, and a larger k needs more of the subset scanned either
    // way; both push the crossover point where ad-hoc brute force stops
    // paying off further out.
    let threshold = (m as f64 / (m as f64 + k as f64)).clamp(0.05, 0.5);
    if r <= threshold {
        QueryMode::AdHocBruteForce
    } else {
        QueryMode::BatchedGraphScan
    }
}

impl<T: Element> HnswIndex<T> {
    /// Top-K restricted to `subset`. Picks ad-hoc brute force or a
    /// batched graph scan per [`decide_query_mode`] and records the choice
    /// for `info()`.
    pub fn top_k_subset(
        &self,
        query: &[T],
        k: usize,
        subset: &HashSet<Label>,
        params: Option<QueryParams>,
    ) -> Result<Vec<SearchResult>> {
        self.check_dim(query)?;
        let count = self.len();
        let mode = decide_query_mode(count, self.m, k, subset.len());
        *self.last_query_mode.lock() = mode;

        let results = match mode {
            QueryMode::AdHocBruteForce => self.subset_scan(query, k, subset),
            QueryMode::BatchedGraphScan => self.subset_via_batches(query, k, subset, params)?,
            QueryMode::None => unreachable!("decide_query_mode never returns None"),
        };
        Ok(results)
    }

    /// Brute-force every id owned by a subset label, keeping the minimum
    /// distance per label.
    fn subset_scan(&self, query: &[T], k: usize, subset: &HashSet<Label>) -> Vec<SearchResult> {
        let data = self.data.read();
        let mut scored: Vec<SearchResult> = subset
            .iter()
            .filter_map(|&label| {
                let ids = data.label_map.ids_for(label);
                ids.into_iter()
                    .map(|id| self.graph.distance_to_query(self.metric, id, query))
                    .fold(None, |acc, d| match acc {
                        Some(best) if best <= d => Some(best),
                        _ => Some(d),
                    })
                    .map(|best| SearchResult::new(label, best))
            })
            .collect();
        scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Page through the batch iterator, keeping only subset labels, until
    /// `k` are found or the graph is exhausted. An explicit `ef_runtime`
    /// override just widens each page requested from the iterator.
    fn subset_via_batches(
        &self,
        query: &[T],
        k: usize,
        subset: &HashSet<Label>,
        params: Option<QueryParams>,
    ) -> Result<Vec<SearchResult>> {
        let mut it = self.batch_iterator(query)?;
        let page = params.and_then(|p| p.ef_runtime).unwrap_or(k).max(k);
        let mut found: Vec<SearchResult> = Vec::new();
        while found.len() < k && it.has_next() {
            let batch = it.next(page, BatchOrder::ByScore);
            if batch.is_empty() {
                break;
            }
            for r in batch {
                if subset.contains(&r.label) {
                    found.push(r);
                }
            }
        }
        found.truncate(k);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HnswParams, Metric as CfgMetric};

    #[test]
    fn small_subset_picks_adhoc() {
        let mode = decide_query_mode(10_000, 16, 10, 5);
        assert_eq!(mode, QueryMode::AdHocBruteForce);
    }

    #[test]
    fn large_subset_picks_batched_scan() {
        let mode = decide_query_mode(10_000, 16, 10, 9_000);
        assert_eq!(mode, QueryMode::BatchedGraphScan);
    }

    #[test]
    fn empty_subset_is_trivially_adhoc() {
        assert_eq!(decide_query_mode(10_000, 16, 10, 0), QueryMode::AdHocBruteForce);
    }

    #[test]
    fn subset_query_only_returns_subset_labels() {
        let params = HnswParams::new(2, CfgMetric::L2).with_m(8);
        let index = HnswIndex::<f32>::new(params).unwrap();
        for label in 0..20u64 {
            index.insert(&[label as f32, label as f32], label).unwrap();
        }
        let subset: HashSet<Label> = [2, 4, 6].into_iter().collect();
        let results = index.top_k_subset(&[0.0, 0.0], 3, &subset, None).unwrap();
        assert!(results.iter().all(|r| subset.contains(&r.label)));
        assert_eq!(results.len(), 3);
    }
}
