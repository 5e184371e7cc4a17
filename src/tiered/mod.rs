//! Tiered controller.
//!
//! Fronts [`HnswIndex`] with a write-visible-immediately [`FlatIndex`]: an
//! `add` lands in the flat buffer and returns, then an `InsertJob` is
//! submitted to the caller's worker pool to promote the vector into HNSW in
//! the background. Queries fan out to both tiers and merge by label,
//! keeping the better distance. Jobs are the only thing this controller
//! hands to the caller's threads; it never spawns any itself. The library
//! does not own threads.

pub mod jobs;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TieredParams;
use crate::distance::Element;
use crate::error::Result;
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::types::{QueryParams, SearchResult};
use crate::{Id, Label};

pub use jobs::{InsertJob, Job, RepairJob, SwapDeleteJob};

/// A caller-supplied sink for jobs this controller creates; the caller owns
/// the worker pool that eventually calls `Job::execute`.
pub type JobSubmitFn<T> = Box<dyn Fn(Job<T>) + Send + Sync>;

/// Flat buffer + HNSW + job bookkeeping.
pub struct TieredIndex<T: Element> {
    pub(crate) flat: FlatIndex<T>,
    pub(crate) hnsw: HnswIndex<T>,
    submit_fn: JobSubmitFn<T>,
    memory_bytes: AtomicUsize,
    /// Ids of in-flight `InsertJob`s per label, so a `delete` racing a
    /// promotion can be reasoned about (observability only; a promotion
    /// that loses the race to a delete is handled by `InsertJob::execute`
    /// finding its flat-buffer slot already gone).
    pending_inserts: Mutex<HashMap<Label, Vec<Id>>>,
    /// Count of outstanding `RepairJob`s per tombstoned id; the id's
    /// `SwapDeleteJob` is submitted once this drops to zero.
    pending_repairs: Mutex<HashMap<Id, usize>>,
    generation: AtomicUsize,
}

impl<T: Element> TieredIndex<T> {
    /// Construct a controller as an `Arc` -- required so jobs can carry a
    /// `Weak` back-reference.
    pub fn new<F>(params: TieredParams, submit: F) -> Result<Arc<Self>>
    where
        F: Fn(Job<T>) + Send + Sync + 'static,
    {
        params.validate()?;
        Ok(Arc::new(Self {
            flat: FlatIndex::new(
                params.hnsw.dim,
                metric_from_config(params.hnsw.metric),
                params.hnsw.multi,
                params.hnsw.block_size,
            ),
            hnsw: HnswIndex::new(params.hnsw)?,
            submit_fn: Box::new(submit),
            memory_bytes: AtomicUsize::new(0),
            pending_inserts: Mutex::new(HashMap::new()),
            pending_repairs: Mutex::new(HashMap::new()),
            generation: AtomicUsize::new(0),
        }))
    }

    pub fn len(&self) -> usize {
        self.flat.len() + self.hnsw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes.load(Ordering::Relaxed)
    }

    /// Insert into the flat buffer (immediately queryable), then submit an
    /// `InsertJob` that will promote it into HNSW later.
    pub fn add(self: &Arc<Self>, vector: &[T], label: Label) -> Result<()> {
        self.hnsw.check_dim(vector)?;
        let flat_id = self.flat.insert(vector, label);
        self.pending_inserts.lock().entry(label).or_default().push(flat_id);
        self.bump_memory();
        self.submit(Job::Insert(InsertJob {
            label,
            flat_id,
            controller: Arc::downgrade(self),
        }));
        tracing::debug!(label, flat_id, "queued vector for HNSW promotion");
        Ok(())
    }

    /// Drop every flat-buffer entry for the label, then mark every HNSW id
    /// owned by the label deleted and submit `RepairJob`s for each
    /// tombstone's own affected neighborhoods. A tombstone with no repair
    /// obligations (an isolated node) is reclaimed immediately instead of
    /// waiting on a repair count that would never reach zero.
    pub fn delete(self: &Arc<Self>, label: Label) -> usize {
        let flat_removed = self.flat.delete(label);
        let (hnsw_removed, affected) = self.hnsw.mark_deleted_for_label(label);

        for (tombstone, pairs) in affected {
            if pairs.is_empty() {
                self.submit(Job::SwapDelete(SwapDeleteJob {
                    id: tombstone,
                    controller: Arc::downgrade(self),
                }));
                continue;
            }
            {
                let mut pending = self.pending_repairs.lock();
                *pending.entry(tombstone).or_insert(0) += pairs.len();
            }
            for (node, level) in pairs {
                self.submit(Job::Repair(RepairJob {
                    tombstone,
                    node,
                    level,
                    controller: Arc::downgrade(self),
                }));
            }
        }
        flat_removed + hnsw_removed
    }

    /// Fan out to both tiers, keep the best distance per label.
    pub fn top_k(
        &self,
        query: &[T],
        k: usize,
        params: Option<QueryParams>,
    ) -> Result<Vec<SearchResult>> {
        self.hnsw.check_dim(query)?;
        let flat_results = self.flat.search(query, k);
        let (hnsw_results, _status) = self.hnsw.top_k(query, k, params)?;

        let mut best: HashMap<Label, f32> = HashMap::new();
        for r in flat_results.into_iter().chain(hnsw_results) {
            best.entry(r.label).and_modify(|d| *d = d.min(r.score)).or_insert(r.score);
        }
        let mut merged: Vec<SearchResult> =
            best.into_iter().map(|(label, score)| SearchResult::new(label, score)).collect();
        merged.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);
        Ok(merged)
    }

    pub(crate) fn submit(&self, job: Job<T>) {
        (self.submit_fn)(job);
    }

    pub(crate) fn bump_memory(&self) {
        // The allocator lives behind `FlatIndex`/`GraphStorage`; this crate
        // doesn't instrument byte-exact accounting (an external allocator
        // wrapper is out of scope), so each state transition just advances
        // a monotonic generation-scaled counter for observability.
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.memory_bytes.store(
            self.len() * self.hnsw.dim() * std::mem::size_of::<T>(),
            Ordering::Relaxed,
        );
    }

    pub(crate) fn forget_insert_job(&self, label: Label, flat_id: Id) {
        let mut pending = self.pending_inserts.lock();
        if let Some(ids) = pending.get_mut(&label) {
            ids.retain(|&id| id != flat_id);
            if ids.is_empty() {
                pending.remove(&label);
            }
        }
    }

    /// Decrement the pending-repair count for `id`; returns `true` iff this
    /// was the last outstanding repair (the caller should then submit the
    /// id's `SwapDeleteJob`).
    pub(crate) fn finish_repair_job(&self, id: Id) -> bool {
        let mut pending = self.pending_repairs.lock();
        match pending.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                pending.remove(&id);
                true
            }
            None => false,
        }
    }
}

fn metric_from_config(m: crate::config::Metric) -> crate::distance::Metric {
    match m {
        crate::config::Metric::L2 => crate::distance::Metric::L2,
        crate::config::Metric::Ip => crate::distance::Metric::Ip,
        crate::config::Metric::Cosine => crate::distance::Metric::Cosine,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HnswParams, Metric as CfgMetric};
    use std::sync::Mutex as StdMutex;

    fn immediate_pool<T: Element>() -> (Arc<StdMutex<Vec<Job<T>>>>, impl Fn(Job<T>) + Send + Sync) {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let queue2 = queue.clone();
        (queue, move |job| queue2.lock().unwrap().push(job))
    }

    fn drain(queue: &Arc<StdMutex<Vec<Job<f32>>>>) {
        loop {
            let job = queue.lock().unwrap().pop();
            match job {
                Some(j) => j.execute(),
                None => break,
            }
        }
    }

    #[test]
    fn add_is_queryable_before_job_runs() {
        let (queue, submit) = immediate_pool::<f32>();
        let params = TieredParams::new(HnswParams::new(4, CfgMetric::L2));
        let index = TieredIndex::new(params, submit).unwrap();
        index.add(&[1.0, 1.0, 1.0, 1.0], 1).unwrap();

        let results = index.top_k(&[1.0, 1.0, 1.0, 1.0], 1, None).unwrap();
        assert_eq!(results[0].label, 1);
        assert!(results[0].score.abs() < 1e-5);

        drain(&queue);
        let results_after = index.top_k(&[1.0, 1.0, 1.0, 1.0], 1, None).unwrap();
        assert_eq!(results_after[0].label, 1);
    }

    #[test]
    fn delete_hides_label_immediately() {
        let (queue, submit) = immediate_pool::<f32>();
        let params = TieredParams::new(HnswParams::new(4, CfgMetric::L2));
        let index = TieredIndex::new(params, submit).unwrap();
        index.add(&[1.0, 1.0, 1.0, 1.0], 1).unwrap();
        drain(&queue);

        let removed = index.delete(1);
        assert_eq!(removed, 1);
        let results = index.top_k(&[1.0, 1.0, 1.0, 1.0], 1, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn repair_jobs_chain_into_swap_delete() {
        let (queue, submit) = immediate_pool::<f32>();
        let params = TieredParams::new(HnswParams::new(4, CfgMetric::L2).with_m(8));
        let index = TieredIndex::new(params, submit).unwrap();
        for label in 0..6u64 {
            index.add(&[label as f32; 4], label).unwrap();
            drain(&queue);
        }

        index.delete(3);
        // Repair jobs, and the swap-delete job they chain into, all run
        // inline via the test's synchronous pool.
        drain(&queue);

        assert_eq!(index.len(), 5, "only the deleted label's id should be reclaimed");
        let results = index.top_k(&[3.0, 3.0, 3.0, 3.0], 6, None).unwrap();
        assert!(results.iter().all(|r| r.label != 3));
        let mut survivors: Vec<u64> = results.iter().map(|r| r.label).collect();
        survivors.sort_unstable();
        assert_eq!(survivors, vec![0, 1, 2, 4, 5], "every other label must survive reclamation");
    }
}
