//! Job model.
//!
//! Each variant carries a *weak* reference to the tiered controller so that
//! a job queued on a caller-owned worker pool never revives a dropped
//! index; if the controller is gone by the time a worker dequeues the job,
//! `execute` is a no-op.

use std::sync::Weak;

use crate::distance::Element;
use crate::tiered::TieredIndex;
use crate::{Id, Label};

pub struct InsertJob<T: Element> {
    pub label: Label,
    pub flat_id: Id,
    pub(crate) controller: Weak<TieredIndex<T>>,
}

pub struct RepairJob<T: Element> {
    /// The tombstoned id whose removal made this repair necessary -- once
    /// every repair obligation it created has run, this is the id that gets
    /// physically reclaimed.
    pub tombstone: Id,
    /// The live neighbor whose connections actually need repairing.
    pub node: Id,
    pub level: usize,
    pub(crate) controller: Weak<TieredIndex<T>>,
}

pub struct SwapDeleteJob<T: Element> {
    pub id: Id,
    pub(crate) controller: Weak<TieredIndex<T>>,
}

/// A job submitted to the caller's worker pool.
pub enum Job<T: Element> {
    Insert(InsertJob<T>),
    Repair(RepairJob<T>),
    SwapDelete(SwapDeleteJob<T>),
}

impl<T: Element> Job<T> {
    pub fn execute(self) {
        match self {
            Job::Insert(j) => j.execute(),
            Job::Repair(j) => j.execute(),
            Job::SwapDelete(j) => j.execute(),
        }
    }
}

impl<T: Element> InsertJob<T> {
    /// Promote the flat-buffer vector into HNSW, then retract it from the
    /// flat buffer and drop this job's own bookkeeping entry.
    fn execute(self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        let Some(vector) = controller.flat.vector(self.flat_id) else {
            // Raced out: the flat-buffer slot is already gone (e.g. a
            // concurrent user delete beat this job to it). Drop quietly
            // per the job model's weak-reference/no-op contract.
            controller.forget_insert_job(self.label, self.flat_id);
            return;
        };
        if let Err(err) = controller.hnsw.insert(&vector, self.label) {
            tracing::warn!(label = self.label, ?err, "insert job failed to promote vector");
            controller.forget_insert_job(self.label, self.flat_id);
            return;
        }
        controller.flat.retire(self.flat_id);
        controller.forget_insert_job(self.label, self.flat_id);
        controller.bump_memory();
        tracing::debug!(label = self.label, flat_id = self.flat_id, "promoted vector to HNSW");
    }
}

impl<T: Element> RepairJob<T> {
    /// Repair `node`'s neighborhood, then if this was the last pending
    /// repair owed by `tombstone`, enqueue `tombstone`'s `SwapDeleteJob`.
    fn execute(self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        controller.hnsw.repair_node_connections(self.node, self.level);
        if controller.finish_repair_job(self.tombstone) {
            controller.submit(Job::SwapDelete(SwapDeleteJob {
                id: self.tombstone,
                controller: self.controller.clone(),
            }));
        }
        tracing::debug!(
            tombstone = self.tombstone,
            node = self.node,
            level = self.level,
            "repair job completed"
        );
    }
}

impl<T: Element> SwapDeleteJob<T> {
    /// Physically reclaim the id under the HNSW data lock.
    fn execute(self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        controller.hnsw.swap_delete(self.id);
        tracing::debug!(id = self.id, "swap-delete job completed");
    }
}
