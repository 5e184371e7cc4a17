//! Graph storage.
//!
//! Dense id-keyed vector blobs live in contiguous blocks of `block_size`
//! vectors, grown on append and released when the last block empties.
//! Per-node state (level, neighbor lists, incoming-edge sets, flags) lives in
//! an `Arc<NodeEntry>` so a reader can clone the handle out from under a
//! brief shared lock on the outer arena and then mutate the node's own
//! links under its private mutex, without holding the arena lock for the
//! duration.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::distance::{Element, Metric};
use crate::Id;

const IN_PROCESS: u8 = 0b01;
const DELETE_MARK: u8 = 0b10;

/// Per-level outgoing neighbors plus the uni-directional incoming set.
#[derive(Debug, Default, Clone)]
pub struct LevelLinks {
    pub neighbors: Vec<Id>,
    pub incoming: HashSet<Id>,
}

/// Per-node graph state: level, per-level links under one mutex, and the two
/// atomic lifecycle flags.
pub struct NodeEntry {
    pub top_level: usize,
    flags: AtomicU8,
    links: Mutex<Vec<LevelLinks>>,
}

impl NodeEntry {
    fn new(top_level: usize) -> Self {
        Self {
            top_level,
            flags: AtomicU8::new(IN_PROCESS),
            links: Mutex::new((0..=top_level).map(|_| LevelLinks::default()).collect()),
        }
    }

    pub fn is_in_process(&self) -> bool {
        self.flags.load(Ordering::Acquire) & IN_PROCESS != 0
    }

    pub fn clear_in_process(&self) {
        self.flags.fetch_and(!IN_PROCESS, Ordering::AcqRel);
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DELETE_MARK != 0
    }

    pub fn mark_deleted(&self) {
        self.flags.fetch_or(DELETE_MARK, Ordering::AcqRel);
    }

    pub fn links(&self) -> MutexGuard<'_, Vec<LevelLinks>> {
        self.links.lock()
    }

    pub fn num_links(&self, level: usize) -> usize {
        self.links.lock().get(level).map(|l| l.neighbors.len()).unwrap_or(0)
    }
}

struct GraphInner<T: Element> {
    dim: usize,
    block_size: usize,
    blocks: Vec<Vec<T>>,
    nodes: Vec<Arc<NodeEntry>>,
}

impl<T: Element> GraphInner<T> {
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

    /// Release trailing blocks that no live id maps into anymore. A block
    /// is released only once it's entirely empty; the exact shrink trigger
    /// below is an open implementation choice.
    fn release_empty_tail_blocks(&mut self) {
        while !self.blocks.is_empty()
            && (self.blocks.len() - 1) * self.block_size >= self.nodes.len()
        {
            self.blocks.pop();
        }
    }
}

/// Dense id-keyed arena: vector blobs in blocks, per-node graph metadata in
/// an `Arc<NodeEntry>` vector. Growth and physical removal both require the
/// exclusive (write) side of the inner lock; the common case — reading a
/// node's `Arc` handle or a vector blob for a distance computation — only
/// needs the shared (read) side, and node-link mutation after that doesn't
/// need the arena lock at all.
pub struct GraphStorage<T: Element> {
    inner: RwLock<GraphInner<T>>,
}

impl<T: Element> GraphStorage<T> {
    pub fn new(dim: usize, block_size: usize) -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                dim,
                block_size,
                blocks: Vec::new(),
                nodes: Vec::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        let inner = self.inner.read();
        inner.blocks.len() * inner.block_size
    }

    /// Allocate the next dense id, copy `vector` into its block slot, and
    /// construct an empty graph node at `top_level` with `IN_PROCESS` set.
    /// Must be called under the caller's exclusive index-data lock so id
    /// allocation stays serialized with the density invariant.
    pub fn push(&self, vector: &[T], top_level: usize) -> Id {
        let mut inner = self.inner.write();
        let id = inner.nodes.len() as Id;
        inner.ensure_block_for(id);
        inner.vector_slice_mut(id).copy_from_slice(vector);
        inner.nodes.push(Arc::new(NodeEntry::new(top_level)));
        id
    }

    pub fn node(&self, id: Id) -> Option<Arc<NodeEntry>> {
        self.inner.read().nodes.get(id as usize).cloned()
    }

    pub fn with_vector<R>(&self, id: Id, f: impl FnOnce(&[T]) -> R) -> R {
        let inner = self.inner.read();
        f(inner.vector_slice(id))
    }

    pub fn distance(&self, metric: Metric, a: Id, b: Id) -> f32 {
        let inner = self.inner.read();
        metric.distance(inner.vector_slice(a), inner.vector_slice(b))
    }

    pub fn distance_to_query(&self, metric: Metric, a: Id, query: &[T]) -> f32 {
        let inner = self.inner.read();
        metric.distance(inner.vector_slice(a), query)
    }

    /// Physically reclaim `id` by moving the last id's blob and node handle
    /// into its slot. Returns the id that used
    /// to be last (and must now be renamed to `id` everywhere else — edges
    /// and the label map) or `None` if `id` already was the last id.
    pub fn remove_and_swap(&self, id: Id) -> Option<Id> {
        let mut inner = self.inner.write();
        let last = inner.nodes.len() as Id - 1;
        if id != last {
            let tmp: Vec<T> = inner.vector_slice(last).to_vec();
            inner.vector_slice_mut(id).copy_from_slice(&tmp);
            inner.nodes[id as usize] = inner.nodes[last as usize].clone();
        }
        inner.nodes.pop();
        inner.release_empty_tail_blocks();
        if id != last { Some(last) } else { None }
    }
}
