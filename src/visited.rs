//! Visited-tag pool.
//!
//! Each search borrows a reusable tag array sized to the index's id-space
//! capacity. A node counts as "visited in this search" iff its tag slot
//! equals the fresh tag handed out for that search. When the per-array
//! counter would wrap, the array is zeroed and the counter restarts at 1 so
//! slot value `0` always means "never visited by this generation of tags".

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

struct VisitedList {
    tags: Vec<u32>,
    counter: u32,
}

impl VisitedList {
    fn new(capacity: usize) -> Self {
        Self {
            tags: vec![0; capacity],
            counter: 0,
        }
    }

    fn resize(&mut self, capacity: usize) {
        self.tags.resize(capacity, 0);
    }

    /// Returns the fresh tag for a new search; zeroes the array and restarts
    /// the counter on wraparound.
    fn fresh_tag(&mut self) -> u32 {
        if self.counter == u32::MAX {
            self.tags.iter_mut().for_each(|t| *t = 0);
            self.counter = 0;
        }
        self.counter += 1;
        self.counter
    }
}

/// Pool of reusable visited-tag arrays. Acquisition/release are `O(1)` under
/// a single mutex; the pool grows lazily to the high-water mark of
/// concurrent searches rather than being pre-sized.
pub struct VisitedPool {
    free: Mutex<Vec<VisitedList>>,
    capacity: AtomicU32,
}

impl VisitedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity: AtomicU32::new(capacity as u32),
        }
    }

    /// Grow the tag-array width to cover a larger id space. Existing arrays
    /// in the free list are resized lazily the next time they're handed out;
    /// in-flight handles keep their current width until they are next
    /// returned and reacquired.
    pub fn grow(&self, capacity: usize) {
        self.capacity.fetch_max(capacity as u32, Ordering::SeqCst);
    }

    /// Borrow a tag array and a fresh tag for this search. Must be paired
    /// with dropping the returned handle on every exit path (the handle's
    /// `Drop` impl returns the array to the pool, including on panic/early
    /// return via `?`).
    pub fn acquire(&self) -> VisitedHandle<'_> {
        let capacity = self.capacity.load(Ordering::SeqCst) as usize;
        let mut list = {
            let mut free = self.free.lock();
            free.pop().unwrap_or_else(|| VisitedList::new(capacity))
        };
        if list.tags.len() < capacity {
            list.resize(capacity);
        }
        let tag = list.fresh_tag();
        VisitedHandle {
            pool: self,
            list: Some(list),
            tag,
        }
    }
}

/// RAII handle over a borrowed tag array. Dropping it returns the array to
/// the pool regardless of how the search exited.
pub struct VisitedHandle<'a> {
    pool: &'a VisitedPool,
    list: Option<VisitedList>,
    tag: u32,
}

impl<'a> VisitedHandle<'a> {
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn is_visited(&self, id: u32) -> bool {
        self.list
            .as_ref()
            .and_then(|l| l.tags.get(id as usize))
            .map(|&t| t == self.tag)
            .unwrap_or(false)
    }

    pub fn mark_visited(&mut self, id: u32) {
        if let Some(list) = self.list.as_mut() {
            if (id as usize) < list.tags.len() {
                list.tags[id as usize] = self.tag;
            }
        }
    }
}

impl Drop for VisitedHandle<'_> {
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            self.pool.free.lock().push(list);
        }
    }
}
