//! A sliding window of packets shared by every worker.
//!
//! Grounded on `infodups/buffer.c`: a doubly-linked list over an arena that
//! never shrinks (there, an obstack; here, a `Vec` that only grows,
//! recycling indices through a free list instead of ever deallocating).
//! Nodes are appended by the single producer thread and read backward by
//! worker threads; each worker keeps one "marker" node, its personal lower
//! bound on how far back it ever needs to rescan, and a per-node in-use
//! bitmask (one bit per worker id) records which markers still depend on a
//! given node. Trimming drops the oldest prefix with an all-zero bitmask.
//!
//! Two refinements over the original's synchronization, both called out in
//! DESIGN.md: the linked-list structure (`prev`/`next`/`first`/`last`) is
//! protected by one `RwLock`, held for an entire backward scan so a
//! concurrent trim can never unlink a node a scan is still visiting (the
//! original relies on this never happening in practice, without a lock to
//! guarantee it); and each node's payload gets its own `RwLock` so the
//! representative-packet rewrite in [`crate::dissect::Frame`] (the
//! `pkt_copy` equivalent) cannot race a concurrent reader.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

pub const MAX_WORKERS: usize = 64;

struct Node<T> {
    prev: Option<usize>,
    next: Option<usize>,
    free_next: Option<usize>,
    in_use: AtomicU64,
    load: RwLock<T>,
}

struct Inner<T> {
    nodes: Vec<Node<T>>,
    first: Option<usize>,
    last: Option<usize>,
    free_head: Option<usize>,
    count: u64,
    seeded: bool,
}

/// Opaque handle to a node in a [`Window`]. Only meaningful for the window
/// that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(usize);

pub struct Window<T> {
    max_count: u64,
    workers: usize,
    markers: Vec<AtomicI64>,
    inner: RwLock<Inner<T>>,
}

impl<T> Window<T> {
    /// `workers` is the number of worker threads sharing this window (0
    /// means single-threaded mode, where every caller uses worker id 0).
    /// `max_count` bounds memory use; 0 means unbounded.
    pub fn new(workers: usize, max_count: u64) -> Window<T> {
        let marker_slots = workers.max(1);
        Window {
            max_count,
            workers,
            markers: (0..marker_slots).map(|_| AtomicI64::new(-1)).collect(),
            inner: RwLock::new(Inner {
                nodes: Vec::new(),
                first: None,
                last: None,
                free_head: None,
                count: 0,
                seeded: false,
            }),
        }
    }

    /// Appends a new node holding `load`, reusing a freed slot if one is
    /// available. The very first node ever appended is marked in-use for
    /// every worker id, matching `buffer_init_markers`: otherwise a
    /// worker's first scan, finding no marker of its own yet, would have
    /// nothing to stop it from walking off the front of the window.
    pub fn push(&self, load: T) -> NodeId {
        let mut inner = self.inner.write().unwrap();
        let idx = match inner.free_head {
            Some(free) => {
                inner.free_head = inner.nodes[free].free_next;
                let node = &inner.nodes[free];
                node.in_use.store(0, Ordering::SeqCst);
                *node.load.write().unwrap() = load;
                free
            }
            None => {
                inner.nodes.push(Node {
                    prev: None,
                    next: None,
                    free_next: None,
                    in_use: AtomicU64::new(0),
                    load: RwLock::new(load),
                });
                inner.nodes.len() - 1
            }
        };
        inner.nodes[idx].prev = None;
        inner.nodes[idx].next = None;

        if inner.count == 0 {
            inner.first = Some(idx);
        } else {
            let last = inner.last.unwrap();
            inner.nodes[last].next = Some(idx);
            inner.nodes[idx].prev = Some(last);
        }
        inner.last = Some(idx);
        inner.count += 1;

        if !inner.seeded {
            inner.seeded = true;
            let ids: Vec<usize> = if self.workers == 0 {
                vec![0]
            } else {
                (0..self.workers).collect()
            };
            for id in ids {
                inner.nodes[idx].in_use.fetch_or(1u64 << id, Ordering::SeqCst);
                self.markers[id].store(idx as i64, Ordering::SeqCst);
            }
        }

        NodeId(idx)
    }

    /// `worker_id`'s current lower bound, or `None` before the first packet
    /// has seeded the window.
    pub fn marker(&self, worker_id: usize) -> Option<NodeId> {
        let raw = self.markers[worker_id].load(Ordering::SeqCst);
        if raw < 0 {
            None
        } else {
            Some(NodeId(raw as usize))
        }
    }

    /// Advances `worker_id`'s marker to `id`, analogous to
    /// `buffer_set_marker`: `id` becomes in-use for this worker, the old
    /// marker's hold is released, and future scans by this worker never
    /// walk past `id` again.
    ///
    /// Only call this with no [`WindowScan`] currently open on this thread;
    /// otherwise use [`WindowScan::set_marker`], which reuses the scan's
    /// already-held lock instead of taking a second one.
    pub fn set_marker(&self, id: NodeId, worker_id: usize) {
        let inner = self.inner.read().unwrap();
        inner.nodes[id.0].in_use.fetch_or(1u64 << worker_id, Ordering::SeqCst);
        let old = self.markers[worker_id].swap(id.0 as i64, Ordering::SeqCst);
        if old >= 0 {
            inner.nodes[old as usize]
                .in_use
                .fetch_and(!(1u64 << worker_id), Ordering::SeqCst);
        }
    }

    /// Opens a backward-scanning view of the window, holding one read lock
    /// on the structure for as long as it's alive. A concurrent [`Window::trim`]
    /// blocks until every in-flight scan finishes, so a node being visited
    /// can never be unlinked out from under the scan.
    pub fn start_scan(&self) -> WindowScan<'_, T> {
        WindowScan {
            inner: self.inner.read().unwrap(),
        }
    }

    /// Removes the oldest prefix of nodes whose in-use bitmask is zero,
    /// i.e. no worker's marker still depends on them. Mirrors
    /// `buffer_trim`.
    pub fn trim(&self) {
        let mut inner = self.inner.write().unwrap();
        loop {
            let first = match inner.first {
                Some(f) => f,
                None => return,
            };
            if inner.nodes[first].in_use.load(Ordering::SeqCst) != 0 {
                return;
            }
            Self::unlink(&mut inner, first);
        }
    }

    fn unlink(inner: &mut Inner<T>, idx: usize) {
        if inner.count == 1 {
            inner.first = None;
            inner.last = None;
        } else if inner.first == Some(idx) {
            let next = inner.nodes[idx].next.unwrap();
            inner.nodes[next].prev = None;
            inner.first = Some(next);
        } else if inner.last == Some(idx) {
            let prev = inner.nodes[idx].prev.unwrap();
            inner.nodes[prev].next = None;
            inner.last = Some(prev);
        } else {
            let prev = inner.nodes[idx].prev.unwrap();
            let next = inner.nodes[idx].next.unwrap();
            inner.nodes[prev].next = Some(next);
            inner.nodes[next].prev = Some(prev);
        }
        inner.nodes[idx].prev = None;
        inner.nodes[idx].next = None;
        inner.nodes[idx].free_next = inner.free_head;
        inner.free_head = Some(idx);
        inner.count -= 1;
    }

    pub fn count(&self) -> u64 {
        self.inner.read().unwrap().count
    }

    pub fn is_full(&self) -> bool {
        self.max_count != 0 && self.count() >= self.max_count
    }
}

/// A backward-scanning view over a [`Window`]'s nodes, holding the
/// structural read lock for its whole lifetime.
pub struct WindowScan<'w, T> {
    inner: RwLockReadGuard<'w, Inner<T>>,
}

impl<'w, T> WindowScan<'w, T> {
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.inner.nodes[id.0].prev.map(NodeId)
    }

    pub fn with_load<R>(&self, id: NodeId, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.nodes[id.0].load.read().unwrap();
        f(&guard)
    }

    pub fn with_load_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.nodes[id.0].load.write().unwrap();
        f(&mut guard)
    }

    /// Equivalent to [`Window::set_marker`], but reuses this scan's
    /// already-held structural read lock instead of taking a fresh one.
    /// Callers still holding a `WindowScan` must use this, not
    /// `Window::set_marker`: taking a second read lock on the same thread
    /// while a `Window::trim` write lock is queued deadlocks under std's
    /// write-preferring `RwLock`.
    pub fn set_marker(&self, window: &Window<T>, id: NodeId, worker_id: usize) {
        self.inner.nodes[id.0].in_use.fetch_or(1u64 << worker_id, Ordering::SeqCst);
        let old = window.markers[worker_id].swap(id.0 as i64, Ordering::SeqCst);
        if old >= 0 {
            self.inner.nodes[old as usize]
                .in_use
                .fetch_and(!(1u64 << worker_id), Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_node_is_marked_for_every_worker() {
        let w: Window<i32> = Window::new(3, 0);
        let n0 = w.push(10);
        for id in 0..3 {
            assert_eq!(w.marker(id), Some(n0));
        }
    }

    #[test]
    fn trim_stops_at_first_in_use_node() {
        let w: Window<i32> = Window::new(1, 0);
        let n0 = w.push(1);
        let _n1 = w.push(2);
        let n2 = w.push(3);
        // worker 0's marker starts at n0 (seeded); advance it to n2.
        w.set_marker(n2, 0);
        w.trim();
        assert_eq!(w.count(), 1);
        let scan = w.start_scan();
        assert_eq!(scan.prev(n2), None);
        let _ = n0;
    }

    #[test]
    fn scan_walks_backward_and_respects_marker() {
        let w: Window<i32> = Window::new(1, 0);
        let n0 = w.push(1);
        let n1 = w.push(2);
        let n2 = w.push(3);
        let scan = w.start_scan();
        assert_eq!(scan.prev(n2), Some(n1));
        assert_eq!(scan.prev(n1), Some(n0));
        assert_eq!(scan.prev(n0), None);
        assert_eq!(w.marker(0), Some(n0));
    }

    #[test]
    fn scan_set_marker_matches_window_set_marker() {
        let w: Window<i32> = Window::new(1, 0);
        let n0 = w.push(1);
        let _n1 = w.push(2);
        let n2 = w.push(3);
        let scan = w.start_scan();
        scan.set_marker(&w, n2, 0);
        drop(scan);
        assert_eq!(w.marker(0), Some(n2));
        w.trim();
        assert_eq!(w.count(), 1);
        let _ = n0;
    }

    #[test]
    fn fold_into_mutates_through_with_load_mut() {
        let w: Window<i32> = Window::new(1, 0);
        let n0 = w.push(100);
        let scan = w.start_scan();
        scan.with_load_mut(n0, |v| *v += 1);
        assert_eq!(scan.with_load(n0, |v| *v), 101);
    }

    #[test]
    fn is_full_respects_max_count() {
        let w: Window<i32> = Window::new(1, 2);
        assert!(!w.is_full());
        w.push(1);
        assert!(!w.is_full());
        w.push(2);
        assert!(w.is_full());
    }

    #[test]
    fn freed_slots_are_recycled() {
        let w: Window<i32> = Window::new(1, 0);
        let n0 = w.push(1);
        let n1 = w.push(2);
        w.set_marker(n1, 0);
        w.trim();
        assert_eq!(w.count(), 1);
        let n2 = w.push(3);
        // n2 should reuse n0's freed slot.
        assert_eq!(n2, n0);
    }
}
