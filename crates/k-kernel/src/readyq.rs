// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Ready-queue manager
//!
//! Two interchangeable implementations of the same abstract queue:
//!
//! - [`ListReadyQueue`]: one priority-ordered doubly-linked list threaded
//!   through the task pool's intrusive links. O(n) insert, O(1) peek.
//! - [`BitmapReadyQueue`]: a bitmap of occupied priority levels plus one
//!   FIFO list per level. O(1) insert, bit-scan peek.
//!
//! Both obey the same contract: `peek_highest` returns the Ready task with
//! the numerically smallest priority, and tasks inserted at an occupied
//! priority go behind the existing holders (FIFO tie-break, which is what
//! makes round-robin rotation work). The implementation is chosen at build
//! time (`ready-list` feature); the two are never mixed in one image.

use crate::config::PRIORITY_COUNT;
use crate::panic::structural_fault;
use crate::task::{Links, Membership, TaskPool, TaskState};

/// Common contract of both ready-queue implementations
pub trait ReadyQueue {
    /// Enqueue a Ready, unlinked task. FIFO tie-break within a priority.
    fn insert(&mut self, pool: &mut TaskPool, slot: u8);

    /// Unlink an enqueued task from whichever position it occupies.
    fn remove(&mut self, pool: &mut TaskPool, slot: u8);

    /// The highest-priority Ready task, if any. O(1).
    fn peek_highest(&self, pool: &TaskPool) -> Option<u8>;

    /// Number of enqueued tasks.
    fn len(&self) -> usize;

    /// Check whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn debug_check_insertable(pool: &TaskPool, slot: u8) {
    debug_assert_eq!(pool.tcb(slot).state, TaskState::Ready);
    debug_assert_eq!(pool.tcb(slot).membership, Membership::None);
}

/// The head entry must always be schedulable; anything else means the pool
/// or the queue links were corrupted, and scheduling from it would run a
/// task in an undefined state.
fn check_head(pool: &TaskPool, head: Option<u8>) {
    if let Some(h) = head {
        if pool.tcb(h).state != TaskState::Ready {
            structural_fault("ready queue head is not in the Ready state");
        }
    }
}

// ============================================================================
// Ordered-list implementation
// ============================================================================

/// Single priority-ordered doubly-linked list of Ready tasks
pub struct ListReadyQueue {
    head: Option<u8>,
    tail: Option<u8>,
    len: usize,
}

impl ListReadyQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl Default for ListReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue for ListReadyQueue {
    fn insert(&mut self, pool: &mut TaskPool, slot: u8) {
        debug_check_insertable(pool, slot);
        let prio = pool.tcb(slot).priority;

        // Walk past every entry that outranks or ties the new task, so the
        // new task lands behind existing holders of its priority.
        let mut prev: Option<u8> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if prio.is_higher_than(pool.tcb(c).priority) {
                break;
            }
            prev = Some(c);
            cur = pool.tcb(c).links.next;
        }

        pool.tcb_mut(slot).links = Links { prev, next: cur };
        match prev {
            Some(p) => pool.tcb_mut(p).links.next = Some(slot),
            None => self.head = Some(slot),
        }
        match cur {
            Some(c) => pool.tcb_mut(c).links.prev = Some(slot),
            None => self.tail = Some(slot),
        }
        pool.tcb_mut(slot).membership = Membership::Ready;
        self.len += 1;
    }

    fn remove(&mut self, pool: &mut TaskPool, slot: u8) {
        debug_assert_eq!(pool.tcb(slot).membership, Membership::Ready);
        let Links { prev, next } = pool.tcb(slot).links;
        match prev {
            Some(p) => pool.tcb_mut(p).links.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => pool.tcb_mut(n).links.prev = prev,
            None => self.tail = prev,
        }
        let tcb = pool.tcb_mut(slot);
        tcb.links = Links::NONE;
        tcb.membership = Membership::None;
        self.len -= 1;
    }

    fn peek_highest(&self, pool: &TaskPool) -> Option<u8> {
        check_head(pool, self.head);
        self.head
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ============================================================================
// Bitmap implementation
// ============================================================================

const BITMAP_WORDS: usize = (PRIORITY_COUNT + 31) / 32;

/// Fixed bitset over priority levels
///
/// Bit `i` set means priority level `i` has at least one Ready task. The
/// highest priority is the numerically smallest level, so the scan looks
/// for the least-significant set bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioBitmap {
    bits: [u32; BITMAP_WORDS],
}

impl PrioBitmap {
    /// All levels empty
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: [0; BITMAP_WORDS],
        }
    }

    /// Mark a level occupied
    pub fn set(&mut self, level: usize) {
        self.bits[level / 32] |= 1 << (level % 32);
    }

    /// Mark a level empty
    pub fn clear(&mut self, level: usize) {
        self.bits[level / 32] &= !(1 << (level % 32));
    }

    /// Check a level
    #[must_use]
    pub fn is_set(&self, level: usize) -> bool {
        self.bits[level / 32] & (1 << (level % 32)) != 0
    }

    /// The occupied level with the smallest index, if any
    #[must_use]
    pub fn first_set(&self) -> Option<usize> {
        for (w, word) in self.bits.iter().enumerate() {
            if *word != 0 {
                return Some(w * 32 + word.trailing_zeros() as usize);
            }
        }
        None
    }
}

impl Default for PrioBitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Bitmap-indexed priority table: one FIFO list per active priority level
pub struct BitmapReadyQueue {
    bitmap: PrioBitmap,
    heads: [Option<u8>; PRIORITY_COUNT],
    tails: [Option<u8>; PRIORITY_COUNT],
    len: usize,
}

impl BitmapReadyQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitmap: PrioBitmap::new(),
            heads: [None; PRIORITY_COUNT],
            tails: [None; PRIORITY_COUNT],
            len: 0,
        }
    }
}

impl Default for BitmapReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue for BitmapReadyQueue {
    fn insert(&mut self, pool: &mut TaskPool, slot: u8) {
        debug_check_insertable(pool, slot);
        let level = pool.tcb(slot).priority.as_u8() as usize;

        // Append at the tail of the level's FIFO
        let old_tail = self.tails[level];
        pool.tcb_mut(slot).links = Links {
            prev: old_tail,
            next: None,
        };
        match old_tail {
            Some(t) => pool.tcb_mut(t).links.next = Some(slot),
            None => self.heads[level] = Some(slot),
        }
        self.tails[level] = Some(slot);
        self.bitmap.set(level);
        pool.tcb_mut(slot).membership = Membership::Ready;
        self.len += 1;
    }

    fn remove(&mut self, pool: &mut TaskPool, slot: u8) {
        debug_assert_eq!(pool.tcb(slot).membership, Membership::Ready);
        let level = pool.tcb(slot).priority.as_u8() as usize;
        let Links { prev, next } = pool.tcb(slot).links;
        match prev {
            Some(p) => pool.tcb_mut(p).links.next = next,
            None => self.heads[level] = next,
        }
        match next {
            Some(n) => pool.tcb_mut(n).links.prev = prev,
            None => self.tails[level] = prev,
        }
        if self.heads[level].is_none() {
            self.bitmap.clear(level);
        }
        let tcb = pool.tcb_mut(slot);
        tcb.links = Links::NONE;
        tcb.membership = Membership::None;
        self.len -= 1;
    }

    fn peek_highest(&self, pool: &TaskPool) -> Option<u8> {
        let level = self.bitmap.first_set()?;
        let head = self.heads[level];
        check_head(pool, head);
        head
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// The implementation this kernel image schedules with
#[cfg(feature = "ready-list")]
pub type ActiveReadyQueue = ListReadyQueue;

/// The implementation this kernel image schedules with
#[cfg(not(feature = "ready-list"))]
pub type ActiveReadyQueue = BitmapReadyQueue;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn make_ready(pool: &mut TaskPool, priority: u8) -> u8 {
        let id = pool.acquire_record().unwrap();
        let tcb = pool.tcb_mut(id.slot());
        tcb.state = TaskState::Ready;
        tcb.priority = Priority::new(priority);
        tcb.base_priority = Priority::new(priority);
        id.slot()
    }

    fn fifo_tie_break_impl<Q: ReadyQueue>(q: &mut Q) {
        let mut pool = TaskPool::new();
        pool.init();

        let a = make_ready(&mut pool, 5);
        let b = make_ready(&mut pool, 5);
        let c = make_ready(&mut pool, 10);
        q.insert(&mut pool, a);
        q.insert(&mut pool, b);
        q.insert(&mut pool, c);

        // Same priority drains in insertion order; lower ranks wait
        assert_eq!(q.peek_highest(&pool), Some(a));
        q.remove(&mut pool, a);
        assert_eq!(q.peek_highest(&pool), Some(b));

        // Re-inserting a sends it behind b: one round-robin rotation
        pool.tcb_mut(a).state = TaskState::Ready;
        q.insert(&mut pool, a);
        assert_eq!(q.peek_highest(&pool), Some(b));
        q.remove(&mut pool, b);
        assert_eq!(q.peek_highest(&pool), Some(a));
        q.remove(&mut pool, a);
        assert_eq!(q.peek_highest(&pool), Some(c));
    }

    fn ordering_impl<Q: ReadyQueue>(q: &mut Q) {
        let mut pool = TaskPool::new();
        pool.init();

        let priorities = [9u8, 3, 14, 3, 0, 7];
        let mut slots = [0u8; 6];
        for (i, p) in priorities.iter().enumerate() {
            slots[i] = make_ready(&mut pool, *p);
            q.insert(&mut pool, slots[i]);
        }
        assert_eq!(q.len(), 6);

        // Drain: priorities must come out ascending, ties in insert order
        let mut drained = heapless::Vec::<u8, 6>::new();
        while let Some(s) = q.peek_highest(&pool) {
            drained.push(pool.tcb(s).priority.as_u8()).unwrap();
            q.remove(&mut pool, s);
        }
        assert_eq!(&drained[..], &[0, 3, 3, 7, 9, 14]);
        assert!(q.is_empty());
    }

    fn remove_from_middle_impl<Q: ReadyQueue>(q: &mut Q) {
        let mut pool = TaskPool::new();
        pool.init();

        let a = make_ready(&mut pool, 1);
        let b = make_ready(&mut pool, 2);
        let c = make_ready(&mut pool, 3);
        q.insert(&mut pool, a);
        q.insert(&mut pool, b);
        q.insert(&mut pool, c);

        q.remove(&mut pool, b);
        assert_eq!(pool.tcb(b).membership, Membership::None);
        assert_eq!(q.peek_highest(&pool), Some(a));
        q.remove(&mut pool, a);
        assert_eq!(q.peek_highest(&pool), Some(c));
    }

    #[test]
    fn test_list_fifo_tie_break() {
        fifo_tie_break_impl(&mut ListReadyQueue::new());
    }

    #[test]
    fn test_bitmap_fifo_tie_break() {
        fifo_tie_break_impl(&mut BitmapReadyQueue::new());
    }

    #[test]
    fn test_list_ordering() {
        ordering_impl(&mut ListReadyQueue::new());
    }

    #[test]
    fn test_bitmap_ordering() {
        ordering_impl(&mut BitmapReadyQueue::new());
    }

    #[test]
    fn test_list_remove_from_middle() {
        remove_from_middle_impl(&mut ListReadyQueue::new());
    }

    #[test]
    fn test_bitmap_remove_from_middle() {
        remove_from_middle_impl(&mut BitmapReadyQueue::new());
    }

    #[test]
    fn test_bitmap_scan_prefers_low_levels() {
        let mut bm = PrioBitmap::new();
        assert_eq!(bm.first_set(), None);
        bm.set(17);
        bm.set(4);
        assert_eq!(bm.first_set(), Some(4));
        bm.clear(4);
        assert_eq!(bm.first_set(), Some(17));
        assert!(bm.is_set(17));
        bm.clear(17);
        assert_eq!(bm.first_set(), None);
    }

    #[test]
    #[should_panic(expected = "ready queue head")]
    fn test_corrupted_head_faults() {
        let mut pool = TaskPool::new();
        pool.init();
        let mut q = BitmapReadyQueue::new();
        let a = make_ready(&mut pool, 5);
        q.insert(&mut pool, a);
        // Corrupt the state behind the queue's back
        pool.tcb_mut(a).state = TaskState::Waiting;
        let _ = q.peek_highest(&pool);
    }
}
