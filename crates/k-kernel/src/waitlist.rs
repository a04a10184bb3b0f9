// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Event wait lists
//!
//! The generic blocked-task queue shared by mutexes, semaphores, mailboxes
//! and message queues. A list is either FIFO or priority-sorted; within a
//! priority, waiters queue FIFO in both modes. Like the ready queue, the
//! list is intrusive: it threads the task pool's link pair and flips the
//! task's membership tag.

use crate::task::{Links, Membership, Priority, TaskPool, TaskState, WaitSource};

/// Queueing discipline of a wait list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOrder {
    /// First blocked, first woken
    Fifo,
    /// Highest priority woken first; FIFO within a priority
    Priority,
}

/// Result of a blocking acquire/fetch attempt
///
/// `Blocked` means the caller was enqueued and the scheduler has switched
/// away; on hardware, control returns to the caller only after the wait
/// ends, and the task's recorded wait outcome says how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendStatus {
    /// The resource was available; no wait happened
    Immediate,
    /// The caller is now waiting on the list
    Blocked,
}

/// Intrusive queue of Waiting tasks
pub struct WaitList {
    order: WaitOrder,
    head: Option<u8>,
    tail: Option<u8>,
    len: usize,
}

impl WaitList {
    /// Create an empty list with the given discipline
    #[must_use]
    pub const fn new(order: WaitOrder) -> Self {
        Self {
            order,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Change the discipline of an empty list (object-creation time only)
    pub fn set_order(&mut self, order: WaitOrder) {
        debug_assert!(self.is_empty());
        self.order = order;
    }

    /// Number of waiters
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether anyone is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block a task on this list
    ///
    /// The caller has already taken the task off the ready queue (or it is
    /// the running task); here it must be unlinked. Sets the task Waiting
    /// and records `source` so deletion and the timeout sweep can find the
    /// list again.
    pub fn enqueue(&mut self, pool: &mut TaskPool, slot: u8, source: WaitSource) {
        debug_assert_eq!(pool.tcb(slot).membership, Membership::None);

        let insert_after = match self.order {
            WaitOrder::Fifo => self.tail,
            WaitOrder::Priority => {
                let prio = pool.tcb(slot).priority;
                // Stop before the first waiter the new task outranks
                let mut after: Option<u8> = None;
                let mut cur = self.head;
                while let Some(c) = cur {
                    if prio.is_higher_than(pool.tcb(c).priority) {
                        break;
                    }
                    after = Some(c);
                    cur = pool.tcb(c).links.next;
                }
                after
            }
        };

        let next = match insert_after {
            Some(a) => pool.tcb(a).links.next,
            None => self.head,
        };
        pool.tcb_mut(slot).links = Links {
            prev: insert_after,
            next,
        };
        match insert_after {
            Some(a) => pool.tcb_mut(a).links.next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => pool.tcb_mut(n).links.prev = Some(slot),
            None => self.tail = Some(slot),
        }

        let tcb = pool.tcb_mut(slot);
        tcb.state = TaskState::Waiting;
        tcb.membership = Membership::Wait(source);
        self.len += 1;
    }

    /// Unlink a specific waiter (timeout sweep, deletion, priority re-sort)
    pub fn remove(&mut self, pool: &mut TaskPool, slot: u8) {
        debug_assert!(matches!(pool.tcb(slot).membership, Membership::Wait(_)));
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

    /// Unlink and return the front waiter (the wake-one operation)
    pub fn pop_front(&mut self, pool: &mut TaskPool) -> Option<u8> {
        let slot = self.head?;
        self.remove(pool, slot);
        Some(slot)
    }

    /// The front waiter without unlinking it
    #[must_use]
    pub fn peek_front(&self) -> Option<u8> {
        self.head
    }

    /// Priority of the front waiter
    ///
    /// On a priority-ordered list this is the strongest waiting priority,
    /// which is what priority inheritance needs.
    #[must_use]
    pub fn front_priority(&self, pool: &TaskPool) -> Option<Priority> {
        self.head.map(|h| pool.tcb(h).priority)
    }
}
