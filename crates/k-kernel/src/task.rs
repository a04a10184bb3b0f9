// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Task records and the task record pool
//!
//! A task is a slot in a fixed pool of task control blocks. Slots are
//! recycled through an intrusive free list; a [`TaskId`] carries the slot
//! index plus a generation counter, so a handle to a deleted-and-reused
//! slot is detected instead of silently acting on the wrong task.
//!
//! Queue membership is explicit: a task is in at most one of the ready
//! queue, one wait list, or the free pool, and the [`Membership`] tag says
//! which. One intrusive link pair serves whichever queue the task is on.

use k_common::{Deadline, Error, Result};

use crate::arch::TaskContext;
use crate::config::MAX_TASKS;
use crate::ipc::Message;

/// Maximum task name length in bytes
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Task entry function type (C calling convention for portability)
pub type TaskEntry = extern "C" fn(arg: usize);

// ============================================================================
// Identifiers and priorities
// ============================================================================

/// Task identifier: pool slot index plus a generation counter
///
/// The generation is bumped every time a slot is recycled, so stale handles
/// fail with `InvalidId` rather than addressing the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId {
    slot: u8,
    generation: u8,
}

impl TaskId {
    /// Invalid task id (used for "no task")
    pub const INVALID: TaskId = TaskId {
        slot: 0xFF,
        generation: 0xFF,
    };

    /// Create a task id from raw parts
    #[must_use]
    pub const fn new(slot: u8, generation: u8) -> Self {
        Self { slot, generation }
    }

    /// The pool slot index
    #[must_use]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// The generation this handle was issued for
    #[must_use]
    pub const fn generation(&self) -> u8 {
        self.generation
    }

    /// Check if this is a valid task id
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.slot != 0xFF
    }
}

/// Task priority; lower numeric value = higher priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    /// The highest priority in the system
    pub const HIGHEST: Priority = Priority(0);

    /// Create a priority from its numeric rank
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// The numeric rank
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Check whether this priority outranks `other`
    #[must_use]
    pub const fn is_higher_than(&self, other: Priority) -> bool {
        self.0 < other.0
    }
}

// ============================================================================
// Task state machine
// ============================================================================

/// Task state
///
/// `Dormant -> Ready -> Running -> {Ready | Waiting | Dormant}`,
/// `Waiting -> Ready`; `Dormant` slots are recycled through the free pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is unused (or the task has exited) and may be recycled
    Dormant,
    /// Eligible to run, enqueued in the ready queue
    Ready,
    /// Currently executing; never present in any queue
    Running,
    /// Blocked on a delay, a suspend, or a wait list
    Waiting,
}

impl TaskState {
    /// Check if the task can be scheduled
    #[must_use]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the slot holds a live task
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Dormant)
    }
}

/// What a Waiting task is waiting on
///
/// Indices refer to the kernel's fixed object tables. The timeout sweep and
/// task deletion use this to find and unlink the waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// Sleeping until a deadline
    Delay,
    /// Explicitly suspended; only `resume` makes it ready again
    Suspended,
    /// Blocked acquiring a mutex
    Mutex(u8),
    /// Blocked acquiring a semaphore
    Semaphore(u8),
    /// Blocked fetching from a mailbox
    Mailbox(u8),
    /// Blocked fetching from a message queue
    MsgQueue(u8),
}

/// Which queue (if any) currently links this task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Not linked anywhere (the Running task, or mid-transition)
    None,
    /// Linked into the ready queue
    Ready,
    /// Linked into the wait list identified by the source
    Wait(WaitSource),
    /// Linked into the free pool
    FreeList,
}

/// How the last wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited resource was delivered
    Completed,
    /// The wait deadline expired first
    TimedOut,
}

/// Intrusive link pair (pool slot indices)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Links {
    /// Previous task in the queue, if any
    pub prev: Option<u8>,
    /// Next task in the queue, if any
    pub next: Option<u8>,
}

impl Links {
    /// Unlinked
    pub const NONE: Links = Links {
        prev: None,
        next: None,
    };
}

/// Per-task counters
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    /// Times this task was made Running
    pub schedule_count: u32,
    /// Times this task yielded voluntarily
    pub yield_count: u32,
}

// ============================================================================
// Task control block
// ============================================================================

/// Task control block: one per pool slot
pub struct Tcb {
    /// Handle for the current occupant (generation included)
    pub id: TaskId,
    /// Current state
    pub state: TaskState,
    /// Effective priority (may be boosted by priority inheritance)
    pub priority: Priority,
    /// Base priority, restored when inheritance ends
    pub base_priority: Priority,
    /// Entry point (None for an empty slot)
    pub entry: Option<TaskEntry>,
    /// Argument handed to the entry function
    pub arg: usize,
    /// Saved execution context; written only while the task is not Running
    pub context: TaskContext,
    /// Stack region base (lowest address)
    pub stack_base: usize,
    /// Stack region size in bytes
    pub stack_size: usize,
    /// Which queue currently links this task
    pub membership: Membership,
    /// Intrusive links for that queue
    pub links: Links,
    /// Expiry point for a timed wait
    pub deadline: Option<Deadline>,
    /// How the most recent wait ended
    pub wait_outcome: WaitOutcome,
    /// Number of mutexes this task currently owns
    pub owned_mutexes: u8,
    /// Message delivered directly by a post while this task was waiting
    pub msg: Option<Message>,
    /// Time slice allocation in ticks (0 = no round-robin rotation)
    pub time_slice: u32,
    /// Ticks remaining in the current slice
    pub slice_remaining: u32,
    /// Counters
    pub stats: TaskStats,
    name: [u8; MAX_TASK_NAME_LEN],
    name_len: usize,
}

impl Tcb {
    /// An empty, dormant slot
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            id: TaskId::new(0, 0),
            state: TaskState::Dormant,
            priority: Priority::new(0),
            base_priority: Priority::new(0),
            entry: None,
            arg: 0,
            context: TaskContext::new(),
            stack_base: 0,
            stack_size: 0,
            membership: Membership::FreeList,
            links: Links::NONE,
            deadline: None,
            wait_outcome: WaitOutcome::Completed,
            owned_mutexes: 0,
            msg: None,
            time_slice: 0,
            slice_remaining: 0,
            stats: TaskStats {
                schedule_count: 0,
                yield_count: 0,
            },
            name: [0u8; MAX_TASK_NAME_LEN],
            name_len: 0,
        }
    }

    /// Set the task name (truncated to [`MAX_TASK_NAME_LEN`])
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_TASK_NAME_LEN);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len;
    }

    /// Get the task name
    #[must_use]
    pub fn name_str(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("???")
    }

    /// Check whether the effective priority is currently inherited
    #[must_use]
    pub fn is_priority_boosted(&self) -> bool {
        self.priority.is_higher_than(self.base_priority)
    }

    /// Refill the round-robin slice
    pub fn reset_time_slice(&mut self) {
        self.slice_remaining = self.time_slice;
    }

    /// Burn one tick of the slice; returns true when it expires
    pub fn tick_time_slice(&mut self) -> bool {
        if self.time_slice == 0 {
            return false;
        }
        self.slice_remaining = self.slice_remaining.saturating_sub(1);
        self.slice_remaining == 0
    }
}

// ============================================================================
// Task record pool
// ============================================================================

/// Fixed pool of task control blocks with an intrusive free list
pub struct TaskPool {
    slots: [Tcb; MAX_TASKS],
    free_head: Option<u8>,
    live: usize,
}

impl TaskPool {
    /// Create an unchained pool; [`TaskPool::init`] must run before use
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: Tcb = Tcb::empty();
        Self {
            slots: [EMPTY; MAX_TASKS],
            free_head: None,
            live: 0,
        }
    }

    /// Chain every slot into the free list (runs once at kernel init)
    pub fn init(&mut self) {
        for i in 0..MAX_TASKS {
            let tcb = &mut self.slots[i];
            tcb.id = TaskId::new(i as u8, 0);
            tcb.state = TaskState::Dormant;
            tcb.membership = Membership::FreeList;
            tcb.links = Links {
                prev: None,
                next: if i + 1 < MAX_TASKS {
                    Some((i + 1) as u8)
                } else {
                    None
                },
            };
        }
        self.free_head = Some(0);
        self.live = 0;
    }

    /// Remove one slot from the free list and hand it to the caller
    ///
    /// The returned id carries the slot's current generation. The slot stays
    /// Dormant until the caller finishes populating it.
    pub fn acquire_record(&mut self) -> Option<TaskId> {
        let slot = self.free_head?;
        let tcb = &mut self.slots[slot as usize];
        debug_assert_eq!(tcb.membership, Membership::FreeList);
        self.free_head = tcb.links.next;
        if let Some(next) = self.free_head {
            self.slots[next as usize].links.prev = None;
        }
        let tcb = &mut self.slots[slot as usize];
        tcb.links = Links::NONE;
        tcb.membership = Membership::None;
        self.live += 1;
        Some(tcb.id)
    }

    /// Return a slot to the free list
    ///
    /// Only legal once the task is Dormant, owns no mutex, and is unlinked
    /// from every queue. Bumps the generation so outstanding handles go
    /// stale.
    pub fn release_record(&mut self, slot: u8) -> Result<()> {
        let tcb = &mut self.slots[slot as usize];
        if tcb.state != TaskState::Dormant
            || tcb.owned_mutexes != 0
            || tcb.membership != Membership::None
        {
            return Err(Error::InvalidState);
        }
        tcb.id = TaskId::new(slot, tcb.id.generation().wrapping_add(1));
        tcb.entry = None;
        tcb.msg = None;
        tcb.deadline = None;
        tcb.membership = Membership::FreeList;
        tcb.links = Links {
            prev: None,
            next: self.free_head,
        };
        if let Some(old) = self.free_head {
            self.slots[old as usize].links.prev = Some(slot);
        }
        self.free_head = Some(slot);
        self.live -= 1;
        Ok(())
    }

    /// Resolve a handle to its slot index
    ///
    /// Fails with `InvalidId` if the slot is out of range, the generation is
    /// stale, or the slot is Dormant.
    pub fn resolve(&self, id: TaskId) -> Result<u8> {
        let slot = id.slot() as usize;
        if slot >= MAX_TASKS {
            return Err(Error::InvalidId);
        }
        let tcb = &self.slots[slot];
        if tcb.id != id || !tcb.state.is_live() {
            return Err(Error::InvalidId);
        }
        Ok(id.slot())
    }

    /// Borrow a slot by index
    #[must_use]
    pub fn tcb(&self, slot: u8) -> &Tcb {
        &self.slots[slot as usize]
    }

    /// Mutably borrow a slot by index
    #[must_use]
    pub fn tcb_mut(&mut self, slot: u8) -> &mut Tcb {
        &mut self.slots[slot as usize]
    }

    /// Number of live (non-dormant) tasks
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle task body: parks the core until the next interrupt
pub extern "C" fn idle_task(_arg: usize) {
    loop {
        crate::arch::wait_for_interrupt();
    }
}
