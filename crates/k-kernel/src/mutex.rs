// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Mutexes with priority inheritance
//!
//! Binary resource locks. When a task blocks on a mutex held by a
//! lower-priority owner, the owner's effective priority is raised to the
//! waiter's so a middle-priority task cannot starve it (bounded priority
//! inversion). Boosts propagate along chains of owners that are themselves
//! blocked on other mutexes - by an explicit worklist with a visited set,
//! never by recursion, so the propagation depth cannot grow the call stack.
//!
//! On release, ownership transfers directly to the highest-priority waiter
//! and the releasing owner's effective priority is recomputed from its base
//! and every mutex it still holds; holding a second boosting mutex keeps
//! the stronger requirement in force.
//!
//! Recursive acquisition is rejected: a second acquire by the owner fails
//! with `RecursiveLock` rather than counting (see DESIGN.md).

use k_common::{Error, Result};

use crate::scheduler::Kernel;
use crate::task::{Membership, Priority, TaskId, WaitOutcome, WaitSource};
use crate::waitlist::{PendStatus, WaitList, WaitOrder};

/// Number of mutex control blocks in the kernel table
pub const MAX_MUTEXES: usize = 8;

/// Mutex handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexId(u8);

impl MutexId {
    /// Table index
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.0
    }
}

/// Mutex control block
pub struct MutexCb {
    pub(crate) used: bool,
    /// Owning task slot; `None` means the mutex is free
    pub(crate) owner: Option<u8>,
    /// The owner's priority before any boost through this mutex
    pub(crate) original_priority: Priority,
    /// Whether this mutex currently imposes a boost on its owner
    pub(crate) boosted: bool,
    /// Blocked acquirers, strongest priority first
    pub(crate) waiters: WaitList,
}

impl MutexCb {
    /// An unused control block
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used: false,
            owner: None,
            original_priority: Priority::new(0),
            boosted: false,
            waiters: WaitList::new(WaitOrder::Priority),
        }
    }
}

impl Kernel {
    /// Allocate a mutex
    ///
    /// # Errors
    /// `ResourceExhausted` when the table is full.
    pub fn create_mutex(&mut self) -> Result<MutexId> {
        for (i, cb) in self.mutexes.iter_mut().enumerate() {
            if !cb.used {
                cb.used = true;
                cb.owner = None;
                cb.boosted = false;
                return Ok(MutexId(i as u8));
            }
        }
        Err(Error::ResourceExhausted)
    }

    fn resolve_mutex(&self, id: MutexId) -> Result<u8> {
        let i = id.index() as usize;
        if i >= MAX_MUTEXES || !self.mutexes[i].used {
            return Err(Error::InvalidParameter);
        }
        Ok(id.index())
    }

    /// Acquire a mutex for the running task
    ///
    /// Free: takes ownership immediately. Held by another task: blocks the
    /// caller (priority-sorted) after boosting the owner chain, and returns
    /// `Blocked`. Held by the caller: rejected.
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle, `InvalidState` outside a task,
    /// `ProtectedTask` for the idle task, `RecursiveLock` when the caller
    /// already owns it.
    pub fn mutex_acquire(&mut self, id: MutexId, timeout: Option<u64>) -> Result<PendStatus> {
        let m = self.resolve_mutex(id)?;
        let cur = self.running_slot().ok_or(Error::InvalidState)?;
        if self.is_idle_slot(cur) {
            return Err(Error::ProtectedTask);
        }

        match self.mutexes[m as usize].owner {
            None => {
                self.mutexes[m as usize].owner = Some(cur);
                self.pool.tcb_mut(cur).owned_mutexes += 1;
                Ok(PendStatus::Immediate)
            }
            Some(owner) if owner == cur => Err(Error::RecursiveLock),
            Some(owner) => {
                let waiter_prio = self.pool.tcb(cur).priority;
                self.inherit_priority(m, owner, waiter_prio);

                self.mutexes[m as usize]
                    .waiters
                    .enqueue(&mut self.pool, cur, WaitSource::Mutex(m));
                let cur_id = self.pool.tcb(cur).id;
                self.log_mutex_event(format_args!(
                    "task {} blocked on mutex {m}",
                    cur_id.slot()
                ));
                self.note_blocked(cur, timeout);
                Ok(PendStatus::Blocked)
            }
        }
    }

    /// Release a mutex held by the running task
    ///
    /// Ownership transfers to the highest-priority waiter, if any; the
    /// releasing task's effective priority is recomputed across the mutexes
    /// it still holds.
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle, `NotOwner` when the caller does
    /// not own it.
    pub fn mutex_release(&mut self, id: MutexId) -> Result<()> {
        let m = self.resolve_mutex(id)?;
        let cur = self.running_slot().ok_or(Error::InvalidState)?;
        if self.mutexes[m as usize].owner != Some(cur) {
            return Err(Error::NotOwner);
        }
        self.release_from(m, cur);
        self.schedule();
        Ok(())
    }

    /// The owner of a mutex, if it is currently held
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle.
    pub fn mutex_owner(&self, id: MutexId) -> Result<Option<TaskId>> {
        let m = self.resolve_mutex(id)?;
        Ok(self.mutexes[m as usize]
            .owner
            .map(|slot| self.pool.tcb(slot).id))
    }

    /// Number of tasks blocked on a mutex
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle.
    pub fn mutex_waiter_count(&self, id: MutexId) -> Result<usize> {
        let m = self.resolve_mutex(id)?;
        Ok(self.mutexes[m as usize].waiters.len())
    }

    // ======================================================================
    // Priority inheritance internals
    // ======================================================================

    /// Propagate a waiter's priority along the chain of blocked owners
    ///
    /// Worklist form of the boost: raise the owner if the waiter outranks
    /// it; if that owner is itself blocked on another mutex, continue with
    /// that mutex's owner. The visited set bounds the walk even if the
    /// ownership graph is corrupted into a cycle.
    fn inherit_priority(&mut self, first_mutex: u8, first_owner: u8, waiter_prio: Priority) {
        let mut mutex = first_mutex;
        let mut owner = first_owner;
        let mut visited: u64 = 0;
        loop {
            if visited & (1 << owner) != 0 {
                break;
            }
            visited |= 1 << owner;

            if !waiter_prio.is_higher_than(self.pool.tcb(owner).priority) {
                break;
            }

            let owner_base = self.pool.tcb(owner).base_priority;
            let cb = &mut self.mutexes[mutex as usize];
            if !cb.boosted {
                cb.boosted = true;
                cb.original_priority = owner_base;
            }
            self.apply_priority(owner, waiter_prio);
            self.log_mutex_event(format_args!(
                "boost owner slot {owner} to prio {}",
                waiter_prio.as_u8()
            ));

            match self.pool.tcb(owner).membership {
                Membership::Wait(WaitSource::Mutex(next_mutex)) => {
                    match self.mutexes[next_mutex as usize].owner {
                        Some(next_owner) => {
                            mutex = next_mutex;
                            owner = next_owner;
                        }
                        None => break,
                    }
                }
                _ => break,
            }
        }
    }

    /// Release `m` on behalf of `owner` (normal release and task deletion)
    pub(crate) fn release_from(&mut self, m: u8, owner: u8) {
        self.pool.tcb_mut(owner).owned_mutexes -= 1;
        self.mutexes[m as usize].boosted = false;

        match self.mutexes[m as usize].waiters.pop_front(&mut self.pool) {
            Some(next) => {
                self.mutexes[m as usize].owner = Some(next);
                self.pool.tcb_mut(next).owned_mutexes += 1;
                self.make_ready(next, WaitOutcome::Completed);
                // Remaining waiters may outrank the new owner; keep the
                // inheritance invariant from the first instant of ownership
                self.refresh_inheritance_of_owner(m);
                self.log_mutex_event(format_args!("mutex {m} handed to slot {next}"));
            }
            None => {
                self.mutexes[m as usize].owner = None;
            }
        }

        self.recompute_inheritance(owner);
    }

    /// Release every mutex a dying task still holds (deletion path)
    pub(crate) fn release_all_owned(&mut self, slot: u8) {
        if self.pool.tcb(slot).owned_mutexes == 0 {
            return;
        }
        for m in 0..MAX_MUTEXES as u8 {
            if self.mutexes[m as usize].used && self.mutexes[m as usize].owner == Some(slot) {
                self.release_from(m, slot);
            }
        }
    }

    /// A waiter timed out: unlink it and re-derive the owner's boost
    pub(crate) fn mutex_wait_timeout(&mut self, m: u8, slot: u8) {
        self.mutexes[m as usize].waiters.remove(&mut self.pool, slot);
        self.refresh_inheritance_of_owner(m);
    }

    /// Re-derive the inheritance of whoever owns mutex `m`
    pub(crate) fn refresh_inheritance_of_owner(&mut self, m: u8) {
        if let Some(owner) = self.mutexes[m as usize].owner {
            self.recompute_inheritance(owner);
        }
    }

    /// Recompute a task's effective priority from its base and the
    /// strongest waiter across every mutex it holds
    pub(crate) fn recompute_inheritance(&mut self, slot: u8) {
        let base = self.pool.tcb(slot).base_priority;
        let mut effective = base;
        for i in 0..MAX_MUTEXES {
            if !self.mutexes[i].used || self.mutexes[i].owner != Some(slot) {
                continue;
            }
            let demand = self.mutexes[i].waiters.front_priority(&self.pool);
            match demand {
                Some(p) if p.is_higher_than(base) => {
                    if p.is_higher_than(effective) {
                        effective = p;
                    }
                    if !self.mutexes[i].boosted {
                        self.mutexes[i].boosted = true;
                        self.mutexes[i].original_priority = base;
                    }
                }
                _ => self.mutexes[i].boosted = false,
            }
        }
        self.apply_priority(slot, effective);
    }
}

// ============================================================================
// Global kernel wrappers
// ============================================================================

use crate::scheduler::with_kernel;

/// Allocate a mutex in the global kernel
///
/// # Errors
/// As [`Kernel::create_mutex`].
pub fn create_mutex() -> Result<MutexId> {
    with_kernel(Kernel::create_mutex)
}

/// Acquire a mutex, blocking the calling task until it is granted or the
/// timeout (in ticks) expires
///
/// # Errors
/// `Timeout` when the wait deadline passed first; otherwise as
/// [`Kernel::mutex_acquire`].
pub fn acquire(id: MutexId, timeout: Option<u64>) -> Result<()> {
    let status = with_kernel(|k| k.mutex_acquire(id, timeout))?;
    match status {
        PendStatus::Immediate => Ok(()),
        PendStatus::Blocked => {
            // Execution reaches this point again only after the scheduler
            // switched back to this task: either ownership was handed over
            // or the deadline expired.
            with_kernel(|k| {
                let cur = k.current_task().ok_or(Error::InvalidState)?;
                match k.wait_outcome(cur)? {
                    WaitOutcome::Completed => Ok(()),
                    WaitOutcome::TimedOut => Err(Error::Timeout),
                }
            })
        }
    }
}

/// Release a mutex held by the calling task
///
/// # Errors
/// As [`Kernel::mutex_release`].
pub fn release(id: MutexId) -> Result<()> {
    with_kernel(|k| k.mutex_release(id))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::{add_task, kernel};
    use crate::task::TaskState;

    #[test]
    fn test_uncontended_acquire_release() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        k.start_bookkeeping().unwrap();

        let m = k.create_mutex().unwrap();
        assert_eq!(k.mutex_acquire(m, None).unwrap(), PendStatus::Immediate);
        assert_eq!(k.mutex_owner(m).unwrap(), Some(a));

        k.mutex_release(m).unwrap();
        assert_eq!(k.mutex_owner(m).unwrap(), None);
    }

    #[test]
    fn test_recursive_acquire_is_rejected() {
        let mut k = kernel();
        let _a = add_task(&mut k, 5, "a");
        k.start_bookkeeping().unwrap();

        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();
        assert_eq!(k.mutex_acquire(m, None), Err(Error::RecursiveLock));
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let _b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();

        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();

        // Switch to b without blocking a
        k.suspend(a).unwrap();
        assert_eq!(k.mutex_release(m), Err(Error::NotOwner));
        k.resume(a).unwrap();
        assert!(k.mutex_release(m).is_ok());
    }

    #[test]
    fn test_blocking_waiter_boosts_owner_and_release_restores() {
        let mut k = kernel();
        // A at priority 10 holds M; B at priority 2 blocks on it
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();

        let b = add_task(&mut k, 2, "b");
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.mutex_acquire(m, None).unwrap(), PendStatus::Blocked);

        // B waits; A inherits priority 2 and runs
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.task_state(b).unwrap(), TaskState::Waiting);
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(2));
        assert_eq!(k.base_priority(a).unwrap(), Priority::new(10));

        // Release: ownership transfers, A drops back to 10, B preempts
        k.mutex_release(m).unwrap();
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(10));
        assert_eq!(k.mutex_owner(m).unwrap(), Some(b));
        assert_eq!(k.current_task(), Some(b));
    }

    #[test]
    fn test_wake_order_is_priority_not_fifo() {
        let mut k = kernel();
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();

        // mid blocks first, high second; high must be woken first
        let mid = add_task(&mut k, 6, "mid");
        assert_eq!(k.current_task(), Some(mid));
        k.mutex_acquire(m, None).unwrap();
        let high = add_task(&mut k, 3, "high");
        assert_eq!(k.current_task(), Some(high));
        k.mutex_acquire(m, None).unwrap();

        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.mutex_waiter_count(m).unwrap(), 2);

        k.mutex_release(m).unwrap();
        assert_eq!(k.mutex_owner(m).unwrap(), Some(high));
        assert_eq!(k.current_task(), Some(high));
        // mid still waits on the mutex, now owned by high
        assert_eq!(k.task_state(mid).unwrap(), TaskState::Waiting);
        // high inherits nothing: mid does not outrank it
        assert_eq!(k.effective_priority(high).unwrap(), Priority::new(3));
    }

    #[test]
    fn test_second_boosting_mutex_keeps_stronger_requirement() {
        let mut k = kernel();
        // A holds two mutexes; releasing one must not restore the base
        // priority while the other still has a stronger waiter
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m1 = k.create_mutex().unwrap();
        let m2 = k.create_mutex().unwrap();
        k.mutex_acquire(m1, None).unwrap();
        k.mutex_acquire(m2, None).unwrap();

        let b = add_task(&mut k, 4, "b");
        assert_eq!(k.current_task(), Some(b));
        k.mutex_acquire(m1, None).unwrap(); // b waits on m1
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(4));

        let c = add_task(&mut k, 2, "c");
        assert_eq!(k.current_task(), Some(c));
        k.mutex_acquire(m2, None).unwrap(); // c waits on m2
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(2));
        assert_eq!(k.current_task(), Some(a));

        // Releasing m2 hands it to c; a still holds m1 with b waiting, so
        // its effective priority falls only to 4, not to 10
        k.mutex_release(m2).unwrap();
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(4));
        assert_eq!(k.mutex_owner(m2).unwrap(), Some(c));
        assert_eq!(k.current_task(), Some(c));

        // Park c so a can finish with m1
        k.suspend(c).unwrap();
        assert_eq!(k.current_task(), Some(a));
        k.mutex_release(m1).unwrap();
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(10));
        assert_eq!(k.mutex_owner(m1).unwrap(), Some(b));
        assert_eq!(k.current_task(), Some(b));
    }

    #[test]
    fn test_inheritance_chain_propagates_through_blocked_owner() {
        let mut k = kernel();
        // A(10) holds M1. B(5) holds M2 and blocks on M1. C(2) blocks on
        // M2: the boost must flow C -> B -> A.
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m1 = k.create_mutex().unwrap();
        k.mutex_acquire(m1, None).unwrap();

        let b = add_task(&mut k, 5, "b");
        assert_eq!(k.current_task(), Some(b));
        let m2 = k.create_mutex().unwrap();
        k.mutex_acquire(m2, None).unwrap();
        k.mutex_acquire(m1, None).unwrap(); // b blocks on m1
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(5));
        assert_eq!(k.current_task(), Some(a));

        let c = add_task(&mut k, 2, "c");
        assert_eq!(k.current_task(), Some(c));
        k.mutex_acquire(m2, None).unwrap(); // c blocks on m2 held by b
        assert_eq!(k.effective_priority(b).unwrap(), Priority::new(2));
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(2));
        assert_eq!(k.current_task(), Some(a));

        // A releases M1: B owns it, still boosted to 2 by C's wait on M2;
        // A restores to 10
        k.mutex_release(m1).unwrap();
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(10));
        assert_eq!(k.effective_priority(b).unwrap(), Priority::new(2));
        assert_eq!(k.current_task(), Some(b));

        // B releases M2: C owns it, B restores to 5, C preempts
        k.mutex_release(m2).unwrap();
        assert_eq!(k.effective_priority(b).unwrap(), Priority::new(5));
        assert_eq!(k.current_task(), Some(c));
    }

    #[test]
    fn test_wait_timeout_reverts_inheritance() {
        let mut k = kernel();
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();

        let b = add_task(&mut k, 2, "b");
        k.mutex_acquire(m, Some(3)).unwrap();
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(2));

        k.tick();
        k.tick();
        k.tick();
        // Deadline hit: b is ready with a timeout, a is disinherited and
        // still owns the mutex
        assert_eq!(k.task_state(b).unwrap(), TaskState::Running);
        assert_eq!(k.wait_outcome(b).unwrap(), crate::task::WaitOutcome::TimedOut);
        assert_eq!(k.effective_priority(a).unwrap(), Priority::new(10));
        assert_eq!(k.mutex_owner(m).unwrap(), Some(a));
        assert_eq!(k.mutex_waiter_count(m).unwrap(), 0);
    }

    #[test]
    fn test_deleting_owner_hands_mutex_over() {
        let mut k = kernel();
        let a = add_task(&mut k, 10, "a");
        k.start_bookkeeping().unwrap();
        let m = k.create_mutex().unwrap();
        k.mutex_acquire(m, None).unwrap();

        let b = add_task(&mut k, 2, "b");
        k.mutex_acquire(m, None).unwrap(); // b waits
        assert_eq!(k.current_task(), Some(a));

        k.delete_task(a).unwrap();
        assert_eq!(k.mutex_owner(m).unwrap(), Some(b));
        assert_eq!(k.current_task(), Some(b));
    }

    #[test]
    fn test_table_exhaustion() {
        let mut k = kernel();
        for _ in 0..MAX_MUTEXES {
            k.create_mutex().unwrap();
        }
        assert_eq!(k.create_mutex(), Err(Error::ResourceExhausted));
    }
}
