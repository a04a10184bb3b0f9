// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Scheduler and task lifecycle
//!
//! This module owns the [`Kernel`] state: the task pool, the ready queue,
//! the synchronization object tables, the tick counter, and the two
//! counters that gate context switches (the scheduler lock and the ISR
//! nesting depth).
//!
//! # Scheduling
//!
//! Strict priority, with optional round-robin rotation among tasks sharing
//! a priority. The decision function [`Kernel::schedule`] runs after every
//! ready-queue mutation, on the tick, and on an explicit yield:
//!
//! 1. If the running task blocked or exited, switch to the best Ready task.
//! 2. If a Ready task outranks the running one, preempt.
//! 3. On a yield or an expired time slice, rotate within the priority.
//! 4. Otherwise keep running.
//!
//! A switch marks the new task Running, takes it off the ready queue, and
//! requests `context_switch_trigger` exactly once. While the scheduler
//! lock is held or any ISR is active the whole decision is deferred: a
//! pending flag is set and the decision re-runs when the last unlock or
//! ISR exit brings the count back to zero.
//!
//! # Concurrency model
//!
//! One physical core; interrupts are the only source of concurrency. All
//! public entry points run inside an interrupt-masked critical section via
//! [`with_kernel`], and the scheduler lock defers preemption (it is a
//! reentrant counter, not a blocking lock - it is never held across a
//! blocking call).

use k_common::log::LogBuffer;
use k_common::{log_info, log_warn, Deadline, Error, Result, TickFrequency, Ticks};

use crate::arch::{self, TaskContext};
use crate::config::{
    IDLE_PRIORITY, LOWEST_USER_PRIORITY, MAX_TASKS, TICK_RATE_HZ, TIME_SLICE_TICKS,
};
use crate::ipc::{MailboxCb, MsgQueueCb, SemaphoreCb, MAX_MAILBOXES, MAX_MSG_QUEUES, MAX_SEMAPHORES};
use crate::mutex::{MutexCb, MAX_MUTEXES};
use crate::readyq::{ActiveReadyQueue, ReadyQueue};
use crate::task::{
    idle_task, Membership, Priority, TaskEntry, TaskId, TaskPool, TaskState, WaitOutcome,
    WaitSource,
};

/// Default CPU core clock used to program the tick timer
pub const DEFAULT_CPU_FREQ_HZ: u32 = 48_000_000;

/// Minimum stack size accepted for a new task, in bytes
pub const MIN_STACK_BYTES: usize = 256;

/// Idle task stack size in bytes
const IDLE_STACK_SIZE: usize = 256;

/// Static stack for the idle task
static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];

/// Kernel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// Tables not yet chained; nothing may run
    Uninitialized,
    /// Initialized, scheduler not yet started
    Initialized,
    /// Scheduler running
    Running,
}

/// Kernel-wide counters
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelStats {
    /// Times the decision function ran to completion
    pub schedule_calls: u32,
    /// Context switches performed
    pub context_switches: u32,
    /// Decisions deferred because the scheduler was locked or an ISR was
    /// active
    pub deferred_decisions: u32,
}

/// The kernel: every scheduling-visible structure in one place
pub struct Kernel {
    pub(crate) pool: TaskPool,
    pub(crate) ready: ActiveReadyQueue,
    pub(crate) mutexes: [MutexCb; MAX_MUTEXES],
    pub(crate) semaphores: [SemaphoreCb; MAX_SEMAPHORES],
    pub(crate) mailboxes: [MailboxCb; MAX_MAILBOXES],
    pub(crate) queues: [MsgQueueCb; MAX_MSG_QUEUES],
    running: Option<u8>,
    idle_slot: Option<u8>,
    ticks: Ticks,
    state: KernelState,
    lock_count: u32,
    isr_nesting: u32,
    pending_switch: bool,
    yield_request: bool,
    slice_expired: bool,
    cpu_freq_hz: u32,
    stats: KernelStats,
    log: LogBuffer,
}

impl Kernel {
    /// Create an uninitialized kernel
    #[must_use]
    pub const fn new() -> Self {
        const MUTEX: MutexCb = MutexCb::new();
        const SEM: SemaphoreCb = SemaphoreCb::new();
        const MBOX: MailboxCb = MailboxCb::new();
        const QUEUE: MsgQueueCb = MsgQueueCb::new();
        Self {
            pool: TaskPool::new(),
            ready: ActiveReadyQueue::new(),
            mutexes: [MUTEX; MAX_MUTEXES],
            semaphores: [SEM; MAX_SEMAPHORES],
            mailboxes: [MBOX; MAX_MAILBOXES],
            queues: [QUEUE; MAX_MSG_QUEUES],
            running: None,
            idle_slot: None,
            ticks: Ticks::ZERO,
            state: KernelState::Uninitialized,
            lock_count: 0,
            isr_nesting: 0,
            pending_switch: false,
            yield_request: false,
            slice_expired: false,
            cpu_freq_hz: DEFAULT_CPU_FREQ_HZ,
            stats: KernelStats {
                schedule_calls: 0,
                context_switches: 0,
                deferred_decisions: 0,
            },
            log: LogBuffer::new(),
        }
    }

    /// Initialize the pool and create the reserved idle task
    ///
    /// # Errors
    /// `InvalidState` if called twice.
    pub fn init(&mut self) -> Result<()> {
        if self.state != KernelState::Uninitialized {
            return Err(Error::InvalidState);
        }
        self.pool.init();
        arch::init_core();

        // SAFETY: IDLE_STACK is only referenced here, during single-threaded
        // kernel initialization, to compute the stack bounds handed to the
        // idle task.
        let stack_base = unsafe { core::ptr::addr_of!(IDLE_STACK) as usize };
        let id = self.spawn(
            idle_task,
            0,
            IDLE_PRIORITY,
            stack_base,
            IDLE_STACK_SIZE,
            "idle",
        )?;
        let slot = id.slot();
        // Idle never rotates; it only runs when nothing else can
        self.pool.tcb_mut(slot).time_slice = 0;
        self.idle_slot = Some(slot);

        self.state = KernelState::Initialized;
        Ok(())
    }

    /// Set the CPU core clock used to program the tick timer
    pub fn configure_clock(&mut self, cpu_freq_hz: u32) {
        self.cpu_freq_hz = cpu_freq_hz;
    }

    // ======================================================================
    // Task lifecycle
    // ======================================================================

    /// Create a task
    ///
    /// # Errors
    /// `CreateFailed` when no slot is free, the priority is below the
    /// application range, or the stack region is too small.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        arg: usize,
        priority: Priority,
        stack_base: usize,
        stack_size: usize,
        name: &str,
    ) -> Result<TaskId> {
        if self.state == KernelState::Uninitialized {
            return Err(Error::InvalidState);
        }
        if priority.as_u8() > LOWEST_USER_PRIORITY.as_u8() {
            return Err(Error::CreateFailed);
        }
        if stack_size < MIN_STACK_BYTES {
            return Err(Error::CreateFailed);
        }
        let id = self.spawn(entry, arg, priority, stack_base, stack_size, name)?;
        if self.state == KernelState::Running {
            self.schedule();
        }
        Ok(id)
    }

    /// Allocate and populate a slot; shared by `create_task` and the idle
    /// task
    fn spawn(
        &mut self,
        entry: TaskEntry,
        arg: usize,
        priority: Priority,
        stack_base: usize,
        stack_size: usize,
        name: &str,
    ) -> Result<TaskId> {
        let id = self.pool.acquire_record().ok_or(Error::CreateFailed)?;
        let slot = id.slot();
        let tcb = self.pool.tcb_mut(slot);
        tcb.entry = Some(entry);
        tcb.arg = arg;
        tcb.priority = priority;
        tcb.base_priority = priority;
        tcb.stack_base = stack_base;
        tcb.stack_size = stack_size;
        tcb.time_slice = TIME_SLICE_TICKS;
        tcb.reset_time_slice();
        tcb.owned_mutexes = 0;
        tcb.deadline = None;
        tcb.wait_outcome = WaitOutcome::Completed;
        tcb.msg = None;
        tcb.stats = Default::default();
        tcb.set_name(name);
        tcb.context = TaskContext::new();
        tcb.context.init_stack(stack_base + stack_size, entry, arg);
        tcb.state = TaskState::Ready;
        self.ready.insert(&mut self.pool, slot);

        let prio = priority.as_u8();
        log_info!(self.log, self.ticks, "task", "created slot {slot} prio {prio}");
        Ok(id)
    }

    /// Delete a task: unlink it from every queue, release any mutexes it
    /// holds, and recycle its slot
    ///
    /// # Errors
    /// `InvalidId`, `ProtectedTask` for the idle task, `SchedulerLocked`
    /// when the running task tries to delete itself while preemption is
    /// disabled.
    pub fn delete_task(&mut self, id: TaskId) -> Result<()> {
        let slot = self.pool.resolve(id)?;
        if Some(slot) == self.idle_slot {
            return Err(Error::ProtectedTask);
        }
        if Some(slot) == self.running && self.lock_count > 0 {
            return Err(Error::SchedulerLocked);
        }

        // Held mutexes go through the normal release path so waiters are
        // woken and ownership transfers
        self.release_all_owned(slot);

        match self.pool.tcb(slot).membership {
            Membership::Ready => self.ready.remove(&mut self.pool, slot),
            Membership::Wait(source) => self.unlink_waiter(slot, source),
            Membership::None | Membership::FreeList => {}
        }
        if self.running == Some(slot) {
            self.running = None;
        }

        let tcb = self.pool.tcb_mut(slot);
        tcb.state = TaskState::Dormant;
        tcb.deadline = None;
        self.pool.release_record(slot)?;

        log_info!(self.log, self.ticks, "task", "deleted slot {slot}");
        self.schedule();
        Ok(())
    }

    /// Suspend a task (it stays out of the ready queue until resumed)
    ///
    /// # Errors
    /// `InvalidId`, `ProtectedTask` for the idle task, `AlreadyWaiting` if
    /// the task is already in any waiting state.
    pub fn suspend(&mut self, id: TaskId) -> Result<()> {
        let slot = self.pool.resolve(id)?;
        if Some(slot) == self.idle_slot {
            return Err(Error::ProtectedTask);
        }
        match self.pool.tcb(slot).state {
            TaskState::Waiting => return Err(Error::AlreadyWaiting),
            TaskState::Ready => self.ready.remove(&mut self.pool, slot),
            TaskState::Running => {}
            TaskState::Dormant => return Err(Error::InvalidId),
        }
        let tcb = self.pool.tcb_mut(slot);
        tcb.state = TaskState::Waiting;
        tcb.membership = Membership::Wait(WaitSource::Suspended);
        tcb.deadline = None;
        self.schedule();
        Ok(())
    }

    /// Resume a suspended task
    ///
    /// # Errors
    /// `InvalidId`, `ProtectedTask`, `NotWaiting` if the task is not
    /// waiting at all, `WaitConflict` if it waits on something other than a
    /// suspend.
    pub fn resume(&mut self, id: TaskId) -> Result<()> {
        let slot = self.pool.resolve(id)?;
        if Some(slot) == self.idle_slot {
            return Err(Error::ProtectedTask);
        }
        let tcb = self.pool.tcb(slot);
        if tcb.state != TaskState::Waiting {
            return Err(Error::NotWaiting);
        }
        if tcb.membership != Membership::Wait(WaitSource::Suspended) {
            return Err(Error::WaitConflict);
        }
        let tcb = self.pool.tcb_mut(slot);
        tcb.membership = Membership::None;
        tcb.state = TaskState::Ready;
        tcb.wait_outcome = WaitOutcome::Completed;
        self.ready.insert(&mut self.pool, slot);
        self.schedule();
        Ok(())
    }

    /// Change a task's base priority
    ///
    /// If the task currently runs with an inherited priority, the effective
    /// priority only moves when the new base outranks the inherited value;
    /// the base is recorded either way and restored when inheritance ends.
    ///
    /// # Errors
    /// `InvalidId`, `ProtectedTask`, `InvalidParameter` for a priority
    /// outside the application range.
    pub fn set_priority(&mut self, id: TaskId, new: Priority) -> Result<()> {
        let slot = self.pool.resolve(id)?;
        if Some(slot) == self.idle_slot {
            return Err(Error::ProtectedTask);
        }
        if new.as_u8() > LOWEST_USER_PRIORITY.as_u8() {
            return Err(Error::InvalidParameter);
        }

        self.scheduler_lock();
        let boosted = self.pool.tcb(slot).is_priority_boosted();
        self.pool.tcb_mut(slot).base_priority = new;
        if !boosted || new.is_higher_than(self.pool.tcb(slot).priority) {
            self.apply_priority(slot, new);
        }
        self.scheduler_unlock();
        self.schedule();
        Ok(())
    }

    /// Move a task's effective priority, re-sorting whichever queue holds it
    ///
    /// This is the single mutation point shared by `set_priority` and the
    /// priority-inheritance machinery.
    pub(crate) fn apply_priority(&mut self, slot: u8, new: Priority) {
        if self.pool.tcb(slot).priority == new {
            return;
        }
        match self.pool.tcb(slot).membership {
            Membership::Ready => {
                self.ready.remove(&mut self.pool, slot);
                let tcb = self.pool.tcb_mut(slot);
                tcb.priority = new;
                self.ready.insert(&mut self.pool, slot);
            }
            Membership::Wait(source) => {
                self.pool.tcb_mut(slot).priority = new;
                self.resort_waiter(slot, source);
            }
            Membership::None | Membership::FreeList => {
                self.pool.tcb_mut(slot).priority = new;
            }
        }
    }

    /// Re-sort a waiter inside its wait list after a priority change
    fn resort_waiter(&mut self, slot: u8, source: WaitSource) {
        match source {
            WaitSource::Mutex(m) => {
                let list = &mut self.mutexes[m as usize].waiters;
                list.remove(&mut self.pool, slot);
                list.enqueue(&mut self.pool, slot, source);
            }
            WaitSource::Semaphore(i) => {
                let list = &mut self.semaphores[i as usize].waiters;
                list.remove(&mut self.pool, slot);
                list.enqueue(&mut self.pool, slot, source);
            }
            WaitSource::Mailbox(i) => {
                let list = &mut self.mailboxes[i as usize].waiters;
                list.remove(&mut self.pool, slot);
                list.enqueue(&mut self.pool, slot, source);
            }
            WaitSource::MsgQueue(i) => {
                let list = &mut self.queues[i as usize].waiters;
                list.remove(&mut self.pool, slot);
                list.enqueue(&mut self.pool, slot, source);
            }
            WaitSource::Delay | WaitSource::Suspended => {}
        }
    }

    /// Unlink a waiter from its wait list without waking it (deletion path)
    fn unlink_waiter(&mut self, slot: u8, source: WaitSource) {
        match source {
            WaitSource::Mutex(m) => {
                self.mutexes[m as usize].waiters.remove(&mut self.pool, slot);
                self.refresh_inheritance_of_owner(m);
            }
            WaitSource::Semaphore(i) => {
                self.semaphores[i as usize].waiters.remove(&mut self.pool, slot);
            }
            WaitSource::Mailbox(i) => {
                self.mailboxes[i as usize].waiters.remove(&mut self.pool, slot);
            }
            WaitSource::MsgQueue(i) => {
                self.queues[i as usize].waiters.remove(&mut self.pool, slot);
            }
            WaitSource::Delay | WaitSource::Suspended => {
                self.pool.tcb_mut(slot).membership = Membership::None;
            }
        }
    }

    // ======================================================================
    // Voluntary suspension points
    // ======================================================================

    /// Yield the processor to the next same-priority task
    pub fn yield_now(&mut self) {
        if let Some(run) = self.running {
            self.pool.tcb_mut(run).stats.yield_count += 1;
        }
        self.yield_request = true;
        self.schedule();
    }

    /// Put the running task to sleep for `ticks` ticks
    ///
    /// # Errors
    /// `InvalidState` when no task is running, `ProtectedTask` for the idle
    /// task (it must never block).
    pub fn delay(&mut self, ticks: u64) -> Result<()> {
        let run = self.running.ok_or(Error::InvalidState)?;
        if Some(run) == self.idle_slot {
            return Err(Error::ProtectedTask);
        }
        if ticks == 0 {
            self.yield_now();
            return Ok(());
        }
        let now = self.ticks;
        let tcb = self.pool.tcb_mut(run);
        tcb.state = TaskState::Waiting;
        tcb.membership = Membership::Wait(WaitSource::Delay);
        tcb.deadline = Some(Deadline::new(now, ticks));
        self.schedule();
        Ok(())
    }

    /// Put the running task to sleep for `ms` milliseconds
    ///
    /// # Errors
    /// As [`Kernel::delay`].
    pub fn delay_ms(&mut self, ms: u32) -> Result<()> {
        let ticks = TickFrequency::from_hz(TICK_RATE_HZ).millis_to_ticks(ms);
        self.delay(ticks.max(1))
    }

    /// Block the running task on a wait list (shared by mutexes and IPC)
    ///
    /// The caller has already enqueued the task; this records the deadline
    /// and hands control to the scheduler.
    pub(crate) fn note_blocked(&mut self, slot: u8, timeout: Option<u64>) {
        let now = self.ticks;
        let tcb = self.pool.tcb_mut(slot);
        tcb.wait_outcome = WaitOutcome::Completed;
        tcb.deadline = timeout.map(|t| Deadline::new(now, t.max(1)));
        self.schedule();
    }

    /// Make a blocked task ready again (shared wake path)
    pub(crate) fn make_ready(&mut self, slot: u8, outcome: WaitOutcome) {
        let tcb = self.pool.tcb_mut(slot);
        debug_assert_eq!(tcb.membership, Membership::None);
        tcb.deadline = None;
        tcb.wait_outcome = outcome;
        tcb.state = TaskState::Ready;
        self.ready.insert(&mut self.pool, slot);
    }

    // ======================================================================
    // Scheduler lock and ISR nesting
    // ======================================================================

    /// Disable preemption decisions; reentrant
    pub fn scheduler_lock(&mut self) {
        self.lock_count += 1;
    }

    /// Re-enable preemption; at the outermost unlock a deferred decision
    /// runs once
    pub fn scheduler_unlock(&mut self) {
        debug_assert!(self.lock_count > 0);
        self.lock_count = self.lock_count.saturating_sub(1);
        if self.lock_count == 0 && self.isr_nesting == 0 && self.pending_switch {
            self.schedule();
        }
    }

    /// Whether the scheduler lock is currently held
    #[must_use]
    pub fn scheduler_locked(&self) -> bool {
        self.lock_count > 0
    }

    /// Interrupt-entry hook: switches are deferred while any ISR is active
    pub fn isr_enter(&mut self) {
        self.isr_nesting += 1;
    }

    /// Interrupt-exit hook; at nesting zero a deferred decision runs once
    pub fn isr_exit(&mut self) {
        debug_assert!(self.isr_nesting > 0);
        self.isr_nesting = self.isr_nesting.saturating_sub(1);
        if self.isr_nesting == 0 && self.lock_count == 0 && self.pending_switch {
            self.schedule();
        }
    }

    // ======================================================================
    // Tick
    // ======================================================================

    /// Advance the tick: wake expired waits, account the time slice, and
    /// re-run the scheduler if anything changed
    pub fn tick(&mut self) {
        self.ticks = self.ticks + 1;
        let now = self.ticks;

        let mut woke = false;
        for slot in 0..MAX_TASKS as u8 {
            let tcb = self.pool.tcb(slot);
            if tcb.state == TaskState::Waiting {
                if let Some(deadline) = tcb.deadline {
                    if deadline.is_expired(now) {
                        self.wake_expired(slot);
                        woke = true;
                    }
                }
            }
        }

        if let Some(run) = self.running {
            let tcb = self.pool.tcb_mut(run);
            if tcb.state == TaskState::Running && tcb.tick_time_slice() {
                tcb.reset_time_slice();
                self.slice_expired = true;
            }
        }

        if woke || self.slice_expired {
            self.schedule();
        }
    }

    /// Wake a waiter whose deadline expired
    fn wake_expired(&mut self, slot: u8) {
        let Membership::Wait(source) = self.pool.tcb(slot).membership else {
            return;
        };
        let outcome = match source {
            // A delay completing on time is a normal wake, not a timeout
            WaitSource::Delay => {
                self.pool.tcb_mut(slot).membership = Membership::None;
                WaitOutcome::Completed
            }
            // Suspension carries no deadline
            WaitSource::Suspended => return,
            WaitSource::Mutex(m) => {
                self.mutex_wait_timeout(m, slot);
                WaitOutcome::TimedOut
            }
            WaitSource::Semaphore(i) => {
                self.semaphores[i as usize].waiters.remove(&mut self.pool, slot);
                WaitOutcome::TimedOut
            }
            WaitSource::Mailbox(i) => {
                self.mailboxes[i as usize].waiters.remove(&mut self.pool, slot);
                WaitOutcome::TimedOut
            }
            WaitSource::MsgQueue(i) => {
                self.queues[i as usize].waiters.remove(&mut self.pool, slot);
                WaitOutcome::TimedOut
            }
        };
        if outcome == WaitOutcome::TimedOut {
            log_warn!(self.log, self.ticks, "sched", "wait timeout slot {slot}");
        }
        self.make_ready(slot, outcome);
    }

    // ======================================================================
    // The decision function
    // ======================================================================

    /// Decide whether a context switch is warranted, and perform it
    ///
    /// Deferred (with the pending flag set) while the scheduler lock is
    /// held or an ISR is active.
    pub fn schedule(&mut self) {
        if self.state != KernelState::Running {
            return;
        }
        if self.lock_count > 0 || self.isr_nesting > 0 {
            self.pending_switch = true;
            self.stats.deferred_decisions += 1;
            return;
        }
        self.pending_switch = false;
        self.stats.schedule_calls += 1;

        let Some(candidate) = self.ready.peek_highest(&self.pool) else {
            self.yield_request = false;
            self.slice_expired = false;
            return;
        };
        let rotate_requested = self.yield_request || self.slice_expired;
        self.yield_request = false;
        self.slice_expired = false;

        match self.running {
            None => self.switch_to(candidate),
            Some(run) => {
                if self.pool.tcb(run).state != TaskState::Running {
                    // The running task blocked or exited
                    self.switch_to(candidate);
                } else {
                    let cand_prio = self.pool.tcb(candidate).priority;
                    let run_prio = self.pool.tcb(run).priority;
                    if cand_prio.is_higher_than(run_prio)
                        || (cand_prio == run_prio && rotate_requested)
                    {
                        // Preempt or rotate: the outgoing task goes back
                        // behind its priority peers
                        self.pool.tcb_mut(run).state = TaskState::Ready;
                        self.ready.insert(&mut self.pool, run);
                        self.switch_to(candidate);
                    }
                }
            }
        }
    }

    /// Realize a switch to `candidate`
    fn switch_to(&mut self, candidate: u8) {
        self.ready.remove(&mut self.pool, candidate);
        let prev = self.running;
        {
            let tcb = self.pool.tcb_mut(candidate);
            tcb.state = TaskState::Running;
            tcb.stats.schedule_count += 1;
            tcb.reset_time_slice();
        }
        self.running = Some(candidate);
        self.stats.context_switches += 1;

        let prev_ctx = match prev {
            Some(p) => &mut self.pool.tcb_mut(p).context as *mut TaskContext,
            None => core::ptr::null_mut(),
        };
        let next_ctx = &mut self.pool.tcb_mut(candidate).context as *mut TaskContext;
        arch::context_switch_trigger(prev_ctx, next_ctx);
    }

    /// Start the scheduler: program the tick timer and run the first task
    ///
    /// Never returns. The first task is the highest-priority Ready task
    /// (at minimum the idle task exists).
    pub fn start(&mut self) -> ! {
        if self.state != KernelState::Initialized {
            crate::panic::structural_fault("scheduler started before init");
        }
        arch::configure_tick_timer(self.cpu_freq_hz / TICK_RATE_HZ);

        let first = self
            .ready
            .peek_highest(&self.pool)
            .unwrap_or_else(|| crate::panic::structural_fault("no task to start"));
        self.ready.remove(&mut self.pool, first);
        {
            let tcb = self.pool.tcb_mut(first);
            tcb.state = TaskState::Running;
            tcb.stats.schedule_count += 1;
            tcb.reset_time_slice();
        }
        self.running = Some(first);
        self.state = KernelState::Running;

        let ctx = &self.pool.tcb(first).context as *const TaskContext;
        arch::start_first_task(ctx)
    }

    /// Mark the kernel running without starting hardware (host testing)
    ///
    /// Performs the same bookkeeping as [`Kernel::start`] but returns, so a
    /// test can drive the scheduler step by step through the stub port.
    pub fn start_bookkeeping(&mut self) -> Result<()> {
        if self.state != KernelState::Initialized {
            return Err(Error::InvalidState);
        }
        self.state = KernelState::Running;
        self.schedule();
        Ok(())
    }

    // ======================================================================
    // Introspection
    // ======================================================================

    /// Handle of the running task
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.running.map(|slot| self.pool.tcb(slot).id)
    }

    /// Slot of the running task (crate-internal)
    pub(crate) fn running_slot(&self) -> Option<u8> {
        self.running
    }

    /// Whether `slot` is the reserved idle task (crate-internal)
    pub(crate) fn is_idle_slot(&self, slot: u8) -> bool {
        Some(slot) == self.idle_slot
    }

    /// Current tick count
    #[must_use]
    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    /// Kernel lifecycle state
    #[must_use]
    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Kernel counters
    #[must_use]
    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    /// A task's state
    ///
    /// # Errors
    /// `InvalidId` for a stale or out-of-range handle.
    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        Ok(self.pool.tcb(self.pool.resolve(id)?).state)
    }

    /// A task's effective priority (including any inheritance boost)
    ///
    /// # Errors
    /// `InvalidId` for a stale or out-of-range handle.
    pub fn effective_priority(&self, id: TaskId) -> Result<Priority> {
        Ok(self.pool.tcb(self.pool.resolve(id)?).priority)
    }

    /// A task's base priority
    ///
    /// # Errors
    /// `InvalidId` for a stale or out-of-range handle.
    pub fn base_priority(&self, id: TaskId) -> Result<Priority> {
        Ok(self.pool.tcb(self.pool.resolve(id)?).base_priority)
    }

    /// How a task's most recent wait ended
    ///
    /// # Errors
    /// `InvalidId` for a stale or out-of-range handle.
    pub fn wait_outcome(&self, id: TaskId) -> Result<WaitOutcome> {
        Ok(self.pool.tcb(self.pool.resolve(id)?).wait_outcome)
    }

    /// The kernel log
    pub fn log(&mut self) -> &mut LogBuffer {
        &mut self.log
    }

    /// Record a mutex event in the kernel log (crate-internal)
    pub(crate) fn log_mutex_event(&mut self, msg: core::fmt::Arguments<'_>) {
        self.log
            .log(k_common::log::LogLevel::Info, self.ticks, "mutex", msg);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Global kernel instance and embedded API
// ============================================================================

static mut KERNEL: Kernel = Kernel::new();

/// Run a closure against the global kernel inside a critical section
///
/// Interrupts are masked for the duration, so task code, the tick handler
/// and peripheral ISRs all observe the kernel atomically. The closure must
/// not block (and nothing in the kernel's own API does while the lock is
/// held).
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let saved = arch::disable_interrupts_save();
    // SAFETY: Interrupts are masked, so on the single supported core
    // nothing else can touch KERNEL until they are restored.
    let result = unsafe { f(&mut *core::ptr::addr_of_mut!(KERNEL)) };
    arch::restore_interrupts(saved);
    result
}

/// Initialize the global kernel
///
/// # Errors
/// `InvalidState` if called twice.
pub fn init() -> Result<()> {
    with_kernel(Kernel::init)
}

/// Start the global kernel (never returns)
pub fn start() -> ! {
    // SAFETY: start() diverges, so the usual scoped accessor cannot wrap
    // it. Interrupt masking is unnecessary: nothing else runs before the
    // first task is launched.
    unsafe { (*core::ptr::addr_of_mut!(KERNEL)).start() }
}

/// Create a task in the global kernel
///
/// # Errors
/// As [`Kernel::create_task`].
pub fn create_task(
    entry: TaskEntry,
    arg: usize,
    priority: Priority,
    stack_base: usize,
    stack_size: usize,
    name: &str,
) -> Result<TaskId> {
    with_kernel(|k| k.create_task(entry, arg, priority, stack_base, stack_size, name))
}

/// Delete a task in the global kernel
///
/// # Errors
/// As [`Kernel::delete_task`].
pub fn delete_task(id: TaskId) -> Result<()> {
    with_kernel(|k| k.delete_task(id))
}

/// Suspend a task in the global kernel
///
/// # Errors
/// As [`Kernel::suspend`].
pub fn suspend(id: TaskId) -> Result<()> {
    with_kernel(|k| k.suspend(id))
}

/// Resume a task in the global kernel
///
/// # Errors
/// As [`Kernel::resume`].
pub fn resume(id: TaskId) -> Result<()> {
    with_kernel(|k| k.resume(id))
}

/// Change a task's base priority in the global kernel
///
/// # Errors
/// As [`Kernel::set_priority`].
pub fn set_priority(id: TaskId, new: Priority) -> Result<()> {
    with_kernel(|k| k.set_priority(id, new))
}

/// Yield the processor
pub fn yield_now() {
    with_kernel(Kernel::yield_now);
}

/// Sleep for `ticks` ticks
///
/// # Errors
/// As [`Kernel::delay`].
pub fn delay(ticks: u64) -> Result<()> {
    with_kernel(|k| k.delay(ticks))
}

/// Sleep for `ms` milliseconds
///
/// # Errors
/// As [`Kernel::delay_ms`].
pub fn delay_ms(ms: u32) -> Result<()> {
    with_kernel(|k| k.delay_ms(ms))
}

/// Handle of the running task
#[must_use]
pub fn current_task() -> Option<TaskId> {
    with_kernel(|k| k.current_task())
}

/// Current tick count
#[must_use]
pub fn ticks() -> Ticks {
    with_kernel(|k| k.ticks())
}

/// Tick entry point for the platform's timer ISR
///
/// Wraps the tick in the ISR nesting hooks, so any switch it wants is
/// deferred to ISR exit exactly like for every other interrupt.
pub fn tick_from_isr() {
    with_kernel(|k| {
        k.isr_enter();
        k.tick();
        k.isr_exit();
    });
}

/// Interrupt-entry hook for peripheral ISRs
pub fn isr_enter() {
    with_kernel(Kernel::isr_enter);
}

/// Interrupt-exit hook for peripheral ISRs
pub fn isr_exit() {
    with_kernel(Kernel::isr_exit);
}

/// Scope guard holding the scheduler lock on the global kernel
///
/// Acquired by [`hold_preemption`]; the lock is released (and any deferred
/// switch decision runs) when the guard drops.
pub struct PreemptionGuard {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl Drop for PreemptionGuard {
    fn drop(&mut self) {
        with_kernel(Kernel::scheduler_unlock);
    }
}

/// Disable preemption until the returned guard is dropped
#[must_use]
pub fn hold_preemption() -> PreemptionGuard {
    with_kernel(Kernel::scheduler_lock);
    PreemptionGuard {
        _not_send: core::marker::PhantomData,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    extern "C" fn noop_task(_arg: usize) {}

    pub(crate) fn kernel() -> Kernel {
        let mut k = Kernel::new();
        k.init().unwrap();
        k
    }

    pub(crate) fn add_task(k: &mut Kernel, priority: u8, name: &str) -> TaskId {
        k.create_task(
            noop_task,
            0,
            Priority::new(priority),
            0x2000_0000,
            1024,
            name,
        )
        .unwrap()
    }

    #[test]
    fn test_init_creates_protected_idle() {
        let mut k = kernel();
        assert_eq!(k.state(), KernelState::Initialized);
        let idle = k.pool.tcb(0).id;
        assert_eq!(k.delete_task(idle), Err(Error::ProtectedTask));
        assert_eq!(k.suspend(idle), Err(Error::ProtectedTask));
        assert_eq!(
            k.set_priority(idle, Priority::new(1)),
            Err(Error::ProtectedTask)
        );
    }

    #[test]
    fn test_create_rejects_idle_range_priority() {
        let mut k = kernel();
        let r = k.create_task(
            noop_task,
            0,
            IDLE_PRIORITY,
            0x2000_0000,
            1024,
            "too_low",
        );
        assert_eq!(r, Err(Error::CreateFailed));
    }

    #[test]
    fn test_create_rejects_tiny_stack() {
        let mut k = kernel();
        let r = k.create_task(noop_task, 0, Priority::new(5), 0x2000_0000, 64, "t");
        assert_eq!(r, Err(Error::CreateFailed));
    }

    #[test]
    fn test_highest_priority_runs_first() {
        let mut k = kernel();
        let low = add_task(&mut k, 10, "low");
        let high = add_task(&mut k, 3, "high");
        k.start_bookkeeping().unwrap();

        assert_eq!(k.current_task(), Some(high));
        assert_eq!(k.task_state(low).unwrap(), TaskState::Ready);
    }

    #[test]
    fn test_preemption_on_higher_priority_creation() {
        let mut k = kernel();
        let low = add_task(&mut k, 10, "low");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(low));

        let high = add_task(&mut k, 2, "high");
        assert_eq!(k.current_task(), Some(high));
        assert_eq!(k.task_state(low).unwrap(), TaskState::Ready);
    }

    #[test]
    fn test_no_switch_for_lower_priority() {
        let mut k = kernel();
        let high = add_task(&mut k, 2, "high");
        k.start_bookkeeping().unwrap();
        let switches = k.stats().context_switches;

        let _low = add_task(&mut k, 9, "low");
        assert_eq!(k.current_task(), Some(high));
        assert_eq!(k.stats().context_switches, switches);
    }

    #[test]
    fn test_yield_rotates_equal_priority() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 5, "b");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(a));

        k.yield_now();
        assert_eq!(k.current_task(), Some(b));
        k.yield_now();
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_yield_does_not_drop_to_lower_priority() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let _low = add_task(&mut k, 9, "low");
        k.start_bookkeeping().unwrap();

        k.yield_now();
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_round_robin_slice_rotation() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 5, "b");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(a));

        for _ in 0..TIME_SLICE_TICKS {
            k.tick();
        }
        assert_eq!(k.current_task(), Some(b));

        for _ in 0..TIME_SLICE_TICKS {
            k.tick();
        }
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_scheduler_lock_defers_preemption() {
        let mut k = kernel();
        let low = add_task(&mut k, 10, "low");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(low));

        k.scheduler_lock();
        let high = add_task(&mut k, 2, "high");
        // Decision deferred: still the low task
        assert_eq!(k.current_task(), Some(low));
        k.scheduler_unlock();
        // Unlock runs the deferred decision once
        assert_eq!(k.current_task(), Some(high));
    }

    #[test]
    fn test_isr_nesting_defers_switch() {
        let mut k = kernel();
        let low = add_task(&mut k, 10, "low");
        k.start_bookkeeping().unwrap();

        k.isr_enter();
        k.isr_enter();
        let high = add_task(&mut k, 2, "high");
        assert_eq!(k.current_task(), Some(low));
        k.isr_exit();
        assert_eq!(k.current_task(), Some(low));
        k.isr_exit();
        assert_eq!(k.current_task(), Some(high));
    }

    #[test]
    fn test_delay_wakes_after_deadline() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 7, "b");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(a));

        k.delay(3).unwrap();
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.task_state(a).unwrap(), TaskState::Waiting);

        k.tick();
        k.tick();
        assert_eq!(k.task_state(a).unwrap(), TaskState::Waiting);
        k.tick();
        // Deadline hit: a outranks b again
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.task_state(b).unwrap(), TaskState::Ready);
        assert_eq!(k.wait_outcome(a).unwrap(), WaitOutcome::Completed);
    }

    #[test]
    fn test_suspend_resume_cycle() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();

        k.suspend(a).unwrap();
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.suspend(a), Err(Error::AlreadyWaiting));
        assert_eq!(k.resume(b), Err(Error::NotWaiting));

        k.resume(a).unwrap();
        assert_eq!(k.current_task(), Some(a));
    }

    #[test]
    fn test_resume_conflicts_with_other_wait() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let _b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();

        k.delay(10).unwrap();
        assert_eq!(k.resume(a), Err(Error::WaitConflict));
    }

    #[test]
    fn test_delete_running_task_picks_next() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();

        k.delete_task(a).unwrap();
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.task_state(a), Err(Error::InvalidId));
    }

    #[test]
    fn test_delete_while_locked_is_rejected_for_self() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();

        k.scheduler_lock();
        assert_eq!(k.delete_task(a), Err(Error::SchedulerLocked));
        // Deleting a non-running task is still fine under the lock
        assert!(k.delete_task(b).is_ok());
        k.scheduler_unlock();
    }

    #[test]
    fn test_set_priority_requeues_ready_task() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        let b = add_task(&mut k, 6, "b");
        k.start_bookkeeping().unwrap();
        assert_eq!(k.current_task(), Some(a));

        // Raising b above a preempts immediately
        k.set_priority(b, Priority::new(3)).unwrap();
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.effective_priority(b).unwrap(), Priority::new(3));
    }

    #[test]
    fn test_set_priority_bounds() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        k.start_bookkeeping().unwrap();
        assert_eq!(
            k.set_priority(a, IDLE_PRIORITY),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            k.set_priority(TaskId::INVALID, Priority::new(4)),
            Err(Error::InvalidId)
        );
    }

    #[test]
    fn test_stale_id_rejected_after_slot_reuse() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        k.start_bookkeeping().unwrap();
        k.delete_task(a).unwrap();

        let b = add_task(&mut k, 5, "b");
        // Same slot, new generation
        assert_eq!(a.slot(), b.slot());
        assert_eq!(k.task_state(a), Err(Error::InvalidId));
        assert_eq!(k.suspend(a), Err(Error::InvalidId));
        assert!(k.task_state(b).is_ok());
    }

    #[test]
    fn test_idle_runs_when_nothing_else_can() {
        let mut k = kernel();
        let a = add_task(&mut k, 5, "a");
        k.start_bookkeeping().unwrap();

        k.suspend(a).unwrap();
        let idle = k.current_task().unwrap();
        assert_eq!(idle.slot(), 0);
    }
}
