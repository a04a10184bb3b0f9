// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Task synchronization and messaging
//!
//! Thin payload glue over the event wait list: each object pairs one
//! [`WaitList`] with a small payload.
//!
//! - **Semaphore**: a counter
//! - **Mailbox**: a single message slot
//! - **Message queue**: a fixed ring of messages
//!
//! Receivers block (optionally with a timeout); posts never block - a full
//! object rejects the post. A post with a waiter present hands the payload
//! straight to the woken task through its TCB message slot, so a wake is
//! never lost between the post and the waiter's next run.

use heapless::Vec;
use k_common::{Error, Result};

use crate::scheduler::{with_kernel, Kernel};
use crate::task::{WaitOutcome, WaitSource};
use crate::waitlist::{PendStatus, WaitList, WaitOrder};

/// Number of semaphore control blocks
pub const MAX_SEMAPHORES: usize = 8;

/// Number of mailbox control blocks
pub const MAX_MAILBOXES: usize = 8;

/// Number of message-queue control blocks
pub const MAX_MSG_QUEUES: usize = 4;

/// Messages per queue ring
pub const MSG_QUEUE_DEPTH: usize = 8;

/// Maximum message payload in bytes
pub const MAX_MESSAGE_SIZE: usize = 64;

/// Message payload
pub type Message = Vec<u8, MAX_MESSAGE_SIZE>;

/// Semaphore handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemId(u8);

/// Mailbox handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxId(u8);

/// Message-queue handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQueueId(u8);

/// Semaphore control block
pub struct SemaphoreCb {
    pub(crate) used: bool,
    count: u16,
    limit: u16,
    pub(crate) waiters: WaitList,
}

impl SemaphoreCb {
    /// An unused control block
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used: false,
            count: 0,
            limit: 0,
            waiters: WaitList::new(WaitOrder::Priority),
        }
    }
}

/// Mailbox control block
pub struct MailboxCb {
    pub(crate) used: bool,
    slot: Option<Message>,
    pub(crate) waiters: WaitList,
}

impl MailboxCb {
    /// An unused control block
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used: false,
            slot: None,
            waiters: WaitList::new(WaitOrder::Priority),
        }
    }
}

/// Message-queue control block
pub struct MsgQueueCb {
    pub(crate) used: bool,
    ring: [Option<Message>; MSG_QUEUE_DEPTH],
    head: usize,
    count: usize,
    pub(crate) waiters: WaitList,
}

impl MsgQueueCb {
    /// An unused control block
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<Message> = None;
        Self {
            used: false,
            ring: [NONE; MSG_QUEUE_DEPTH],
            head: 0,
            count: 0,
            waiters: WaitList::new(WaitOrder::Priority),
        }
    }

    fn push(&mut self, msg: Message) -> Result<()> {
        if self.count == MSG_QUEUE_DEPTH {
            return Err(Error::QueueFull);
        }
        let tail = (self.head + self.count) % MSG_QUEUE_DEPTH;
        self.ring[tail] = Some(msg);
        self.count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let msg = self.ring[self.head].take();
        self.head = (self.head + 1) % MSG_QUEUE_DEPTH;
        self.count -= 1;
        msg
    }
}

fn to_message(bytes: &[u8]) -> Result<Message> {
    Message::from_slice(bytes).map_err(|()| Error::BufferTooSmall)
}

impl Kernel {
    // ======================================================================
    // Semaphores
    // ======================================================================

    /// Allocate a counting semaphore
    ///
    /// # Errors
    /// `InvalidParameter` for a zero limit or an initial count above it,
    /// `ResourceExhausted` when the table is full.
    pub fn create_semaphore(&mut self, initial: u16, limit: u16, order: WaitOrder) -> Result<SemId> {
        if limit == 0 || initial > limit {
            return Err(Error::InvalidParameter);
        }
        for (i, cb) in self.semaphores.iter_mut().enumerate() {
            if !cb.used {
                cb.used = true;
                cb.count = initial;
                cb.limit = limit;
                cb.waiters.set_order(order);
                return Ok(SemId(i as u8));
            }
        }
        Err(Error::ResourceExhausted)
    }

    fn resolve_semaphore(&self, id: SemId) -> Result<u8> {
        let i = id.0 as usize;
        if i >= MAX_SEMAPHORES || !self.semaphores[i].used {
            return Err(Error::InvalidParameter);
        }
        Ok(id.0)
    }

    /// Take one count, blocking the running task when none is available
    ///
    /// # Errors
    /// `InvalidParameter`, `InvalidState` outside a task, `ProtectedTask`
    /// for the idle task.
    pub fn semaphore_acquire(&mut self, id: SemId, timeout: Option<u64>) -> Result<PendStatus> {
        let s = self.resolve_semaphore(id)?;
        let cur = self.running_slot().ok_or(Error::InvalidState)?;
        if self.is_idle_slot(cur) {
            return Err(Error::ProtectedTask);
        }
        let cb = &mut self.semaphores[s as usize];
        if cb.count > 0 {
            cb.count -= 1;
            return Ok(PendStatus::Immediate);
        }
        cb.waiters
            .enqueue(&mut self.pool, cur, WaitSource::Semaphore(s));
        self.note_blocked(cur, timeout);
        Ok(PendStatus::Blocked)
    }

    /// Give one count back, waking the front waiter if there is one
    ///
    /// # Errors
    /// `InvalidParameter`, `SemaphoreOverflow` when the count is already at
    /// its limit.
    pub fn semaphore_release(&mut self, id: SemId) -> Result<()> {
        let s = self.resolve_semaphore(id)?;
        let woken = self.semaphores[s as usize].waiters.pop_front(&mut self.pool);
        match woken {
            Some(w) => {
                // The count moves straight to the waiter
                self.make_ready(w, WaitOutcome::Completed);
                self.schedule();
            }
            None => {
                let cb = &mut self.semaphores[s as usize];
                if cb.count == cb.limit {
                    return Err(Error::SemaphoreOverflow);
                }
                cb.count += 1;
            }
        }
        Ok(())
    }

    /// Current semaphore count
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle.
    pub fn semaphore_count(&self, id: SemId) -> Result<u16> {
        let s = self.resolve_semaphore(id)?;
        Ok(self.semaphores[s as usize].count)
    }

    // ======================================================================
    // Mailboxes
    // ======================================================================

    /// Allocate a single-slot mailbox
    ///
    /// # Errors
    /// `ResourceExhausted` when the table is full.
    pub fn create_mailbox(&mut self, order: WaitOrder) -> Result<MailboxId> {
        for (i, cb) in self.mailboxes.iter_mut().enumerate() {
            if !cb.used {
                cb.used = true;
                cb.slot = None;
                cb.waiters.set_order(order);
                return Ok(MailboxId(i as u8));
            }
        }
        Err(Error::ResourceExhausted)
    }

    fn resolve_mailbox(&self, id: MailboxId) -> Result<u8> {
        let i = id.0 as usize;
        if i >= MAX_MAILBOXES || !self.mailboxes[i].used {
            return Err(Error::InvalidParameter);
        }
        Ok(id.0)
    }

    /// Post a message; never blocks
    ///
    /// With a waiter present the message is handed straight to it;
    /// otherwise it lands in the slot.
    ///
    /// # Errors
    /// `InvalidParameter`, `BufferTooSmall` for an oversized payload,
    /// `QueueFull` when the slot is occupied.
    pub fn mailbox_post(&mut self, id: MailboxId, bytes: &[u8]) -> Result<()> {
        let b = self.resolve_mailbox(id)?;
        let msg = to_message(bytes)?;
        let woken = self.mailboxes[b as usize].waiters.pop_front(&mut self.pool);
        match woken {
            Some(w) => {
                self.pool.tcb_mut(w).msg = Some(msg);
                self.make_ready(w, WaitOutcome::Completed);
                self.schedule();
                Ok(())
            }
            None => {
                let cb = &mut self.mailboxes[b as usize];
                if cb.slot.is_some() {
                    return Err(Error::QueueFull);
                }
                cb.slot = Some(msg);
                Ok(())
            }
        }
    }

    /// Fetch a message, blocking the running task when the slot is empty
    ///
    /// Returns the message on an immediate hit; after a `Blocked` return
    /// the message is collected from the task's message slot once it runs
    /// again (see [`Kernel::take_delivered_message`]).
    ///
    /// # Errors
    /// `InvalidParameter`, `InvalidState`, `ProtectedTask` for the idle
    /// task.
    pub fn mailbox_fetch(
        &mut self,
        id: MailboxId,
        timeout: Option<u64>,
    ) -> Result<(PendStatus, Option<Message>)> {
        let b = self.resolve_mailbox(id)?;
        let cur = self.running_slot().ok_or(Error::InvalidState)?;
        if self.is_idle_slot(cur) {
            return Err(Error::ProtectedTask);
        }
        if let Some(msg) = self.mailboxes[b as usize].slot.take() {
            return Ok((PendStatus::Immediate, Some(msg)));
        }
        self.mailboxes[b as usize]
            .waiters
            .enqueue(&mut self.pool, cur, WaitSource::Mailbox(b));
        self.note_blocked(cur, timeout);
        Ok((PendStatus::Blocked, None))
    }

    // ======================================================================
    // Message queues
    // ======================================================================

    /// Allocate a message queue
    ///
    /// # Errors
    /// `ResourceExhausted` when the table is full.
    pub fn create_msg_queue(&mut self, order: WaitOrder) -> Result<MsgQueueId> {
        for (i, cb) in self.queues.iter_mut().enumerate() {
            if !cb.used {
                cb.used = true;
                cb.head = 0;
                cb.count = 0;
                cb.waiters.set_order(order);
                return Ok(MsgQueueId(i as u8));
            }
        }
        Err(Error::ResourceExhausted)
    }

    fn resolve_queue(&self, id: MsgQueueId) -> Result<u8> {
        let i = id.0 as usize;
        if i >= MAX_MSG_QUEUES || !self.queues[i].used {
            return Err(Error::InvalidParameter);
        }
        Ok(id.0)
    }

    /// Post a message to the queue; never blocks
    ///
    /// # Errors
    /// `InvalidParameter`, `BufferTooSmall`, `QueueFull` when the ring is
    /// full.
    pub fn msg_queue_post(&mut self, id: MsgQueueId, bytes: &[u8]) -> Result<()> {
        let q = self.resolve_queue(id)?;
        let msg = to_message(bytes)?;
        let woken = self.queues[q as usize].waiters.pop_front(&mut self.pool);
        match woken {
            Some(w) => {
                self.pool.tcb_mut(w).msg = Some(msg);
                self.make_ready(w, WaitOutcome::Completed);
                self.schedule();
                Ok(())
            }
            None => self.queues[q as usize].push(msg),
        }
    }

    /// Fetch a message, blocking the running task when the ring is empty
    ///
    /// # Errors
    /// `InvalidParameter`, `InvalidState`, `ProtectedTask` for the idle
    /// task.
    pub fn msg_queue_fetch(
        &mut self,
        id: MsgQueueId,
        timeout: Option<u64>,
    ) -> Result<(PendStatus, Option<Message>)> {
        let q = self.resolve_queue(id)?;
        let cur = self.running_slot().ok_or(Error::InvalidState)?;
        if self.is_idle_slot(cur) {
            return Err(Error::ProtectedTask);
        }
        if let Some(msg) = self.queues[q as usize].pop() {
            return Ok((PendStatus::Immediate, Some(msg)));
        }
        self.queues[q as usize]
            .waiters
            .enqueue(&mut self.pool, cur, WaitSource::MsgQueue(q));
        self.note_blocked(cur, timeout);
        Ok((PendStatus::Blocked, None))
    }

    // ======================================================================
    // Direct delivery
    // ======================================================================

    /// Collect a message handed to a task while it was waiting
    ///
    /// # Errors
    /// `InvalidId` for a stale handle.
    pub fn take_delivered_message(&mut self, id: crate::task::TaskId) -> Result<Option<Message>> {
        let slot = self.pool.resolve(id)?;
        Ok(self.pool.tcb_mut(slot).msg.take())
    }

    /// Wake every waiter on a semaphore's list without granting a count
    /// (broadcast; each waiter observes a completed wait and retries)
    ///
    /// # Errors
    /// `InvalidParameter` for a bad handle.
    pub fn semaphore_flush(&mut self, id: SemId) -> Result<usize> {
        let s = self.resolve_semaphore(id)?;
        let mut woken = 0;
        while let Some(w) = self.semaphores[s as usize].waiters.pop_front(&mut self.pool) {
            self.make_ready(w, WaitOutcome::Completed);
            woken += 1;
        }
        if woken > 0 {
            self.schedule();
        }
        Ok(woken)
    }
}

// ============================================================================
// Global kernel wrappers
// ============================================================================

/// Allocate a semaphore in the global kernel
///
/// # Errors
/// As [`Kernel::create_semaphore`].
pub fn create_semaphore(initial: u16, limit: u16, order: WaitOrder) -> Result<SemId> {
    with_kernel(|k| k.create_semaphore(initial, limit, order))
}

/// Take one semaphore count, blocking until granted or timed out
///
/// # Errors
/// `Timeout` when the deadline passed first; otherwise as
/// [`Kernel::semaphore_acquire`].
pub fn semaphore_acquire(id: SemId, timeout: Option<u64>) -> Result<()> {
    let status = with_kernel(|k| k.semaphore_acquire(id, timeout))?;
    match status {
        PendStatus::Immediate => Ok(()),
        PendStatus::Blocked => with_kernel(|k| {
            // Runs again only after the scheduler switched back here
            let cur = k.current_task().ok_or(Error::InvalidState)?;
            match k.wait_outcome(cur)? {
                WaitOutcome::Completed => Ok(()),
                WaitOutcome::TimedOut => Err(Error::Timeout),
            }
        }),
    }
}

/// Give one semaphore count back
///
/// # Errors
/// As [`Kernel::semaphore_release`].
pub fn semaphore_release(id: SemId) -> Result<()> {
    with_kernel(|k| k.semaphore_release(id))
}

/// Allocate a mailbox in the global kernel
///
/// # Errors
/// As [`Kernel::create_mailbox`].
pub fn create_mailbox(order: WaitOrder) -> Result<MailboxId> {
    with_kernel(|k| k.create_mailbox(order))
}

/// Post a message to a mailbox
///
/// # Errors
/// As [`Kernel::mailbox_post`].
pub fn mailbox_post(id: MailboxId, bytes: &[u8]) -> Result<()> {
    with_kernel(|k| k.mailbox_post(id, bytes))
}

/// Fetch a message from a mailbox, blocking until one arrives or the
/// timeout expires
///
/// # Errors
/// `Timeout` when the deadline passed first; otherwise as
/// [`Kernel::mailbox_fetch`].
pub fn mailbox_fetch(id: MailboxId, timeout: Option<u64>) -> Result<Message> {
    let (status, msg) = with_kernel(|k| k.mailbox_fetch(id, timeout))?;
    match status {
        PendStatus::Immediate => msg.ok_or(Error::InternalError),
        PendStatus::Blocked => with_kernel(|k| {
            let cur = k.current_task().ok_or(Error::InvalidState)?;
            match k.wait_outcome(cur)? {
                WaitOutcome::Completed => {
                    k.take_delivered_message(cur)?.ok_or(Error::InternalError)
                }
                WaitOutcome::TimedOut => Err(Error::Timeout),
            }
        }),
    }
}

/// Allocate a message queue in the global kernel
///
/// # Errors
/// As [`Kernel::create_msg_queue`].
pub fn create_msg_queue(order: WaitOrder) -> Result<MsgQueueId> {
    with_kernel(|k| k.create_msg_queue(order))
}

/// Post a message to a queue
///
/// # Errors
/// As [`Kernel::msg_queue_post`].
pub fn msg_queue_post(id: MsgQueueId, bytes: &[u8]) -> Result<()> {
    with_kernel(|k| k.msg_queue_post(id, bytes))
}

/// Fetch a message from a queue, blocking until one arrives or the timeout
/// expires
///
/// # Errors
/// `Timeout` when the deadline passed first; otherwise as
/// [`Kernel::msg_queue_fetch`].
pub fn msg_queue_fetch(id: MsgQueueId, timeout: Option<u64>) -> Result<Message> {
    let (status, msg) = with_kernel(|k| k.msg_queue_fetch(id, timeout))?;
    match status {
        PendStatus::Immediate => msg.ok_or(Error::InternalError),
        PendStatus::Blocked => with_kernel(|k| {
            let cur = k.current_task().ok_or(Error::InvalidState)?;
            match k.wait_outcome(cur)? {
                WaitOutcome::Completed => {
                    k.take_delivered_message(cur)?.ok_or(Error::InternalError)
                }
                WaitOutcome::TimedOut => Err(Error::Timeout),
            }
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
