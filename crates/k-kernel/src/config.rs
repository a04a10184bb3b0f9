// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Build-time kernel configuration
//!
//! The kernel's tables are sized from one `const` [`KernelConfig`]. The
//! `checked()` call runs during const evaluation, so editing a field to an
//! out-of-range value fails the build with the validation message.

use k_common::KernelConfig;

use crate::task::Priority;

/// The active kernel configuration
pub const CONFIG: KernelConfig = KernelConfig::DEFAULT.checked();

/// Maximum number of task slots, including the idle slot
pub const MAX_TASKS: usize = CONFIG.max_tasks;

/// Number of priority levels; valid priorities are `0..PRIORITY_COUNT`
pub const PRIORITY_COUNT: usize = CONFIG.priority_count;

/// Kernel heap arena size in machine words
pub const HEAP_WORDS: usize = CONFIG.heap_words;

/// Round-robin time slice in ticks
pub const TIME_SLICE_TICKS: u32 = CONFIG.time_slice_ticks;

/// System tick rate in Hz
pub const TICK_RATE_HZ: u32 = CONFIG.tick_rate_hz;

/// Priority reserved for the idle task (the lowest level)
pub const IDLE_PRIORITY: Priority = Priority::new(CONFIG.idle_priority());

/// Lowest priority available to application tasks
pub const LOWEST_USER_PRIORITY: Priority = Priority::new(CONFIG.lowest_user_priority());

/// Ready-queue algorithm selected at build time
///
/// Either implementation satisfies the same ordering contract; they are
/// never mixed within one kernel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyQueueKind {
    /// Single priority-ordered doubly-linked list
    OrderedList,
    /// Priority bitmap plus one FIFO list per active priority level
    Bitmap,
}

/// The ready-queue algorithm this kernel image was built with
#[must_use]
pub const fn ready_queue_kind() -> ReadyQueueKind {
    if cfg!(feature = "ready-list") {
        ReadyQueueKind::OrderedList
    } else {
        ReadyQueueKind::Bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_is_the_lowest_level() {
        assert_eq!(IDLE_PRIORITY.as_u8() as usize, PRIORITY_COUNT - 1);
        assert!(LOWEST_USER_PRIORITY.is_higher_than(IDLE_PRIORITY));
    }

    #[test]
    fn test_config_is_self_consistent() {
        assert!(MAX_TASKS >= 2);
        assert!(PRIORITY_COUNT >= 2);
        assert!(TIME_SLICE_TICKS >= 1);
    }
}
