// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Port layer
//!
//! Everything CPU-specific the kernel consumes lives behind this module:
//! critical sections, the context-switch request, first-task startup and
//! the tick timer. The register save/restore itself (the PendSV handler on
//! Cortex-M) is supplied by the platform, not by this crate - the kernel
//! only ever *requests* a switch via [`context_switch_trigger`].
//!
//! Supported ports:
//! - ARM Cortex-M (feature `cortex-m`, ARM targets only)
//! - A stub port for every other build, so the whole kernel compiles and
//!   tests on the host. The stub never switches contexts; host tests drive
//!   the scheduler's bookkeeping directly.

// ============================================================================
// ARM Cortex-M port
// ============================================================================

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub mod cortex_m;

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use cortex_m::*;

// ============================================================================
// Stub port (host builds and tests)
// ============================================================================

#[cfg(not(all(feature = "cortex-m", target_arch = "arm")))]
pub mod stub {
    //! No-op port with the same surface as the hardware ports.

    use crate::task::TaskEntry;

    /// Saved execution context (stub: stack pointer only)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskContext {
        /// Saved stack pointer
        pub sp: usize,
    }

    impl TaskContext {
        /// Create an empty context
        #[must_use]
        pub const fn new() -> Self {
            Self { sp: 0 }
        }

        /// Prepare the initial context for a fresh task
        ///
        /// The stub records the stack top and nothing else; no frame is
        /// materialized because the stub never resumes a task.
        pub fn init_stack(&mut self, stack_top: usize, _entry: TaskEntry, _arg: usize) {
            self.sp = stack_top;
        }
    }

    impl Default for TaskContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Request a context switch from `prev` to `next` (stub: no-op)
    pub fn context_switch_trigger(_prev: *mut TaskContext, _next: *mut TaskContext) {}

    /// Start executing the first task (stub: parks forever)
    pub fn start_first_task(_ctx: *const TaskContext) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Disable interrupts, returning the previous state
    pub fn disable_interrupts_save() -> u32 {
        0
    }

    /// Restore a previously saved interrupt state
    pub fn restore_interrupts(_state: u32) {}

    /// Park until the next interrupt (stub: spin hint)
    pub fn wait_for_interrupt() {
        core::hint::spin_loop();
    }

    /// Configure the tick timer (stub: no-op)
    pub fn configure_tick_timer(_reload: u32) {}

    /// One-time core setup (stub: no-op)
    pub fn init_core() {}

    /// Park the core permanently (fault path)
    pub fn park() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(all(feature = "cortex-m", target_arch = "arm")))]
pub use stub::*;
