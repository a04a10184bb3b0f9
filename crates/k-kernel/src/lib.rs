// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Kestrel real-time kernel
//!
//! A small priority-preemptive kernel for single-core microcontrollers
//! without memory protection:
//!
//! - **Scheduler**: strict priority, FIFO round-robin within a priority,
//!   preemption deferral via a reentrant scheduler lock and ISR nesting
//! - **Task pool**: fixed slots, generation-checked handles, intrusive
//!   queues
//! - **Kernel heap**: first-fit arena with exhaustive coalescing and a
//!   checkable tiling invariant
//! - **Mutexes**: priority inheritance across ownership chains
//! - **IPC**: semaphores, mailboxes and message queues over a shared
//!   wait-list primitive
//! - **Port layer**: Cortex-M (PendSV request) or a host stub for tests
//!
//! # Usage
//!
//! ```rust,ignore
//! use k_kernel::{self as kernel, Priority};
//!
//! extern "C" fn worker(_arg: usize) {
//!     loop {
//!         kernel::delay_ms(100).ok();
//!     }
//! }
//!
//! static mut WORKER_STACK: [u8; 1024] = [0; 1024];
//!
//! kernel::init().expect("kernel init failed");
//! kernel::create_task(
//!     worker,
//!     0,
//!     Priority::new(4),
//!     unsafe { WORKER_STACK.as_ptr() as usize },
//!     1024,
//!     "worker",
//! )
//! .expect("task creation failed");
//! kernel::start();
//! ```
//!
//! # Features
//!
//! - `ready-list`: ordered-list ready queue instead of the bitmap table
//! - `cortex-m`: build the Cortex-M port (other builds use the host stub)
//! - `defmt`: defmt formatting for errors

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod arch;
pub mod config;
pub mod ipc;
pub mod memory;
pub mod mutex;
pub mod panic;
pub mod readyq;
pub mod scheduler;
pub mod task;
pub mod waitlist;

// Re-export the embedded-facing API at the crate root
pub use config::{ready_queue_kind, ReadyQueueKind, CONFIG};
pub use k_common::{Error, Result, Ticks};
pub use memory::{heap_stats, kalloc, kfree, HeapAddr, HeapStats};
pub use mutex::MutexId;
pub use panic::set_fault_hook;
pub use scheduler::{
    create_task, current_task, delay, delay_ms, delete_task, hold_preemption, init, isr_enter,
    isr_exit, resume, set_priority, start, suspend, tick_from_isr, ticks, with_kernel, yield_now,
    Kernel, KernelState, PreemptionGuard,
};
pub use task::{Priority, TaskId, TaskState};

/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Kernel build info
pub const BUILD_INFO: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " v",
    env!("CARGO_PKG_VERSION"),
    " - Kestrel real-time kernel"
);
