// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Kernel configuration
//!
//! All configuration is fixed at compile time. The kernel crate pins one
//! `const` [`KernelConfig`] and sizes its tables from it; [`KernelConfig::checked`]
//! is evaluated in const context, so an out-of-range value fails the build
//! with a descriptive message instead of panicking at runtime.

/// Compile-time kernel configuration
///
/// Lower numeric priority values are higher priorities. The lowest usable
/// priority value is `priority_count - 1` and is reserved for the idle task.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Maximum number of task slots, including the reserved idle slot
    pub max_tasks: usize,
    /// Number of distinct priority levels (valid priorities are
    /// `0..priority_count`)
    pub priority_count: usize,
    /// Kernel heap arena size in machine words
    pub heap_words: usize,
    /// Round-robin time slice in ticks for tasks sharing a priority
    pub time_slice_ticks: u32,
    /// System tick rate in Hz
    pub tick_rate_hz: u32,
}

impl KernelConfig {
    /// Default configuration: 16 tasks, 32 priority levels, a 1024-word
    /// heap, a 10-tick time slice and a 1 kHz tick
    pub const DEFAULT: Self = Self {
        max_tasks: 16,
        priority_count: 32,
        heap_words: 1024,
        time_slice_ticks: 10,
        tick_rate_hz: 1000,
    };

    /// Validate every field, panicking in const evaluation on any
    /// out-of-range value
    ///
    /// Intended usage is `const CONFIG: KernelConfig = …​.checked();` so a
    /// bad configuration is rejected when the kernel is built.
    #[must_use]
    pub const fn checked(self) -> Self {
        assert!(
            self.max_tasks >= 2 && self.max_tasks <= 64,
            "max_tasks must be in 2..=64 (one slot is reserved for the idle task)"
        );
        assert!(
            self.priority_count >= 2 && self.priority_count <= 64,
            "priority_count must be in 2..=64 (the lowest level is reserved for idle)"
        );
        assert!(
            self.heap_words >= 64 && self.heap_words <= 1 << 22,
            "heap_words must be in 64..=4194304"
        );
        assert!(
            self.time_slice_ticks >= 1,
            "time_slice_ticks must be at least 1"
        );
        assert!(
            self.tick_rate_hz >= 10 && self.tick_rate_hz <= 100_000,
            "tick_rate_hz must be in 10..=100000"
        );
        self
    }

    /// The lowest usable priority value (reserved for the idle task)
    #[must_use]
    pub const fn idle_priority(&self) -> u8 {
        (self.priority_count - 1) as u8
    }

    /// The lowest priority value available to application tasks
    #[must_use]
    pub const fn lowest_user_priority(&self) -> u8 {
        (self.priority_count - 2) as u8
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
