// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Logging infrastructure for the Kestrel kernel
//!
//! A lightweight, no_std circular log. Records are written into a fixed
//! ring and either iterated in place or drained oldest-first. There is no
//! I/O here - a board support layer decides whether and where entries are
//! emitted.

use core::fmt::{self, Write};
use heapless::String;

use crate::time::Ticks;

/// Maximum log message length in bytes
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log ring capacity (number of entries)
pub const LOG_CAPACITY: usize = 32;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors that require immediate attention
    Error = 0,
    /// Warnings about potential issues
    Warn = 1,
    /// Informational messages
    Info = 2,
    /// Debug messages (development only)
    Debug = 3,
}

impl LogLevel {
    /// Get the log level name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Get a one-character prefix for the log level
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One log record
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Kernel tick count at the time of the record
    pub tick: Ticks,
    /// Originating module name
    pub module: &'static str,
    /// Formatted message
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:010}] {} [{}] {}",
            self.tick.as_u64(),
            self.level.prefix(),
            self.module,
            self.message
        )
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Fixed-capacity circular log
///
/// When full, the oldest entry is overwritten.
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_CAPACITY],
    write_index: usize,
    count: usize,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer recording Info and above
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_CAPACITY],
            write_index: 0,
            count: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum recorded level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Get the minimum recorded level
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Check whether a level passes the filter
    #[must_use]
    pub const fn should_log(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Record a formatted message
    pub fn log(
        &mut self,
        level: LogLevel,
        tick: Ticks,
        module: &'static str,
        args: fmt::Arguments<'_>,
    ) {
        if !self.should_log(level) {
            return;
        }

        let mut message = String::<MAX_LOG_MESSAGE_LEN>::new();
        // Overlong messages are truncated, not dropped
        let _ = message.write_fmt(args);

        self.entries[self.write_index] = Some(LogEntry {
            level,
            tick,
            module,
            message,
        });
        self.write_index = (self.write_index + 1) % LOG_CAPACITY;
        if self.count < LOG_CAPACITY {
            self.count += 1;
        }
    }

    /// Number of stored entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if the buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Remove and return the oldest entry
    pub fn pop(&mut self) -> Option<LogEntry> {
        if self.count == 0 {
            return None;
        }
        let oldest = (self.write_index + LOG_CAPACITY - self.count) % LOG_CAPACITY;
        self.count -= 1;
        self.entries[oldest].take()
    }

    /// Discard all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
    }

    /// Iterate over stored entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        let oldest = (self.write_index + LOG_CAPACITY - self.count) % LOG_CAPACITY;
        (0..self.count).filter_map(move |i| self.entries[(oldest + i) % LOG_CAPACITY].as_ref())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $tick, $module, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $tick, $module, format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $tick, $module, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $tick, $module, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_come_back_oldest_first() {
        let mut log = LogBuffer::new();
        log_info!(log, Ticks::new(1), "test", "first");
        log_info!(log, Ticks::new(2), "test", "second");

        let mut it = log.iter();
        assert_eq!(it.next().unwrap().message.as_str(), "first");
        assert_eq!(it.next().unwrap().message.as_str(), "second");
        assert!(it.next().is_none());
    }

    #[test]
    fn test_level_filter() {
        let mut log = LogBuffer::new();
        log.set_min_level(LogLevel::Warn);

        log_info!(log, Ticks::new(0), "test", "dropped");
        log_error!(log, Ticks::new(0), "test", "kept");

        assert_eq!(log.len(), 1);
        assert_eq!(log.iter().next().unwrap().level, LogLevel::Error);
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut log = LogBuffer::new();
        for i in 0..(LOG_CAPACITY + 3) {
            log_info!(log, Ticks::new(i as u64), "test", "msg {}", i);
        }

        assert_eq!(log.len(), LOG_CAPACITY);
        let first = log.iter().next().unwrap();
        assert_eq!(first.tick, Ticks::new(3));
    }

    #[test]
    fn test_pop_drains() {
        let mut log = LogBuffer::new();
        log_info!(log, Ticks::new(7), "test", "only");

        let entry = log.pop().unwrap();
        assert_eq!(entry.tick, Ticks::new(7));
        assert!(log.pop().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_overlong_message_is_truncated() {
        let mut log = LogBuffer::new();
        let raw = [b'x'; 2 * MAX_LOG_MESSAGE_LEN];
        let long = core::str::from_utf8(&raw).unwrap();
        log_info!(log, Ticks::new(0), "test", "{}", long);

        let entry = log.iter().next().unwrap();
        assert!(entry.message.len() <= MAX_LOG_MESSAGE_LEN);
    }
}
