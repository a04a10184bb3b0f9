// SPDX-License-Identifier: Apache-2.0
// Copyright 2025-2026 Kestrel Embedded Systems

//! Kestrel Common Library
//!
//! This crate provides the types shared by every Kestrel kernel component:
//! the unified error enum, the compile-time kernel configuration, the
//! circular log buffer, and tick/time utilities.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Enable defmt formatting of errors for embedded debugging
//!
//! No heap allocations are performed - all buffers use fixed-size arrays or
//! heapless collections.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod errors;
pub mod log;
pub mod time;

// Re-export commonly used items
pub use config::KernelConfig;
pub use errors::{Error, Result};
pub use time::{Deadline, TickFrequency, Ticks};
