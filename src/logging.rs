// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Opt-in logging.
//!
//! The allocator may be installed as the global allocator, and a logger that allocates would then
//! re-enter it. Log records are therefore only emitted after [`enable_logging`] has been called.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

static HEAP_LOG: AtomicBool = AtomicBool::new(false);

/// Enables logging through the [`log`](https://docs.rs/log) facade for all allocators.
pub fn enable_logging() {
    HEAP_LOG.store(true, Ordering::Relaxed);
}

/// Disables logging for all allocators.
pub fn disable_logging() {
    HEAP_LOG.store(false, Ordering::Relaxed);
}

#[inline]
pub(crate) fn should_log() -> bool {
    HEAP_LOG.load(Ordering::Relaxed)
}

macro_rules! hwarn {
    ($($arg:tt)*) => {
        if $crate::logging::should_log() {
            ::log::warn!($($arg)*);
        }
    };
}

macro_rules! hdebug {
    ($($arg:tt)*) => {
        if $crate::logging::should_log() {
            ::log::debug!($($arg)*);
        }
    };
}

macro_rules! htrace {
    ($($arg:tt)*) => {
        if $crate::logging::should_log() {
            ::log::trace!($($arg)*);
        }
    };
}

pub(crate) use hdebug;
pub(crate) use htrace;
pub(crate) use hwarn;
