// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use core::fmt;

/// Errors returned by [`TagHeap`](crate::TagHeap) construction and fallible allocation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The arena provider could not grow the arena.
    ArenaExhausted(ArenaExhausted),
    /// The [`Config`](crate::Config) passed to the allocator is not usable.
    InvalidConfig(&'static str),
    /// The arena passed to the allocator already contains data.
    ArenaNotEmpty,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaExhausted(err) => err.fmt(f),
            Self::InvalidConfig(reason) => write!(f, "invalid allocator configuration: {reason}"),
            Self::ArenaNotEmpty => f.write_str("arena must be empty when the allocator is created"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::ArenaExhausted(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ArenaExhausted> for Error {
    #[inline]
    fn from(err: ArenaExhausted) -> Self {
        Self::ArenaExhausted(err)
    }
}

/// An [`ArenaProvider`](crate::ArenaProvider) could not satisfy a growth request.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ArenaExhausted {
    /// Number of bytes requested.
    pub requested: usize,
    /// Number of bytes the arena could still have grown by.
    pub available: usize,
}

impl fmt::Display for ArenaExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arena exhausted: requested {} bytes, {} available",
            self.requested, self.available
        )
    }
}

impl core::error::Error for ArenaExhausted {}
