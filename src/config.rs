// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::error::Error;
use crate::sizing;
use crate::sizing::ARENA_OVERHEAD;
use crate::sizing::MAX_ARENA_SIZE;
use crate::sizing::MIN_BLOCK_SIZE;

/// Tuning knobs for a [`TagHeap`](crate::TagHeap).
///
/// # Examples
///
/// ```
/// use tagheap::Config;
/// use tagheap::TagHeap;
/// use tagheap::VecArena;
///
/// let config = Config::new().initial_size(4096).chunk_size(512);
/// let heap = TagHeap::with_config(VecArena::new(), config).expect("init failed");
/// assert_eq!(heap.usage().total, 4096);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Config {
    pub(crate) initial_size: usize,
    pub(crate) chunk_size: usize,
}

impl Config {
    /// Default size of the arena requested at initialization.
    pub const DEFAULT_INITIAL_SIZE: usize = 1 << 10;
    /// Default minimum growth step.
    pub const DEFAULT_CHUNK_SIZE: usize = 1 << 10;

    /// Returns the default configuration.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_size: Self::DEFAULT_INITIAL_SIZE,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the number of bytes requested from the arena provider at initialization.
    ///
    /// Must be a multiple of 8, and at least 24 bytes.
    #[inline]
    #[must_use]
    pub const fn initial_size(mut self, bytes: usize) -> Self {
        self.initial_size = bytes;
        self
    }

    /// Sets the minimum number of bytes the arena is grown by when no free block fits a request.
    ///
    /// Must be a multiple of 8, and at least 16 bytes. Larger values mean fewer growth requests,
    /// at the cost of more unused memory at the end of the arena.
    #[inline]
    #[must_use]
    pub const fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !sizing::is_aligned(self.initial_size) {
            return Err(Error::InvalidConfig(
                "`initial_size` must be a multiple of 8",
            ));
        }
        if self.initial_size < ARENA_OVERHEAD + MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig("`initial_size` is too small"));
        }
        if self.initial_size > MAX_ARENA_SIZE {
            return Err(Error::InvalidConfig("`initial_size` is too large"));
        }
        if !sizing::is_aligned(self.chunk_size) {
            return Err(Error::InvalidConfig("`chunk_size` must be a multiple of 8"));
        }
        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig("`chunk_size` is too small"));
        }
        Ok(())
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
