// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::iter::HeapBlocks;

/// Memory usage information.
///
/// This structure is returned by [`TagHeap::usage`](crate::TagHeap::usage). See that method
/// documentation for information and examples.
#[derive(Default, Clone, PartialEq, Eq, Debug)]
pub struct Usage {
    /// Current size of the arena.
    ///
    /// This includes the prologue and epilogue sentinels and the boundary tags of every block, so
    /// `total` is always greater than `used + free`.
    pub total: usize,
    /// Sum of the usable payload bytes of all allocated blocks.
    ///
    /// This may be greater than the sum of the sizes requested by callers, because requests are
    /// rounded up to the alignment unit and small leftover fragments are handed out along with the
    /// block they were part of.
    pub used: usize,
    /// Sum of the sizes of all free blocks, boundary tags included.
    ///
    /// Note that allocating an object of size equal to (or close to) `free` may still require the
    /// arena to grow, due to block overheads and fragmentation.
    pub free: usize,
    /// Number of allocated blocks.
    pub objects: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Number of times the arena has been grown since initialization, not counting the initial
    /// request.
    pub extensions: usize,
}

impl Usage {
    pub(crate) fn get(mem: &[u8], extensions: usize) -> Self {
        let mut usage = Self {
            total: mem.len(),
            extensions,
            ..Self::default()
        };

        for block in HeapBlocks::new(mem) {
            if block.allocated {
                usage.used += block.usable();
                usage.objects += 1;
            } else {
                usage.free += block.size;
                usage.free_blocks += 1;
            }
        }

        usage
    }
}
