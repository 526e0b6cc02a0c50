// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::sizing::ALIGN;
use crate::sizing::WORD;
use core::fmt;
use core::num::NonZero;

/// Arena offset of a block header.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockPtr {
    offset: NonZero<usize>,
}

impl BlockPtr {
    #[inline]
    #[must_use]
    pub(crate) fn new(offset: usize) -> Self {
        debug_assert_eq!(
            (offset + WORD) % ALIGN,
            0,
            "block header must sit one word before an aligned payload"
        );
        // Offset 0 holds the prologue sentinel, so no block can start there.
        let offset = NonZero::new(offset).expect("block offset must be non-zero");
        Self { offset }
    }

    /// Decodes a free-list link, where 0 stands for "no block".
    #[inline]
    #[must_use]
    pub(crate) fn from_link(link: u32) -> Option<Self> {
        NonZero::new(link as usize).map(|offset| Self { offset })
    }

    #[inline]
    #[must_use]
    pub(crate) fn to_link(ptr: Option<Self>) -> u32 {
        ptr.map(|ptr| ptr.get() as u32).unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub(crate) const fn get(self) -> usize {
        self.offset.get()
    }

    #[inline]
    #[must_use]
    pub(crate) fn byte_add(self, bytes: usize) -> Self {
        Self::new(self.get() + bytes)
    }

    #[inline]
    #[must_use]
    pub(crate) fn payload(self) -> Payload {
        Payload::new(self.get() + WORD)
    }
}

impl fmt::Debug for BlockPtr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockPtr({:#x})", self.get())
    }
}

/// Handle to an allocated payload, as returned by [`TagHeap::allocate`](crate::TagHeap::allocate).
///
/// A `Payload` is the arena offset of the first usable byte of an allocation. It is always a
/// multiple of 8. Handles can only be obtained from the allocator, and remain valid until they are
/// passed to [`deallocate`](crate::TagHeap::deallocate) or successfully
/// [`reallocate`](crate::TagHeap::reallocate)d.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload {
    offset: NonZero<usize>,
}

impl Payload {
    #[inline]
    #[must_use]
    pub(crate) fn new(offset: usize) -> Self {
        debug_assert_eq!(offset % ALIGN, 0, "payload offset is not aligned");
        let offset = NonZero::new(offset).expect("payload offset must be non-zero");
        Self { offset }
    }

    /// Offset of the payload from the start of the arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset.get()
    }

    #[inline]
    #[must_use]
    pub(crate) fn to_block_ptr(self) -> BlockPtr {
        BlockPtr::new(self.offset() - WORD)
    }
}

impl fmt::Debug for Payload {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:#x})", self.offset())
    }
}
