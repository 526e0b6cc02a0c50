// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Block geometry: word sizes, overheads, and the packing of boundary tags.

macro_rules! const_assert {
    ( $( $tt:tt )* ) => {
        const _: () = assert!($($tt)*);
    }
}

/// Size of a boundary tag and of a free-list link.
pub(crate) const WORD: usize = 4;

/// Alignment unit for payloads and block sizes.
pub(crate) const ALIGN: usize = 2 * WORD;
const ALIGN_MASK: usize = ALIGN - 1;

/// Header plus footer.
pub(crate) const OVERHEAD: usize = 2 * WORD;

/// Header, two free-list links, footer.
pub(crate) const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WORD;

/// Largest request that still fits in a minimum-sized block.
pub(crate) const MIN_BLOCK_CAPACITY: usize = MIN_BLOCK_SIZE - OVERHEAD;

/// Offset of the first block: the prologue sentinel occupies the word before it.
pub(crate) const FIRST_BLOCK: usize = WORD;

/// Prologue and epilogue sentinels.
pub(crate) const ARENA_OVERHEAD: usize = 2 * WORD;

/// Links are stored as 32-bit offsets, which caps the arena size.
pub(crate) const MAX_ARENA_SIZE: usize = (u32::MAX as usize) & !ALIGN_MASK;

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !(ALIGN_MASK as u32);

const_assert!(ALIGN.is_power_of_two());
const_assert!(MIN_BLOCK_SIZE % ALIGN == 0);
const_assert!((FIRST_BLOCK + WORD) % ALIGN == 0);

/// Decoded contents of a header or footer word.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Tag {
    pub(crate) size: usize,
    pub(crate) allocated: bool,
}

impl Tag {
    /// Tag written in the prologue and epilogue words. It reads as a zero-sized allocated block,
    /// so neighbor lookups at either end of the arena never see a free block.
    pub(crate) const SENTINEL: Self = Self {
        size: 0,
        allocated: true,
    };

    #[inline]
    #[must_use]
    pub(crate) const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    #[inline]
    #[must_use]
    pub(crate) const fn unpack(word: u32) -> Self {
        Self {
            size: (word & SIZE_MASK) as usize,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn pack(self) -> u32 {
        debug_assert_eq!(
            self.size & ALIGN_MASK,
            0,
            "`size` must be a multiple of the alignment unit"
        );
        debug_assert!(self.size <= MAX_ARENA_SIZE, "`size` out of bounds");
        (self.size as u32) | if self.allocated { ALLOCATED_BIT } else { 0 }
    }
}

/// Rounds `value` up to the next multiple of [`ALIGN`].
#[inline]
#[must_use]
pub(crate) const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGN_MASK) {
        Some(value) => Some(value & !ALIGN_MASK),
        None => None,
    }
}

#[inline]
#[must_use]
pub(crate) const fn is_aligned(value: usize) -> bool {
    value & ALIGN_MASK == 0
}

/// Returns the size of the block needed to hold a payload of `request` bytes, or `None` if no arena
/// could ever hold it.
#[must_use]
pub(crate) fn block_size_for(request: usize) -> Option<usize> {
    let size = if request <= MIN_BLOCK_CAPACITY {
        MIN_BLOCK_SIZE
    } else {
        align_up(request.checked_add(OVERHEAD)?)?
    };
    (size <= MAX_ARENA_SIZE - ARENA_OVERHEAD).then_some(size)
}
