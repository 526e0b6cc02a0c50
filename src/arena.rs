// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::error::ArenaExhausted;
use crate::sizing::ALIGN;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// Source of the contiguous, growable memory managed by a [`TagHeap`](crate::TagHeap).
///
/// An arena starts empty and only ever grows at its end. The allocator addresses the arena by byte
/// offsets, so an implementation is free to move its backing memory when growing, unless it also
/// implements [`StableArena`].
pub trait ArenaProvider {
    /// Extends the arena by `bytes` bytes and returns the offset of the new region.
    ///
    /// The returned offset must be equal to [`len()`](Self::len) as it was before the call. When
    /// the arena cannot grow, this method must return an error and leave the arena unchanged.
    fn grow(&mut self, bytes: usize) -> Result<usize, ArenaExhausted>;

    /// Current size of the arena, in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the arena has not been grown yet.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole arena. The returned slice is exactly [`len()`](Self::len) bytes long, and its
    /// start is aligned to 8 bytes.
    fn as_bytes(&self) -> &[u8];

    /// The whole arena, mutably.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// An [`ArenaProvider`] whose memory never moves.
///
/// # Safety
///
/// [`base()`](Self::base) must return the same pointer for the whole lifetime of the arena, the
/// pointer must be aligned to 8 bytes, and it must be valid for reads and writes of
/// [`len()`](ArenaProvider::len) bytes.
pub unsafe trait StableArena: ArenaProvider {
    /// Pointer to the first byte of the arena.
    fn base(&self) -> NonNull<u8>;
}

/// Arena backed by a heap-allocated buffer.
///
/// The buffer is grown on demand, up to a fixed limit. Growing may reallocate the buffer.
///
/// # Examples
///
/// ```
/// use tagheap::ArenaProvider;
/// use tagheap::VecArena;
///
/// let mut arena = VecArena::with_limit(64);
/// assert_eq!(arena.grow(48), Ok(0));
/// assert_eq!(arena.grow(16), Ok(48));
/// assert!(arena.grow(8).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct VecArena {
    words: Vec<u64>,
    len: usize,
    limit: usize,
}

impl VecArena {
    /// Default limit on the arena size: 20 MiB.
    pub const DEFAULT_LIMIT: usize = 20 * (1 << 20);

    /// Creates an empty arena that can grow up to [`DEFAULT_LIMIT`](Self::DEFAULT_LIMIT) bytes.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    /// Creates an empty arena that can grow up to `limit` bytes.
    #[inline]
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            limit,
        }
    }

    /// Maximum size of the arena, in bytes.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecArena {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaProvider for VecArena {
    fn grow(&mut self, bytes: usize) -> Result<usize, ArenaExhausted> {
        let available = self.limit.saturating_sub(self.len);
        if bytes > available {
            return Err(ArenaExhausted {
                requested: bytes,
                available,
            });
        }

        let start = self.len;
        self.len += bytes;
        self.words.resize(self.len.div_ceil(size_of::<u64>()), 0);
        Ok(start)
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

/// Arena carved out of a caller-provided slice.
///
/// The arena grows by moving a break pointer forward inside the slice, and is exhausted when the
/// break reaches the end of the slice. The start of the slice is aligned to 8 bytes first, which
/// may discard up to 7 leading bytes.
///
/// # Examples
///
/// ```
/// use tagheap::ArenaProvider;
/// use tagheap::SliceArena;
///
/// let mut memory = [0u8; 1024];
/// let mut arena = SliceArena::from(&mut memory);
/// assert!(arena.capacity() >= 1024 - 7);
/// assert_eq!(arena.grow(512), Ok(0));
/// assert_eq!(arena.len(), 512);
/// ```
#[derive(Debug)]
pub struct SliceArena<'a> {
    memory: NonNull<[u8]>,
    brk: usize,
    phantom: PhantomData<&'a mut [u8]>,
}

// SAFETY: `phantom` ties the arena to the unique `&'a mut [u8]` it was created from, so moving the
// arena to another thread moves the only way of reaching that memory.
unsafe impl<'a> Send for SliceArena<'a> where &'a mut [u8]: Send {}

impl<'a> SliceArena<'a> {
    /// Creates an empty arena over `slice`.
    #[must_use]
    pub fn new(slice: &'a mut [u8]) -> Self {
        let start = slice.as_mut_ptr();
        let pad = start.align_offset(ALIGN);

        let memory = if pad <= slice.len() {
            // SAFETY: `pad` is within `slice`, checked above.
            let aligned = unsafe { NonNull::new_unchecked(start.add(pad)) };
            NonNull::slice_from_raw_parts(aligned, slice.len() - pad)
        } else {
            NonNull::slice_from_raw_parts(NonNull::<u64>::dangling().cast::<u8>(), 0)
        };

        Self {
            memory,
            brk: 0,
            phantom: PhantomData,
        }
    }

    /// Maximum size of the arena, in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }
}

impl<'a> From<&'a mut [u8]> for SliceArena<'a> {
    #[inline]
    fn from(slice: &'a mut [u8]) -> Self {
        Self::new(slice)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for SliceArena<'a> {
    #[inline]
    fn from(array: &'a mut [u8; N]) -> Self {
        Self::new(array.as_mut_slice())
    }
}

impl ArenaProvider for SliceArena<'_> {
    fn grow(&mut self, bytes: usize) -> Result<usize, ArenaExhausted> {
        let available = self.capacity() - self.brk;
        if bytes > available {
            return Err(ArenaExhausted {
                requested: bytes,
                available,
            });
        }

        let start = self.brk;
        self.brk += bytes;
        Ok(start)
    }

    #[inline]
    fn len(&self) -> usize {
        self.brk
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `memory` is valid for `'a` and uniquely owned by this arena; `brk` never exceeds
        // its length.
        unsafe { core::slice::from_raw_parts(self.memory.cast::<u8>().as_ptr(), self.brk) }
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `as_bytes()`.
        unsafe { core::slice::from_raw_parts_mut(self.memory.cast::<u8>().as_ptr(), self.brk) }
    }
}

// SAFETY: `memory` is fixed at construction, aligned by `SliceArena::new`, and covers at least
// `brk` bytes.
unsafe impl StableArena for SliceArena<'_> {
    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.memory.cast()
    }
}
