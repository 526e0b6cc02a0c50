// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Tagheap: a boundary-tagged, best-fit storage allocator over a growable arena.
//!
//! Tagheap manages a single contiguous arena of bytes and hands out blocks of it through
//! [`allocate`](TagHeap::allocate), [`deallocate`](TagHeap::deallocate) and
//! [`reallocate`](TagHeap::reallocate). It does its own free-space bookkeeping inside the arena,
//! and only asks its [`ArenaProvider`] for more memory when no free block is large enough.
//!
//! This is a no-`std` crate. It needs `alloc` only for [`VecArena`]; an allocator built on a
//! [`SliceArena`] never touches the host allocator.
//!
//! # Features
//!
//! * 8 bytes of overhead per allocated block, 8-byte aligned payloads
//! * Best-fit placement with immediate coalescing of free neighbors
//! * In-place growth on [`reallocate`](TagHeap::reallocate) when followed by free space
//! * Arena addressed by offsets: allocations are [`Payload`] handles, not raw pointers
//! * Optional [`GlobalAlloc`](core::alloc::GlobalAlloc) support through [`LockedTagHeap`]
//!
//! # Quick start & examples
//!
//! ```
//! use tagheap::TagHeap;
//! use tagheap::VecArena;
//!
//! let mut heap = TagHeap::init(VecArena::new()).expect("initialization failed");
//!
//! let hello = heap.allocate(16).expect("allocation failed");
//! heap.payload_mut(hello)[..5].copy_from_slice(b"hello");
//!
//! let hello = heap.reallocate(Some(hello), 100).expect("reallocation failed");
//! assert_eq!(&heap.payload(hello)[..5], b"hello");
//!
//! heap.deallocate(hello);
//! assert_eq!(heap.check_invariants(), Ok(()));
//! ```
//!
//! To run over memory that you already have, such as an array on the stack, use a
//! [`SliceArena`] instead.
//!
//! ## Sharing and global allocation
//!
//! [`TagHeap`] is single-threaded: every operation takes `&mut self`. To share it, or to install it
//! with `#[global_allocator]`, see the [`locked`] module.
//!
//! # Internal details
//!
//! The arena starts with a one-word prologue and ends with a one-word epilogue; everything in
//! between is tiled by blocks. Each block starts with a 4-byte header and ends with a 4-byte
//! footer, both holding the block size and an "allocated" bit. The footer lets the allocator find
//! the block before any given block in constant time.
//!
//! Free blocks are kept in an unordered doubly-linked list, whose links are stored as arena
//! offsets in the first two words of each free block. This is why the smallest block is 16 bytes.
//!
//! An allocation request is rounded up to a block size, and the free list is searched for the
//! smallest block that fits (stopping early on an exact fit). The block is split if the leftover
//! is at least 16 bytes, and handed out whole otherwise. If nothing fits, the arena is grown by at
//! least [`Config::chunk_size`] bytes and the search is retried once. Freed blocks, and blocks
//! added by growing the arena, are immediately merged with free neighbors, so two free blocks are
//! never adjacent.
//!
//! # Cargo feature flags
//!
//! * `lazy`: enables `LazyTagHeap` in the [`locked`] module, for use in `static` items.
//! * `consistency-checks`: runs [`check_invariants`](TagHeap::check_invariants) after every
//!   operation, and panics if the heap is corrupted. This is slow, and meant for debugging.

#![no_std]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stderr)]
#![warn(clippy::print_stdout)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(unused_crate_dependencies)]
#![warn(unused_macro_rules)]
#![warn(unused_qualifications)]
#![doc(test(attr(deny(warnings))))]

extern crate alloc;

mod arena;
mod block;
mod check;
mod config;
mod error;
mod free_list;
mod iter;
mod logging;
mod ptr;
mod sizing;
mod usage;

#[cfg(test)]
mod tests;

pub mod locked;

use crate::block::Block;
use crate::free_list::FreeList;
use crate::logging::hdebug;
use crate::logging::htrace;
use crate::logging::hwarn;
use crate::ptr::BlockPtr;
use crate::sizing::Tag;
use crate::sizing::ARENA_OVERHEAD;
use crate::sizing::FIRST_BLOCK;
use crate::sizing::MAX_ARENA_SIZE;
use crate::sizing::MIN_BLOCK_SIZE;
use crate::sizing::WORD;
use core::cmp;

pub use crate::arena::ArenaProvider;
pub use crate::arena::SliceArena;
pub use crate::arena::StableArena;
pub use crate::arena::VecArena;
pub use crate::check::Violation;
pub use crate::config::Config;
pub use crate::error::ArenaExhausted;
pub use crate::error::Error;
pub use crate::locked::LockedTagHeap;
pub use crate::logging::disable_logging;
pub use crate::logging::enable_logging;
pub use crate::ptr::Payload;
pub use crate::usage::Usage;

/// The Tagheap allocator.
///
/// A `TagHeap` owns an [`ArenaProvider`] and manages all of its memory. See the [crate-level
/// documentation](crate) for an overview and examples.
#[derive(Debug)]
pub struct TagHeap<A: ArenaProvider> {
    arena: A,
    config: Config,
    free_list: FreeList,
    extensions: usize,
}

impl<A: ArenaProvider> TagHeap<A> {
    /// Constructs an allocator over `arena`, using the default [`Config`].
    ///
    /// `arena` must be empty. Its first [`Config::DEFAULT_INITIAL_SIZE`] bytes are requested right
    /// away, and become a single free block.
    ///
    /// # Errors
    ///
    /// If the arena cannot provide the initial memory, or is not empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagheap::TagHeap;
    /// use tagheap::VecArena;
    ///
    /// assert!(TagHeap::init(VecArena::new()).is_ok());
    /// assert!(TagHeap::init(VecArena::with_limit(512)).is_err());
    /// ```
    #[inline]
    pub fn init(arena: A) -> Result<Self, Error> {
        Self::with_config(arena, Config::default())
    }

    /// Constructs an allocator over `arena`, using the given [`Config`].
    ///
    /// # Errors
    ///
    /// If `config` is invalid, if the arena cannot provide the initial memory, or if the arena is
    /// not empty.
    pub fn with_config(mut arena: A, config: Config) -> Result<Self, Error> {
        config.validate()?;
        if !arena.is_empty() {
            return Err(Error::ArenaNotEmpty);
        }

        let start = arena.grow(config.initial_size)?;
        debug_assert_eq!(start, 0, "arena provider must start at offset 0");

        let mut heap = Self {
            arena,
            config,
            free_list: FreeList::new(),
            extensions: 0,
        };

        let mem = heap.arena.as_bytes_mut();
        block::write_tag(mem, 0, Tag::SENTINEL);
        block::write_tag(mem, config.initial_size - WORD, Tag::SENTINEL);
        let block = Block::new(
            BlockPtr::new(FIRST_BLOCK),
            config.initial_size - ARENA_OVERHEAD,
            false,
        );
        block.write(mem);
        heap.free_list.push(mem, block.ptr);

        hdebug!(
            "initialized heap: {} bytes, chunk size {}",
            config.initial_size,
            config.chunk_size
        );
        heap.debug_check();
        Ok(heap)
    }

    /// Allocates a block with room for at least `size` bytes.
    ///
    /// Returns `None` if `size` is 0, or if the arena could not grow enough to satisfy the request.
    /// Use [`try_allocate`](Self::try_allocate) to tell these two cases apart.
    ///
    /// The returned payload is 8-byte aligned relative to the start of the arena, and its contents
    /// are unspecified.
    #[inline]
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> Option<Payload> {
        match self.try_allocate(size) {
            Ok(payload) => payload,
            Err(err) => {
                hwarn!("allocation of {size} bytes failed: {err}");
                None
            }
        }
    }

    /// Allocates a block with room for at least `size` bytes.
    ///
    /// Returns `Ok(None)` if `size` is 0: zero-sized requests are not an error, but do not allocate
    /// anything either.
    ///
    /// # Errors
    ///
    /// [`Error::ArenaExhausted`] if no free block fits and the arena could not grow.
    pub fn try_allocate(&mut self, size: usize) -> Result<Option<Payload>, Error> {
        if size == 0 {
            return Ok(None);
        }

        let Some(block_size) = sizing::block_size_for(size) else {
            return Err(Error::ArenaExhausted(ArenaExhausted {
                requested: size,
                available: MAX_ARENA_SIZE.saturating_sub(self.arena.len()),
            }));
        };

        let block = match self.find_fit(block_size) {
            Some(block) => block,
            None => {
                self.extend(cmp::max(block_size, self.config.chunk_size))?;
                self.find_fit(block_size)
                    .expect("extended arena must contain a fitting block")
            }
        };
        self.place(block, block_size);

        let payload = block.ptr.payload();
        htrace!("allocate({size}) -> {payload:?}");
        self.debug_check();
        Ok(Some(payload))
    }

    /// Frees the block holding `payload`.
    ///
    /// `payload` must have been returned by this allocator, and must not have been freed already.
    /// This is checked in debug builds only; in release builds, freeing an invalid payload
    /// corrupts the heap (but never memory outside of the arena).
    pub fn deallocate(&mut self, payload: Payload) {
        htrace!("deallocate({payload:?})");

        let mem = self.arena.as_bytes_mut();
        let block = Block::read(mem, payload.to_block_ptr());
        debug_assert!(block.allocated, "{payload:?} is not allocated");

        let block = Block::new(block.ptr, block.size, false);
        block.write(mem);
        self.coalesce(block);
        self.debug_check();
    }

    /// Resizes the block holding `payload` so that it has room for at least `size` bytes.
    ///
    /// * If `payload` is `None`, this is the same as [`allocate(size)`](Self::allocate).
    /// * If `size` is 0, this is the same as [`deallocate(payload)`](Self::deallocate), and returns
    ///   `None`.
    ///
    /// Otherwise the block is resized in place if the block that follows it is free and the two
    /// together are large enough. If not, a new block is allocated, the contents are copied over
    /// (up to the smaller of the two usable sizes), and the old block is freed.
    ///
    /// Returns `None` if a new block was needed and could not be allocated; in that case `payload`
    /// is left untouched and remains valid.
    pub fn reallocate(&mut self, payload: Option<Payload>, size: usize) -> Option<Payload> {
        let Some(payload) = payload else {
            return self.allocate(size);
        };
        if size == 0 {
            self.deallocate(payload);
            return None;
        }

        let block_size = sizing::block_size_for(size)?;
        let block = Block::read(self.arena.as_bytes(), payload.to_block_ptr());
        debug_assert!(block.allocated, "{payload:?} is not allocated");

        if self.resize_into_next(block, block_size) {
            htrace!("reallocate({payload:?}, {size}) -> in place");
            self.debug_check();
            return Some(payload);
        }

        let new_payload = self.allocate(size)?;
        let copy_size = cmp::min(block.usable(), self.usable_size(new_payload));
        let src = payload.offset();
        self.arena
            .as_bytes_mut()
            .copy_within(src..src + copy_size, new_payload.offset());
        self.deallocate(payload);

        htrace!("reallocate({payload:?}, {size}) -> {new_payload:?}");
        Some(new_payload)
    }

    /// Number of bytes usable through `payload`.
    ///
    /// This is at least the size that was requested, and may be more.
    #[inline]
    #[must_use]
    pub fn usable_size(&self, payload: Payload) -> usize {
        Block::read(self.arena.as_bytes(), payload.to_block_ptr()).usable()
    }

    /// The usable bytes of an allocated block.
    ///
    /// # Panics
    ///
    /// If `payload` does not belong to this allocator's arena.
    #[inline]
    #[must_use]
    pub fn payload(&self, payload: Payload) -> &[u8] {
        let start = payload.offset();
        let end = start + self.usable_size(payload);
        &self.arena.as_bytes()[start..end]
    }

    /// The usable bytes of an allocated block, mutably.
    ///
    /// # Panics
    ///
    /// If `payload` does not belong to this allocator's arena.
    #[inline]
    #[must_use]
    pub fn payload_mut(&mut self, payload: Payload) -> &mut [u8] {
        let start = payload.offset();
        let end = start + self.usable_size(payload);
        &mut self.arena.as_bytes_mut()[start..end]
    }

    /// Returns memory usage information for this allocator.
    ///
    /// This walks the whole arena, so it takes time linear in the number of blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagheap::TagHeap;
    /// use tagheap::Usage;
    /// use tagheap::VecArena;
    ///
    /// let mut heap = TagHeap::init(VecArena::new()).expect("initialization failed");
    /// let _ = heap.allocate(16);
    /// assert_eq!(
    ///     heap.usage(),
    ///     Usage {
    ///         total: 1024,
    ///         used: 16,
    ///         free: 992,
    ///         objects: 1,
    ///         free_blocks: 1,
    ///         extensions: 0,
    ///     }
    /// );
    /// ```
    #[inline]
    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage::get(self.arena.as_bytes(), self.extensions)
    }

    /// Verifies the consistency of the heap.
    ///
    /// This checks that the boundary tags of every block agree, that no two free blocks are
    /// adjacent, that the free list is well formed, and that it contains exactly the free blocks
    /// of the arena. It takes time linear in the size of the heap and does not allocate.
    ///
    /// # Errors
    ///
    /// The first [`Violation`] found.
    #[inline]
    pub fn check_invariants(&self) -> Result<(), Violation> {
        check::check(self.arena.as_bytes(), &self.free_list)
    }

    /// The configuration this allocator was created with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> Config {
        self.config
    }

    /// The arena managed by this allocator.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> &A {
        &self.arena
    }

    /// Destroys the allocator and returns its arena.
    #[inline]
    #[must_use]
    pub fn into_arena(self) -> A {
        self.arena
    }

    /// Best-fit search: the smallest free block of at least `block_size` bytes, or the first one
    /// of exactly `block_size` bytes.
    fn find_fit(&self, block_size: usize) -> Option<Block> {
        let mut best: Option<Block> = None;
        for block in self.free_list.iter(self.arena.as_bytes()) {
            debug_assert!(!block.allocated, "allocated block in the free list");
            if block.size == block_size {
                return Some(block);
            }
            if block.size > block_size && best.map_or(true, |best| block.size < best.size) {
                best = Some(block);
            }
        }
        best
    }

    fn place(&mut self, block: Block, block_size: usize) {
        self.free_list.remove(self.arena.as_bytes_mut(), block.ptr);
        self.carve(block.ptr, block.size, block_size);
    }

    /// Turns the `available` bytes at `ptr` into an allocated block of at least `block_size`
    /// bytes. The rest becomes a new free block, unless it is too small to hold one.
    ///
    /// The memory at `ptr` must not be in the free list, and the block following it must not be
    /// free.
    fn carve(&mut self, ptr: BlockPtr, available: usize, block_size: usize) {
        debug_assert!(available >= block_size, "block too small to carve");

        let mem = self.arena.as_bytes_mut();
        let remaining = available - block_size;
        if remaining < MIN_BLOCK_SIZE {
            Block::new(ptr, available, true).write(mem);
        } else {
            let block = Block::new(ptr, block_size, true);
            block.write(mem);
            let rest = Block::new(block.next_ptr(), remaining, false);
            rest.write(mem);
            self.free_list.push(mem, rest.ptr);
        }
    }

    /// Resizes `block` by absorbing the free block that follows it, if the two together are large
    /// enough. The block is never resized on its own, even when it already fits.
    fn resize_into_next(&mut self, block: Block, block_size: usize) -> bool {
        let mem = self.arena.as_bytes_mut();
        match block.next_free(mem) {
            Some(next) if block.size + next.size >= block_size => {
                self.free_list.remove(mem, next.ptr);
                self.carve(block.ptr, block.size + next.size, block_size);
                true
            }
            _ => false,
        }
    }

    /// Grows the arena by `bytes` and links the new memory into the free list, merged with a free
    /// block that preceded it, if any.
    fn extend(&mut self, bytes: usize) -> Result<(), ArenaExhausted> {
        let end = self.arena.len();
        let available = MAX_ARENA_SIZE - end;
        if bytes > available {
            return Err(ArenaExhausted {
                requested: bytes,
                available,
            });
        }

        let start = self.arena.grow(bytes)?;
        debug_assert_eq!(start, end, "arena provider must grow contiguously");
        self.extensions += 1;
        hdebug!("extended arena by {bytes} bytes to {}", end + bytes);

        // The new block takes over the old epilogue word.
        let mem = self.arena.as_bytes_mut();
        let block = Block::new(BlockPtr::new(end - WORD), bytes, false);
        block.write(mem);
        block::write_tag(mem, end + bytes - WORD, Tag::SENTINEL);

        self.coalesce(block);
        Ok(())
    }

    /// Merges the free block `block` with its free neighbors, and links the result into the free
    /// list. `block` must be tagged as free and must not be in the free list yet.
    fn coalesce(&mut self, block: Block) {
        debug_assert!(!block.allocated, "cannot coalesce an allocated block");

        let mem = self.arena.as_bytes_mut();
        let merged = match (block.prev_free(mem), block.next_free(mem)) {
            (None, None) => block,
            (Some(prev), Some(next)) => {
                self.free_list.remove(mem, next.ptr);
                self.free_list.remove(mem, prev.ptr);
                Block::new(prev.ptr, prev.size + block.size + next.size, false)
            }
            (None, Some(next)) => {
                self.free_list.remove(mem, next.ptr);
                Block::new(block.ptr, block.size + next.size, false)
            }
            (Some(prev), None) => {
                self.free_list.remove(mem, prev.ptr);
                Block::new(prev.ptr, prev.size + block.size, false)
            }
        };

        merged.write(mem);
        self.free_list.push(mem, merged.ptr);
        htrace!("coalesced {:?} into {:?}", block.ptr, merged);
    }

    #[cfg(feature = "consistency-checks")]
    fn debug_check(&self) {
        if let Err(violation) = self.check_invariants() {
            panic!("heap invariant violated: {violation}");
        }
    }

    #[cfg(not(feature = "consistency-checks"))]
    #[inline(always)]
    fn debug_check(&self) {}
}
