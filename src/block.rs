// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Reading and writing block metadata.
//!
//! Every access to boundary tags and free-list links goes through this module. Offsets are checked
//! by slice indexing, so a corrupted tag causes a panic rather than an access outside the arena.

use crate::ptr::BlockPtr;
use crate::sizing::Tag;
use crate::sizing::FIRST_BLOCK;
use crate::sizing::MIN_BLOCK_SIZE;
use crate::sizing::OVERHEAD;
use crate::sizing::WORD;

#[inline]
#[must_use]
pub(crate) fn read_word(mem: &[u8], offset: usize) -> u32 {
    bytemuck::pod_read_unaligned(&mem[offset..offset + WORD])
}

#[inline]
pub(crate) fn write_word(mem: &mut [u8], offset: usize, value: u32) {
    mem[offset..offset + WORD].copy_from_slice(bytemuck::bytes_of(&value));
}

#[inline]
#[must_use]
pub(crate) fn read_tag(mem: &[u8], offset: usize) -> Tag {
    Tag::unpack(read_word(mem, offset))
}

#[inline]
pub(crate) fn write_tag(mem: &mut [u8], offset: usize, tag: Tag) {
    write_word(mem, offset, tag.pack());
}

/// A block, as described by its header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Block {
    pub(crate) ptr: BlockPtr,
    pub(crate) size: usize,
    pub(crate) allocated: bool,
}

impl Block {
    #[inline]
    #[must_use]
    pub(crate) const fn new(ptr: BlockPtr, size: usize, allocated: bool) -> Self {
        Self {
            ptr,
            size,
            allocated,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn read(mem: &[u8], ptr: BlockPtr) -> Self {
        let Tag { size, allocated } = read_tag(mem, ptr.get());
        Self::new(ptr, size, allocated)
    }

    /// Reads the block that ends right before `ptr`, using its footer.
    ///
    /// The caller must ensure that `ptr` is not the first block in the arena.
    #[inline]
    #[must_use]
    pub(crate) fn read_prev(mem: &[u8], ptr: BlockPtr) -> Self {
        let Tag { size, allocated } = read_tag(mem, ptr.get() - WORD);
        debug_assert!(size >= MIN_BLOCK_SIZE, "footer before {ptr:?} is corrupted");
        Self::new(BlockPtr::new(ptr.get() - size), size, allocated)
    }

    /// Writes both the header and the footer.
    #[inline]
    pub(crate) fn write(&self, mem: &mut [u8]) {
        debug_assert!(self.size >= MIN_BLOCK_SIZE, "block is too small");
        let tag = Tag::new(self.size, self.allocated);
        write_tag(mem, self.ptr.get(), tag);
        write_tag(mem, self.footer_offset(), tag);
    }

    #[inline]
    #[must_use]
    pub(crate) const fn footer_offset(&self) -> usize {
        self.ptr.get() + self.size - WORD
    }

    /// Offset one past the last byte of this block.
    #[inline]
    #[must_use]
    pub(crate) const fn end(&self) -> usize {
        self.ptr.get() + self.size
    }

    /// Pointer to the block that physically follows this one.
    #[inline]
    #[must_use]
    pub(crate) fn next_ptr(&self) -> BlockPtr {
        self.ptr.byte_add(self.size)
    }

    /// Number of payload bytes available to the caller.
    #[inline]
    #[must_use]
    pub(crate) const fn usable(&self) -> usize {
        self.size - OVERHEAD
    }

    /// The physically following block, if there is one and it is free.
    #[inline]
    #[must_use]
    pub(crate) fn next_free(&self, mem: &[u8]) -> Option<Self> {
        if self.end() >= mem.len() - WORD {
            return None;
        }
        Some(Self::read(mem, self.next_ptr())).filter(|next| !next.allocated)
    }

    /// The physically preceding block, if there is one and it is free.
    #[inline]
    #[must_use]
    pub(crate) fn prev_free(&self, mem: &[u8]) -> Option<Self> {
        if self.ptr.get() <= FIRST_BLOCK {
            return None;
        }
        Some(Self::read_prev(mem, self.ptr)).filter(|prev| !prev.allocated)
    }
}

/// Free-list neighbors of a free block, stored in its first two payload words.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Links {
    pub(crate) prev: Option<BlockPtr>,
    pub(crate) next: Option<BlockPtr>,
}

impl Links {
    #[inline]
    #[must_use]
    pub(crate) fn read(mem: &[u8], ptr: BlockPtr) -> Self {
        Self {
            prev: BlockPtr::from_link(read_word(mem, prev_link_offset(ptr))),
            next: BlockPtr::from_link(read_word(mem, next_link_offset(ptr))),
        }
    }

    #[inline]
    pub(crate) fn write(&self, mem: &mut [u8], ptr: BlockPtr) {
        set_prev(mem, ptr, self.prev);
        set_next(mem, ptr, self.next);
    }
}

#[inline]
const fn prev_link_offset(ptr: BlockPtr) -> usize {
    ptr.get() + WORD
}

#[inline]
const fn next_link_offset(ptr: BlockPtr) -> usize {
    ptr.get() + 2 * WORD
}

#[inline]
pub(crate) fn set_prev(mem: &mut [u8], ptr: BlockPtr, prev: Option<BlockPtr>) {
    write_word(mem, prev_link_offset(ptr), BlockPtr::to_link(prev));
}

#[inline]
pub(crate) fn set_next(mem: &mut [u8], ptr: BlockPtr, next: Option<BlockPtr>) {
    write_word(mem, next_link_offset(ptr), BlockPtr::to_link(next));
}
