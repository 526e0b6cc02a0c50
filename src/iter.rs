// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::block::Block;
use crate::block::Links;
use crate::ptr::BlockPtr;
use crate::sizing::FIRST_BLOCK;
use crate::sizing::WORD;

/// Walks the arena block by block, from the first block up to the epilogue.
///
/// Iteration stops early if a header claims a size that is too small to make progress, so that a
/// corrupted arena cannot cause an infinite loop.
#[derive(Clone, Debug)]
pub(crate) struct HeapBlocks<'m> {
    mem: &'m [u8],
    cursor: usize,
}

impl<'m> HeapBlocks<'m> {
    #[inline]
    pub(crate) const fn new(mem: &'m [u8]) -> Self {
        Self {
            mem,
            cursor: FIRST_BLOCK,
        }
    }

    /// Offset of the epilogue sentinel.
    #[inline]
    pub(crate) const fn epilogue(&self) -> usize {
        self.mem.len().saturating_sub(WORD)
    }
}

impl Iterator for HeapBlocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.epilogue() {
            return None;
        }
        let block = Block::read(self.mem, BlockPtr::new(self.cursor));
        if block.size == 0 {
            self.cursor = self.epilogue();
            return None;
        }
        self.cursor = block.end();
        Some(block)
    }
}

/// Follows the `next` links of the free list.
#[derive(Clone, Debug)]
pub(crate) struct FreeBlocks<'m> {
    mem: &'m [u8],
    next: Option<BlockPtr>,
}

impl<'m> FreeBlocks<'m> {
    #[inline]
    pub(crate) const fn new(mem: &'m [u8], head: Option<BlockPtr>) -> Self {
        Self { mem, next: head }
    }
}

impl Iterator for FreeBlocks<'_> {
    type Item = Block;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.next?;
        self.next = Links::read(self.mem, ptr).next;
        Some(Block::read(self.mem, ptr))
    }
}
