// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::block;
use crate::block::Block;
use crate::block::Links;
use crate::iter::FreeBlocks;
use crate::ptr::BlockPtr;

/// Unordered, doubly-linked list of free blocks.
///
/// Only the head lives outside the arena; the links are stored inside the free blocks themselves.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct FreeList {
    head: Option<BlockPtr>,
    len: usize,
}

impl FreeList {
    #[inline]
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    #[must_use]
    pub(crate) const fn head(&self) -> Option<BlockPtr> {
        self.head
    }

    #[inline]
    #[must_use]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Inserts the block at `ptr` at the head of the list.
    pub(crate) fn push(&mut self, mem: &mut [u8], ptr: BlockPtr) {
        debug_assert!(
            !Block::read(mem, ptr).allocated,
            "only free blocks can be linked"
        );

        let links = Links {
            prev: None,
            next: self.head,
        };
        links.write(mem, ptr);
        if let Some(head) = self.head {
            block::set_prev(mem, head, Some(ptr));
        }

        self.head = Some(ptr);
        self.len += 1;
    }

    /// Unlinks the block at `ptr`, which must be in the list.
    pub(crate) fn remove(&mut self, mem: &mut [u8], ptr: BlockPtr) {
        debug_assert!(self.len > 0, "free list is empty");

        let Links { prev, next } = Links::read(mem, ptr);
        match prev {
            None => {
                debug_assert_eq!(self.head, Some(ptr), "unlinked block is not the list head");
                self.head = next;
            }
            Some(prev) => block::set_next(mem, prev, next),
        }
        if let Some(next) = next {
            block::set_prev(mem, next, prev);
        }

        self.len -= 1;
    }

    #[inline]
    #[must_use]
    pub(crate) fn iter<'m>(&self, mem: &'m [u8]) -> FreeBlocks<'m> {
        FreeBlocks::new(mem, self.head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn free_blocks(sizes: &[usize]) -> (Vec<u8>, Vec<BlockPtr>) {
        let mut mem = vec![0u8; 4 + sizes.iter().sum::<usize>() + 4];
        let mut ptrs = Vec::new();
        let mut offset = 4;
        for &size in sizes {
            let ptr = BlockPtr::new(offset);
            Block::new(ptr, size, false).write(&mut mem);
            ptrs.push(ptr);
            offset += size;
        }
        (mem, ptrs)
    }

    fn collect(list: &FreeList, mem: &[u8]) -> Vec<BlockPtr> {
        list.iter(mem).map(|block| block.ptr).collect()
    }

    #[test]
    fn push_inserts_at_head() {
        let (mut mem, ptrs) = free_blocks(&[16, 24, 32]);
        let mut list = FreeList::new();
        for &ptr in &ptrs {
            list.push(&mut mem, ptr);
        }

        assert_eq!(list.len(), 3);
        assert_eq!(list.head(), Some(ptrs[2]));
        assert_eq!(collect(&list, &mem), [ptrs[2], ptrs[1], ptrs[0]]);
        assert_eq!(Links::read(&mem, ptrs[2]).prev, None);
        assert_eq!(Links::read(&mem, ptrs[0]).next, None);
    }

    #[test]
    fn remove_head_middle_tail() {
        let (mut mem, ptrs) = free_blocks(&[16, 16, 16, 16]);
        let mut list = FreeList::new();
        for &ptr in &ptrs {
            list.push(&mut mem, ptr);
        }

        list.remove(&mut mem, ptrs[1]);
        assert_eq!(collect(&list, &mem), [ptrs[3], ptrs[2], ptrs[0]]);

        list.remove(&mut mem, ptrs[3]);
        assert_eq!(collect(&list, &mem), [ptrs[2], ptrs[0]]);
        assert_eq!(Links::read(&mem, ptrs[2]).prev, None);

        list.remove(&mut mem, ptrs[0]);
        assert_eq!(collect(&list, &mem), [ptrs[2]]);
        assert_eq!(Links::read(&mem, ptrs[2]).next, None);

        list.remove(&mut mem, ptrs[2]);
        assert_eq!(list.head(), None);
        assert_eq!(list.len(), 0);
    }
}
