// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::block;
use crate::block::Block;
use crate::block::Links;
use crate::free_list::FreeList;
use crate::iter::HeapBlocks;
use crate::sizing;
use crate::sizing::Tag;
use crate::sizing::FIRST_BLOCK;
use crate::sizing::MIN_BLOCK_SIZE;
use crate::sizing::WORD;
use core::fmt;

/// A broken heap invariant, reported by [`TagHeap::check_invariants`](crate::TagHeap::check_invariants).
///
/// Offsets are arena offsets of block headers. A correct allocator never produces a violation; one
/// showing up means that the arena was corrupted, for example by writing past the end of a
/// payload.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Violation {
    /// The prologue or epilogue sentinel was overwritten.
    BadSentinel {
        /// Offset of the sentinel word.
        offset: usize,
    },
    /// A block header and footer disagree.
    TagMismatch {
        /// Offset of the block.
        offset: usize,
        /// Raw header word.
        header: u32,
        /// Raw footer word.
        footer: u32,
    },
    /// A block size is not a multiple of the alignment unit, or is below the minimum block size.
    BadBlockSize {
        /// Offset of the block.
        offset: usize,
        /// Size found in the header.
        size: usize,
    },
    /// A block extends past the end of the arena.
    BlockOutOfBounds {
        /// Offset of the block.
        offset: usize,
        /// Size found in the header.
        size: usize,
    },
    /// The footer preceding a block does not lead back to the previous block.
    BrokenBoundaryTags {
        /// Offset of the block.
        offset: usize,
    },
    /// Two physically adjacent blocks are both free.
    AdjacentFreeBlocks {
        /// Offset of the first of the two blocks.
        offset: usize,
    },
    /// A free-list node is not a properly tagged, aligned free block.
    BadFreeListNode {
        /// Offset of the node.
        offset: usize,
    },
    /// A free-list node's neighbors do not point back to it.
    BrokenFreeLink {
        /// Offset of the node.
        offset: usize,
    },
    /// The free list does not terminate.
    FreeListCycle,
    /// The free list and the arena disagree on the number of free blocks.
    FreeCountMismatch {
        /// Free blocks reachable from the free list.
        listed: usize,
        /// Free blocks found by scanning the arena.
        scanned: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadSentinel { offset } => write!(f, "sentinel at {offset:#x} was overwritten"),
            Self::TagMismatch {
                offset,
                header,
                footer,
            } => write!(
                f,
                "block at {offset:#x} has header {header:#x} but footer {footer:#x}"
            ),
            Self::BadBlockSize { offset, size } => {
                write!(f, "block at {offset:#x} has invalid size {size}")
            }
            Self::BlockOutOfBounds { offset, size } => {
                write!(f, "block at {offset:#x} of size {size} exceeds the arena")
            }
            Self::BrokenBoundaryTags { offset } => {
                write!(f, "boundary tags before block at {offset:#x} are inconsistent")
            }
            Self::AdjacentFreeBlocks { offset } => {
                write!(f, "free block at {offset:#x} is followed by another free block")
            }
            Self::BadFreeListNode { offset } => {
                write!(f, "free list contains an invalid block at {offset:#x}")
            }
            Self::BrokenFreeLink { offset } => {
                write!(f, "free list links around {offset:#x} are not symmetric")
            }
            Self::FreeListCycle => f.write_str("free list contains a cycle"),
            Self::FreeCountMismatch { listed, scanned } => write!(
                f,
                "free list has {listed} blocks, but the arena has {scanned} free blocks"
            ),
        }
    }
}

impl core::error::Error for Violation {}

/// Verifies every heap invariant. Runs in time linear in the arena size, without allocating.
pub(crate) fn check(mem: &[u8], free_list: &FreeList) -> Result<(), Violation> {
    check_sentinels(mem)?;
    let listed = check_free_list(mem, free_list)?;
    let scanned = check_blocks(mem)?;
    if listed != scanned || listed != free_list.len() {
        return Err(Violation::FreeCountMismatch { listed, scanned });
    }
    Ok(())
}

fn check_sentinels(mem: &[u8]) -> Result<(), Violation> {
    let epilogue = mem.len() - WORD;
    for offset in [0, epilogue] {
        if block::read_tag(mem, offset) != Tag::SENTINEL {
            return Err(Violation::BadSentinel { offset });
        }
    }
    Ok(())
}

fn check_tags(mem: &[u8], block: &Block) -> Result<(), Violation> {
    let offset = block.ptr.get();
    let epilogue = mem.len() - WORD;

    if block.size < MIN_BLOCK_SIZE || !sizing::is_aligned(block.size) {
        return Err(Violation::BadBlockSize {
            offset,
            size: block.size,
        });
    }
    if block.end() > epilogue {
        return Err(Violation::BlockOutOfBounds {
            offset,
            size: block.size,
        });
    }

    let header = block::read_word(mem, offset);
    let footer = block::read_word(mem, block.footer_offset());
    if header != footer {
        return Err(Violation::TagMismatch {
            offset,
            header,
            footer,
        });
    }
    Ok(())
}

/// Walks the free list and returns the number of nodes.
fn check_free_list(mem: &[u8], free_list: &FreeList) -> Result<usize, Violation> {
    let max_blocks = mem.len() / MIN_BLOCK_SIZE;
    let epilogue = mem.len() - WORD;
    let mut count = 0;
    let mut expected_prev = None;
    let mut cursor = free_list.head();

    while let Some(ptr) = cursor {
        count += 1;
        if count > max_blocks {
            return Err(Violation::FreeListCycle);
        }

        let offset = ptr.get();
        if offset < FIRST_BLOCK || offset >= epilogue || !sizing::is_aligned(offset + WORD) {
            return Err(Violation::BadFreeListNode { offset });
        }

        let block = Block::read(mem, ptr);
        check_tags(mem, &block)?;
        if block.allocated {
            return Err(Violation::BadFreeListNode { offset });
        }

        let links = Links::read(mem, ptr);
        if links.prev != expected_prev {
            return Err(Violation::BrokenFreeLink { offset });
        }
        expected_prev = Some(ptr);
        cursor = links.next;
    }

    Ok(count)
}

/// Walks the arena and returns the number of free blocks.
fn check_blocks(mem: &[u8]) -> Result<usize, Violation> {
    let epilogue = mem.len() - WORD;
    let mut count = 0;
    let mut prev: Option<Block> = None;
    let mut end = FIRST_BLOCK;

    for block in HeapBlocks::new(mem) {
        check_tags(mem, &block)?;

        if let Some(prev) = prev {
            if Block::read_prev(mem, block.ptr) != prev {
                return Err(Violation::BrokenBoundaryTags {
                    offset: block.ptr.get(),
                });
            }
            if !prev.allocated && !block.allocated {
                return Err(Violation::AdjacentFreeBlocks {
                    offset: prev.ptr.get(),
                });
            }
        }

        if !block.allocated {
            count += 1;
        }
        end = block.end();
        prev = Some(block);
    }

    // A zero-sized header stops the walk before the epilogue.
    if end != epilogue {
        return Err(Violation::BadBlockSize {
            offset: end,
            size: 0,
        });
    }

    Ok(count)
}
