// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Thread-safe wrappers around [`TagHeap`].
//!
//! See [`LockedTagHeap`] for information and examples.

use crate::arena::ArenaProvider;
use crate::arena::StableArena;
use crate::ptr::Payload;
use crate::sizing::ALIGN;
use crate::usage::Usage;
use crate::TagHeap;
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::ptr;
use spin::Mutex;
use spin::MutexGuard;

#[cfg(feature = "lazy")]
use core::ops::Deref;
#[cfg(feature = "lazy")]
use spin::Lazy;

/// A [`TagHeap`] behind a spin lock.
///
/// Every method takes `&self` and holds the lock for the duration of one allocator operation, so a
/// `LockedTagHeap` can be shared between threads, or stored in a `static` item.
///
/// When the arena implements [`StableArena`], `LockedTagHeap` also implements [`GlobalAlloc`].
/// Layouts with an alignment greater than 8 bytes are not supported and cause allocations to fail.
///
/// # Examples
///
/// ```
/// use std::alloc::GlobalAlloc;
/// use std::alloc::Layout;
/// use tagheap::LockedTagHeap;
/// use tagheap::SliceArena;
/// use tagheap::TagHeap;
///
/// let mut memory = [0u8; 4096];
/// let heap = LockedTagHeap::new(TagHeap::init(SliceArena::from(&mut memory)).unwrap());
///
/// let layout = Layout::new::<[u64; 4]>();
/// let ptr = unsafe { heap.alloc(layout) };
/// assert!(!ptr.is_null());
/// unsafe { heap.dealloc(ptr, layout) };
///
/// // Alignments above 8 bytes are refused
/// let layout = Layout::from_size_align(64, 64).unwrap();
/// assert!(unsafe { heap.alloc(layout) }.is_null());
/// ```
#[derive(Debug)]
pub struct LockedTagHeap<A: ArenaProvider> {
    inner: Mutex<TagHeap<A>>,
}

impl<A: ArenaProvider> LockedTagHeap<A> {
    /// Wraps `heap` in a spin lock.
    #[inline]
    #[must_use]
    pub const fn new(heap: TagHeap<A>) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    /// Acquires the lock, spinning until it is available.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, TagHeap<A>> {
        self.inner.lock()
    }

    /// See [`TagHeap::allocate`].
    #[inline]
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<Payload> {
        self.lock().allocate(size)
    }

    /// See [`TagHeap::deallocate`].
    #[inline]
    pub fn deallocate(&self, payload: Payload) {
        self.lock().deallocate(payload)
    }

    /// See [`TagHeap::reallocate`].
    #[inline]
    #[must_use]
    pub fn reallocate(&self, payload: Option<Payload>, size: usize) -> Option<Payload> {
        self.lock().reallocate(payload, size)
    }

    /// See [`TagHeap::usage`].
    #[inline]
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.lock().usage()
    }

    /// Consumes the lock and returns the allocator.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> TagHeap<A> {
        self.inner.into_inner()
    }
}

impl<A: StableArena> LockedTagHeap<A> {
    /// Translates a pointer previously returned by [`GlobalAlloc::alloc`] back into a payload.
    ///
    /// # Safety
    ///
    /// `ptr` must point inside the arena of `heap`.
    unsafe fn payload_of(heap: &TagHeap<A>, ptr: *mut u8) -> Payload {
        // SAFETY: `ptr` and the base are in the same allocation, guaranteed by the caller.
        let offset = unsafe { ptr.offset_from(heap.arena().base().as_ptr()) };
        Payload::new(offset as usize)
    }

    fn ptr_of(heap: &TagHeap<A>, payload: Payload) -> *mut u8 {
        // SAFETY: payloads are always within the arena, which `StableArena` guarantees to be
        // valid for `len()` bytes starting at `base()`.
        unsafe { heap.arena().base().as_ptr().add(payload.offset()) }
    }
}

// SAFETY: payloads never overlap and are aligned to 8 bytes relative to an 8-byte aligned, fixed
// base. Larger alignments are refused.
unsafe impl<A: StableArena> GlobalAlloc for LockedTagHeap<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        let mut heap = self.lock();
        match heap.allocate(layout.size()) {
            Some(payload) => Self::ptr_of(&heap, payload),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut heap = self.lock();
        // SAFETY: `ptr` was returned by `alloc` or `realloc`, as required by `GlobalAlloc`.
        let payload = unsafe { Self::payload_of(&heap, ptr) };
        heap.deallocate(payload);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        let mut heap = self.lock();
        // SAFETY: `ptr` was returned by `alloc` or `realloc`, as required by `GlobalAlloc`.
        let payload = unsafe { Self::payload_of(&heap, ptr) };
        match heap.reallocate(Some(payload), new_size) {
            Some(payload) => Self::ptr_of(&heap, payload),
            None => ptr::null_mut(),
        }
    }
}

/// Lazy-initialized version of [`LockedTagHeap`].
///
/// The allocator is not constructed when `LazyTagHeap` is constructed, but when it is first
/// accessed. This makes it possible to build a [`TagHeap`] in a `static` item, and in particular
/// to use it as the [global
/// allocator](https://doc.rust-lang.org/stable/std/alloc/index.html#the-global_allocator-attribute).
///
/// # Examples
///
/// ```
/// # #![allow(static_mut_refs)]
/// use tagheap::locked::LazyTagHeap;
/// use tagheap::LockedTagHeap;
/// use tagheap::SliceArena;
/// use tagheap::TagHeap;
///
/// #[global_allocator]
/// static HEAP: LazyTagHeap<SliceArena<'static>> = LazyTagHeap::new(|| {
///     static mut MEMORY: [u8; 1 << 20] = [0u8; 1 << 20];
///     // SAFETY: This closure is called only once, therefore `MEMORY` is entirely owned by
///     // this arena, and no other reference can be created.
///     let arena = SliceArena::from(unsafe { &mut MEMORY });
///     LockedTagHeap::new(TagHeap::init(arena).expect("initialization failed"))
/// });
///
/// // If this is the first time `HEAP` is used, the allocator is initialized now.
/// use std::alloc::GlobalAlloc;
/// use std::alloc::Layout;
/// let _ = unsafe { HEAP.alloc(Layout::new::<u32>()) };
/// ```
#[cfg(feature = "lazy")]
#[derive(Debug)]
pub struct LazyTagHeap<A: ArenaProvider, F = fn() -> LockedTagHeap<A>>(Lazy<LockedTagHeap<A>, F>);

#[cfg(feature = "lazy")]
impl<A: ArenaProvider, F> LazyTagHeap<A, F> {
    /// Constructs a new [`LazyTagHeap`] from the given initialization function.
    ///
    /// The initialization function is called when the `LazyTagHeap` is first dereferenced, or
    /// first used as a [`GlobalAlloc`].
    #[inline]
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(Lazy::new(f))
    }
}

#[cfg(feature = "lazy")]
impl<A: ArenaProvider, F: FnOnce() -> LockedTagHeap<A>> LazyTagHeap<A, F> {
    /// Returns a reference to the underlying [`LockedTagHeap`], initializing it if needed.
    ///
    /// `lazy.get()` is equivalent to `&*lazy`.
    #[inline]
    pub fn get(&self) -> &LockedTagHeap<A> {
        self
    }
}

#[cfg(feature = "lazy")]
impl<A: ArenaProvider, F: FnOnce() -> LockedTagHeap<A>> Deref for LazyTagHeap<A, F> {
    type Target = LockedTagHeap<A>;

    #[inline]
    fn deref(&self) -> &LockedTagHeap<A> {
        &self.0
    }
}

// SAFETY: forwards to `LockedTagHeap`.
#[cfg(feature = "lazy")]
unsafe impl<A: StableArena, F: FnOnce() -> LockedTagHeap<A>> GlobalAlloc for LazyTagHeap<A, F> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same contract as the caller's.
        unsafe { self.get().alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: same contract as the caller's.
        unsafe { self.get().dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: same contract as the caller's.
        unsafe { self.get().realloc(ptr, layout, new_size) }
    }
}
