// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

extern crate std;

use crate::ArenaProvider;
use crate::Config;
use crate::Error;
use crate::LockedTagHeap;
use crate::Payload;
use crate::SliceArena;
use crate::TagHeap;
use crate::Usage;
use crate::VecArena;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

trait TestArena: ArenaProvider + Sized {
    fn with_capacity(bytes: usize) -> Self;
}

impl TestArena for VecArena {
    fn with_capacity(bytes: usize) -> Self {
        Self::with_limit(bytes)
    }
}

impl TestArena for SliceArena<'static> {
    fn with_capacity(bytes: usize) -> Self {
        let words = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();
        Self::new(bytemuck::cast_slice_mut::<u64, u8>(Box::leak(words)))
    }
}

#[repr(align(8))]
#[derive(Debug)]
struct AlignedArray<const N: usize>([u8; N]);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
    crate::enable_logging();
}

fn heap<A: TestArena>(capacity: usize) -> TagHeap<A> {
    TagHeap::init(A::with_capacity(capacity)).expect("initialization failed")
}

fn assert_consistent<A: ArenaProvider>(heap: &TagHeap<A>) {
    if let Err(violation) = heap.check_invariants() {
        panic!("heap is inconsistent: {violation}");
    }
}

fn fresh_heap<A: TestArena>() {
    let heap = heap::<A>(1 << 20);
    assert_consistent(&heap);
    assert_eq!(
        heap.usage(),
        Usage {
            total: 1024,
            used: 0,
            free: 1016,
            objects: 0,
            free_blocks: 1,
            extensions: 0,
        }
    );
}

fn init_errors<A: TestArena>() {
    assert!(matches!(
        TagHeap::init(A::with_capacity(512)),
        Err(Error::ArenaExhausted(_))
    ));

    let mut arena = A::with_capacity(2048);
    arena.grow(8).expect("growth failed");
    assert!(matches!(TagHeap::init(arena), Err(Error::ArenaNotEmpty)));

    let config = Config::new().chunk_size(100);
    assert!(matches!(
        TagHeap::with_config(A::with_capacity(2048), config),
        Err(Error::InvalidConfig(_))
    ));
}

fn zero_size<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);
    assert_eq!(heap.try_allocate(0), Ok(None));
    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.usage().objects, 0);
    assert_eq!(heap.usage().free_blocks, 1);
    assert_consistent(&heap);
}

fn alignment<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);
    for size in 1..=100 {
        let payload = heap.allocate(size).expect("allocation failed");
        assert_eq!(payload.offset() % 8, 0);
        assert!(heap.usable_size(payload) >= size);
        assert_eq!(heap.payload(payload).len(), heap.usable_size(payload));
    }
    assert_consistent(&heap);
}

fn coalesce_on_free<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let p1 = heap.allocate(16).expect("allocation failed");
    let p2 = heap.allocate(24).expect("allocation failed");
    assert_eq!(p1.offset(), 8);
    assert_eq!(p2.offset(), 32);
    assert_consistent(&heap);

    heap.deallocate(p1);
    assert_consistent(&heap);
    assert_eq!(heap.usage().free_blocks, 2);

    // Merges with both neighbors
    heap.deallocate(p2);
    assert_consistent(&heap);
    assert_eq!(heap.usage().free_blocks, 1);
    assert_eq!(heap.usage().free, 1016);

    let p3 = heap.allocate(32).expect("allocation failed");
    assert_eq!(p3.offset(), 8);
    assert_eq!(heap.usage().extensions, 0);
}

fn best_fit<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let big = heap.allocate(100).expect("allocation failed");
    let _ = heap.allocate(8).expect("allocation failed");
    let medium = heap.allocate(40).expect("allocation failed");
    let _ = heap.allocate(8).expect("allocation failed");
    let small = heap.allocate(60).expect("allocation failed");
    let _ = heap.allocate(8).expect("allocation failed");

    heap.deallocate(big);
    heap.deallocate(medium);
    heap.deallocate(small);
    assert_consistent(&heap);
    assert_eq!(heap.usage().free_blocks, 4);

    // The 48-byte block is the tightest fit; its 8 leftover bytes cannot form a block
    let p = heap.allocate(30).expect("allocation failed");
    assert_eq!(p, medium);
    assert_eq!(heap.usable_size(p), 40);

    // Exact fit
    let q = heap.allocate(64).expect("allocation failed");
    assert_eq!(q, small);
    assert_eq!(heap.usable_size(q), 64);

    assert_consistent(&heap);
    assert_eq!(heap.usage().free_blocks, 2);
}

fn fill_with_smallest<A: TestArena>() {
    let mut heap = heap::<A>(1024);
    let max_allocations = (1024 - 8) / 16;

    for _ in 0..max_allocations {
        assert!(heap.allocate(1).is_some());
    }
    assert!(heap.allocate(1).is_none());

    assert_consistent(&heap);
    assert_eq!(heap.usage().objects, max_allocations);
    assert_eq!(heap.usage().free_blocks, 0);
}

fn min_arena_size<A: TestArena>() {
    let config = Config::new().initial_size(24);
    let mut heap =
        TagHeap::with_config(A::with_capacity(24), config).expect("initialization failed");

    let payload = heap.allocate(8).expect("allocation failed");
    assert_eq!(payload.offset(), 8);
    assert!(heap.allocate(1).is_none());
    assert_consistent(&heap);

    heap.deallocate(payload);
    assert!(heap.allocate(8).is_some());
}

fn extension<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    // The new memory merges with the free block at the end of the arena
    let p = heap.allocate(2000).expect("allocation failed");
    assert_eq!(p.offset(), 8);
    assert_consistent(&heap);
    assert_eq!(
        heap.usage(),
        Usage {
            total: 3032,
            used: 2000,
            free: 1016,
            objects: 1,
            free_blocks: 1,
            extensions: 1,
        }
    );
}

fn repeated_extensions<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let payloads = (0..10)
        .map(|_| heap.allocate(1000).expect("allocation failed"))
        .collect::<Vec<_>>();
    assert_consistent(&heap);
    assert_eq!(heap.usage().extensions, 9);
    assert_eq!(heap.usage().total, 10240);

    for payload in payloads {
        heap.deallocate(payload);
        assert_consistent(&heap);
    }
    assert_eq!(heap.usage().free_blocks, 1);
    assert_eq!(heap.usage().free, 10232);

    assert!(heap.allocate(5000).is_some());
    assert_eq!(heap.usage().extensions, 9);
}

fn exhaustion<A: TestArena>() {
    init_logging();
    let mut heap = heap::<A>(2048);

    assert_eq!(
        heap.try_allocate(1500),
        Err(Error::ArenaExhausted(crate::ArenaExhausted {
            requested: 1512,
            available: 1024,
        }))
    );
    assert_eq!(heap.allocate(1500), None);
    assert_consistent(&heap);
    assert_eq!(heap.usage().total, 1024);

    // Smaller requests still succeed, possibly after growing
    assert!(heap.allocate(500).is_some());
    assert!(heap.allocate(1000).is_some());
    assert_eq!(heap.usage().total, 2048);
    assert_consistent(&heap);
}

fn grow_in_place<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let p = heap.allocate(16).expect("allocation failed");
    heap.payload_mut(p).copy_from_slice(b"abcdefghijklmnop");

    let q = heap.reallocate(Some(p), 100).expect("reallocation failed");
    assert_eq!(q, p);
    assert_eq!(heap.usable_size(q), 104);
    assert_eq!(&heap.payload(q)[..16], b"abcdefghijklmnop");
    assert_consistent(&heap);
}

fn grow_reallocated<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let p = heap.allocate(16).expect("allocation failed");
    heap.payload_mut(p).copy_from_slice(b"abcdefghijklmnop");
    let _ = heap.allocate(16).expect("allocation failed");

    let q = heap.reallocate(Some(p), 100).expect("reallocation failed");
    assert_ne!(q, p);
    assert_eq!(q.offset(), 56);
    assert_eq!(&heap.payload(q)[..16], b"abcdefghijklmnop");
    assert_consistent(&heap);
    assert_eq!(heap.usage().objects, 2);
}

fn shrink_moves<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let p = heap.allocate(200).expect("allocation failed");
    for (i, byte) in heap.payload_mut(p).iter_mut().enumerate() {
        *byte = i as u8;
    }
    let _ = heap.allocate(8).expect("allocation failed");

    // Not followed by a free block: a smaller request still moves the contents
    let q = heap.reallocate(Some(p), 50).expect("reallocation failed");
    assert_ne!(q, p);
    assert_eq!(q.offset(), 232);
    assert_eq!(heap.usable_size(q), 56);
    assert!(heap.payload(q).iter().enumerate().all(|(i, &b)| b == i as u8));
    assert_consistent(&heap);
    assert_eq!(heap.usage().objects, 2);
    assert_eq!(heap.usage().free_blocks, 2);
    assert_eq!(heap.usage().extensions, 0);
}

fn shrink_into_free_neighbor<A: TestArena>() {
    let mut heap = heap::<A>(1 << 20);

    let p = heap.allocate(200).expect("allocation failed");
    heap.payload_mut(p)[..16].copy_from_slice(b"abcdefghijklmnop");

    let q = heap.reallocate(Some(p), 50).expect("reallocation failed");
    assert_eq!(q, p);
    assert_eq!(heap.usable_size(q), 56);
    assert_eq!(&heap.payload(q)[..16], b"abcdefghijklmnop");
    assert_consistent(&heap);
    assert_eq!(heap.usage().free_blocks, 1);
    assert_eq!(heap.usage().free, 952);
}

fn reallocate_edge_cases<A: TestArena>() {
    let mut a = heap::<A>(1 << 20);
    let mut b = heap::<A>(1 << 20);

    // Same as allocate
    let pa = a.reallocate(None, 100);
    let pb = b.allocate(100);
    assert_eq!(pa, pb);
    assert_eq!(a.usage(), b.usage());

    // Same as deallocate
    assert_eq!(a.reallocate(pa, 0), None);
    b.deallocate(pb.expect("allocation failed"));
    assert_eq!(a.usage(), b.usage());
    assert_consistent(&a);
}

fn reallocate_failure_keeps_block<A: TestArena>() {
    let mut heap = heap::<A>(2048);

    let p = heap.allocate(16).expect("allocation failed");
    heap.payload_mut(p).copy_from_slice(b"abcdefghijklmnop");
    let _ = heap.allocate(16).expect("allocation failed");

    assert_eq!(heap.reallocate(Some(p), 4000), None);
    assert_eq!(&heap.payload(p)[..16], b"abcdefghijklmnop");
    assert_eq!(heap.usage().objects, 2);
    assert_consistent(&heap);
}

#[cfg(not(miri))]
fn random<A: TestArena>() {
    #[derive(Copy, Clone, Debug)]
    struct Object {
        payload: Payload,
        size: usize,
        fill: u8,
    }

    fn fill<A: ArenaProvider>(heap: &mut TagHeap<A>, object: Object) {
        heap.payload_mut(object.payload)[..object.size].fill(object.fill);
    }

    fn verify<A: ArenaProvider>(heap: &TagHeap<A>, object: Object, len: usize) {
        assert!(
            heap.payload(object.payload)[..len]
                .iter()
                .all(|&b| b == object.fill),
            "contents of {:?} were corrupted",
            object.payload
        );
    }

    fn assert_disjoint<A: ArenaProvider>(heap: &TagHeap<A>, objects: &[Object]) {
        let mut ranges = objects
            .iter()
            .map(|object| {
                let start = object.payload.offset();
                (start, start + heap.usable_size(object.payload))
            })
            .collect::<Vec<_>>();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 < pair[1].0, "overlapping payloads: {pair:?}");
        }
    }

    init_logging();

    let mut heap = heap::<A>(2 * 1024 * 1024);
    let mut rng = SmallRng::seed_from_u64(12345);
    let mut objects = Vec::<Object>::new();

    for _ in 0..2000 {
        match rng.gen_range(0..8) {
            0 if !objects.is_empty() => {
                let object = objects.swap_remove(rng.gen_range(0..objects.len()));
                verify(&heap, object, object.size);
                heap.deallocate(object.payload);
            }
            1 if !objects.is_empty() => {
                let index = rng.gen_range(0..objects.len());
                let object = objects[index];
                let size = rng.gen_range(0..=512);
                match heap.reallocate(Some(object.payload), size) {
                    Some(payload) => {
                        let moved = Object { payload, ..object };
                        verify(&heap, moved, object.size.min(size));
                        objects[index] = Object {
                            payload,
                            size,
                            fill: rng.gen(),
                        };
                        fill(&mut heap, objects[index]);
                    }
                    None => {
                        assert_eq!(size, 0, "reallocation failed");
                        objects.swap_remove(index);
                    }
                }
            }
            _ => {
                let size = rng.gen_range(0..=512);
                match heap.allocate(size) {
                    Some(payload) => {
                        let object = Object {
                            payload,
                            size,
                            fill: rng.gen(),
                        };
                        fill(&mut heap, object);
                        objects.push(object);
                    }
                    None => assert_eq!(size, 0, "allocation failed"),
                }
            }
        }
        assert_consistent(&heap);
    }

    assert_disjoint(&heap, &objects);
    assert_eq!(heap.usage().objects, objects.len());

    for object in objects.drain(..) {
        verify(&heap, object, object.size);
        heap.deallocate(object.payload);
    }
    assert_consistent(&heap);
    assert_eq!(heap.usage().objects, 0);
    assert_eq!(heap.usage().free_blocks, 1);
}

macro_rules! common_tests {
    ( A = $arena:ty $(,)? ) => {
        #[test]
        fn fresh_heap() {
            $crate::tests::fresh_heap::<$arena>()
        }

        #[test]
        fn init_errors() {
            $crate::tests::init_errors::<$arena>()
        }

        #[test]
        fn zero_size() {
            $crate::tests::zero_size::<$arena>()
        }

        #[test]
        fn alignment() {
            $crate::tests::alignment::<$arena>()
        }

        #[test]
        fn coalesce_on_free() {
            $crate::tests::coalesce_on_free::<$arena>()
        }

        #[test]
        fn best_fit() {
            $crate::tests::best_fit::<$arena>()
        }

        #[test]
        fn fill_with_smallest() {
            $crate::tests::fill_with_smallest::<$arena>()
        }

        #[test]
        fn min_arena_size() {
            $crate::tests::min_arena_size::<$arena>()
        }

        #[test]
        fn extension() {
            $crate::tests::extension::<$arena>()
        }

        #[test]
        fn repeated_extensions() {
            $crate::tests::repeated_extensions::<$arena>()
        }

        #[test]
        fn exhaustion() {
            $crate::tests::exhaustion::<$arena>()
        }

        #[test]
        fn grow_in_place() {
            $crate::tests::grow_in_place::<$arena>()
        }

        #[test]
        fn grow_reallocated() {
            $crate::tests::grow_reallocated::<$arena>()
        }

        #[test]
        fn shrink_moves() {
            $crate::tests::shrink_moves::<$arena>()
        }

        #[test]
        fn shrink_into_free_neighbor() {
            $crate::tests::shrink_into_free_neighbor::<$arena>()
        }

        #[test]
        fn reallocate_edge_cases() {
            $crate::tests::reallocate_edge_cases::<$arena>()
        }

        #[test]
        fn reallocate_failure_keeps_block() {
            $crate::tests::reallocate_failure_keeps_block::<$arena>()
        }

        #[test]
        #[cfg(not(miri))]
        fn random() {
            $crate::tests::random::<$arena>()
        }
    };
}

use common_tests;

mod vec_arena {
    super::common_tests!(A = crate::VecArena);
}

mod slice_arena {
    super::common_tests!(A = crate::SliceArena<'static>);
}

#[test]
fn global_alloc() {
    let mut memory = AlignedArray([0u8; 4096]);
    let heap =
        LockedTagHeap::new(TagHeap::init(SliceArena::from(&mut memory.0)).expect("init failed"));

    let layout = Layout::new::<[u8; 16]>();
    let ptr = unsafe { heap.alloc(layout) };
    assert!(!ptr.is_null());
    assert_eq!(ptr.align_offset(8), 0);
    unsafe { ptr.copy_from_nonoverlapping(b"abcdefghijklmnop".as_ptr(), 16) };

    let ptr = unsafe { heap.realloc(ptr, layout, 200) };
    assert!(!ptr.is_null());
    assert_eq!(
        unsafe { core::slice::from_raw_parts(ptr, 16) },
        b"abcdefghijklmnop"
    );

    let over_aligned = Layout::from_size_align(16, 16).expect("layout error");
    assert!(unsafe { heap.alloc(over_aligned) }.is_null());

    unsafe { heap.dealloc(ptr, Layout::from_size_align(200, 8).expect("layout error")) };
    assert_eq!(heap.usage().objects, 0);
    assert_consistent(&heap.into_inner());
}

#[test]
fn locked_from_threads() {
    let heap = LockedTagHeap::new(TagHeap::init(VecArena::new()).expect("init failed"));

    std::thread::scope(|scope| {
        for t in 0..4 {
            let heap = &heap;
            scope.spawn(move || {
                let mut payloads = Vec::new();
                for i in 0..100 {
                    payloads.push(heap.allocate(8 * (t + i % 7 + 1)).expect("allocation failed"));
                }
                for payload in payloads {
                    heap.deallocate(payload);
                }
            });
        }
    });

    let heap = heap.into_inner();
    assert_consistent(&heap);
    assert_eq!(heap.usage().objects, 0);
    assert_eq!(heap.usage().free_blocks, 1);
}
