//! Shared helpers for heap integration tests

#![allow(dead_code)]

use placeheap::{HeapAllocator, HeapConfig, SizeClass};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

/// Default-table heap over `arena` bytes
pub fn heap(arena: u64) -> HeapAllocator {
    HeapAllocator::with_arena(arena).expect("heap initializes")
}

pub fn heap_with(config: HeapConfig, arena: u64) -> HeapAllocator {
    let mut heap = HeapAllocator::new(config).expect("valid config");
    heap.initialize(arena).expect("heap initializes");
    heap
}

/// Free-list contents of every class, head first
pub fn free_lists(heap: &HeapAllocator) -> Vec<Vec<u64>> {
    heap.size_classes()
        .classes()
        .map(|c| heap.free_offsets(c))
        .collect()
}

pub fn class(index: usize) -> SizeClass {
    SizeClass::new(index)
}

/// Fail the test if any bookkeeping invariant is broken
pub fn assert_consistent(heap: &HeapAllocator) {
    if let Err(err) = heap.check_invariants() {
        panic!("heap invariants broken: {}", err);
    }
}
