//! Thread-safe handle around a [`HeapAllocator`]
//!
//! The allocator itself takes `&mut self` for every mutation. This wrapper is
//! the lock most callers want: clone the handle into each thread, every call
//! locks, delegates and unlocks.

use super::allocator::HeapAllocator;
use super::config::HeapConfig;
use super::stats::HeapStats;
use crate::error::HeapResult;
use std::sync::{Arc, Mutex};

/// Clonable handle to one heap behind a mutex
///
/// ```rust
/// use placeheap::SharedHeapAllocator;
///
/// let heap = SharedHeapAllocator::default();
/// heap.initialize(1024 * 1024)?;
///
/// let worker = heap.clone();
/// let offset = std::thread::spawn(move || worker.allocate(4096, 4096))
///     .join()
///     .expect("worker thread")?;
///
/// assert_eq!(offset % 4096, 0);
/// heap.free(offset)?;
/// heap.uninitialize()?;
/// # Ok::<(), placeheap::HeapError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedHeapAllocator {
    inner: Arc<Mutex<HeapAllocator>>,
}

impl SharedHeapAllocator {
    /// Wrap a new, uninitialized allocator for `config`
    pub fn new(config: HeapConfig) -> HeapResult<Self> {
        Ok(Self::from_allocator(HeapAllocator::new(config)?))
    }

    /// Wrap an existing allocator, initialized or not
    pub fn from_allocator(heap: HeapAllocator) -> Self {
        SharedHeapAllocator {
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    /// See [`HeapAllocator::initialize`]
    pub fn initialize(&self, arena_size: u64) -> HeapResult<()> {
        self.inner.lock()?.initialize(arena_size)
    }

    /// See [`HeapAllocator::uninitialize`]; fails only on a poisoned lock
    pub fn uninitialize(&self) -> HeapResult<()> {
        self.inner.lock()?.uninitialize();
        Ok(())
    }

    /// See [`HeapAllocator::allocate`]
    pub fn allocate(&self, size: u64, alignment: u64) -> HeapResult<u64> {
        self.inner.lock()?.allocate(size, alignment)
    }

    /// See [`HeapAllocator::free`]
    pub fn free(&self, offset: u64) -> HeapResult<()> {
        self.inner.lock()?.free(offset)
    }

    /// Snapshot of the wrapped heap
    pub fn stats(&self) -> HeapResult<HeapStats> {
        self.inner.lock()?.stats()
    }

    /// Bytes on the free lists, 0 when uninitialized
    pub fn free_bytes(&self) -> HeapResult<u64> {
        Ok(self.inner.lock()?.free_bytes())
    }

    /// Run `f` with the lock held, for sequences that must not interleave
    pub fn with<R>(&self, f: impl FnOnce(&mut HeapAllocator) -> R) -> HeapResult<R> {
        let mut heap = self.inner.lock()?;
        Ok(f(&mut heap))
    }
}
