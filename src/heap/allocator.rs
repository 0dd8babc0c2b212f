//! Size-classed buddy allocator for a fixed-size arena
//!
//! The arena is tiled with blocks of the largest class. A request is rounded
//! up to the smallest class that holds it; when that class has no free block
//! a larger one is halved repeatedly until a block of the right size falls
//! out. Freed blocks are merged with their buddy while the buddy is free, so
//! an allocate/free pair leaves the free lists exactly as they were.
//!
//! Requests larger than the biggest class are placed on a run of contiguous
//! top-class blocks (see [`span`](super::span)).
//!
//! # Thread Safety
//!
//! `HeapAllocator` is single-threaded by contract: every mutating call takes
//! `&mut self`. Wrap it in a [`SharedHeapAllocator`](super::SharedHeapAllocator)
//! (or any lock) to share it between threads.
//!
//! # Example
//!
//! ```rust
//! use placeheap::heap::HeapAllocator;
//!
//! let mut heap = HeapAllocator::default();
//! heap.initialize(1024 * 1024)?;
//!
//! let offset = heap.allocate(100, 256)?;
//! assert_eq!(offset, 0);
//!
//! heap.free(offset)?;
//! heap.uninitialize();
//! # Ok::<(), placeheap::HeapError>(())
//! ```

use super::config::HeapConfig;
use super::node_pool::{NodeId, NodeOwner, NodePool};
use super::page_list::PageList;
use super::size_class::{SizeClass, SizeClassTable};
use super::span::{blocks_needed, SpanAllocation};
use super::stats::{ClassStats, HeapCounters, HeapStats};
use crate::error::{HeapError, HeapResult};
use crate::{invariant_error, out_of_memory};
use std::collections::{HashMap, HashSet};

/// A live allocation, keyed by its offset
#[derive(Debug, Clone)]
enum LiveAllocation {
    /// One block of a size class
    Block(NodeId),
    /// Run of top-class blocks
    Span(SpanAllocation),
}

/// Everything that exists only between `initialize` and `uninitialize`
#[derive(Debug)]
struct HeapState {
    arena_size: u64,
    classes: SizeClassTable,
    coalesce: bool,
    pool: NodePool,
    free_lists: Vec<PageList>,
    used_lists: Vec<PageList>,
    /// Start offset of every free block
    free_index: HashMap<u64, NodeId>,
    /// Start offset of every live allocation
    live: HashMap<u64, LiveAllocation>,
    free_bytes: u64,
    span_bytes: u64,
    counters: HeapCounters,
}

/// Sub-allocator handing out offsets inside one arena
#[derive(Debug)]
pub struct HeapAllocator {
    config: HeapConfig,
    classes: SizeClassTable,
    state: Option<HeapState>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        HeapAllocator {
            config: HeapConfig::default(),
            classes: SizeClassTable::default(),
            state: None,
        }
    }
}

impl HeapAllocator {
    /// Create an uninitialized allocator
    ///
    /// # Errors
    /// `InvalidConfiguration` if the configuration does not validate.
    pub fn new(config: HeapConfig) -> HeapResult<Self> {
        let classes = config.validate()?;
        Ok(HeapAllocator {
            config,
            classes,
            state: None,
        })
    }

    /// Create an allocator with the default configuration and initialize it
    pub fn with_arena(arena_size: u64) -> HeapResult<Self> {
        let mut heap = Self::default();
        heap.initialize(arena_size)?;
        Ok(heap)
    }

    /// Tile an arena of `arena_size` bytes with top-class blocks
    ///
    /// # Errors
    /// - `InvalidArenaSize` unless `arena_size` is a positive multiple of the
    ///   largest block size
    /// - `AlreadyInitialized` if the allocator is live
    /// - `OutOfMemory` if node storage for the tiles cannot be obtained
    pub fn initialize(&mut self, arena_size: u64) -> HeapResult<()> {
        if self.state.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }

        let block_size = self.classes.max_block_size();
        if arena_size == 0 || arena_size % block_size != 0 {
            tracing::warn!(
                arena_size,
                block_size,
                "rejecting arena size that is not a multiple of the largest block"
            );
            return Err(HeapError::InvalidArenaSize {
                size: arena_size,
                block_size,
            });
        }

        let mut state = HeapState::new(arena_size, &self.classes, &self.config);
        let top = self.classes.largest();
        let mut offset = 0;
        while offset < arena_size {
            let id = state.pool.allocate_entry(top, offset)?;
            state.free_lists[top.index()].push_back(&mut state.pool, id);
            state.free_index.insert(offset, id);
            offset += block_size;
        }

        tracing::info!(
            arena_size,
            blocks = arena_size / block_size,
            block_size,
            classes = self.classes.len(),
            "heap initialized"
        );

        self.state = Some(state);
        Ok(())
    }

    /// Release all bookkeeping; idempotent
    ///
    /// Live allocations at this point are a caller bug. They are logged, and
    /// debug builds assert on them.
    pub fn uninitialize(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };

        let leaked = state.live.len();
        if leaked > 0 {
            tracing::error!(
                leaked,
                used_bytes = state.arena_size - state.free_bytes,
                "heap uninitialized with live allocations"
            );
        }

        let chunks = state.pool.chunk_count();
        state.pool.reset();
        tracing::info!(chunks, "heap uninitialized");

        debug_assert_eq!(leaked, 0, "heap uninitialized with {} live allocations", leaked);
    }

    /// Allocate `size` bytes aligned to `alignment` and return the offset
    ///
    /// `alignment` of 0 or 1 means the block's natural alignment.
    ///
    /// # Errors
    /// - `InvalidSize` for zero or for sizes larger than the arena
    /// - `InvalidAlignment` if `alignment` is not a power of two
    /// - `AlignmentUnsatisfiable` if `alignment` exceeds the block size
    /// - `OutOfMemory` if no free block (or node storage) is available
    /// - `NotInitialized`
    pub fn allocate(&mut self, size: u64, alignment: u64) -> HeapResult<u64> {
        let state = self.state.as_mut().ok_or(HeapError::NotInitialized)?;
        let result = state.allocate(size, alignment);

        match &result {
            Ok(offset) => tracing::trace!(size, alignment, offset, "allocated"),
            Err(err) => {
                state.counters.failed_allocations += 1;
                tracing::debug!(size, alignment, error = %err, "allocation failed");
            }
        }

        result
    }

    /// Return a previously allocated offset to the heap
    ///
    /// # Errors
    /// `DoubleFreeOrInvalidOffset` if `offset` is not a live allocation; no
    /// list is modified in that case.
    pub fn free(&mut self, offset: u64) -> HeapResult<()> {
        let state = self.state.as_mut().ok_or(HeapError::NotInitialized)?;
        let result = state.free(offset);

        match &result {
            Ok(()) => tracing::trace!(offset, "freed"),
            Err(err) => tracing::warn!(offset, error = %err, "free rejected"),
        }

        result
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn size_classes(&self) -> &SizeClassTable {
        &self.classes
    }

    /// Arena size in bytes, 0 when uninitialized
    pub fn arena_size(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.arena_size)
    }

    /// Bytes on the free lists
    pub fn free_bytes(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.free_bytes)
    }

    /// Bytes handed out, rounded up to block sizes
    pub fn used_bytes(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.arena_size - s.free_bytes)
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.live.len())
    }

    /// Bytes reserved for the allocation at `offset`
    pub fn allocation_size(&self, offset: u64) -> Option<u64> {
        let state = self.state.as_ref()?;
        match state.live.get(&offset)? {
            LiveAllocation::Block(id) => {
                Some(state.classes.block_size(state.pool.get(*id).size_class))
            }
            LiveAllocation::Span(span) => Some(span.size_bytes()),
        }
    }

    /// Free blocks of `class`
    pub fn free_count(&self, class: SizeClass) -> usize {
        self.state
            .as_ref()
            .and_then(|s| s.free_lists.get(class.index()))
            .map_or(0, PageList::len)
    }

    /// Blocks of `class` handed out
    pub fn used_count(&self, class: SizeClass) -> usize {
        self.state
            .as_ref()
            .and_then(|s| s.used_lists.get(class.index()))
            .map_or(0, PageList::len)
    }

    /// Offsets on the free list of `class`, head first
    pub fn free_offsets(&self, class: SizeClass) -> Vec<u64> {
        self.list_offsets(class, |s| &s.free_lists)
    }

    /// Offsets on the used list of `class`, head first
    pub fn used_offsets(&self, class: SizeClass) -> Vec<u64> {
        self.list_offsets(class, |s| &s.used_lists)
    }

    fn list_offsets(&self, class: SizeClass, lists: impl Fn(&HeapState) -> &Vec<PageList>) -> Vec<u64> {
        let Some(state) = self.state.as_ref() else {
            return Vec::new();
        };
        lists(state)
            .get(class.index())
            .map(|list| {
                list.iter(&state.pool)
                    .map(|id| state.pool.get(id).offset)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the heap
    pub fn stats(&self) -> HeapResult<HeapStats> {
        let state = self.state.as_ref().ok_or(HeapError::NotInitialized)?;
        Ok(state.stats())
    }

    /// Verify the bookkeeping invariants
    ///
    /// - every block is `size(class)` aligned and inside the arena
    /// - free, used and span blocks tile `[0, arena_size)` exactly
    /// - every node is on exactly one list and its owner tag says which
    /// - the offset indexes agree with the lists
    pub fn check_invariants(&self) -> HeapResult<()> {
        match self.state.as_ref() {
            Some(state) => state.check_invariants(),
            None => Ok(()),
        }
    }
}

impl HeapState {
    fn new(arena_size: u64, classes: &SizeClassTable, config: &HeapConfig) -> Self {
        HeapState {
            arena_size,
            classes: classes.clone(),
            coalesce: config.coalesce,
            pool: NodePool::new(config.max_pool_chunks),
            free_lists: classes
                .classes()
                .map(|c| PageList::new(NodeOwner::Free(c)))
                .collect(),
            used_lists: classes
                .classes()
                .map(|c| PageList::new(NodeOwner::Used(c)))
                .collect(),
            free_index: HashMap::new(),
            live: HashMap::new(),
            free_bytes: arena_size,
            span_bytes: 0,
            counters: HeapCounters::default(),
        }
    }

    fn allocate(&mut self, size: u64, alignment: u64) -> HeapResult<u64> {
        if size == 0 || size > self.arena_size {
            return Err(HeapError::InvalidSize(size));
        }

        if alignment > 1 && !alignment.is_power_of_two() {
            return Err(HeapError::InvalidAlignment(alignment));
        }

        let offset = match self.classes.resolve(size) {
            Some(class) => self.allocate_block(class, alignment)?,
            None => self.allocate_span(size, alignment)?,
        };

        self.counters.total_allocations += 1;
        let used = self.arena_size - self.free_bytes;
        self.counters.peak_used_bytes = self.counters.peak_used_bytes.max(used);
        Ok(offset)
    }

    fn allocate_block(&mut self, class: SizeClass, alignment: u64) -> HeapResult<u64> {
        let block_size = self.classes.block_size(class);
        if alignment > block_size {
            return Err(HeapError::AlignmentUnsatisfiable {
                alignment,
                block_size,
            });
        }

        if block_size > self.free_bytes {
            return Err(out_of_memory!(
                "{} bytes requested, {} free",
                block_size,
                self.free_bytes
            ));
        }

        // First non-empty free list at or above the target class
        let source = self
            .classes
            .classes()
            .skip(class.index())
            .find(|c| !self.free_lists[c.index()].is_empty())
            .ok_or_else(|| {
                out_of_memory!(
                    "no free block of {} bytes or larger ({} bytes free, fragmented)",
                    block_size,
                    self.free_bytes
                )
            })?;

        let head = self.free_lists[source.index()]
            .head()
            .ok_or_else(|| invariant_error!("free list of {} is empty", source))?;
        let base = self.pool.get(head).offset;

        // Take every node the split needs before touching a list, so running out
        // of node storage leaves the heap unchanged
        let mut upper_halves = Vec::with_capacity(source.index() - class.index());
        let mut level = source;
        while level > class {
            let child = level.child();
            let upper = base + self.classes.block_size(child);
            match self.pool.allocate_entry(child, upper) {
                Ok(id) => upper_halves.push(id),
                Err(err) => {
                    for id in upper_halves {
                        self.pool.release_entry(id);
                    }
                    return Err(err);
                }
            }
            level = child;
        }

        self.free_lists[source.index()].pop_front(&mut self.pool)?;
        self.free_index.remove(&base);

        for id in upper_halves {
            let entry = *self.pool.get(id);
            self.free_lists[entry.size_class.index()].push_front(&mut self.pool, id);
            self.free_index.insert(entry.offset, id);
            self.counters.splits += 1;
            tracing::trace!(
                offset = entry.offset,
                class = entry.size_class.index(),
                "split off buddy"
            );
        }

        self.pool.get_mut(head).size_class = class;
        self.used_lists[class.index()].push_front(&mut self.pool, head);
        self.live.insert(base, LiveAllocation::Block(head));
        self.free_bytes -= block_size;

        Ok(base)
    }

    fn allocate_span(&mut self, size: u64, alignment: u64) -> HeapResult<u64> {
        let top = self.classes.largest();
        let block_size = self.classes.max_block_size();

        if alignment > self.arena_size {
            return Err(HeapError::AlignmentUnsatisfiable {
                alignment,
                block_size: self.arena_size,
            });
        }

        let count = blocks_needed(size, block_size);
        let bytes = count * block_size;
        if bytes > self.free_bytes {
            return Err(out_of_memory!(
                "{} bytes requested, {} free",
                bytes,
                self.free_bytes
            ));
        }

        let step = alignment.max(block_size);
        let base = self.free_lists[top.index()]
            .iter(&self.pool)
            .map(|id| self.pool.get(id).offset)
            .filter(|&offset| offset % step == 0 && self.run_is_free(offset, count))
            .min()
            .ok_or_else(|| {
                out_of_memory!(
                    "no run of {} contiguous {}-byte blocks",
                    count,
                    block_size
                )
            })?;

        let mut span = SpanAllocation::new(base, block_size);
        for k in 0..count {
            let offset = base + k * block_size;
            let id = self
                .free_index
                .remove(&offset)
                .ok_or_else(|| invariant_error!("span block at {} vanished", offset))?;
            let anchor = self.pool.get(id).prev;
            self.free_lists[top.index()].unlink(&mut self.pool, id)?;
            span.push(&mut self.pool, id, anchor);
        }

        self.live.insert(base, LiveAllocation::Span(span));
        self.free_bytes -= bytes;
        self.span_bytes += bytes;
        self.counters.span_allocations += 1;

        tracing::debug!(base, blocks = count, bytes, "placed multi-block allocation");
        Ok(base)
    }

    /// Whether `count` top-class blocks starting at `base` are all free
    fn run_is_free(&self, base: u64, count: u64) -> bool {
        let top = NodeOwner::Free(self.classes.largest());
        let block_size = self.classes.max_block_size();
        (0..count).all(|k| {
            let offset = base + k * block_size;
            offset < self.arena_size
                && self
                    .free_index
                    .get(&offset)
                    .map_or(false, |&id| self.pool.get(id).owner == top)
        })
    }

    fn free(&mut self, offset: u64) -> HeapResult<()> {
        let live = self
            .live
            .get(&offset)
            .cloned()
            .ok_or(HeapError::DoubleFreeOrInvalidOffset(offset))?;

        match live {
            LiveAllocation::Block(id) => self.free_block(id)?,
            LiveAllocation::Span(span) => self.free_span(span)?,
        }

        self.live.remove(&offset);
        self.counters.total_frees += 1;
        Ok(())
    }

    fn free_block(&mut self, id: NodeId) -> HeapResult<()> {
        let entry = *self.pool.get(id);
        let mut class = entry.size_class;
        let mut offset = entry.offset;
        let freed = self.classes.block_size(class);

        self.used_lists[class.index()].unlink(&mut self.pool, id)?;

        if self.coalesce {
            while class < self.classes.largest() {
                let buddy = self.classes.buddy_of(offset, class);
                let Some(&buddy_id) = self.free_index.get(&buddy) else {
                    break;
                };
                // A free block at the buddy offset may belong to a smaller class
                if self.pool.get(buddy_id).owner != NodeOwner::Free(class) {
                    break;
                }

                self.free_lists[class.index()].unlink(&mut self.pool, buddy_id)?;
                self.free_index.remove(&buddy);
                self.pool.release_entry(buddy_id);

                offset = offset.min(buddy);
                class = class.parent();
                self.counters.merges += 1;
                tracing::trace!(offset, class = class.index(), "merged buddies");
            }
        }

        let node = self.pool.get_mut(id);
        node.offset = offset;
        node.size_class = class;
        self.free_lists[class.index()].push_front(&mut self.pool, id);
        self.free_index.insert(offset, id);
        self.free_bytes += freed;
        Ok(())
    }

    fn free_span(&mut self, span: SpanAllocation) -> HeapResult<()> {
        let top = self.classes.largest();
        let base = span.base_offset();
        let bytes = span.size_bytes();

        // Undo the unlinks in reverse. An anchor that has since left the top
        // free list (split or handed out) no longer marks a position; fall back
        // to the head.
        for (id, anchor) in span.drain(&mut self.pool)? {
            let offset = self.pool.get(id).offset;
            let list = &mut self.free_lists[top.index()];
            match anchor.filter(|&a| self.pool.get(a).owner == NodeOwner::Free(top)) {
                Some(anchor) => list.insert_after(&mut self.pool, anchor, id)?,
                None => list.push_front(&mut self.pool, id),
            }
            self.free_index.insert(offset, id);
        }

        self.free_bytes += bytes;
        self.span_bytes -= bytes;
        tracing::debug!(base, bytes, "released multi-block allocation");
        Ok(())
    }

    fn stats(&self) -> HeapStats {
        let classes = self
            .classes
            .classes()
            .map(|c| ClassStats {
                block_size: self.classes.block_size(c),
                free_blocks: self.free_lists[c.index()].len(),
                used_blocks: self.used_lists[c.index()].len(),
            })
            .collect();

        HeapStats {
            arena_size: self.arena_size,
            free_bytes: self.free_bytes,
            used_bytes: self.arena_size - self.free_bytes,
            span_bytes: self.span_bytes,
            live_allocations: self.live.len(),
            classes,
            pool_chunks: self.pool.chunk_count(),
            pool_capacity: self.pool.capacity(),
            pool_spare: self.pool.spare_count(),
            counters: self.counters.clone(),
        }
    }

    fn check_invariants(&self) -> HeapResult<()> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        let mut free_total = 0u64;

        for class in self.classes.classes() {
            let size = self.classes.block_size(class);
            for (list, is_free) in [
                (&self.free_lists[class.index()], true),
                (&self.used_lists[class.index()], false),
            ] {
                let mut walked = 0usize;
                for id in list.iter(&self.pool) {
                    let entry = self.pool.get(id);
                    if !seen.insert(id) {
                        return Err(invariant_error!("node at {} linked twice", entry.offset));
                    }
                    if entry.owner != list.owner() || entry.size_class != class {
                        return Err(invariant_error!(
                            "node at {} tagged {:?}/{} but found on {:?}",
                            entry.offset,
                            entry.owner,
                            entry.size_class,
                            list.owner()
                        ));
                    }
                    if entry.offset % size != 0 {
                        return Err(invariant_error!(
                            "offset {} not aligned to {} bytes",
                            entry.offset,
                            size
                        ));
                    }

                    let indexed = if is_free {
                        self.free_index.get(&entry.offset) == Some(&id)
                    } else {
                        matches!(self.live.get(&entry.offset), Some(LiveAllocation::Block(b)) if *b == id)
                    };
                    if !indexed {
                        return Err(invariant_error!("block at {} missing from index", entry.offset));
                    }

                    if is_free {
                        free_total += size;
                    }
                    ranges.push((entry.offset, size));
                    walked += 1;
                }
                if walked != list.len() {
                    return Err(invariant_error!(
                        "{:?} holds {} nodes but records {}",
                        list.owner(),
                        walked,
                        list.len()
                    ));
                }
            }
        }

        let top_size = self.classes.max_block_size();
        let mut span_total = 0u64;
        for live in self.live.values() {
            if let LiveAllocation::Span(span) = live {
                for (k, id) in span.blocks(&self.pool).enumerate() {
                    let entry = self.pool.get(id);
                    if !seen.insert(id) {
                        return Err(invariant_error!("span node at {} linked twice", entry.offset));
                    }
                    if entry.owner != NodeOwner::Span
                        || entry.offset != span.base_offset() + k as u64 * top_size
                    {
                        return Err(invariant_error!(
                            "span at {} has a stray block at {}",
                            span.base_offset(),
                            entry.offset
                        ));
                    }
                    ranges.push((entry.offset, top_size));
                }
                span_total += span.size_bytes();
            }
        }

        ranges.sort_unstable();
        let mut cursor = 0u64;
        for (start, len) in ranges {
            if start != cursor {
                return Err(invariant_error!(
                    "arena not tiled: expected block at {}, found {}",
                    cursor,
                    start
                ));
            }
            cursor = start + len;
        }
        if cursor != self.arena_size {
            return Err(invariant_error!(
                "blocks cover {} of {} bytes",
                cursor,
                self.arena_size
            ));
        }

        if free_total != self.free_bytes || span_total != self.span_bytes {
            return Err(invariant_error!(
                "byte counters drifted: free {} vs {}, span {} vs {}",
                free_total,
                self.free_bytes,
                span_total,
                self.span_bytes
            ));
        }
        if self.free_index.len() != self.free_lists.iter().map(PageList::len).sum::<usize>() {
            return Err(invariant_error!("free index out of sync with free lists"));
        }
        if seen.len() != self.pool.live_count() {
            return Err(invariant_error!(
                "{} nodes in lists but {} taken from the pool",
                seen.len(),
                self.pool.live_count()
            ));
        }

        Ok(())
    }
}
