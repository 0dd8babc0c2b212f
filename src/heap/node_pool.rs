//! Chunk-backed pool of page entries
//!
//! Bookkeeping nodes live in fixed-capacity chunks of roughly one host page
//! each. Chunks are appended when the spare list runs dry and are only
//! released all at once, so a [`NodeId`] stays valid for the pool's lifetime.

use super::size_class::SizeClass;
use crate::error::{HeapError, HeapResult};

/// Host page size the chunk capacity is derived from
pub const PAGE_CHUNK_BYTES: usize = 4096;

/// Number of entries per chunk
pub const ENTRIES_PER_CHUNK: usize = PAGE_CHUNK_BYTES / std::mem::size_of::<PageEntry>();

/// Stable index of a node in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn new(chunk: usize, slot: usize) -> Self {
        NodeId((chunk * ENTRIES_PER_CHUNK + slot) as u32)
    }

    fn chunk(self) -> usize {
        self.0 as usize / ENTRIES_PER_CHUNK
    }

    fn slot(self) -> usize {
        self.0 as usize % ENTRIES_PER_CHUNK
    }
}

/// The one list that currently holds a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOwner {
    /// Pool spare list
    Spare,
    /// Taken from the pool but not linked into any list yet
    Detached,
    /// Free list of a class
    Free(SizeClass),
    /// Used list of a class
    Used(SizeClass),
    /// Chain of a multi-block allocation
    Span,
}

/// One block of the arena plus its list links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub size_class: SizeClass,
    pub offset: u64,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
    pub owner: NodeOwner,
}

impl PageEntry {
    const SPARE: PageEntry = PageEntry {
        size_class: SizeClass::new(0),
        offset: 0,
        prev: None,
        next: None,
        owner: NodeOwner::Spare,
    };
}

/// Bump-allocated slab of [`PageEntry`] chunks with a spare list
#[derive(Debug)]
pub struct NodePool {
    chunks: Vec<Box<[PageEntry]>>,
    /// Singly linked through `next`
    spare_head: Option<NodeId>,
    spare_count: usize,
    max_chunks: Option<usize>,
}

impl NodePool {
    /// Create an empty pool; no chunk is allocated until the first request
    pub fn new(max_chunks: Option<usize>) -> Self {
        NodePool {
            chunks: Vec::new(),
            spare_head: None,
            spare_count: 0,
            max_chunks,
        }
    }

    /// Take a node off the spare list, growing the pool if it is empty
    ///
    /// The returned node is reset and owned by the caller until it is linked
    /// into a list.
    ///
    /// # Errors
    /// `OutOfMemory` when a new chunk is needed and either the chunk limit is
    /// reached or the host allocator refuses the reservation.
    pub fn allocate_entry(&mut self, size_class: SizeClass, offset: u64) -> HeapResult<NodeId> {
        if self.spare_head.is_none() {
            self.grow()?;
        }

        let id = self
            .spare_head
            .ok_or_else(|| HeapError::InvariantViolation("spare list empty after grow".into()))?;
        let entry = self.get_mut(id);
        let next = entry.next;
        *entry = PageEntry {
            size_class,
            offset,
            prev: None,
            next: None,
            owner: NodeOwner::Detached,
        };

        self.spare_head = next;
        self.spare_count -= 1;
        Ok(id)
    }

    /// Return a node to the spare list; chunk memory is kept
    pub fn release_entry(&mut self, id: NodeId) {
        let head = self.spare_head;
        let entry = self.get_mut(id);
        debug_assert_eq!(
            entry.owner,
            NodeOwner::Detached,
            "releasing a node that is still linked"
        );
        *entry = PageEntry {
            next: head,
            ..PageEntry::SPARE
        };
        self.spare_head = Some(id);
        self.spare_count += 1;
    }

    /// Drop every chunk
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.spare_head = None;
        self.spare_count = 0;
    }

    pub fn get(&self, id: NodeId) -> &PageEntry {
        &self.chunks[id.chunk()][id.slot()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut PageEntry {
        &mut self.chunks[id.chunk()][id.slot()]
    }

    /// Number of chunks allocated so far
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total node slots across all chunks
    pub fn capacity(&self) -> usize {
        self.chunks.len() * ENTRIES_PER_CHUNK
    }

    /// Nodes sitting on the spare list
    pub fn spare_count(&self) -> usize {
        self.spare_count
    }

    /// Nodes currently handed out
    pub fn live_count(&self) -> usize {
        self.capacity() - self.spare_count
    }

    fn grow(&mut self) -> HeapResult<()> {
        if let Some(max) = self.max_chunks {
            if self.chunks.len() >= max {
                return Err(HeapError::OutOfMemory(format!(
                    "node pool limit reached ({} chunks)",
                    max
                )));
            }
        }

        if self.capacity() + ENTRIES_PER_CHUNK > u32::MAX as usize {
            return Err(HeapError::OutOfMemory(
                "node pool index space exhausted".to_string(),
            ));
        }

        let mut storage: Vec<PageEntry> = Vec::new();
        storage.try_reserve_exact(ENTRIES_PER_CHUNK).map_err(|e| {
            HeapError::OutOfMemory(format!("host allocation for node chunk failed: {}", e))
        })?;
        self.chunks.try_reserve(1).map_err(|e| {
            HeapError::OutOfMemory(format!("host allocation for chunk table failed: {}", e))
        })?;

        // Link the new slots in ascending order so the lowest index is handed out first
        let chunk = self.chunks.len();
        let old_head = self.spare_head;
        for slot in 0..ENTRIES_PER_CHUNK {
            let next = if slot + 1 < ENTRIES_PER_CHUNK {
                Some(NodeId::new(chunk, slot + 1))
            } else {
                old_head
            };
            storage.push(PageEntry {
                next,
                ..PageEntry::SPARE
            });
        }

        self.chunks.push(storage.into_boxed_slice());
        self.spare_head = Some(NodeId::new(chunk, 0));
        self.spare_count += ENTRIES_PER_CHUNK;

        tracing::debug!(
            chunks = self.chunks.len(),
            capacity = self.capacity(),
            "node pool grew by one chunk"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_per_chunk_fits_page() {
        assert!(ENTRIES_PER_CHUNK > 0);
        assert!(ENTRIES_PER_CHUNK * std::mem::size_of::<PageEntry>() <= PAGE_CHUNK_BYTES);
    }

    #[test]
    fn test_lazy_growth() {
        let mut pool = NodePool::new(None);
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.capacity(), 0);

        let id = pool.allocate_entry(SizeClass::new(2), 1024).unwrap();
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.spare_count(), ENTRIES_PER_CHUNK - 1);

        let entry = pool.get(id);
        assert_eq!(entry.size_class, SizeClass::new(2));
        assert_eq!(entry.offset, 1024);
        assert_eq!(entry.prev, None);
        assert_eq!(entry.next, None);
        assert_eq!(entry.owner, NodeOwner::Detached);
    }

    #[test]
    fn test_release_recycles_node() {
        let mut pool = NodePool::new(None);
        let a = pool.allocate_entry(SizeClass::new(0), 0).unwrap();
        pool.release_entry(a);
        assert_eq!(pool.spare_count(), ENTRIES_PER_CHUNK);

        let b = pool.allocate_entry(SizeClass::new(1), 512).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.get(b).offset, 512);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn test_second_chunk_when_exhausted() {
        let mut pool = NodePool::new(None);
        let ids: Vec<_> = (0..=ENTRIES_PER_CHUNK)
            .map(|i| pool.allocate_entry(SizeClass::new(0), i as u64 * 256).unwrap())
            .collect();

        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.live_count(), ENTRIES_PER_CHUNK + 1);

        // Earlier ids remain valid after growth
        assert_eq!(pool.get(ids[0]).offset, 0);
        assert_eq!(pool.get(ids[ENTRIES_PER_CHUNK]).offset, ENTRIES_PER_CHUNK as u64 * 256);
    }

    #[test]
    fn test_chunk_limit() {
        let mut pool = NodePool::new(Some(1));
        for i in 0..ENTRIES_PER_CHUNK {
            pool.allocate_entry(SizeClass::new(0), i as u64).unwrap();
        }

        let result = pool.allocate_entry(SizeClass::new(0), 0);
        assert!(matches!(result, Err(HeapError::OutOfMemory(_))));
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn test_reset_drops_chunks() {
        let mut pool = NodePool::new(None);
        pool.allocate_entry(SizeClass::new(0), 0).unwrap();
        pool.reset();

        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.spare_count(), 0);
        assert_eq!(pool.live_count(), 0);
    }
}
