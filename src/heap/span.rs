//! Multi-block allocations
//!
//! Requests larger than the biggest size class are served by a run of
//! contiguous top-class blocks. The blocks are taken off the top free list
//! and chained, in offset order, into a [`SpanAllocation`] record that lives
//! until the allocation is freed. The record also remembers where each block
//! sat in the free list, so freeing the span can put them back in place.

use super::node_pool::{NodeId, NodeOwner, NodePool};
use super::page_list::PageList;
use crate::error::HeapResult;

/// One logical allocation spanning several maximum-size blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanAllocation {
    base_offset: u64,
    block_size: u64,
    chain: PageList,
    /// Free-list predecessor of each block when it was unlinked, in chain order
    anchors: Vec<Option<NodeId>>,
}

impl SpanAllocation {
    pub fn new(base_offset: u64, block_size: u64) -> Self {
        SpanAllocation {
            base_offset,
            block_size,
            chain: PageList::new(NodeOwner::Span),
            anchors: Vec::new(),
        }
    }

    /// Append the next block of the run
    ///
    /// `anchor` is the node that preceded the block in the free list at the
    /// moment it was unlinked.
    pub fn push(&mut self, pool: &mut NodePool, id: NodeId, anchor: Option<NodeId>) {
        debug_assert_eq!(
            pool.get(id).offset,
            self.base_offset + self.chain.len() as u64 * self.block_size,
            "span blocks must be contiguous"
        );
        self.chain.push_back(pool, id);
        self.anchors.push(anchor);
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn block_count(&self) -> usize {
        self.chain.len()
    }

    pub fn size_bytes(&self) -> u64 {
        self.chain.len() as u64 * self.block_size
    }

    /// Nodes of the run, lowest offset first
    pub fn blocks<'a>(&self, pool: &'a NodePool) -> impl Iterator<Item = NodeId> + 'a {
        self.chain.iter(pool)
    }

    /// Detach every node with its recorded anchor, highest offset first
    ///
    /// Re-linking the nodes in the returned order, each behind its anchor,
    /// undoes the unlinks that built the span.
    pub fn drain(mut self, pool: &mut NodePool) -> HeapResult<Vec<(NodeId, Option<NodeId>)>> {
        let mut nodes = Vec::with_capacity(self.chain.len());
        let mut anchors = self.anchors.drain(..);
        while let Some(id) = self.chain.pop_front(pool)? {
            nodes.push((id, anchors.next().flatten()));
        }
        nodes.reverse();
        Ok(nodes)
    }
}

/// Number of `block_size` blocks needed to hold `size` bytes
pub fn blocks_needed(size: u64, block_size: u64) -> u64 {
    size / block_size + u64::from(size % block_size != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::size_class::SizeClass;

    #[test]
    fn test_blocks_needed() {
        assert_eq!(blocks_needed(1, 128), 1);
        assert_eq!(blocks_needed(128, 128), 1);
        assert_eq!(blocks_needed(129, 128), 2);
        assert_eq!(blocks_needed(1024, 128), 8);
        assert_eq!(blocks_needed(u64::MAX, 1 << 17), (u64::MAX >> 17) + 1);
    }

    #[test]
    fn test_span_chain() {
        let mut pool = NodePool::new(None);
        let top = SizeClass::new(9);
        let mut span = SpanAllocation::new(256, 128);

        let mut ids = Vec::new();
        for i in 0..3u64 {
            let id = pool.allocate_entry(top, 256 + i * 128).unwrap();
            let anchor = ids.last().copied();
            span.push(&mut pool, id, anchor);
            ids.push(id);
        }

        assert_eq!(span.base_offset(), 256);
        assert_eq!(span.block_count(), 3);
        assert_eq!(span.size_bytes(), 384);

        let offsets: Vec<u64> = span.blocks(&pool).map(|id| pool.get(id).offset).collect();
        assert_eq!(offsets, vec![256, 384, 512]);
        assert!(span
            .blocks(&pool)
            .all(|id| pool.get(id).owner == NodeOwner::Span));

        let drained = span.drain(&mut pool).unwrap();
        let offsets: Vec<u64> = drained.iter().map(|&(id, _)| pool.get(id).offset).collect();
        assert_eq!(offsets, vec![512, 384, 256]);
        let anchors: Vec<_> = drained.iter().map(|&(_, anchor)| anchor).collect();
        assert_eq!(anchors, vec![Some(ids[1]), Some(ids[0]), None]);
        assert!(drained
            .iter()
            .all(|&(id, _)| pool.get(id).owner == NodeOwner::Detached));
    }
}
