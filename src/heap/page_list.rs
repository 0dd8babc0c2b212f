//! Doubly linked lists of pool nodes
//!
//! A list only stores its head, tail and length; the links live in the
//! [`PageEntry`](super::node_pool::PageEntry) records inside the
//! [`NodePool`]. Linking a node stamps it with the list's owner tag and
//! unlinking checks that tag, so a node can never sit in two lists.

use super::node_pool::{NodeId, NodeOwner, NodePool};
use crate::error::HeapResult;
use crate::invariant_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageList {
    owner: NodeOwner,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl PageList {
    pub fn new(owner: NodeOwner) -> Self {
        PageList {
            owner,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn owner(&self) -> NodeOwner {
        self.owner
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Link a detached node at the head
    pub fn push_front(&mut self, pool: &mut NodePool, id: NodeId) {
        let old_head = self.head;
        {
            let entry = pool.get_mut(id);
            debug_assert_eq!(entry.owner, NodeOwner::Detached, "node already owned");
            entry.owner = self.owner;
            entry.prev = None;
            entry.next = old_head;
        }

        match old_head {
            Some(h) => pool.get_mut(h).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Link a detached node at the tail
    pub fn push_back(&mut self, pool: &mut NodePool, id: NodeId) {
        let old_tail = self.tail;
        {
            let entry = pool.get_mut(id);
            debug_assert_eq!(entry.owner, NodeOwner::Detached, "node already owned");
            entry.owner = self.owner;
            entry.prev = old_tail;
            entry.next = None;
        }

        match old_tail {
            Some(t) => pool.get_mut(t).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Link a detached node directly behind `anchor`, a node of this list
    pub fn insert_after(&mut self, pool: &mut NodePool, anchor: NodeId, id: NodeId) -> HeapResult<()> {
        let anchor_entry = *pool.get(anchor);
        if anchor_entry.owner != self.owner {
            return Err(invariant_error!(
                "anchor at offset {} owned by {:?}, not {:?}",
                anchor_entry.offset,
                anchor_entry.owner,
                self.owner
            ));
        }

        {
            let entry = pool.get_mut(id);
            debug_assert_eq!(entry.owner, NodeOwner::Detached, "node already owned");
            entry.owner = self.owner;
            entry.prev = Some(anchor);
            entry.next = anchor_entry.next;
        }

        match anchor_entry.next {
            Some(n) => pool.get_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        pool.get_mut(anchor).next = Some(id);
        self.len += 1;
        Ok(())
    }

    /// Unlink the head node, leaving it detached
    pub fn pop_front(&mut self, pool: &mut NodePool) -> HeapResult<Option<NodeId>> {
        match self.head {
            Some(id) => {
                self.unlink(pool, id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Unlink `id` from this list, leaving it detached
    ///
    /// Fails without touching any link if the node belongs to another list.
    pub fn unlink(&mut self, pool: &mut NodePool, id: NodeId) -> HeapResult<()> {
        let entry = *pool.get(id);
        if entry.owner != self.owner {
            return Err(invariant_error!(
                "node at offset {} owned by {:?}, not {:?}",
                entry.offset,
                entry.owner,
                self.owner
            ));
        }

        match entry.prev {
            Some(p) => pool.get_mut(p).next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(n) => pool.get_mut(n).prev = entry.prev,
            None => self.tail = entry.prev,
        }

        let node = pool.get_mut(id);
        node.prev = None;
        node.next = None;
        node.owner = NodeOwner::Detached;
        self.len -= 1;
        Ok(())
    }

    /// Walk the list from head to tail
    pub fn iter<'a>(&self, pool: &'a NodePool) -> PageListIter<'a> {
        PageListIter {
            pool,
            cursor: self.head,
        }
    }
}

pub struct PageListIter<'a> {
    pool: &'a NodePool,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for PageListIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cursor?;
        self.cursor = self.pool.get(id).next;
        Some(id)
    }
}
