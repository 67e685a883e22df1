//! Bounded cache of decoded nodes with least-recently-used eviction.

use std::collections::{BTreeMap, HashMap};

use crate::storage::btree::node::{Node, NodeId};
use crate::storage::page::PageId;

struct Entry {
    node: Node,
    /// Pages backing the node, head first.
    pages: Vec<PageId>,
    last_access: u64,
}

/// Decoded nodes keyed by id, together with their page chains.
///
/// Recency is tracked with a monotonically increasing access counter; the
/// entry with the smallest counter is evicted first. A capacity of 0 turns
/// every operation into a no-op.
pub struct NodeCache {
    entries: HashMap<NodeId, Entry>,
    /// Access counter -> node id, ordered oldest first.
    recency: BTreeMap<u64, NodeId>,
    capacity: usize,
    access_counter: u64,
}

impl NodeCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity,
            access_counter: 0,
        }
    }

    /// Look up a node and mark it as recently used.
    pub fn get(&mut self, id: NodeId) -> Option<Node> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(&id)?;
        self.recency.remove(&entry.last_access);
        entry.last_access = tick;
        self.recency.insert(tick, id);
        Some(entry.node.clone())
    }

    /// Page chain of a cached node. Does not affect recency.
    pub fn chain(&self, id: NodeId) -> Option<Vec<PageId>> {
        self.entries.get(&id).map(|entry| entry.pages.clone())
    }

    /// Insert or refresh a node, evicting the least recently used one if full.
    pub fn insert(&mut self, node: Node, pages: Vec<PageId>) {
        if self.capacity == 0 {
            return;
        }

        let tick = self.next_tick();
        let id = node.id;
        if let Some(old) = self.entries.insert(
            id,
            Entry {
                node,
                pages,
                last_access: tick,
            },
        ) {
            self.recency.remove(&old.last_access);
        }
        self.recency.insert(tick, id);

        while self.entries.len() > self.capacity {
            let Some((_, evicted)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&evicted);
        }
    }

    /// Drop a node from the cache.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.recency.remove(&entry.last_access);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    const fn next_tick(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = NodeCache::new(2);
        cache.insert(Node::leaf(1, 4), vec![1]);
        cache.insert(Node::leaf(2, 4), vec![2]);

        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(cache.get(1).is_some());
        cache.insert(Node::leaf(3, 4), vec![3]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_insert_refreshes_existing() {
        let mut cache = NodeCache::new(2);
        let mut node = Node::leaf(1, 4);
        cache.insert(node.clone(), vec![1]);

        node.keys.push(b"k".to_vec());
        cache.insert(node.clone(), vec![1, 5]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1), Some(node));
        assert_eq!(cache.chain(1), Some(vec![1, 5]));
        assert_eq!(cache.chain(2), None);
    }

    #[test]
    fn test_remove_and_zero_capacity() {
        let mut cache = NodeCache::new(4);
        cache.insert(Node::leaf(1, 4), vec![1]);
        cache.remove(1);
        assert!(cache.is_empty());

        let mut disabled = NodeCache::new(0);
        disabled.insert(Node::leaf(1, 4), vec![1]);
        assert!(disabled.get(1).is_none());
    }
}
