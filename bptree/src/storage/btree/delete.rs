//! Deletion: leaf removal, underflow rebalancing and separator repair.
//!
//! A node underflows when it holds fewer than `min_key_num` keys. It first
//! borrows from its left sibling, then its right one, and only merges when
//! neither can spare a key. Merges shrink the parent, so the check repeats one
//! level up until a node is balanced or the root is reached.

use tracing::debug;

use crate::storage::btree::node::{Node, NodeId, Pointer};
use crate::storage::btree::tree::{MAX_DEPTH, Tree, TreeError, child, corrupted};

/// Siblings of a node under its parent.
struct Siblings {
    parent: Node,
    /// Position of the node among the parent's children.
    pos: usize,
    left: Option<Node>,
    right: Option<Node>,
}

impl Tree {
    /// Remove `key`. Returns its value if it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(metadata) = self.metadata else {
            return Ok(None);
        };

        let mut leaf = self.find_leaf(key)?;
        let Ok(pos) = leaf.key_position(key) else {
            return Ok(None);
        };
        if pos >= leaf.pointers.len() {
            return Err(corrupted(leaf.id, "leaf has fewer values than keys"));
        }
        leaf.keys.remove(pos);
        let Pointer::Value(old) = leaf.pointers.remove(pos) else {
            return Err(corrupted(leaf.id, "leaf holds a child pointer"));
        };

        if leaf.id == metadata.root_id {
            if leaf.keys.is_empty() {
                self.store.delete_node(leaf.id)?;
                self.store.delete_metadata()?;
                self.metadata = None;
                debug!(root_id = leaf.id, "Tree is empty");
                return Ok(Some(old));
            }
            self.store.update_node(leaf.id, &leaf)?;
        } else {
            self.store.update_node(leaf.id, &leaf)?;
            if leaf.keys.len() < self.min_key_num {
                self.rebalance_leaf(leaf)?;
            }
            self.repair_separator(key)?;
        }

        let mut metadata = self.current_metadata()?;
        metadata.size = metadata.size.saturating_sub(1);
        self.save_metadata(metadata)?;
        Ok(Some(old))
    }

    fn siblings(&mut self, node: &Node) -> Result<Siblings, TreeError> {
        let parent = self.load(node.parent_id)?;
        let pos = parent
            .child_position(node.id)
            .ok_or_else(|| corrupted(parent.id, "parent does not point to its child"))?;

        let left = match pos.checked_sub(1) {
            Some(left_pos) => Some(self.load(child(&parent, left_pos)?)?),
            None => None,
        };
        let right = match parent.child_at(pos + 1) {
            Some(right_id) => Some(self.load(right_id)?),
            None => None,
        };

        Ok(Siblings {
            parent,
            pos,
            left,
            right,
        })
    }

    fn rebalance_leaf(&mut self, mut node: Node) -> Result<(), TreeError> {
        let Siblings {
            mut parent,
            pos,
            mut left,
            mut right,
        } = self.siblings(&node)?;

        if let Some(left) = left.as_mut()
            && left.keys.len() > self.min_key_num
        {
            let (Some(key), Some(value)) = (left.keys.pop(), left.pointers.pop()) else {
                return Err(corrupted(left.id, "sibling has no entry to lend"));
            };
            parent.keys[pos - 1].clone_from(&key);
            node.keys.insert(0, key);
            node.pointers.insert(0, value);

            self.store.update_node(left.id, left)?;
            self.store.update_node(node.id, &node)?;
            self.store.update_node(parent.id, &parent)?;
            debug!(node = node.id, from = left.id, "Borrowed from left leaf");
            return Ok(());
        }

        if let Some(right) = right.as_mut()
            && right.keys.len() > self.min_key_num
        {
            node.keys.push(right.keys.remove(0));
            node.pointers.push(right.pointers.remove(0));
            parent.keys[pos].clone_from(&right.keys[0]);

            self.store.update_node(right.id, right)?;
            self.store.update_node(node.id, &node)?;
            self.store.update_node(parent.id, &parent)?;
            debug!(node = node.id, from = right.id, "Borrowed from right leaf");
            return Ok(());
        }

        if let Some(mut left) = left {
            left.keys.append(&mut node.keys);
            left.pointers.append(&mut node.pointers);
            left.next = node.next;
            parent.keys.remove(pos - 1);
            parent.pointers.remove(pos);

            self.store.update_node(left.id, &left)?;
            self.store.delete_node(node.id)?;
            debug!(into = left.id, merged = node.id, "Merged leaf into left sibling");
        } else if let Some(mut right) = right {
            node.keys.append(&mut right.keys);
            node.pointers.append(&mut right.pointers);
            node.next = right.next;
            parent.keys.remove(pos);
            parent.pointers.remove(pos + 1);

            self.store.update_node(node.id, &node)?;
            self.store.delete_node(right.id)?;
            debug!(into = node.id, merged = right.id, "Merged right sibling into leaf");
        } else {
            return Err(corrupted(node.id, "non-root leaf has no siblings"));
        }

        self.store.update_node(parent.id, &parent)?;
        self.rebalance_internal(parent)
    }

    /// Restore balance from an internal node upward after a merge below it.
    fn rebalance_internal(&mut self, mut node: Node) -> Result<(), TreeError> {
        for _ in 0..MAX_DEPTH {
            let metadata = self.current_metadata()?;
            if node.id == metadata.root_id {
                if node.keys.is_empty() {
                    self.collapse_root(&node)?;
                }
                return Ok(());
            }
            if node.keys.len() >= self.min_key_num {
                return Ok(());
            }

            let Siblings {
                mut parent,
                pos,
                mut left,
                mut right,
            } = self.siblings(&node)?;

            if let Some(left) = left.as_mut()
                && left.keys.len() > self.min_key_num
            {
                let (Some(up), Some(moved)) = (left.keys.pop(), left.pointers.pop()) else {
                    return Err(corrupted(left.id, "sibling has no entry to lend"));
                };
                let down = std::mem::replace(&mut parent.keys[pos - 1], up);
                let moved_id = pointer_id(left.id, &moved)?;
                node.keys.insert(0, down);
                node.pointers.insert(0, moved);

                self.store.update_node(left.id, left)?;
                self.store.update_node(node.id, &node)?;
                self.store.update_node(parent.id, &parent)?;
                self.reparent(&[moved_id], node.id)?;
                debug!(node = node.id, from = left.id, "Borrowed from left internal node");
                return Ok(());
            }

            if let Some(right) = right.as_mut()
                && right.keys.len() > self.min_key_num
            {
                let up = right.keys.remove(0);
                let moved = right.pointers.remove(0);
                let down = std::mem::replace(&mut parent.keys[pos], up);
                let moved_id = pointer_id(right.id, &moved)?;
                node.keys.push(down);
                node.pointers.push(moved);

                self.store.update_node(right.id, right)?;
                self.store.update_node(node.id, &node)?;
                self.store.update_node(parent.id, &parent)?;
                self.reparent(&[moved_id], node.id)?;
                debug!(node = node.id, from = right.id, "Borrowed from right internal node");
                return Ok(());
            }

            if let Some(mut left) = left {
                let moved: Vec<NodeId> = node.child_ids().collect();
                left.keys.push(parent.keys.remove(pos - 1));
                left.keys.append(&mut node.keys);
                left.pointers.append(&mut node.pointers);
                parent.pointers.remove(pos);

                self.store.update_node(left.id, &left)?;
                self.reparent(&moved, left.id)?;
                self.store.delete_node(node.id)?;
                debug!(into = left.id, merged = node.id, "Merged internal node into left sibling");
            } else if let Some(mut right) = right {
                let moved: Vec<NodeId> = right.child_ids().collect();
                node.keys.push(parent.keys.remove(pos));
                node.keys.append(&mut right.keys);
                node.pointers.append(&mut right.pointers);
                parent.pointers.remove(pos + 1);

                self.store.update_node(node.id, &node)?;
                self.reparent(&moved, node.id)?;
                self.store.delete_node(right.id)?;
                debug!(
                    into = node.id,
                    merged = right.id,
                    "Merged right sibling into internal node"
                );
            } else {
                return Err(corrupted(node.id, "non-root node has no siblings"));
            }

            self.store.update_node(parent.id, &parent)?;
            node = parent;
        }

        Err(TreeError::Corrupted(format!(
            "rebalance propagated past {MAX_DEPTH} levels"
        )))
    }

    /// Replace a keyless internal root by its only child.
    fn collapse_root(&mut self, root: &Node) -> Result<(), TreeError> {
        let child_id = child(root, 0)?;
        let mut new_root = self.load(child_id)?;
        new_root.parent_id = 0;
        self.store.update_node(child_id, &new_root)?;
        self.store.delete_node(root.id)?;

        let mut metadata = self.current_metadata()?;
        metadata.root_id = child_id;
        self.save_metadata(metadata)?;
        debug!(old_root = root.id, new_root = child_id, "Collapsed root");
        Ok(())
    }

    /// Replace the first internal key equal to a deleted `key` with the
    /// smallest key of its right subtree.
    ///
    /// Internal keys are unique, so the descent stops at the first match.
    fn repair_separator(&mut self, key: &[u8]) -> Result<(), TreeError> {
        let Some(metadata) = self.metadata else {
            return Ok(());
        };
        let mut node = self.load(metadata.root_id)?;

        for _ in 0..MAX_DEPTH {
            if node.is_leaf {
                return Ok(());
            }
            if let Ok(pos) = node.key_position(key) {
                let replacement = self.leftmost_key(child(&node, pos + 1)?)?;
                node.keys[pos] = replacement;
                self.store.update_node(node.id, &node)?;
                debug!(node = node.id, "Repaired separator");
                return Ok(());
            }
            node = self.load(child(&node, node.child_index(key))?)?;
        }

        Err(TreeError::Corrupted(format!(
            "no leaf within {MAX_DEPTH} levels"
        )))
    }

    /// Smallest key in the subtree rooted at `id`.
    fn leftmost_key(&mut self, id: NodeId) -> Result<Vec<u8>, TreeError> {
        let mut node = self.load(id)?;
        for _ in 0..MAX_DEPTH {
            if node.is_leaf {
                return node
                    .keys
                    .first()
                    .cloned()
                    .ok_or_else(|| corrupted(node.id, "empty leaf"));
            }
            node = self.load(child(&node, 0)?)?;
        }

        Err(TreeError::Corrupted(format!(
            "no leaf within {MAX_DEPTH} levels"
        )))
    }
}

fn pointer_id(owner: NodeId, pointer: &Pointer) -> Result<NodeId, TreeError> {
    pointer
        .as_node_id()
        .ok_or_else(|| corrupted(owner, "internal node holds a value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir, order: u16) -> Tree {
        let config = TreeConfig::default()
            .with_order(order)
            .expect("order")
            .with_page_size(256)
            .expect("page size");
        Tree::open(dir.path().join("tree.db"), config).expect("open")
    }

    fn key(i: u32) -> [u8; 4] {
        i.to_be_bytes()
    }

    #[test]
    fn test_delete_missing_key() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 4);

        assert_eq!(tree.delete(b"nothing").expect("delete"), None);
        tree.put(b"a", b"1").expect("put");
        assert_eq!(tree.delete(b"b").expect("delete"), None);
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_delete_last_key_empties_tree() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 4);

        tree.put(b"a", b"1").expect("put");
        assert_eq!(tree.delete(b"a").expect("delete"), Some(b"1".to_vec()));
        assert!(tree.is_empty());
        assert_eq!(tree.get(b"a").expect("get"), None);

        // The tree is usable again after becoming empty.
        tree.put(b"b", b"2").expect("put");
        assert_eq!(tree.get(b"b").expect("get"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_delete_after_order_4_inserts() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 4);
        for k in [10u32, 20, 5, 6, 12, 30, 7, 17] {
            tree.put(&key(k), &key(k)).expect("put");
        }

        assert_eq!(tree.delete(&key(6)).expect("delete"), Some(key(6).to_vec()));
        assert_eq!(tree.delete(&key(12)).expect("delete"), Some(key(12).to_vec()));

        assert_eq!(tree.get(&key(6)).expect("get"), None);
        assert_eq!(tree.get(&key(12)).expect("get"), None);
        assert_eq!(tree.get(&key(10)).expect("get"), Some(key(10).to_vec()));
        assert_eq!(tree.size(), 6);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_drain_in_both_directions_frees_nodes() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 3);

        for i in 0..300 {
            tree.put(&key(i), b"v").expect("put");
        }
        let grown = tree.stats().expect("stats");

        for i in 0..150 {
            tree.delete(&key(i)).expect("delete");
        }
        tree.check_invariants().expect("invariants after front deletes");
        for i in (150..300).rev() {
            tree.delete(&key(i)).expect("delete");
            if i % 25 == 0 {
                tree.check_invariants().expect("invariants");
            }
        }

        assert!(tree.is_empty());
        let drained = tree.stats().expect("stats");
        assert!(drained.free_pages > grown.free_pages);

        assert!(tree.compact().expect("compact") > 0);
        assert_eq!(tree.stats().expect("stats").page_count, 1);
    }

    #[test]
    fn test_separator_repaired_after_delete() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 5);
        for i in 0..40 {
            tree.put(&key(i * 2), b"v").expect("put");
        }

        // Ascending deletes always remove the smallest key, which is the
        // separator of every subtree it starts.
        for i in 0..40 {
            tree.delete(&key(i * 2)).expect("delete");
            tree.check_invariants().expect("invariants");
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_dangling_child_pointer_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let mut tree = open(&dir, 4);
        for i in 0..20 {
            tree.put(&key(i), b"v").expect("put");
        }

        // Free the rightmost leaf while its parent still points at it.
        let mut id = tree.metadata.as_ref().expect("metadata").root_id;
        let mut node = tree.load(id).expect("load root");
        assert!(!node.is_leaf);
        while !node.is_leaf {
            id = node.child_ids().last().expect("child");
            node = tree.load(id).expect("load child");
        }
        tree.store.delete_node(id).expect("free leaf");

        assert!(tree.get(&key(19)).is_err());
        assert!(tree.put(&key(20), b"v").is_err());
        assert!(tree.delete(&key(19)).is_err());
        assert!(tree.iter().collect::<Result<Vec<_>, _>>().is_err());
    }
}
