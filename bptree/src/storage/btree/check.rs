//! Structural verification of a whole tree.

use crate::storage::btree::node::{NodeId, Pointer};
use crate::storage::btree::tree::{MAX_DEPTH, Tree, TreeError, corrupted};

#[derive(Default)]
struct Walk {
    /// Leaves in key order.
    leaves: Vec<NodeId>,
    leaf_depth: Option<usize>,
    entries: u64,
}

impl Tree {
    /// Walk the entire tree and verify its structure.
    ///
    /// Checks key counts, key ordering and separator bounds, parent links,
    /// pointer kinds, uniform leaf depth, the leaf chain and the stored size.
    /// Returns `TreeError::Corrupted` describing the first violation.
    pub fn check_invariants(&mut self) -> Result<(), TreeError> {
        let Some(metadata) = self.metadata else {
            return Ok(());
        };

        let mut walk = Walk::default();
        self.check_node(metadata.root_id, 0, None, None, 0, &mut walk)?;

        let mut cursor = Some(metadata.leftmost_id);
        for &expected in &walk.leaves {
            let Some(id) = cursor else {
                return Err(TreeError::Corrupted(format!(
                    "leaf chain ends before leaf {expected}"
                )));
            };
            if id != expected {
                return Err(corrupted(
                    id,
                    &format!("leaf chain visits {id} where {expected} was expected"),
                ));
            }
            cursor = self.load(id)?.next;
        }
        if let Some(extra) = cursor {
            return Err(corrupted(extra, "leaf chain continues past the last leaf"));
        }

        if walk.entries != u64::from(metadata.size) {
            return Err(TreeError::Corrupted(format!(
                "tree holds {} entries but its size is {}",
                walk.entries, metadata.size
            )));
        }
        Ok(())
    }

    /// Verify the subtree at `id`, whose keys must lie in `[lower, upper)`.
    fn check_node(
        &mut self,
        id: NodeId,
        parent_id: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        walk: &mut Walk,
    ) -> Result<(), TreeError> {
        if depth >= MAX_DEPTH {
            return Err(corrupted(id, "tree is deeper than the depth limit"));
        }

        let node = self.load(id)?;
        if node.parent_id != parent_id {
            return Err(corrupted(
                id,
                &format!("parent is {} instead of {parent_id}", node.parent_id),
            ));
        }
        if node.key_slots() != self.order - 1 {
            return Err(corrupted(id, "key slots do not match the tree order"));
        }

        let min_keys = if parent_id == 0 { 1 } else { self.min_key_num };
        if node.keys.len() < min_keys || node.keys.len() > usize::from(node.key_slots()) {
            return Err(corrupted(
                id,
                &format!("{} keys outside [{min_keys}, {}]", node.keys.len(), node.key_slots()),
            ));
        }
        if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(corrupted(id, "keys are not strictly ascending"));
        }
        if let (Some(lower), Some(first)) = (lower, node.keys.first())
            && first.as_slice() < lower
        {
            return Err(corrupted(id, "key below its separator"));
        }
        if let (Some(upper), Some(last)) = (upper, node.keys.last())
            && last.as_slice() >= upper
        {
            return Err(corrupted(id, "key at or above the next separator"));
        }

        if node.is_leaf {
            if node.pointers.iter().any(|p| !matches!(p, Pointer::Value(_))) {
                return Err(corrupted(id, "leaf holds a child pointer"));
            }
            match walk.leaf_depth {
                Some(expected) if expected != depth => {
                    return Err(corrupted(
                        id,
                        &format!("leaf at depth {depth}, others at {expected}"),
                    ));
                }
                Some(_) => {}
                None => walk.leaf_depth = Some(depth),
            }
            walk.leaves.push(id);
            walk.entries += node.keys.len() as u64;
            return Ok(());
        }

        if node.next.is_some() {
            return Err(corrupted(id, "internal node has a next link"));
        }
        let children: Vec<NodeId> = node.child_ids().collect();
        if children.len() != node.pointers.len() {
            return Err(corrupted(id, "internal node holds a value"));
        }
        for (index, &child_id) in children.iter().enumerate() {
            let child_lower = match index.checked_sub(1) {
                Some(i) => Some(node.keys[i].as_slice()),
                None => lower,
            };
            let child_upper = node.keys.get(index).map_or(upper, |k| Some(k.as_slice()));
            self.check_node(child_id, id, child_lower, child_upper, depth + 1, walk)?;
        }
        Ok(())
    }
}
