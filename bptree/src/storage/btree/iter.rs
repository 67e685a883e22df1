//! Ordered traversal over the leaf chain.

use std::iter::FusedIterator;

use crate::storage::btree::node::NodeId;
use crate::storage::btree::tree::{Tree, TreeError, corrupted, value_at};

/// Iterator over all entries in ascending key order.
///
/// Yields one leaf's entries at a time, then follows its `next` link. After an
/// error the iterator is exhausted.
pub struct Iter<'a> {
    tree: &'a mut Tree,
    next_leaf: Option<NodeId>,
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    /// Leaves left before the chain is considered cyclic.
    leaf_budget: usize,
    failed: bool,
}

impl Tree {
    /// Iterate over all entries in ascending key order.
    pub fn iter(&mut self) -> Iter<'_> {
        let next_leaf = self.metadata.map(|m| m.leftmost_id);
        let leaf_budget = usize::try_from(self.store.pager().page_count()).unwrap_or(usize::MAX);
        Iter {
            tree: self,
            next_leaf,
            entries: Vec::new().into_iter(),
            leaf_budget,
            failed: false,
        }
    }

    /// Call `f` with every entry in ascending key order.
    pub fn for_each(&mut self, mut f: impl FnMut(&[u8], &[u8])) -> Result<(), TreeError> {
        for entry in self.iter() {
            let (key, value) = entry?;
            f(&key, &value);
        }
        Ok(())
    }
}

impl Iter<'_> {
    fn load_leaf(&mut self, id: NodeId) -> Result<(), TreeError> {
        if self.leaf_budget == 0 {
            return Err(corrupted(id, "leaf chain does not terminate"));
        }
        self.leaf_budget -= 1;

        let leaf = self.tree.load(id)?;
        if !leaf.is_leaf {
            return Err(corrupted(id, "leaf chain links to an internal node"));
        }

        let mut entries = Vec::with_capacity(leaf.keys.len());
        for (index, key) in leaf.keys.iter().enumerate() {
            entries.push((key.clone(), value_at(&leaf, index)?.to_vec()));
        }
        self.entries = entries.into_iter();
        self.next_leaf = leaf.next;
        Ok(())
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed {
            if let Some(entry) = self.entries.next() {
                return Some(Ok(entry));
            }
            let leaf_id = self.next_leaf.take()?;
            if let Err(e) = self.load_leaf(leaf_id) {
                self.failed = true;
                return Some(Err(e));
            }
        }
        None
    }
}

impl FusedIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use crate::config::TreeConfig;
    use crate::storage::btree::Tree;
    use tempfile::tempdir;

    #[test]
    fn test_iter_empty_tree() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), TreeConfig::default()).expect("open");

        assert_eq!(tree.iter().count(), 0);
        let mut calls = 0;
        tree.for_each(|_, _| calls += 1).expect("for_each");
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_iter_crosses_leaves_in_order() {
        let dir = tempdir().expect("tempdir");
        let config = TreeConfig::default().with_order(3).expect("order");
        let mut tree = Tree::open(dir.path().join("tree.db"), config).expect("open");

        let words = ["pear", "apple", "fig", "kiwi", "banana", "cherry", "date", "lime"];
        for word in words {
            tree.put(word.as_bytes(), word.to_uppercase().as_bytes())
                .expect("put");
        }

        let mut seen = Vec::new();
        tree.for_each(|k, v| {
            assert_eq!(k.to_ascii_uppercase(), v);
            seen.push(String::from_utf8(k.to_vec()).expect("utf8"));
        })
        .expect("for_each");

        let mut expected: Vec<String> = words.iter().map(ToString::to_string).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
