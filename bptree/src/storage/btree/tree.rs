//! B+Tree engine: lookup, insertion and tree-level bookkeeping.
//!
//! Deletion lives in `delete.rs`, ordered traversal in `iter.rs` and the
//! structural checker in `check.rs`.
//!
//! # Invariants
//!
//! - every non-root node holds between `min_key_num` and `order - 1` keys
//! - internal nodes hold exactly `keys.len() + 1` children
//! - all leaves sit at the same depth and form an ascending linked list
//!   starting at `leftmost_id`
//! - `metadata` is `None` exactly when the tree is empty

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{ConfigError, TreeConfig};
use crate::storage::btree::node::{Node, NodeId, Pointer};
use crate::storage::btree::store::{NodeStore, StoreError, TreeMetadata};
use crate::storage::pager::{Pager, PagerError};

/// Largest key accepted by `put`.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;
/// Largest value accepted by `put`.
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;
/// Largest number of entries a tree can hold.
pub const MAX_TREE_SIZE: u32 = u32::MAX;

/// Upper bound on tree height; deeper descents indicate a cycle.
pub const MAX_DEPTH: usize = 64;

/// A persistent B+Tree over byte keys and values.
///
/// All operations take `&mut self`: a tree has a single writer, and reads go
/// through the same handle because loading nodes updates the node cache.
pub struct Tree {
    pub(crate) store: NodeStore,
    pub(crate) order: u16,
    /// Minimum number of keys in a non-root node, `ceil(order / 2) - 1`.
    pub(crate) min_key_num: usize,
    pub(crate) metadata: Option<TreeMetadata>,
}

/// Summary of a tree and its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub size: u32,
    pub order: u16,
    pub height: usize,
    pub page_size: u16,
    pub page_count: u32,
    pub free_pages: usize,
}

impl Tree {
    /// Open the tree stored at `path`, creating an empty one if needed.
    ///
    /// An existing non-empty tree must have been created with the same order
    /// and page size.
    pub fn open(path: impl AsRef<Path>, config: TreeConfig) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let pager = Pager::open(path, config.page_size()).map_err(|e| match e {
            PagerError::PageSizeMismatch { stored, requested } => {
                warn!(path = %path.display(), stored, requested, "Page size mismatch");
                TreeError::Config(ConfigError::PageSizeMismatch { stored, requested })
            }
            other => TreeError::Store(StoreError::Pager(other)),
        })?;

        let store = NodeStore::new(pager, config.cache_capacity());
        let metadata = store.load_metadata()?;
        if let Some(metadata) = metadata
            && metadata.order != config.order()
        {
            warn!(
                path = %path.display(),
                stored = metadata.order,
                requested = config.order(),
                "Order mismatch"
            );
            return Err(TreeError::Config(ConfigError::OrderMismatch {
                stored: metadata.order,
                requested: config.order(),
            }));
        }

        info!(
            path = %path.display(),
            order = config.order(),
            size = metadata.map_or(0, |m| m.size),
            "Opened tree"
        );

        Ok(Self {
            store,
            order: config.order(),
            min_key_num: usize::from(config.order()).div_ceil(2) - 1,
            metadata,
        })
    }

    /// Look up the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        if self.metadata.is_none() {
            return Ok(None);
        }

        let leaf = self.find_leaf(key)?;
        leaf.key_position(key)
            .ok()
            .map(|pos| value_at(&leaf, pos).map(<[u8]>::to_vec))
            .transpose()
    }

    /// Insert or overwrite `key`. Returns the previous value, if any.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, TreeError> {
        if key.len() > MAX_KEY_SIZE {
            return Err(TreeError::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(TreeError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        let Some(metadata) = self.metadata else {
            self.initialize_root(key, value)?;
            return Ok(None);
        };
        if metadata.size == MAX_TREE_SIZE {
            return Err(TreeError::TreeFull);
        }

        let mut leaf = self.find_leaf(key)?;
        match leaf.key_position(key) {
            Ok(pos) => {
                let slot = leaf
                    .pointers
                    .get_mut(pos)
                    .ok_or_else(|| corrupted(leaf.id, "leaf has fewer values than keys"))?;
                let old = std::mem::replace(slot, Pointer::Value(value.to_vec()));
                let Pointer::Value(old) = old else {
                    return Err(corrupted(leaf.id, "leaf holds a child pointer"));
                };
                self.store.update_node(leaf.id, &leaf)?;
                Ok(Some(old))
            }
            Err(pos) => {
                if leaf.is_full() {
                    self.split_leaf(leaf, pos, key, value)?;
                } else {
                    leaf.keys.insert(pos, key.to_vec());
                    leaf.pointers.insert(pos, Pointer::Value(value.to_vec()));
                    self.store.update_node(leaf.id, &leaf)?;
                }

                let mut metadata = self.current_metadata()?;
                metadata.size += 1;
                self.save_metadata(metadata)?;
                Ok(None)
            }
        }
    }

    /// Number of key-value pairs.
    #[must_use]
    pub fn size(&self) -> usize {
        self.metadata.map_or(0, |m| m.size as usize)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.metadata.is_none()
    }

    #[must_use]
    pub const fn order(&self) -> u16 {
        self.order
    }

    /// Sync all pending writes to disk.
    pub fn flush(&mut self) -> Result<(), TreeError> {
        Ok(self.store.flush()?)
    }

    /// Return trailing free pages to the filesystem.
    ///
    /// Returns the number of pages reclaimed.
    pub fn compact(&mut self) -> Result<usize, TreeError> {
        Ok(self.store.compact()?)
    }

    /// Flush and release the tree file.
    pub fn close(self) -> Result<(), TreeError> {
        let size = self.size();
        self.store.close()?;
        info!(size, "Closed tree");
        Ok(())
    }

    /// Collect size and file statistics.
    pub fn stats(&mut self) -> Result<TreeStats, TreeError> {
        let height = match self.metadata {
            Some(metadata) => self.height_from(metadata.root_id)?,
            None => 0,
        };
        let pager = self.store.pager();

        Ok(TreeStats {
            size: self.metadata.map_or(0, |m| m.size),
            order: self.order,
            height,
            page_size: pager.page_size(),
            page_count: pager.page_count(),
            free_pages: pager.free_page_count(),
        })
    }

    /// Load a node and verify its pointer count matches its kind.
    pub(crate) fn load(&mut self, id: NodeId) -> Result<Node, TreeError> {
        let node = self.store.load_node(id)?;
        let expected = if node.is_leaf {
            node.keys.len()
        } else {
            node.keys.len() + 1
        };
        if node.pointers.len() != expected {
            return Err(corrupted(
                id,
                &format!(
                    "{} pointers for {} keys",
                    node.pointers.len(),
                    node.keys.len()
                ),
            ));
        }
        Ok(node)
    }

    pub(crate) fn current_metadata(&self) -> Result<TreeMetadata, TreeError> {
        self.metadata
            .ok_or_else(|| TreeError::Corrupted("tree metadata is missing".to_string()))
    }

    pub(crate) fn save_metadata(&mut self, metadata: TreeMetadata) -> Result<(), TreeError> {
        self.store.update_metadata(&metadata)?;
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Descend from the root to the leaf whose range covers `key`.
    pub(crate) fn find_leaf(&mut self, key: &[u8]) -> Result<Node, TreeError> {
        let root_id = self.current_metadata()?.root_id;
        let mut node = self.load(root_id)?;

        for _ in 0..MAX_DEPTH {
            if node.is_leaf {
                return Ok(node);
            }
            let child_id = child(&node, node.child_index(key))?;
            node = self.load(child_id)?;
        }

        Err(TreeError::Corrupted(format!(
            "no leaf within {MAX_DEPTH} levels"
        )))
    }

    /// Number of levels below and including `id`.
    fn height_from(&mut self, id: NodeId) -> Result<usize, TreeError> {
        let mut node = self.load(id)?;
        let mut height = 1;
        while !node.is_leaf {
            if height >= MAX_DEPTH {
                return Err(TreeError::Corrupted(format!(
                    "no leaf within {MAX_DEPTH} levels"
                )));
            }
            node = self.load(child(&node, 0)?)?;
            height += 1;
        }
        Ok(height)
    }

    fn initialize_root(&mut self, key: &[u8], value: &[u8]) -> Result<(), TreeError> {
        let id = self.store.new_node()?;
        let mut root = Node::leaf(id, self.order);
        root.keys.push(key.to_vec());
        root.pointers.push(Pointer::Value(value.to_vec()));
        self.store.update_node(id, &root)?;

        self.save_metadata(TreeMetadata {
            order: self.order,
            root_id: id,
            leftmost_id: id,
            size: 1,
        })?;
        debug!(root_id = id, "Initialized root");
        Ok(())
    }

    /// Split a full leaf while inserting `key` at `pos`.
    ///
    /// `left` keeps its id; the upper half moves to a new leaf linked right
    /// after it.
    fn split_leaf(
        &mut self,
        mut left: Node,
        pos: usize,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), TreeError> {
        let right_id = self.store.new_node()?;
        let mut right = Node::leaf(right_id, self.order);
        right.parent_id = left.parent_id;

        let middle = usize::from(left.key_slots()).div_ceil(2);
        let boundary = if pos < middle { middle - 1 } else { middle };

        right.keys = left.keys.split_off(boundary);
        right.pointers = left.pointers.split_off(boundary);
        right.next = left.next.take();
        left.next = Some(right_id);

        let (target, at) = if pos < middle {
            (&mut left, pos)
        } else {
            (&mut right, pos - boundary)
        };
        target.keys.insert(at, key.to_vec());
        target.pointers.insert(at, Pointer::Value(value.to_vec()));

        let separator = right
            .keys
            .first()
            .cloned()
            .ok_or_else(|| corrupted(right_id, "split produced an empty leaf"))?;

        self.store.update_node(right_id, &right)?;
        self.store.update_node(left.id, &left)?;
        debug!(
            left = left.id,
            right = right_id,
            left_keys = left.keys.len(),
            right_keys = right.keys.len(),
            "Split leaf"
        );

        self.insert_into_parent(left, separator, right)
    }

    /// Insert `separator` between `left` and its new sibling `right`,
    /// splitting ancestors as needed.
    fn insert_into_parent(
        &mut self,
        mut left: Node,
        mut separator: Vec<u8>,
        mut right: Node,
    ) -> Result<(), TreeError> {
        for _ in 0..MAX_DEPTH {
            if left.parent_id == 0 {
                return self.new_root(left, separator, right);
            }

            let mut parent = self.load(left.parent_id)?;
            let pos = parent
                .child_position(left.id)
                .ok_or_else(|| corrupted(parent.id, "parent does not point to its child"))?;

            if !parent.is_full() {
                parent.keys.insert(pos, separator);
                parent.pointers.insert(pos + 1, Pointer::Node(right.id));
                self.store.update_node(parent.id, &parent)?;
                if right.parent_id != parent.id {
                    right.parent_id = parent.id;
                    self.store.update_node(right.id, &right)?;
                }
                return Ok(());
            }

            (separator, left, right) = self.split_internal(parent, pos, separator, right.id)?;
        }

        Err(TreeError::Corrupted(format!(
            "split propagated past {MAX_DEPTH} levels"
        )))
    }

    /// Split a full internal node while inserting `key` and `right_child`
    /// after the child at `pos`.
    ///
    /// Returns the promoted key with the left and right halves.
    fn split_internal(
        &mut self,
        mut left: Node,
        pos: usize,
        key: Vec<u8>,
        right_child: NodeId,
    ) -> Result<(Vec<u8>, Node, Node), TreeError> {
        let right_id = self.store.new_node()?;
        let mut right = Node::internal(right_id, self.order);
        right.parent_id = left.parent_id;

        let middle = usize::from(left.key_slots()).div_ceil(2);
        let boundary = if pos < middle { middle - 1 } else { middle };

        // The child at `boundary` is shared until the promoted key is removed.
        right.keys = left.keys.split_off(boundary);
        right.pointers = left.pointers.split_off(boundary);
        if let Some(shared) = right.pointers.first() {
            left.pointers.push(shared.clone());
        }

        let (target, at) = if pos < middle {
            (&mut left, pos)
        } else {
            (&mut right, pos - boundary)
        };
        target.keys.insert(at, key);
        target.pointers.insert(at + 1, Pointer::Node(right_child));

        if right.keys.is_empty() {
            return Err(corrupted(left.id, "split produced an empty internal node"));
        }
        let promoted = right.keys.remove(0);
        right.pointers.remove(0);

        self.store.update_node(left.id, &left)?;
        self.store.update_node(right_id, &right)?;
        self.adopt_children(&left)?;
        self.adopt_children(&right)?;
        debug!(
            left = left.id,
            right = right_id,
            left_keys = left.keys.len(),
            right_keys = right.keys.len(),
            "Split internal node"
        );

        // Children were rewritten; reload so callers see current parent links.
        let left = self.load(left.id)?;
        let right = self.load(right_id)?;
        Ok((promoted, left, right))
    }

    fn new_root(
        &mut self,
        mut left: Node,
        separator: Vec<u8>,
        mut right: Node,
    ) -> Result<(), TreeError> {
        let root_id = self.store.new_node()?;
        let mut root = Node::internal(root_id, self.order);
        root.keys.push(separator);
        root.pointers = vec![Pointer::Node(left.id), Pointer::Node(right.id)];
        self.store.update_node(root_id, &root)?;

        left.parent_id = root_id;
        self.store.update_node(left.id, &left)?;
        right.parent_id = root_id;
        self.store.update_node(right.id, &right)?;

        let mut metadata = self.current_metadata()?;
        metadata.root_id = root_id;
        self.save_metadata(metadata)?;
        debug!(root_id, "Grew new root");
        Ok(())
    }

    /// Point every child of `parent` back at it.
    pub(crate) fn adopt_children(&mut self, parent: &Node) -> Result<(), TreeError> {
        let children: Vec<NodeId> = parent.child_ids().collect();
        self.reparent(&children, parent.id)
    }

    pub(crate) fn reparent(
        &mut self,
        children: &[NodeId],
        parent_id: NodeId,
    ) -> Result<(), TreeError> {
        for &child_id in children {
            let mut child = self.load(child_id)?;
            if child.parent_id != parent_id {
                child.parent_id = parent_id;
                self.store.update_node(child_id, &child)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("order", &self.order)
            .field("metadata", &self.metadata)
            .field("pager", self.store.pager())
            .finish_non_exhaustive()
    }
}

/// Child id at `index` of an internal node.
pub fn child(node: &Node, index: usize) -> Result<NodeId, TreeError> {
    node.child_at(index)
        .ok_or_else(|| corrupted(node.id, &format!("no child pointer at {index}")))
}

/// Value at `index` of a leaf.
pub fn value_at(node: &Node, index: usize) -> Result<&[u8], TreeError> {
    node.pointers
        .get(index)
        .and_then(Pointer::as_value)
        .ok_or_else(|| corrupted(node.id, &format!("no value at {index}")))
}

pub fn corrupted(node_id: NodeId, message: &str) -> TreeError {
    TreeError::Corrupted(format!("node {node_id}: {message}"))
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Configuration rejected or incompatible with the file.
    Config(ConfigError),
    /// Key longer than `MAX_KEY_SIZE`.
    KeyTooLarge { len: usize, max: usize },
    /// Value longer than `MAX_VALUE_SIZE`.
    ValueTooLarge { len: usize, max: usize },
    /// The tree already holds `MAX_TREE_SIZE` entries.
    TreeFull,
    /// Node store error.
    Store(StoreError),
    /// The tree structure is inconsistent.
    Corrupted(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::KeyTooLarge { len, max } => {
                write!(f, "key too large: {len} bytes (max {max})")
            }
            Self::ValueTooLarge { len, max } => {
                write!(f, "value too large: {len} bytes (max {max})")
            }
            Self::TreeFull => write!(f, "tree is full ({MAX_TREE_SIZE} entries)"),
            Self::Store(e) => write!(f, "storage error: {e}"),
            Self::Corrupted(msg) => write!(f, "corrupted tree: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::KeyTooLarge { .. }
            | Self::ValueTooLarge { .. }
            | Self::TreeFull
            | Self::Corrupted(_) => None,
        }
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<PagerError> for TreeError {
    fn from(e: PagerError) -> Self {
        Self::Store(StoreError::Pager(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(order: u16) -> TreeConfig {
        TreeConfig::default()
            .with_order(order)
            .expect("order")
            .with_page_size(256)
            .expect("page size")
    }

    fn collect(tree: &mut Tree) -> Vec<(Vec<u8>, Vec<u8>)> {
        tree.iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("iterate")
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), config(4)).expect("open");

        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.get(b"missing").expect("get"), None);
        assert_eq!(tree.stats().expect("stats").height, 0);
    }

    #[test]
    fn test_insert_order_4_iterates_sorted() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), config(4)).expect("open");

        for k in [10u32, 20, 5, 6, 12, 30, 7, 17] {
            tree.put(&k.to_be_bytes(), format!("v{k}").as_bytes())
                .expect("put");
        }

        let keys: Vec<u32> = collect(&mut tree)
            .into_iter()
            .map(|(k, _)| u32::from_be_bytes([k[0], k[1], k[2], k[3]]))
            .collect();
        assert_eq!(keys, vec![5, 6, 7, 10, 12, 17, 20, 30]);
        assert_eq!(tree.size(), 8);
        assert_eq!(tree.get(&17u32.to_be_bytes()).expect("get"), Some(b"v17".to_vec()));
        tree.check_invariants().expect("invariants");
        assert!(tree.stats().expect("stats").height >= 2);
    }

    #[test]
    fn test_overwrite_returns_previous_value() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), config(4)).expect("open");

        assert_eq!(tree.put(b"k", b"a").expect("put"), None);
        assert_eq!(tree.put(b"k", b"b").expect("put"), Some(b"a".to_vec()));
        assert_eq!(tree.get(b"k").expect("get"), Some(b"b".to_vec()));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_size_limits() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), config(4)).expect("open");

        let long = vec![0u8; MAX_KEY_SIZE + 1];
        assert!(matches!(
            tree.put(&long, b"v"),
            Err(TreeError::KeyTooLarge { .. })
        ));
        assert!(matches!(
            tree.put(b"k", &long),
            Err(TreeError::ValueTooLarge { .. })
        ));
        assert!(tree.is_empty(), "rejected puts must not mutate the tree");

        let max = vec![1u8; MAX_KEY_SIZE];
        tree.put(&max, &max).expect("put max sized entry");
        assert_eq!(tree.get(&max).expect("get"), Some(max));
    }

    #[test]
    fn test_ascending_and_descending_inserts_stay_balanced() {
        let dir = tempdir().expect("tempdir");
        let mut tree = Tree::open(dir.path().join("tree.db"), config(3)).expect("open");

        for i in 0..200u32 {
            tree.put(&i.to_be_bytes(), &i.to_le_bytes()).expect("put");
        }
        for i in (1000..1200u32).rev() {
            tree.put(&i.to_be_bytes(), &i.to_le_bytes()).expect("put");
        }

        tree.check_invariants().expect("invariants");
        assert_eq!(tree.size(), 400);
        for i in (0..200u32).chain(1000..1200) {
            assert_eq!(
                tree.get(&i.to_be_bytes()).expect("get"),
                Some(i.to_le_bytes().to_vec())
            );
        }
    }

    #[test]
    fn test_order_mismatch_on_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tree.db");

        let mut tree = Tree::open(&path, config(4)).expect("open");
        tree.put(b"k", b"v").expect("put");
        tree.close().expect("close");

        assert!(matches!(
            Tree::open(&path, config(5)),
            Err(TreeError::Config(ConfigError::OrderMismatch {
                stored: 4,
                requested: 5
            }))
        ));

        let other_page_size = config(4).with_page_size(512).expect("page size");
        assert!(matches!(
            Tree::open(&path, other_page_size),
            Err(TreeError::Config(ConfigError::PageSizeMismatch { .. }))
        ));
    }
}
