//! Node persistence on top of the pager.
//!
//! A node is stored in a chain of pages. The node id is the id of the chain's
//! first page, so it stays valid while the chain grows or shrinks.
//!
//! Frame layout (big-endian):
//! - head page: `next` (4) · `chunk_len` (2) · `total_len` (4) · `crc32` (4) · chunk
//! - continuation page: `next` (4) · `chunk_len` (2) · chunk
//!
//! `crc32` covers the whole encoded node, not just the head chunk.

use std::collections::HashSet;

use tracing::debug;

use crate::storage::btree::cache::NodeCache;
use crate::storage::btree::node::{Node, NodeError, NodeId};
use crate::storage::page::Page;
use crate::storage::pager::{Pager, PagerError};

const HEAD_HEADER_SIZE: usize = 14;
const CONTINUATION_HEADER_SIZE: usize = 6;

/// Encoded size of `TreeMetadata`.
pub const TREE_METADATA_SIZE: usize = 14;

/// Tree-level metadata kept in the pager's custom metadata slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMetadata {
    pub order: u16,
    pub root_id: NodeId,
    /// First leaf in key order.
    pub leftmost_id: NodeId,
    /// Number of key-value pairs.
    pub size: u32,
}

impl TreeMetadata {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TREE_METADATA_SIZE] {
        let mut buf = [0u8; TREE_METADATA_SIZE];
        buf[0..2].copy_from_slice(&self.order.to_be_bytes());
        buf[2..6].copy_from_slice(&self.root_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.leftmost_id.to_be_bytes());
        buf[10..14].copy_from_slice(&self.size.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, StoreError> {
        if buf.len() != TREE_METADATA_SIZE {
            return Err(StoreError::CorruptedMetadata(format!(
                "tree metadata is {} bytes, expected {TREE_METADATA_SIZE}",
                buf.len()
            )));
        }
        Ok(Self {
            order: u16::from_be_bytes([buf[0], buf[1]]),
            root_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            leftmost_id: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            size: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
        })
    }
}

/// Loads and stores nodes by id.
pub struct NodeStore {
    pager: Pager,
    cache: NodeCache,
}

impl NodeStore {
    #[must_use]
    pub fn new(pager: Pager, cache_capacity: usize) -> Self {
        Self {
            pager,
            cache: NodeCache::new(cache_capacity),
        }
    }

    /// Reserve an id for a new node.
    ///
    /// Nothing is readable under the id until `update_node` writes it.
    pub fn new_node(&mut self) -> Result<NodeId, StoreError> {
        Ok(self.pager.allocate()?)
    }

    /// Load a node.
    pub fn load_node(&mut self, id: NodeId) -> Result<Node, StoreError> {
        if let Some(node) = self.cache.get(id) {
            return Ok(node);
        }

        let (data, pages) = self.read_chain_data(id)?;
        let node = Node::decode(&data).map_err(|source| StoreError::Decode {
            node_id: id,
            source,
        })?;
        if node.id != id {
            return Err(StoreError::IdMismatch {
                node_id: id,
                found: node.id,
            });
        }

        self.cache.insert(node.clone(), pages);
        Ok(node)
    }

    /// Write `node` under `id`, growing or shrinking its page chain as needed.
    pub fn update_node(&mut self, id: NodeId, node: &Node) -> Result<(), StoreError> {
        if node.id != id {
            return Err(StoreError::IdMismatch {
                node_id: id,
                found: node.id,
            });
        }

        let data = node.encode();
        let needed = self.pages_needed(data.len());
        let mut pages = self.known_chain(id)?;
        let grown = needed.saturating_sub(pages.len());
        while pages.len() < needed {
            pages.push(self.pager.allocate()?);
        }
        let surplus = pages.split_off(needed);

        self.write_frames(&pages, &data)?;
        for page_id in &surplus {
            self.pager.free(*page_id)?;
        }
        if grown > 0 || !surplus.is_empty() {
            debug!(
                node_id = id,
                pages = pages.len(),
                grown,
                shrunk = surplus.len(),
                "Resized node chain"
            );
        }

        self.cache.insert(node.clone(), pages);
        Ok(())
    }

    /// Free every page of a node.
    pub fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        let pages = self.known_chain(id)?;
        self.cache.remove(id);
        for page_id in pages {
            self.pager.free(page_id)?;
        }
        Ok(())
    }

    /// Tree metadata, or `None` for an empty tree.
    pub fn load_metadata(&self) -> Result<Option<TreeMetadata>, StoreError> {
        let blob = self.pager.read_custom_metadata();
        if blob.is_empty() {
            return Ok(None);
        }
        TreeMetadata::from_bytes(blob).map(Some)
    }

    pub fn update_metadata(&mut self, metadata: &TreeMetadata) -> Result<(), StoreError> {
        Ok(self.pager.write_custom_metadata(&metadata.to_bytes())?)
    }

    pub fn delete_metadata(&mut self) -> Result<(), StoreError> {
        Ok(self.pager.write_custom_metadata(&[])?)
    }

    /// Shrink the underlying file. Returns the number of pages reclaimed.
    pub fn compact(&mut self) -> Result<usize, StoreError> {
        Ok(self.pager.compact()?)
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        Ok(self.pager.flush()?)
    }

    pub fn close(self) -> Result<(), StoreError> {
        Ok(self.pager.close()?)
    }

    #[must_use]
    pub const fn pager(&self) -> &Pager {
        &self.pager
    }

    fn page_size(&self) -> usize {
        usize::from(self.pager.page_size())
    }

    fn pages_needed(&self, len: usize) -> usize {
        let head_capacity = self.page_size() - HEAD_HEADER_SIZE;
        if len <= head_capacity {
            return 1;
        }
        1 + (len - head_capacity).div_ceil(self.page_size() - CONTINUATION_HEADER_SIZE)
    }

    /// Page chain of `id`, from the cache when it is known there.
    fn known_chain(&mut self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        if let Some(pages) = self.cache.chain(id) {
            return Ok(pages);
        }
        self.chain_pages(id)
    }

    /// Page ids of a node's chain read from disk, head first.
    fn chain_pages(&mut self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        let mut pages = vec![id];
        let mut visited = HashSet::from([id]);
        let mut next = self.pager.read(id)?.read_u32(0);

        while next != 0 {
            if !visited.insert(next) {
                return Err(StoreError::BrokenChain {
                    node_id: id,
                    message: format!("page chain loops through page {next}"),
                });
            }
            pages.push(next);
            next = self.pager.read(next)?.read_u32(0);
        }

        Ok(pages)
    }

    /// Encoded node bytes and the pages they were read from.
    fn read_chain_data(&mut self, id: NodeId) -> Result<(Vec<u8>, Vec<NodeId>), StoreError> {
        let head = self.pager.read(id)?;
        let head_capacity = self.page_size() - HEAD_HEADER_SIZE;
        let continuation_capacity = self.page_size() - CONTINUATION_HEADER_SIZE;

        let mut next = head.read_u32(0);
        let chunk_len = usize::from(head.read_u16(4));
        let total_len = head.read_u32(6) as usize;
        let expected_crc = head.read_u32(10);

        if chunk_len > head_capacity || chunk_len > total_len {
            return Err(StoreError::BrokenChain {
                node_id: id,
                message: format!("head chunk of {chunk_len} bytes is invalid"),
            });
        }

        let mut data = Vec::with_capacity(total_len);
        data.extend_from_slice(head.read_bytes(HEAD_HEADER_SIZE, chunk_len));

        let limit = self.pager.page_count() as usize;
        let mut pages = vec![id];
        while data.len() < total_len {
            if next == 0 || pages.len() >= limit {
                return Err(StoreError::BrokenChain {
                    node_id: id,
                    message: format!("chain ends after {} of {total_len} bytes", data.len()),
                });
            }
            let page = self.pager.read(next)?;
            let chunk_len = usize::from(page.read_u16(4));
            if chunk_len == 0 || chunk_len > continuation_capacity {
                return Err(StoreError::BrokenChain {
                    node_id: id,
                    message: format!("page {next} holds an invalid chunk of {chunk_len} bytes"),
                });
            }
            data.extend_from_slice(page.read_bytes(CONTINUATION_HEADER_SIZE, chunk_len));
            pages.push(next);
            next = page.read_u32(0);
        }

        if data.len() != total_len || next != 0 {
            return Err(StoreError::BrokenChain {
                node_id: id,
                message: format!("chain does not end after {total_len} bytes"),
            });
        }

        let actual_crc = crc32fast::hash(&data);
        if actual_crc != expected_crc {
            return Err(StoreError::ChecksumMismatch {
                node_id: id,
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        Ok((data, pages))
    }

    #[allow(clippy::cast_possible_truncation)] // chunk lengths are bounded by the page size
    fn write_frames(&mut self, pages: &[NodeId], data: &[u8]) -> Result<(), StoreError> {
        let page_size = self.page_size();
        let head_len = data.len().min(page_size - HEAD_HEADER_SIZE);
        let (head_chunk, rest) = data.split_at(head_len);
        let mut chunks = std::iter::once(head_chunk)
            .chain(rest.chunks(page_size - CONTINUATION_HEADER_SIZE));

        for (i, &page_id) in pages.iter().enumerate() {
            let chunk = chunks.next().unwrap_or(&[]);
            let next = pages.get(i + 1).copied().unwrap_or(0);

            let mut page = Page::zeroed(page_size);
            page.write_u32(0, next);
            page.write_u16(4, chunk.len() as u16);
            let offset = if i == 0 {
                page.write_u32(6, data.len() as u32);
                page.write_u32(10, crc32fast::hash(data));
                HEAD_HEADER_SIZE
            } else {
                CONTINUATION_HEADER_SIZE
            };
            page.write_bytes(offset, chunk);

            self.pager.write(page_id, page.as_bytes())?;
        }

        Ok(())
    }
}

/// Errors that can occur during node store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Pager error.
    Pager(PagerError),
    /// Node bytes could not be decoded.
    Decode { node_id: NodeId, source: NodeError },
    /// Node bytes do not match their checksum.
    ChecksumMismatch {
        node_id: NodeId,
        expected: u32,
        actual: u32,
    },
    /// A node's page chain is malformed.
    BrokenChain { node_id: NodeId, message: String },
    /// The stored node carries another id.
    IdMismatch { node_id: NodeId, found: NodeId },
    /// Tree metadata blob is malformed.
    CorruptedMetadata(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pager(e) => write!(f, "pager error: {e}"),
            Self::Decode { node_id, source } => {
                write!(f, "failed to decode node {node_id}: {source}")
            }
            Self::ChecksumMismatch {
                node_id,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch in node {node_id}: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::BrokenChain { node_id, message } => {
                write!(f, "broken page chain for node {node_id}: {message}")
            }
            Self::IdMismatch { node_id, found } => {
                write!(f, "node {node_id} holds data for node {found}")
            }
            Self::CorruptedMetadata(msg) => write!(f, "corrupted tree metadata: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pager(e) => Some(e),
            Self::Decode { source, .. } => Some(source),
            Self::ChecksumMismatch { .. }
            | Self::BrokenChain { .. }
            | Self::IdMismatch { .. }
            | Self::CorruptedMetadata(_) => None,
        }
    }
}

impl From<PagerError> for StoreError {
    fn from(e: PagerError) -> Self {
        Self::Pager(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::node::Pointer;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir, page_size: u16, cache: usize) -> NodeStore {
        let pager = Pager::open(&dir.path().join("nodes.db"), page_size).expect("open pager");
        NodeStore::new(pager, cache)
    }

    fn leaf_with(id: NodeId, entries: usize, value_len: usize) -> Node {
        let mut node = Node::leaf(id, 1000);
        for i in 0..entries {
            node.keys.push(format!("key-{i:04}").into_bytes());
            node.pointers.push(Pointer::Value(vec![b'v'; value_len]));
        }
        node
    }

    #[test]
    fn test_single_page_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 256, 0);

        let id = store.new_node().expect("new node");
        let node = leaf_with(id, 3, 4);
        store.update_node(id, &node).expect("update");

        assert_eq!(store.load_node(id).expect("load"), node);
    }

    #[test]
    fn test_multi_page_node_grows_and_shrinks() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 64, 0);

        let id = store.new_node().expect("new node");
        let large = leaf_with(id, 40, 20);
        store.update_node(id, &large).expect("update large");
        assert!(store.chain_pages(id).expect("chain").len() > 10);
        assert_eq!(store.load_node(id).expect("load"), large);

        let small = leaf_with(id, 1, 1);
        store.update_node(id, &small).expect("update small");
        assert_eq!(store.chain_pages(id).expect("chain"), vec![id]);
        assert!(store.pager().free_page_count() > 10);
        assert_eq!(store.load_node(id).expect("load"), small);
    }

    #[test]
    fn test_cached_chain_follows_resizes() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 64, 16);

        let id = store.new_node().expect("new node");
        store
            .update_node(id, &leaf_with(id, 40, 20))
            .expect("update large");
        let large_chain = store.chain_pages(id).expect("chain");
        assert_eq!(store.cache.chain(id), Some(large_chain.clone()));

        store
            .update_node(id, &leaf_with(id, 5, 5))
            .expect("update small");
        let small_chain = store.chain_pages(id).expect("chain");
        assert!(small_chain.len() < large_chain.len());
        assert_eq!(store.cache.chain(id), Some(small_chain.clone()));
        assert_eq!(
            store.pager().free_page_count(),
            large_chain.len() - small_chain.len()
        );

        // A cold load records the chain it read.
        store.cache.remove(id);
        store.load_node(id).expect("load");
        assert_eq!(store.cache.chain(id), Some(small_chain));
    }

    #[test]
    fn test_delete_frees_whole_chain() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 64, 16);

        let id = store.new_node().expect("new node");
        store
            .update_node(id, &leaf_with(id, 10, 10))
            .expect("update");
        let chain = store.chain_pages(id).expect("chain");

        store.delete_node(id).expect("delete");
        assert_eq!(store.pager().free_page_count(), chain.len());
        assert!(store.load_node(id).is_err());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 128, 0);

        let id = store.new_node().expect("new node");
        store.update_node(id, &leaf_with(id, 2, 2)).expect("update");

        let mut page = store.pager.read(id).expect("read");
        let last = HEAD_HEADER_SIZE + 20;
        page.as_bytes_mut()[last] ^= 0xFF;
        store.pager.write(id, page.as_bytes()).expect("write");

        assert!(matches!(
            store.load_node(id),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 128, 0);

        let id = store.new_node().expect("new node");
        let node = leaf_with(id + 1, 1, 1);
        assert!(matches!(
            store.update_node(id, &node),
            Err(StoreError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata_lifecycle() {
        let dir = tempdir().expect("tempdir");
        let mut store = open_store(&dir, 64, 0);
        assert_eq!(store.load_metadata().expect("load"), None);

        let metadata = TreeMetadata {
            order: 4,
            root_id: 3,
            leftmost_id: 2,
            size: 17,
        };
        store.update_metadata(&metadata).expect("update");
        assert_eq!(store.load_metadata().expect("load"), Some(metadata));

        store.delete_metadata().expect("delete");
        assert_eq!(store.load_metadata().expect("load"), None);
    }

    #[test]
    fn test_tree_metadata_layout() {
        let metadata = TreeMetadata {
            order: 0x0102,
            root_id: 0x0304_0506,
            leftmost_id: 7,
            size: 8,
        };
        assert_eq!(
            metadata.to_bytes(),
            [1, 2, 3, 4, 5, 6, 0, 0, 0, 7, 0, 0, 0, 8]
        );
        assert!(TreeMetadata::from_bytes(&[0u8; 3]).is_err());
    }
}
