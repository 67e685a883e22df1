//! B+Tree node types and serialization.
//!
//! Node layout (big-endian):
//! - `id`: 4 bytes
//! - `parent_id`: 4 bytes (0 for the root)
//! - `is_leaf`: 1 byte
//! - `key_num`: 2 bytes, `key_slots`: 2 bytes
//! - `key_num` keys, each a 2-byte length followed by the key bytes
//! - `pointer_count`: 2 bytes, `pointer_slots`: 2 bytes
//! - `pointer_count` pointers, each a 1-byte tag followed by either a 4-byte
//!   node id (tag 0) or a 2-byte length and the value bytes (tag 1)
//! - `has_next`: 1 byte, `next`: 4 bytes (0 when absent)

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::PageId;

/// Identifier of a node. It is the id of the node's first page.
pub type NodeId = PageId;

const TAG_NODE_ID: u8 = 0;
const TAG_VALUE: u8 = 1;

/// A pointer slot: a child node in internal nodes, a value in leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Node(NodeId),
    Value(Vec<u8>),
}

impl Pointer {
    #[must_use]
    pub const fn as_node_id(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Value(_) => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Self::Node(_) => None,
            Self::Value(value) => Some(value),
        }
    }
}

/// A B+Tree node.
///
/// Leaves hold one `Pointer::Value` per key and link to the next leaf.
/// Internal nodes hold `keys.len() + 1` `Pointer::Node` children; child `i`
/// covers keys below `keys[i]`, and the last child covers the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Parent node, 0 for the root.
    pub parent_id: NodeId,
    pub is_leaf: bool,
    /// Keys in strictly ascending order.
    pub keys: Vec<Vec<u8>>,
    pub pointers: Vec<Pointer>,
    /// Next leaf in key order. Always `None` for internal nodes.
    pub next: Option<NodeId>,
    key_slots: u16,
    pointer_slots: u16,
}

impl Node {
    /// Create an empty leaf for a tree of the given order.
    #[must_use]
    pub const fn leaf(id: NodeId, order: u16) -> Self {
        Self::empty(id, order, true)
    }

    /// Create an empty internal node for a tree of the given order.
    #[must_use]
    pub const fn internal(id: NodeId, order: u16) -> Self {
        Self::empty(id, order, false)
    }

    const fn empty(id: NodeId, order: u16, is_leaf: bool) -> Self {
        Self {
            id,
            parent_id: 0,
            is_leaf,
            keys: Vec::new(),
            pointers: Vec::new(),
            next: None,
            key_slots: order - 1,
            pointer_slots: order,
        }
    }

    /// Maximum number of keys the node holds before it must split.
    #[must_use]
    pub const fn key_slots(&self) -> u16 {
        self.key_slots
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.keys.len() >= usize::from(self.key_slots)
    }

    /// Binary search for `key` among this node's keys.
    pub fn key_position(&self, key: &[u8]) -> Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }

    /// Index of the child to descend into for `key`.
    ///
    /// This is the first `i` with `key < keys[i]`, or the last child.
    #[must_use]
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Child node id at `index`, if that slot holds a node pointer.
    #[must_use]
    pub fn child_at(&self, index: usize) -> Option<NodeId> {
        self.pointers.get(index).and_then(Pointer::as_node_id)
    }

    /// Position of `child_id` among this node's children.
    #[must_use]
    pub fn child_position(&self, child_id: NodeId) -> Option<usize> {
        self.pointers
            .iter()
            .position(|p| p.as_node_id() == Some(child_id))
    }

    /// Ids of all children of an internal node.
    pub fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pointers.iter().filter_map(Pointer::as_node_id)
    }

    /// Serialize the node.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.parent_id.to_be_bytes());
        buf.push(u8::from(self.is_leaf));
        buf.extend_from_slice(&(self.keys.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.key_slots.to_be_bytes());
        for key in &self.keys {
            buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
            buf.extend_from_slice(key);
        }

        buf.extend_from_slice(&(self.pointers.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.pointer_slots.to_be_bytes());
        for pointer in &self.pointers {
            match pointer {
                Pointer::Node(id) => {
                    buf.push(TAG_NODE_ID);
                    buf.extend_from_slice(&id.to_be_bytes());
                }
                Pointer::Value(value) => {
                    buf.push(TAG_VALUE);
                    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
                    buf.extend_from_slice(value);
                }
            }
        }

        buf.push(u8::from(self.next.is_some()));
        buf.extend_from_slice(&self.next.unwrap_or(0).to_be_bytes());

        buf
    }

    fn encoded_len(&self) -> usize {
        let keys: usize = self.keys.iter().map(|k| 2 + k.len()).sum();
        let pointers: usize = self
            .pointers
            .iter()
            .map(|p| match p {
                Pointer::Node(_) => 5,
                Pointer::Value(v) => 3 + v.len(),
            })
            .sum();
        13 + keys + 4 + pointers + 5
    }

    /// Deserialize a node encoded by [`Node::encode`].
    pub fn decode(data: &[u8]) -> Result<Self, NodeError> {
        let mut reader = Reader::new(data);

        let id = reader.u32()?;
        let parent_id = reader.u32()?;
        let is_leaf = match reader.u8()? {
            0 => false,
            1 => true,
            other => return Err(NodeError::InvalidFlag(other)),
        };

        let key_num = reader.u16()?;
        let key_slots = reader.u16()?;
        if key_num > key_slots {
            return Err(NodeError::SlotOverflow {
                count: key_num,
                slots: key_slots,
            });
        }
        let mut keys = Vec::with_capacity(usize::from(key_num));
        for _ in 0..key_num {
            let len = usize::from(reader.u16()?);
            keys.push(reader.bytes(len)?.to_vec());
        }

        let pointer_count = reader.u16()?;
        let pointer_slots = reader.u16()?;
        if pointer_count > pointer_slots {
            return Err(NodeError::SlotOverflow {
                count: pointer_count,
                slots: pointer_slots,
            });
        }
        let mut pointers = Vec::with_capacity(usize::from(pointer_count));
        for _ in 0..pointer_count {
            let pointer = match reader.u8()? {
                TAG_NODE_ID => Pointer::Node(reader.u32()?),
                TAG_VALUE => {
                    let len = usize::from(reader.u16()?);
                    Pointer::Value(reader.bytes(len)?.to_vec())
                }
                other => return Err(NodeError::InvalidPointerTag(other)),
            };
            pointers.push(pointer);
        }

        let has_next = match reader.u8()? {
            0 => false,
            1 => true,
            other => return Err(NodeError::InvalidFlag(other)),
        };
        let next_id = reader.u32()?;
        let next = has_next.then_some(next_id);

        if reader.remaining() != 0 {
            return Err(NodeError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            id,
            parent_id,
            is_leaf,
            keys,
            pointers,
            next,
            key_slots,
            pointer_slots,
        })
    }
}

/// Bounds-checked big-endian cursor over an encoded node.
struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let end = self.position + len;
        let slice = self
            .data
            .get(self.position..end)
            .ok_or(NodeError::Truncated {
                offset: self.position,
                needed: len,
            })?;
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, NodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, NodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Errors that can occur when decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Input ended before a field.
    Truncated { offset: usize, needed: usize },
    /// A boolean byte was neither 0 nor 1.
    InvalidFlag(u8),
    /// Unknown pointer tag.
    InvalidPointerTag(u8),
    /// More entries than slots.
    SlotOverflow { count: u16, slots: u16 },
    /// Bytes left over after the last field.
    TrailingBytes(usize),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { offset, needed } => {
                write!(f, "truncated node: needed {needed} bytes at offset {offset}")
            }
            Self::InvalidFlag(value) => write!(f, "invalid flag byte {value}"),
            Self::InvalidPointerTag(tag) => write!(f, "invalid pointer tag {tag}"),
            Self::SlotOverflow { count, slots } => {
                write!(f, "{count} entries exceed {slots} slots")
            }
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after node"),
        }
    }
}

impl std::error::Error for NodeError {}
