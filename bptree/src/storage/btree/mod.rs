//! Persistent B+Tree over byte keys and values.
//!
//! # Layers
//!
//! - `node`: in-memory node and its binary encoding
//! - `store`: maps node ids to chains of pager pages, with a node cache
//! - `tree`: search, insertion and splitting
//! - `delete`: removal, borrowing, merging and separator repair
//! - `iter`: ascending traversal of the leaf chain
//! - `check`: whole-tree structural verification
//!
//! Values live only in leaves. Internal nodes hold separator keys: every key in
//! the subtree right of a separator is greater than or equal to it, every key
//! to its left is smaller.
//!
//! # Usage
//!
//! ```no_run
//! use bptree::{Tree, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = Tree::open("data.db", TreeConfig::default())?;
//! tree.put(b"apple", b"red")?;
//! assert_eq!(tree.get(b"apple")?, Some(b"red".to_vec()));
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod check;
mod delete;
mod iter;
mod node;
mod store;
mod tree;

pub use iter::Iter;
pub use node::{Node, NodeError, NodeId, Pointer};
pub use store::{NodeStore, StoreError, TREE_METADATA_SIZE, TreeMetadata};
pub use tree::{MAX_KEY_SIZE, MAX_TREE_SIZE, MAX_VALUE_SIZE, Tree, TreeError, TreeStats};
