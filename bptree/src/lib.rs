//! A persistent B+Tree stored in a single file.
//!
//! The crate is layered bottom-up:
//!
//! - `storage::Pager` turns a file into fixed-size pages with a free list and a
//!   small metadata block
//! - `storage::btree::NodeStore` stores encoded nodes on chains of pages
//! - `Tree` implements the ordered map on top
//!
//! A tree has a single writer. Every operation takes `&mut Tree`; share a tree
//! across threads by wrapping it in a lock.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
// Forbid unwrap() in production code so corrupt data surfaces as an error.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod config;
pub mod storage;

pub use config::{ConfigError, TreeConfig};
pub use storage::btree::{Iter, Tree, TreeError, TreeStats};
