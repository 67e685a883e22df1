//! Paged file storage.
//!
//! # File Format
//!
//! A tree file is a 1000-byte metadata block followed by fixed-size pages:
//!
//! - Metadata: page size, plus a custom blob owned by the layer above
//! - Page 1: head of the free list
//! - Remaining pages: node pages and further free-list pages
//!
//! The `btree` module stores tree nodes on these pages.
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::Pager;
//!
//! let mut pager = Pager::open(path, 4096)?;
//! let page_id = pager.allocate()?;
//! pager.write(page_id, &[0u8; 4096])?;
//! pager.free(page_id)?;
//! pager.close()?;
//! ```

mod allocator;
pub mod btree;
mod metadata;
pub mod os;
mod page;
mod pager;

pub use metadata::{MAX_CUSTOM_METADATA_LEN, METADATA_SIZE};
pub use page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, Page, PageId};
pub use pager::{Pager, PagerError};
