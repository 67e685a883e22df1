//! Page-level file management.
//!
//! A tree file is a `METADATA_SIZE` byte metadata block followed by pages of
//! a fixed size. Page `id` lives at `METADATA_SIZE + (id - 1) * page_size`.
//! Page 1 is the head of the free list and exists from creation on.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::storage::allocator::{FreeList, FreeListPage};
use crate::storage::metadata::{FileMetadata, MAX_CUSTOM_METADATA_LEN, METADATA_SIZE};
use crate::storage::os;
use crate::storage::page::{FIRST_FREE_LIST_PAGE, MIN_PAGE_SIZE, Page, PageId};

/// Owns a tree file and hands out fixed-size pages.
///
/// Every mutating call takes `&mut self`; the file is additionally guarded by
/// an exclusive advisory lock for as long as the pager is alive.
pub struct Pager {
    file: File,
    path: PathBuf,
    page_size: u16,
    metadata: FileMetadata,
    free_list: FreeList,
    /// Highest page id backed by the file.
    last_page_id: PageId,
}

impl Pager {
    /// Open the file at `path`, creating it if it does not exist or is empty.
    ///
    /// An existing file must have been created with the same `page_size`.
    pub fn open(path: &Path, page_size: u16) -> Result<Self, PagerError> {
        if page_size < MIN_PAGE_SIZE {
            return Err(PagerError::InvalidPageSize(page_size));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PagerError::Io { op: "open", source })?;

        os::try_lock_exclusive(&file).map_err(|source| {
            if os::is_lock_contended(&source) {
                PagerError::Locked(path.to_path_buf())
            } else {
                PagerError::Io { op: "lock", source }
            }
        })?;

        let len = file
            .metadata()
            .map_err(|source| PagerError::Io { op: "stat", source })?
            .len();

        if len == 0 {
            Self::create(file, path, page_size)
        } else {
            Self::load(file, path, page_size, len)
        }
    }

    fn create(file: File, path: &Path, page_size: u16) -> Result<Self, PagerError> {
        let mut pager = Self {
            file,
            path: path.to_path_buf(),
            page_size,
            metadata: FileMetadata::new(page_size),
            free_list: FreeList::new(usize::from(page_size)),
            last_page_id: 0,
        };

        pager.write_metadata()?;
        let first = pager.grow()?;
        debug_assert_eq!(first, FIRST_FREE_LIST_PAGE);
        let empty = FreeListPage::empty(first).encode(pager.page_size_bytes());
        pager.write_raw(first, empty.as_bytes())?;
        pager.flush()?;

        info!(path = %path.display(), page_size, "Created tree file");
        Ok(pager)
    }

    fn load(mut file: File, path: &Path, page_size: u16, len: u64) -> Result<Self, PagerError> {
        let header_len = METADATA_SIZE as u64;
        if len < header_len {
            return Err(PagerError::CorruptedHeader(format!(
                "file is {len} bytes, shorter than the metadata block"
            )));
        }

        let mut buf = vec![0u8; METADATA_SIZE];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|source| PagerError::Io {
                op: "read metadata",
                source,
            })?;
        let metadata = FileMetadata::from_bytes(&buf)?;

        if metadata.page_size != page_size {
            return Err(PagerError::PageSizeMismatch {
                stored: metadata.page_size,
                requested: page_size,
            });
        }

        let body = len - header_len;
        let page_bytes = u64::from(page_size);
        if !body.is_multiple_of(page_bytes) {
            return Err(PagerError::CorruptedHeader(format!(
                "page area of {body} bytes is not a multiple of the page size {page_size}"
            )));
        }
        let last_page_id = PageId::try_from(body / page_bytes).map_err(|_| {
            PagerError::CorruptedHeader(format!("file holds more than {} pages", PageId::MAX))
        })?;
        if last_page_id < FIRST_FREE_LIST_PAGE {
            return Err(PagerError::CorruptedFreeList(
                "first free-list page is missing".to_string(),
            ));
        }

        let mut pager = Self {
            file,
            path: path.to_path_buf(),
            page_size,
            metadata,
            free_list: FreeList::new(usize::from(page_size)),
            last_page_id,
        };

        let chain = pager.read_free_list_chain()?;
        pager.free_list = FreeList::from_chain(pager.page_size_bytes(), chain, last_page_id)?;

        info!(
            path = %path.display(),
            page_size,
            pages = last_page_id,
            free = pager.free_list.free_count(),
            "Opened tree file"
        );
        Ok(pager)
    }

    fn read_free_list_chain(&mut self) -> Result<Vec<FreeListPage>, PagerError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = FIRST_FREE_LIST_PAGE;

        while cursor != 0 {
            if cursor > self.last_page_id || !visited.insert(cursor) {
                return Err(PagerError::CorruptedFreeList(format!(
                    "free-list link to page {cursor} is invalid"
                )));
            }
            let page = self.read_raw(cursor)?;
            let container = FreeListPage::decode(cursor, &page);
            cursor = container.next;
            chain.push(container);
        }

        Ok(chain)
    }

    /// Allocate a page, reusing the most recently freed one when available.
    ///
    /// The returned page is zero-filled.
    pub fn allocate(&mut self) -> Result<PageId, PagerError> {
        let Some(page_id) = self.free_list.next_reusable() else {
            return self.grow();
        };

        let container = self.free_list.stage_take(page_id).ok_or_else(|| {
            PagerError::CorruptedFreeList(format!("free page {page_id} has no container"))
        })?;

        let zeroed = Page::zeroed(self.page_size_bytes());
        self.write_raw(page_id, zeroed.as_bytes())?;
        let encoded = container.encode(self.page_size_bytes());
        self.write_raw(container.page_id, encoded.as_bytes())?;
        self.free_list.commit_take(page_id, container);

        Ok(page_id)
    }

    /// Return a page to the free list.
    pub fn free(&mut self, page_id: PageId) -> Result<(), PagerError> {
        self.check_page_id(page_id)?;
        if self.free_list.is_free(page_id) {
            return Err(PagerError::AlreadyFree(page_id));
        }

        if let Some(tail) = self.free_list.stage_append(page_id) {
            let encoded = tail.encode(self.page_size_bytes());
            self.write_raw(tail.page_id, encoded.as_bytes())?;
            self.free_list.commit_append(page_id, tail);
            return Ok(());
        }

        // The tail is full: grow the file by one page for a new container.
        let container_id = self.grow()?;
        let (old_tail, new_tail) = self
            .free_list
            .stage_new_tail(container_id, page_id)
            .ok_or_else(|| PagerError::CorruptedFreeList("free-list tail is missing".to_string()))?;

        let encoded = new_tail.encode(self.page_size_bytes());
        self.write_raw(new_tail.page_id, encoded.as_bytes())?;
        let encoded = old_tail.encode(self.page_size_bytes());
        self.write_raw(old_tail.page_id, encoded.as_bytes())?;
        self.free_list.commit_new_tail(old_tail, new_tail);

        debug!(container_id, "Free list grew");
        Ok(())
    }

    /// Read an allocated page.
    pub fn read(&mut self, page_id: PageId) -> Result<Page, PagerError> {
        self.check_allocated(page_id)?;
        self.read_raw(page_id)
    }

    /// Overwrite an allocated page. `data` must be exactly one page long.
    pub fn write(&mut self, page_id: PageId, data: &[u8]) -> Result<(), PagerError> {
        self.check_allocated(page_id)?;
        if data.len() != self.page_size_bytes() {
            return Err(PagerError::DataLength {
                expected: self.page_size_bytes(),
                actual: data.len(),
            });
        }
        self.write_raw(page_id, data)
    }

    /// Replace the custom metadata blob. An empty blob clears it.
    pub fn write_custom_metadata(&mut self, data: &[u8]) -> Result<(), PagerError> {
        if data.len() > MAX_CUSTOM_METADATA_LEN {
            return Err(PagerError::MetadataTooLarge {
                len: data.len(),
                max: MAX_CUSTOM_METADATA_LEN,
            });
        }

        let previous = std::mem::replace(&mut self.metadata.custom, data.to_vec());
        if let Err(e) = self.write_metadata() {
            self.metadata.custom = previous;
            return Err(e);
        }
        Ok(())
    }

    /// The custom metadata blob, empty if never written.
    #[must_use]
    pub fn read_custom_metadata(&self) -> &[u8] {
        &self.metadata.custom
    }

    /// Shrink the file by dropping trailing free pages.
    ///
    /// Free-list containers at the end of the file are dropped too once they
    /// no longer record any surviving page. Returns the number of pages
    /// reclaimed; 0 when nothing trailing is free.
    pub fn compact(&mut self) -> Result<usize, PagerError> {
        let Some(plan) = self.free_list.plan_compaction(self.last_page_id) else {
            return Ok(0);
        };

        for container in &plan.rewrites {
            let encoded = container.encode(self.page_size_bytes());
            self.write_raw(container.page_id, encoded.as_bytes())?;
        }

        let new_len = self.page_offset(plan.new_last_page_id) + u64::from(self.page_size);
        self.file.set_len(new_len).map_err(|source| PagerError::Io {
            op: "truncate",
            source,
        })?;

        self.free_list.apply_compaction(&plan);
        let reclaimed = plan.reclaimed_pages();
        info!(
            reclaimed,
            last_page_id = plan.new_last_page_id,
            "Compacted tree file"
        );
        self.last_page_id = plan.new_last_page_id;

        Ok(reclaimed)
    }

    /// Sync all pending writes to disk.
    pub fn flush(&mut self) -> Result<(), PagerError> {
        self.file.flush().map_err(|source| PagerError::Io {
            op: "flush",
            source,
        })?;
        self.file
            .sync_all()
            .map_err(|source| PagerError::Io { op: "sync", source })
    }

    /// Flush and release the file.
    pub fn close(mut self) -> Result<(), PagerError> {
        self.flush()?;
        debug!(path = %self.path.display(), "Closed tree file");
        Ok(())
    }

    #[must_use]
    pub const fn page_size(&self) -> u16 {
        self.page_size
    }

    /// Number of pages backed by the file, free-list pages included.
    #[must_use]
    pub const fn page_count(&self) -> PageId {
        self.last_page_id
    }

    /// Number of freed pages waiting for reuse.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.free_list.free_count()
    }

    #[must_use]
    pub fn is_free(&self, page_id: PageId) -> bool {
        self.free_list.is_free(page_id)
    }

    fn page_size_bytes(&self) -> usize {
        usize::from(self.page_size)
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        METADATA_SIZE as u64 + u64::from(page_id - 1) * u64::from(self.page_size)
    }

    /// Reject ids that can never name a data page.
    fn check_page_id(&self, page_id: PageId) -> Result<(), PagerError> {
        if page_id == 0 {
            return Err(PagerError::InvalidPageId);
        }
        if page_id > self.last_page_id {
            return Err(PagerError::PageOutOfBounds {
                page_id,
                last_page_id: self.last_page_id,
            });
        }
        if self.free_list.is_container(page_id) {
            return Err(PagerError::ReservedPage(page_id));
        }
        Ok(())
    }

    fn check_allocated(&self, page_id: PageId) -> Result<(), PagerError> {
        self.check_page_id(page_id)?;
        if self.free_list.is_free(page_id) {
            return Err(PagerError::PageNotAllocated(page_id));
        }
        Ok(())
    }

    /// Extend the file by one zero-filled page.
    fn grow(&mut self) -> Result<PageId, PagerError> {
        let page_id = self
            .last_page_id
            .checked_add(1)
            .ok_or(PagerError::FileFull)?;
        let new_len = self.page_offset(page_id) + u64::from(self.page_size);
        self.file.set_len(new_len).map_err(|source| PagerError::PageIo {
            op: "grow",
            page_id,
            offset: new_len,
            source,
        })?;
        self.last_page_id = page_id;
        Ok(page_id)
    }

    fn read_raw(&mut self, page_id: PageId) -> Result<Page, PagerError> {
        let offset = self.page_offset(page_id);
        let mut page = Page::zeroed(self.page_size_bytes());
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(page.as_bytes_mut()))
            .map_err(|source| PagerError::PageIo {
                op: "read",
                page_id,
                offset,
                source,
            })?;
        Ok(page)
    }

    fn write_raw(&mut self, page_id: PageId, data: &[u8]) -> Result<(), PagerError> {
        let offset = self.page_offset(page_id);
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .map_err(|source| PagerError::PageIo {
                op: "write",
                page_id,
                offset,
                source,
            })
    }

    fn write_metadata(&mut self) -> Result<(), PagerError> {
        let bytes = self.metadata.to_bytes();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&bytes))
            .map_err(|source| PagerError::Io {
                op: "write metadata",
                source,
            })
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("last_page_id", &self.last_page_id)
            .field("free_pages", &self.free_list.free_count())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during pager operations.
#[derive(Debug)]
pub enum PagerError {
    /// I/O error not tied to a single page.
    Io {
        op: &'static str,
        source: std::io::Error,
    },
    /// I/O error on a page.
    PageIo {
        op: &'static str,
        page_id: PageId,
        offset: u64,
        source: std::io::Error,
    },
    /// Page size below the supported minimum.
    InvalidPageSize(u16),
    /// Existing file was created with another page size.
    PageSizeMismatch { stored: u16, requested: u16 },
    /// Page id 0.
    InvalidPageId,
    /// Page id past the end of the file.
    PageOutOfBounds {
        page_id: PageId,
        last_page_id: PageId,
    },
    /// Page is on the free list.
    PageNotAllocated(PageId),
    /// Page belongs to the free list itself.
    ReservedPage(PageId),
    /// Page was freed twice.
    AlreadyFree(PageId),
    /// Write buffer is not exactly one page.
    DataLength { expected: usize, actual: usize },
    /// Custom metadata does not fit in the metadata block.
    MetadataTooLarge { len: usize, max: usize },
    /// No page id is left to grow the file with.
    FileFull,
    /// Free-list pages are inconsistent.
    CorruptedFreeList(String),
    /// Metadata block or file length is invalid.
    CorruptedHeader(String),
    /// Another handle holds the file lock.
    Locked(PathBuf),
}

impl std::fmt::Display for PagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { op, source } => write!(f, "I/O error during {op}: {source}"),
            Self::PageIo {
                op,
                page_id,
                offset,
                source,
            } => write!(
                f,
                "I/O error during {op} of page {page_id} at offset {offset}: {source}"
            ),
            Self::InvalidPageSize(size) => {
                write!(f, "page size {size} is below the minimum of {MIN_PAGE_SIZE}")
            }
            Self::PageSizeMismatch { stored, requested } => write!(
                f,
                "file uses page size {stored}, but {requested} was requested"
            ),
            Self::InvalidPageId => write!(f, "page id 0 is invalid"),
            Self::PageOutOfBounds {
                page_id,
                last_page_id,
            } => write!(
                f,
                "page {page_id} out of bounds (last page: {last_page_id})"
            ),
            Self::PageNotAllocated(id) => write!(f, "page {id} is not allocated"),
            Self::ReservedPage(id) => write!(f, "page {id} is reserved for the free list"),
            Self::AlreadyFree(id) => write!(f, "page {id} is already free"),
            Self::DataLength { expected, actual } => {
                write!(f, "page data is {actual} bytes, expected {expected}")
            }
            Self::MetadataTooLarge { len, max } => {
                write!(f, "custom metadata is {len} bytes, at most {max} fit")
            }
            Self::FileFull => write!(f, "no page ids left"),
            Self::CorruptedFreeList(msg) => write!(f, "corrupted free list: {msg}"),
            Self::CorruptedHeader(msg) => write!(f, "corrupted metadata: {msg}"),
            Self::Locked(path) => write!(f, "file is locked: {}", path.display()),
        }
    }
}

impl std::error::Error for PagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::PageIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).expect("metadata").len()
    }

    #[test]
    fn test_first_allocation_and_reuse() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let mut pager = Pager::open(&path, 64).expect("open");

        let page_id = pager.allocate().expect("allocate");
        assert_eq!(page_id, 2);

        pager.write(page_id, &[7u8; 64]).expect("write");
        assert_eq!(pager.read(page_id).expect("read").as_bytes(), &[7u8; 64]);

        pager.free(page_id).expect("free");
        assert_eq!(pager.allocate().expect("allocate"), 2);
        assert!(
            pager.read(2).expect("read").as_bytes().iter().all(|&b| b == 0),
            "reused page must be zeroed"
        );
    }

    #[test]
    fn test_new_file_layout() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let pager = Pager::open(&path, 128).expect("open");

        assert_eq!(pager.page_count(), 1);
        assert_eq!(file_len(&path), METADATA_SIZE as u64 + 128);
        pager.close().expect("close");
    }

    #[test]
    fn test_invalid_access() {
        let dir = tempdir().expect("tempdir");
        let mut pager = Pager::open(&dir.path().join("pages.db"), 64).expect("open");
        let page_id = pager.allocate().expect("allocate");

        assert!(matches!(pager.read(0), Err(PagerError::InvalidPageId)));
        assert!(matches!(pager.read(1), Err(PagerError::ReservedPage(1))));
        assert!(matches!(
            pager.read(99),
            Err(PagerError::PageOutOfBounds { page_id: 99, .. })
        ));
        assert!(matches!(
            pager.write(page_id, &[0u8; 10]),
            Err(PagerError::DataLength {
                expected: 64,
                actual: 10
            })
        ));

        pager.free(page_id).expect("free");
        assert!(matches!(
            pager.free(page_id),
            Err(PagerError::AlreadyFree(_))
        ));
        assert!(matches!(
            pager.read(page_id),
            Err(PagerError::PageNotAllocated(_))
        ));
        assert!(matches!(pager.free(1), Err(PagerError::ReservedPage(1))));
    }

    #[test]
    fn test_page_size_validation() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        assert!(matches!(
            Pager::open(&path, 16),
            Err(PagerError::InvalidPageSize(16))
        ));

        Pager::open(&path, 64).expect("create").close().expect("close");
        assert!(matches!(
            Pager::open(&path, 128),
            Err(PagerError::PageSizeMismatch {
                stored: 64,
                requested: 128
            })
        ));
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 64).expect("open");
            let a = pager.allocate().expect("allocate");
            let b = pager.allocate().expect("allocate");
            pager.write(a, &[1u8; 64]).expect("write");
            pager.write(b, &[2u8; 64]).expect("write");
            pager.free(a).expect("free");
            pager.write_custom_metadata(b"header").expect("metadata");
            pager.close().expect("close");
        }

        let mut pager = Pager::open(&path, 64).expect("reopen");
        assert_eq!(pager.read_custom_metadata(), b"header");
        assert_eq!(pager.read(3).expect("read").as_bytes(), &[2u8; 64]);
        assert!(pager.is_free(2));
        assert_eq!(pager.allocate().expect("allocate"), 2);
    }

    #[test]
    fn test_custom_metadata_bounds() {
        let dir = tempdir().expect("tempdir");
        let mut pager = Pager::open(&dir.path().join("pages.db"), 64).expect("open");

        let too_large = vec![0u8; MAX_CUSTOM_METADATA_LEN + 1];
        assert!(matches!(
            pager.write_custom_metadata(&too_large),
            Err(PagerError::MetadataTooLarge { .. })
        ));
        assert!(pager.read_custom_metadata().is_empty());

        pager.write_custom_metadata(b"x").expect("write");
        pager.write_custom_metadata(&[]).expect("clear");
        assert!(pager.read_custom_metadata().is_empty());
    }

    #[test]
    fn test_free_list_spans_pages() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        // 32-byte pages hold 7 ids per free-list page.
        let ids: Vec<PageId> = {
            let mut pager = Pager::open(&path, 32).expect("open");
            let ids: Vec<PageId> = (0..20).map(|_| pager.allocate().expect("allocate")).collect();
            for &id in &ids {
                pager.free(id).expect("free");
            }
            assert_eq!(pager.free_page_count(), 20);
            assert!(pager.page_count() > 21, "free list needed extra pages");
            pager.close().expect("close");
            ids
        };

        let mut pager = Pager::open(&path, 32).expect("reopen");
        assert_eq!(pager.free_page_count(), 20);
        let last_freed = *ids.last().expect("ids");
        assert_eq!(pager.allocate().expect("allocate"), last_freed);
    }

    #[test]
    fn test_compact_trailing_pages() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let mut pager = Pager::open(&path, 64).expect("open");

        let ids: Vec<PageId> = (0..5).map(|_| pager.allocate().expect("allocate")).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
        pager.write(4, &[9u8; 64]).expect("write");
        let before = file_len(&path);

        pager.free(6).expect("free");
        pager.free(5).expect("free");
        assert_eq!(pager.compact().expect("compact"), 2);

        assert_eq!(file_len(&path), before - 2 * 64);
        assert_eq!(pager.page_count(), 4);
        assert_eq!(pager.free_page_count(), 0);
        assert_eq!(pager.read(4).expect("read").as_bytes(), &[9u8; 64]);
        assert_eq!(pager.allocate().expect("allocate"), 5);
    }

    #[test]
    fn test_compact_noop() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let mut pager = Pager::open(&path, 64).expect("open");

        pager.allocate().expect("allocate");
        let b = pager.allocate().expect("allocate");
        pager.allocate().expect("allocate");
        pager.free(b).expect("free");

        let before = file_len(&path);
        assert_eq!(pager.compact().expect("compact"), 0);
        assert_eq!(file_len(&path), before);
        assert!(pager.is_free(b));
    }

    #[test]
    fn test_compact_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        {
            let mut pager = Pager::open(&path, 32).expect("open");
            let ids: Vec<PageId> = (0..12).map(|_| pager.allocate().expect("allocate")).collect();
            pager.free(ids[0]).expect("free");
            for &id in ids.iter().skip(4) {
                pager.free(id).expect("free");
            }
            assert!(pager.compact().expect("compact") >= 8);
            pager.close().expect("close");
        }

        let mut pager = Pager::open(&path, 32).expect("reopen");
        assert_eq!(pager.free_page_count(), 1);
        assert!(pager.is_free(2));
        assert_eq!(pager.allocate().expect("allocate"), 2);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        let pager = Pager::open(&path, 64).expect("open");
        assert!(matches!(
            Pager::open(&path, 64),
            Err(PagerError::Locked(_))
        ));
        drop(pager);
        Pager::open(&path, 64).expect("reopen after drop");
    }

    #[test]
    fn test_torn_page_area_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");

        let mut pager = Pager::open(&path, 64).expect("open");
        pager.allocate().expect("allocate");
        pager.close().expect("close");

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        file.write_all(&[0u8; 10]).expect("append");
        drop(file);

        assert!(matches!(
            Pager::open(&path, 64),
            Err(PagerError::CorruptedHeader(_))
        ));
    }
}
