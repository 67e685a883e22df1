//! Host-specific helpers: advisory file locking and the system page size.

use std::fs::File;
use std::io;

use fs2::FileExt;

use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Page size used when the host page size is out of range.
const FALLBACK_PAGE_SIZE: u16 = 4096;

/// Take a non-blocking exclusive lock on `file`.
///
/// The lock is released when the file is closed. Use `is_lock_contended` to
/// tell a lock held elsewhere from other failures.
pub fn try_lock_exclusive(file: &File) -> io::Result<()> {
    FileExt::try_lock_exclusive(file)
}

/// Whether `error` means another handle already holds the lock.
#[must_use]
pub fn is_lock_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Host page size, clamped to the supported page-size range.
#[must_use]
pub fn host_page_size() -> u16 {
    clamp_page_size(page_size::get())
}

fn clamp_page_size(size: usize) -> u16 {
    if size < usize::from(MIN_PAGE_SIZE) {
        return FALLBACK_PAGE_SIZE;
    }
    u16::try_from(size).unwrap_or(MAX_PAGE_SIZE)
}
