//! Page buffers and page-size limits.
//!
//! Pages are fixed-size blocks whose size is chosen when a file is created.
//! All multi-byte integers stored in pages are big-endian.

/// A page identifier. Page 0 is never a valid page.
pub type PageId = u32;

/// Smallest supported page size in bytes.
pub const MIN_PAGE_SIZE: u16 = 32;

/// Largest supported page size in bytes.
pub const MAX_PAGE_SIZE: u16 = u16::MAX;

/// Page id of the first free-list page, created together with the file.
pub const FIRST_FREE_LIST_PAGE: PageId = 1;

/// A raw page buffer of the pager's page size.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a zeroed page of `size` bytes.
    #[must_use]
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw page data.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a big-endian u16 at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a big-endian u16 at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Read a big-endian u32 at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a big-endian u32 at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(16);
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("first_bytes", &&self.data[..shown])
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_read_write() {
        let mut page = Page::zeroed(64);

        page.write_u16(0, 0xBEEF);
        assert_eq!(page.read_u16(0), 0xBEEF);

        page.write_u32(10, 0x1234_5678);
        assert_eq!(page.read_u32(10), 0x1234_5678);
        assert_eq!(page.read_bytes(10, 4), &[0x12, 0x34, 0x56, 0x78]);

        page.write_bytes(40, b"hello");
        assert_eq!(page.read_bytes(40, 5), b"hello");
        assert_eq!(page.len(), 64);
    }

    #[test]
    fn test_zeroed_page_is_zero() {
        let page = Page::zeroed(32);
        assert!(page.as_bytes().iter().all(|&b| b == 0));
    }
}
