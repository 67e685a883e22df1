//! File metadata block.
//!
//! The first `METADATA_SIZE` bytes of every tree file are reserved for
//! metadata. Pages start right after it.
//!
//! Layout (big-endian):
//! - offset 0: page size (u16)
//! - offset 500: custom metadata length (u16), followed by the custom bytes
//!
//! The custom area belongs to whoever sits on top of the pager; the pager only
//! bounds its size.

use crate::storage::pager::PagerError;

/// Size of the metadata block at the start of the file.
pub const METADATA_SIZE: usize = 1000;

/// Metadata field offsets.
mod offsets {
    pub const PAGE_SIZE: usize = 0;
    pub const CUSTOM_LEN: usize = 500;
    pub const CUSTOM_DATA: usize = CUSTOM_LEN + 2;
}

/// Largest custom metadata blob that fits in the block.
pub const MAX_CUSTOM_METADATA_LEN: usize = METADATA_SIZE - offsets::CUSTOM_DATA;

/// Decoded file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Page size the file was created with.
    pub page_size: u16,
    /// Opaque bytes stored by the layer above the pager. Empty when unset.
    pub custom: Vec<u8>,
}

impl FileMetadata {
    /// Metadata for a freshly created file.
    #[must_use]
    pub const fn new(page_size: u16) -> Self {
        Self {
            page_size,
            custom: Vec::new(),
        }
    }

    /// Serialize into a full metadata block.
    ///
    /// The custom blob must already be bounded by `MAX_CUSTOM_METADATA_LEN`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_CUSTOM_METADATA_LEN
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; METADATA_SIZE];
        buf[offsets::PAGE_SIZE..offsets::PAGE_SIZE + 2]
            .copy_from_slice(&self.page_size.to_be_bytes());

        if !self.custom.is_empty() {
            let len = self.custom.len() as u16;
            buf[offsets::CUSTOM_LEN..offsets::CUSTOM_DATA].copy_from_slice(&len.to_be_bytes());
            buf[offsets::CUSTOM_DATA..offsets::CUSTOM_DATA + self.custom.len()]
                .copy_from_slice(&self.custom);
        }

        buf
    }

    /// Deserialize a metadata block.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PagerError> {
        if buf.len() < METADATA_SIZE {
            return Err(PagerError::CorruptedHeader(format!(
                "metadata block is {} bytes, expected {METADATA_SIZE}",
                buf.len()
            )));
        }

        let page_size = u16::from_be_bytes([buf[offsets::PAGE_SIZE], buf[offsets::PAGE_SIZE + 1]]);
        let custom_len = usize::from(u16::from_be_bytes([
            buf[offsets::CUSTOM_LEN],
            buf[offsets::CUSTOM_LEN + 1],
        ]));

        if custom_len > MAX_CUSTOM_METADATA_LEN {
            return Err(PagerError::CorruptedHeader(format!(
                "custom metadata length {custom_len} exceeds {MAX_CUSTOM_METADATA_LEN}"
            )));
        }

        Ok(Self {
            page_size,
            custom: buf[offsets::CUSTOM_DATA..offsets::CUSTOM_DATA + custom_len].to_vec(),
        })
    }
}
