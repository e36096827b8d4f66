//! Page buffers and the per-page header.
//!
//! Every on-disk page starts with an 8-byte [`PageHeader`] followed by the
//! user-visible region handed out to callers of the paged file.

/// A page identifier (0-indexed, user pages only).
///
/// Stored on disk as `i32`; `-1` is reserved for "no page".
pub type PageId = i32;

/// `next_free` marker for a page that is in use.
pub const PAGE_USED: i32 = -2;

/// `next_free` marker for the last page of the free list.
pub const LIST_END: i32 = -1;

/// Header present at the start of every on-disk page.
///
/// Layout:
/// - `next_free`: 4 bytes (`PAGE_USED`, `LIST_END`, or the next free page)
/// - `checksum`: 4 bytes (CRC32 of the page with this field zeroed)
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub next_free: i32,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    /// Byte range of the checksum field.
    const CHECKSUM_OFFSET: usize = 4;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.next_free.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            next_free: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    #[must_use]
    pub const fn is_used(self) -> bool {
        self.next_free == PAGE_USED
    }
}

/// A raw on-disk page: header plus user region.
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a zeroed page of `len` bytes (header included).
    #[must_use]
    pub fn new(len: usize) -> Self {
        assert!(len > PageHeader::SIZE, "page must be larger than its header");
        Self {
            data: vec![0u8; len].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The region after the page header.
    #[must_use]
    pub fn user_bytes(&self) -> &[u8] {
        &self.data[PageHeader::SIZE..]
    }

    pub fn user_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[PageHeader::SIZE..]
    }

    #[must_use]
    pub fn header(&self) -> PageHeader {
        let mut buf = [0u8; PageHeader::SIZE];
        buf.copy_from_slice(&self.data[..PageHeader::SIZE]);
        PageHeader::from_bytes(buf)
    }

    pub fn set_header(&mut self, header: PageHeader) {
        self.data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Zero the user region and mark the page used.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.set_header(PageHeader {
            next_free: PAGE_USED,
            checksum: 0,
        });
    }

    /// Compute the CRC32 of the page with the checksum field treated as zero.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let split = PageHeader::CHECKSUM_OFFSET;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..split]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[split + 4..]);
        hasher.finalize()
    }

    /// Store a fresh checksum in the header before write-back.
    pub fn seal(&mut self) {
        let mut header = self.header();
        header.checksum = self.compute_checksum();
        self.set_header(header);
    }

    /// Check the stored checksum against the page contents.
    pub fn verify(&self) -> Result<(), PageError> {
        let expected = self.header().checksum;
        let actual = self.compute_checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { expected, actual })
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("header", &self.header())
            .finish_non_exhaustive()
    }
}

/// Errors related to page contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_layout() {
        let header = PageHeader {
            next_free: 7,
            checksum: 0xDEAD_BEEF,
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &7i32.to_le_bytes());
        assert_eq!(PageHeader::from_bytes(bytes), header);
        assert!(!header.is_used());
    }

    #[test]
    fn test_reset_marks_used_and_zeroes() {
        let mut page = Page::new(64);
        page.user_bytes_mut().fill(0xAB);
        page.reset();

        assert!(page.header().is_used());
        assert!(page.user_bytes().iter().all(|&b| b == 0));
        assert_eq!(page.user_bytes().len(), 64 - PageHeader::SIZE);
    }

    #[test]
    fn test_seal_then_verify() {
        let mut page = Page::new(64);
        page.reset();
        page.user_bytes_mut()[..5].copy_from_slice(b"hello");
        page.seal();
        page.verify().expect("sealed page should verify");

        page.user_bytes_mut()[0] = b'j';
        assert!(matches!(
            page.verify(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_ignores_checksum_field() {
        let mut page = Page::new(32);
        page.reset();
        let before = page.compute_checksum();
        page.set_header(PageHeader {
            next_free: PAGE_USED,
            checksum: 12345,
        });
        assert_eq!(page.compute_checksum(), before);
    }
}
