//! Index file header, stored in page 0.
//!
//! # Layout
//!
//! | Offset | Size | Field       |
//! |--------|------|-------------|
//! | 0      | 8    | magic       |
//! | 8      | 4    | root page   |
//! | 12     | 4    | num pages   |
//! | 16     | 4    | height      |
//! | 20     | 4    | page size   |
//! | 24     | 4    | attr type   |
//! | 28     | 4    | attr length |
//! | 32     | 4    | max keys    |
//!
//! All integers are little-endian `i32`; `-1` marks an absent root or an
//! unset node capacity.

use std::path::Path;

use crate::index::attr::{AttrType, Attribute};
use crate::index::node::NodeLayout;
use crate::index::IndexError;
use crate::storage::{PageId, PagedFile};

/// Magic bytes identifying an index file.
pub const MAGIC: [u8; 8] = *b"IXBLINK1";

/// Page holding the header.
pub const HEADER_PAGE: PageId = 0;

mod offsets {
    pub const MAGIC: usize = 0;
    pub const ROOT: usize = 8;
    pub const NUM_PAGES: usize = 12;
    pub const HEIGHT: usize = 16;
    pub const PAGE_SIZE: usize = 20;
    pub const ATTR_TYPE: usize = 24;
    pub const ATTR_LENGTH: usize = 28;
    pub const MAX_KEYS: usize = 32;
}

/// Persistent tree metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Root node, or `None` before the first open.
    pub root: Option<PageId>,
    /// Pages owned by the index, header page included.
    pub num_pages: i32,
    /// Levels from root to leaf; 0 when there is no root.
    pub height: i32,
    pub page_size: usize,
    pub attr: Attribute,
    /// Node capacity, set when the root is first created.
    pub max_keys: Option<usize>,
}

impl IndexHeader {
    pub const SIZE: usize = 36;

    /// Header for a freshly created index: no root, no nodes.
    #[must_use]
    pub const fn new(attr: Attribute, page_size: usize) -> Self {
        Self {
            root: None,
            num_pages: 1,
            height: 0,
            page_size,
            attr,
            max_keys: None,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> NodeLayout {
        NodeLayout::for_page(self.attr, self.page_size)
    }

    #[must_use]
    // Page size, key length and capacity are bounded by MAX_PAGE_SIZE.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut put = |at: usize, value: i32| buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
        put(offsets::ROOT, self.root.unwrap_or(-1));
        put(offsets::NUM_PAGES, self.num_pages);
        put(offsets::HEIGHT, self.height);
        put(offsets::PAGE_SIZE, self.page_size as i32);
        put(offsets::ATTR_TYPE, self.attr.attr_type() as i32);
        put(offsets::ATTR_LENGTH, self.attr.length() as i32);
        put(offsets::MAX_KEYS, self.max_keys.map_or(-1, |m| m as i32));
        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        buf
    }

    /// Parse and validate a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let invalid = IndexError::InvalidIndexFile;

        if bytes.len() < Self::SIZE || bytes[offsets::MAGIC..offsets::MAGIC + 8] != MAGIC {
            return Err(invalid("bad magic".to_string()));
        }
        let get = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let attr_type = AttrType::try_from(get(offsets::ATTR_TYPE))
            .map_err(|tag| invalid(format!("unknown attribute type {tag}")))?;
        let length = usize::try_from(get(offsets::ATTR_LENGTH))
            .map_err(|_| invalid(format!("attribute length {}", get(offsets::ATTR_LENGTH))))?;
        let attr = Attribute::new(attr_type, length)
            .map_err(|e| invalid(e.to_string()))?;
        let page_size = usize::try_from(get(offsets::PAGE_SIZE))
            .map_err(|_| invalid(format!("page size {}", get(offsets::PAGE_SIZE))))?;

        let root = get(offsets::ROOT);
        let num_pages = get(offsets::NUM_PAGES);
        let height = get(offsets::HEIGHT);
        let max_keys = get(offsets::MAX_KEYS);

        let header = Self {
            root: (root >= 0).then_some(root),
            num_pages,
            height,
            page_size,
            attr,
            max_keys: usize::try_from(max_keys).ok(),
        };

        if root < -1 || num_pages < 1 || height < 0 || max_keys < -1 {
            return Err(invalid(format!(
                "root {root}, {num_pages} pages, height {height}, max keys {max_keys}"
            )));
        }
        if header.root.is_some() != (height > 0) {
            return Err(invalid(format!("root {root} with height {height}")));
        }
        if let Some(max_keys) = header.max_keys
            && max_keys != header.layout().max_keys()
        {
            return Err(invalid(format!(
                "max keys {max_keys} does not match page geometry ({})",
                header.layout().max_keys()
            )));
        }
        Ok(header)
    }

    /// Read the header from page 0.
    pub fn read(file: &PagedFile) -> Result<Self, IndexError> {
        let page = file.get_page(HEADER_PAGE)?;
        let header = Self::from_bytes(&page.bytes())?;
        if header.page_size != file.page_size() {
            return Err(IndexError::InvalidIndexFile(format!(
                "header page size {} but file page size {}",
                header.page_size,
                file.page_size()
            )));
        }
        Ok(header)
    }

    /// Write the header into page 0.
    pub fn write(&self, file: &PagedFile) -> Result<(), IndexError> {
        let mut page = file.get_page(HEADER_PAGE)?;
        page.bytes_mut()[..Self::SIZE].copy_from_slice(&self.to_bytes());
        Ok(())
    }
}

/// Create an index file for keys of `attr_type` and width `attr_length`.
///
/// The file gets a header with no root; the first open creates it.
pub fn create_index_file(
    path: &Path,
    attr_type: AttrType,
    attr_length: usize,
    page_size: usize,
) -> Result<(), IndexError> {
    let attr = Attribute::new(attr_type, attr_length)?;
    if page_size < IndexHeader::SIZE {
        return Err(IndexError::InvalidPageSize(page_size));
    }
    let header = IndexHeader::new(attr, page_size);
    if header.layout().max_keys() < 2 {
        return Err(IndexError::KeyTooLarge {
            length: attr_length,
            page_size,
        });
    }

    PagedFile::create(path, page_size)?;
    let file = PagedFile::open(path, 1)?;
    let page = file.allocate_page()?;
    debug_assert_eq!(page.page_id(), HEADER_PAGE);
    drop(page);
    header.write(&file)?;
    file.close()?;

    tracing::debug!(
        path = %path.display(),
        %attr_type,
        attr_length,
        page_size,
        "created index file"
    );
    Ok(())
}

/// Delete an index file.
pub fn destroy_index_file(path: &Path) -> Result<(), IndexError> {
    PagedFile::destroy(path)?;
    tracing::debug!(path = %path.display(), "destroyed index file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileError;

    #[test]
    fn test_create_writes_rootless_header() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("idx");
        create_index_file(&path, AttrType::Int, 4, 4092).expect("create");

        let file = PagedFile::open(&path, 4).expect("open");
        let header = IndexHeader::read(&file).expect("read header");
        assert_eq!(header.root, None);
        assert_eq!(header.height, 0);
        assert_eq!(header.num_pages, 1);
        assert_eq!(header.max_keys, None);
        assert_eq!(header.attr.attr_type(), AttrType::Int);
        assert_eq!(header.layout().max_keys(), 340);
    }

    #[test]
    fn test_create_validates_attribute() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("idx");

        assert!(matches!(
            create_index_file(&path, AttrType::Float, 8, 4092),
            Err(IndexError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            create_index_file(&path, AttrType::String, 1024, 2048),
            Err(IndexError::KeyTooLarge {
                length: 1024,
                page_size: 2048
            })
        ));
        assert!(matches!(
            create_index_file(&path, AttrType::Int, 4, 20),
            Err(IndexError::InvalidPageSize(20))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("idx");
        create_index_file(&path, AttrType::Int, 4, 4092).expect("create");
        assert!(matches!(
            create_index_file(&path, AttrType::Int, 4, 4092),
            Err(IndexError::Storage(FileError::AlreadyExists(_)))
        ));

        destroy_index_file(&path).expect("destroy");
        assert!(!path.exists());
        assert!(matches!(
            destroy_index_file(&path),
            Err(IndexError::Storage(FileError::Io(_)))
        ));
    }

    #[test]
    fn test_header_bytes() {
        let attr = Attribute::new(AttrType::String, 12).expect("valid");
        let mut header = IndexHeader::new(attr, 4092);
        header.root = Some(5);
        header.height = 3;
        header.num_pages = 17;
        header.max_keys = Some(header.layout().max_keys());

        let bytes = header.to_bytes();
        assert_eq!(&bytes[..8], b"IXBLINK1");
        assert_eq!(IndexHeader::from_bytes(&bytes).expect("parse"), header);
    }

    #[test]
    fn test_header_rejects_inconsistent_fields() {
        let attr = Attribute::new(AttrType::Int, 4).expect("valid");
        let mut header = IndexHeader::new(attr, 4092);

        header.root = Some(1);
        assert!(matches!(
            IndexHeader::from_bytes(&header.to_bytes()),
            Err(IndexError::InvalidIndexFile(_))
        ));

        header.height = 1;
        header.max_keys = Some(7);
        assert!(matches!(
            IndexHeader::from_bytes(&header.to_bytes()),
            Err(IndexError::InvalidIndexFile(_))
        ));

        assert!(matches!(
            IndexHeader::from_bytes(&[0u8; IndexHeader::SIZE]),
            Err(IndexError::InvalidIndexFile(_))
        ));
    }
}
