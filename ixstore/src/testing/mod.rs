use std::path::{Path, PathBuf};

use crate::index::{AttrType, CompOp, IndexHandle, Rid, create_index_file};
use crate::storage::PagedFile;

pub fn int_key(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Create an empty paged file in a fresh temp directory.
pub fn create_paged_file(page_size: usize) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("test.pf");
    PagedFile::create(&path, page_size).expect("create paged file");
    (dir, path)
}

/// An index file that lives as long as the fixture.
pub struct TestIndex {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl TestIndex {
    /// An integer index with nodes of `page_size` bytes.
    pub fn int(page_size: usize) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("test.ix");
        create_index_file(&path, AttrType::Int, 4, page_size).expect("create index");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> IndexHandle {
        let mut handle = IndexHandle::new();
        handle.open(&self.path).expect("open index");
        handle
    }
}

/// Every locator an integer scan returns, in scan order.
pub fn collect_scan(handle: &IndexHandle, op: CompOp, value: i32) -> Vec<Rid> {
    let mut scan = handle.open_scan(op, &int_key(value)).expect("open scan");
    let mut found = Vec::new();
    while let Some(rid) = scan.next_entry().expect("next entry") {
        found.push(rid);
    }
    found
}
