//! Paged file: page allocation, pinning and write-back.
//!
//! # File Format
//!
//! - Disk page 0: file header (magic, free list head, page count, page size)
//! - Disk page `n + 1`: user page `n`, an 8-byte [`PageHeader`] followed by
//!   `page_size` bytes handed out to callers
//!
//! Freed pages form a singly linked list threaded through `next_free`.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::buffer_pool::{BufferPool, FrameRef};
use crate::storage::page::{LIST_END, PAGE_USED, Page, PageError, PageHeader, PageId};

/// Magic bytes at the start of every paged file.
pub const MAGIC: [u8; 8] = *b"PGFILE01";

/// Smallest user-visible page size accepted by [`PagedFile::create`].
pub const MIN_PAGE_SIZE: usize = 32;

/// Largest user-visible page size accepted by [`PagedFile::create`].
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Persistent metadata stored in the first disk page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
    first_free: PageId,
    num_pages: i32,
    page_size: usize,
}

impl FileHeader {
    const SIZE: usize = 20;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.first_free.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        // Bounded by MAX_PAGE_SIZE.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let page_size = self.page_size as i32;
        buf[16..20].copy_from_slice(&page_size.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; Self::SIZE]) -> Result<Self, FileError> {
        if buf[0..8] != MAGIC {
            return Err(FileError::InvalidHeader("bad magic".to_string()));
        }
        let read = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        let first_free = read(8);
        let num_pages = read(12);
        let page_size = usize::try_from(read(16))
            .ok()
            .filter(|size| (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(size))
            .ok_or_else(|| FileError::InvalidHeader(format!("page size {}", read(16))))?;

        if num_pages < 0 || first_free < LIST_END || first_free >= num_pages {
            return Err(FileError::InvalidHeader(format!(
                "free list head {first_free} with {num_pages} pages"
            )));
        }

        Ok(Self {
            first_free,
            num_pages,
            page_size,
        })
    }

    const fn disk_page_size(self) -> usize {
        self.page_size + PageHeader::SIZE
    }
}

/// An open paged file.
///
/// All methods take `&self` so that several pages can be pinned at once;
/// the file is single-threaded and uses interior mutability.
pub struct PagedFile {
    path: PathBuf,
    file: RefCell<File>,
    header: Cell<FileHeader>,
    header_dirty: Cell<bool>,
    pool: RefCell<BufferPool>,
    closed: bool,
}

impl PagedFile {
    /// Create a new, empty paged file with user pages of `page_size` bytes.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, page_size: usize) -> Result<(), FileError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(FileError::InvalidPageSize(page_size));
        }
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        let header = FileHeader {
            first_free: LIST_END,
            num_pages: 0,
            page_size,
        };
        let mut first = vec![0u8; header.disk_page_size()];
        first[..FileHeader::SIZE].copy_from_slice(&header.to_bytes());
        file.write_all(&first).map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!(path = %path.display(), page_size, "created paged file");
        Ok(())
    }

    /// Remove a paged file from disk.
    pub fn destroy(path: &Path) -> Result<(), FileError> {
        std::fs::remove_file(path).map_err(FileError::Io)?;
        tracing::debug!(path = %path.display(), "destroyed paged file");
        Ok(())
    }

    /// Open an existing paged file with a pool of `buffer_capacity` frames.
    pub fn open(path: &Path, buffer_capacity: usize) -> Result<Self, FileError> {
        if buffer_capacity == 0 {
            return Err(FileError::InvalidBufferCapacity);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut buf = [0u8; FileHeader::SIZE];
        file.read_exact(&mut buf).map_err(FileError::Io)?;
        let header = FileHeader::from_bytes(&buf)?;

        tracing::debug!(
            path = %path.display(),
            num_pages = header.num_pages,
            page_size = header.page_size,
            "opened paged file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: RefCell::new(file),
            header: Cell::new(header),
            header_dirty: Cell::new(false),
            pool: RefCell::new(BufferPool::new(
                buffer_capacity,
                header.disk_page_size(),
            )),
            closed: false,
        })
    }

    /// Force everything to disk and close the file.
    ///
    /// Fails if any page is still pinned.
    pub fn close(mut self) -> Result<(), FileError> {
        let pinned = self.pool.borrow().pinned_count();
        if pinned > 0 {
            return Err(FileError::PagesStillPinned(pinned));
        }
        self.force_pages()?;
        self.closed = true;
        tracing::debug!(path = %self.path.display(), "closed paged file");
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User-visible bytes per page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.header.get().page_size
    }

    /// Pages ever allocated, including those on the free list.
    #[must_use]
    pub fn num_pages(&self) -> i32 {
        self.header.get().num_pages
    }

    /// Pin a used page.
    pub fn get_page(&self, page_id: PageId) -> Result<PinnedPage<'_>, FileError> {
        let page = self.pin(page_id)?;
        if !page.borrow().header().is_used() {
            drop(page);
            self.unpin(page_id)?;
            return Err(FileError::PageFree(page_id));
        }
        Ok(PinnedPage {
            file: self,
            page_id,
            page,
        })
    }

    /// Allocate a zeroed page, reusing the free list first.
    ///
    /// The page comes back pinned and dirty.
    pub fn allocate_page(&self) -> Result<PinnedPage<'_>, FileError> {
        let mut header = self.header.get();

        let (page_id, page) = if header.first_free == LIST_END {
            let page_id = header.num_pages;
            let page = self.claim(page_id)?;
            header.num_pages += 1;
            (page_id, page)
        } else {
            let page_id = header.first_free;
            let page = self.pin(page_id)?;
            let next_free = page.borrow().header().next_free;
            if next_free == PAGE_USED {
                drop(page);
                self.unpin(page_id)?;
                return Err(FileError::InvalidHeader(format!(
                    "free list head {page_id} is in use"
                )));
            }
            header.first_free = next_free;
            (page_id, page)
        };

        page.borrow_mut().reset();
        self.pool.borrow_mut().mark_dirty(page_id);
        self.header.set(header);
        self.header_dirty.set(true);

        Ok(PinnedPage {
            file: self,
            page_id,
            page,
        })
    }

    /// Return an unpinned page to the free list.
    pub fn dispose_page(&self, page_id: PageId) -> Result<(), FileError> {
        if self.pool.borrow().is_pinned(page_id) {
            return Err(FileError::PagePinned(page_id));
        }

        let mut header = self.header.get();
        let page = self.pin(page_id)?;
        let current = page.borrow().header();
        if !current.is_used() {
            drop(page);
            self.unpin(page_id)?;
            return Err(FileError::PageFree(page_id));
        }

        page.borrow_mut().set_header(PageHeader {
            next_free: header.first_free,
            checksum: 0,
        });
        drop(page);
        self.pool.borrow_mut().mark_dirty(page_id);
        self.unpin(page_id)?;

        header.first_free = page_id;
        self.header.set(header);
        self.header_dirty.set(true);
        Ok(())
    }

    /// Flag a pinned page for write-back.
    pub fn mark_dirty(&self, page_id: PageId) -> Result<(), FileError> {
        let mut pool = self.pool.borrow_mut();
        if !pool.is_pinned(page_id) {
            return Err(FileError::PageNotPinned(page_id));
        }
        pool.mark_dirty(page_id);
        Ok(())
    }

    /// Write every dirty page and the file header, then sync.
    ///
    /// Pages stay resident and keep their pins.
    pub fn force_pages(&self) -> Result<(), FileError> {
        let dirty = self.pool.borrow().dirty_frames();
        for (frame, page_id) in dirty {
            let page = self.pool.borrow().frame_page(frame);
            self.write_back(page_id, &page)?;
            self.pool.borrow_mut().clear_dirty(frame);
        }

        if self.header_dirty.get() {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
            file.write_all(&self.header.get().to_bytes())
                .map_err(FileError::Io)?;
            self.header_dirty.set(false);
        }

        self.file.borrow().sync_all().map_err(FileError::Io)
    }

    fn unpin(&self, page_id: PageId) -> Result<(), FileError> {
        if self.pool.borrow_mut().unpin(page_id) {
            Ok(())
        } else {
            Err(FileError::PageNotPinned(page_id))
        }
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), FileError> {
        if page_id < 0 || page_id >= self.num_pages() {
            return Err(FileError::InvalidPage(page_id));
        }
        Ok(())
    }

    /// Pin a page, loading it from disk if needed. No used/free check.
    fn pin(&self, page_id: PageId) -> Result<FrameRef, FileError> {
        self.check_bounds(page_id)?;
        if let Some(page) = self.pool.borrow_mut().pin_resident(page_id) {
            return Ok(page);
        }

        let page = self.claim(page_id)?;
        let loaded = self.read_into(page_id, &mut page.borrow_mut());
        if let Err(e) = loaded {
            drop(page);
            self.pool.borrow_mut().abandon(page_id);
            return Err(e);
        }
        Ok(page)
    }

    /// Obtain a pinned frame for `page_id`, writing back its victim first.
    fn claim(&self, page_id: PageId) -> Result<FrameRef, FileError> {
        let victim = self
            .pool
            .borrow_mut()
            .victim()
            .ok_or(FileError::BufferPoolExhausted)?;

        if let (Some(old), true) = (victim.page_id, victim.dirty) {
            let page = self.pool.borrow().frame_page(victim.frame);
            self.write_back(old, &page)?;
        }

        Ok(self.pool.borrow_mut().install(victim.frame, page_id, false))
    }

    fn offset(&self, page_id: PageId) -> u64 {
        let disk_page_size = self.header.get().disk_page_size() as u64;
        // Caller has bounds-checked page_id, so it is non-negative.
        u64::from(page_id.unsigned_abs() + 1) * disk_page_size
    }

    fn read_into(&self, page_id: PageId, page: &mut Page) -> Result<(), FileError> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(self.offset(page_id)))
            .map_err(FileError::Io)?;
        file.read_exact(page.as_bytes_mut()).map_err(FileError::Io)?;
        page.verify()
            .map_err(|source| FileError::Page { page_id, source })
    }

    fn write_back(&self, page_id: PageId, page: &RefCell<Page>) -> Result<(), FileError> {
        let mut page = page.borrow_mut();
        page.seal();
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(self.offset(page_id)))
            .map_err(FileError::Io)?;
        file.write_all(page.as_bytes()).map_err(FileError::Io)
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.force_pages() {
            tracing::warn!(path = %self.path.display(), "failed to flush paged file on drop: {e}");
        }
    }
}

/// A pinned page. Unpins on drop.
pub struct PinnedPage<'a> {
    file: &'a PagedFile,
    page_id: PageId,
    page: FrameRef,
}

impl PinnedPage<'_> {
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The user-visible region.
    #[must_use]
    pub fn bytes(&self) -> Ref<'_, [u8]> {
        Ref::map(self.page.borrow(), Page::user_bytes)
    }

    /// The user-visible region, marking the page dirty.
    pub fn bytes_mut(&mut self) -> RefMut<'_, [u8]> {
        self.mark_dirty();
        RefMut::map(self.page.borrow_mut(), Page::user_bytes_mut)
    }

    pub fn mark_dirty(&self) {
        self.file.pool.borrow_mut().mark_dirty(self.page_id);
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.file.unpin(self.page_id) {
            tracing::warn!(page_id = self.page_id, "unpin failed: {e}");
        }
    }
}

impl std::fmt::Debug for PinnedPage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("page_id", &self.page_id)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during paged file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// The file header is not valid.
    InvalidHeader(String),
    /// Page size outside the supported range.
    InvalidPageSize(usize),
    /// Page id out of range.
    InvalidPage(PageId),
    /// Page is on the free list.
    PageFree(PageId),
    /// Page is pinned and cannot be disposed.
    PagePinned(PageId),
    /// Page is not pinned.
    PageNotPinned(PageId),
    /// Every frame is pinned.
    BufferPoolExhausted,
    /// Open requested with an empty buffer pool.
    InvalidBufferCapacity,
    /// Page contents failed validation.
    Page { page_id: PageId, source: PageError },
    /// Close requested while pages are pinned.
    PagesStillPinned(usize),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::InvalidHeader(reason) => write!(f, "invalid file header: {reason}"),
            Self::InvalidPageSize(size) => write!(
                f,
                "page size {size} outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"
            ),
            Self::InvalidPage(page_id) => write!(f, "invalid page {page_id}"),
            Self::PageFree(page_id) => write!(f, "page {page_id} is free"),
            Self::PagePinned(page_id) => write!(f, "page {page_id} is pinned"),
            Self::PageNotPinned(page_id) => write!(f, "page {page_id} is not pinned"),
            Self::BufferPoolExhausted => write!(f, "buffer pool exhausted"),
            Self::InvalidBufferCapacity => write!(f, "buffer pool needs at least one frame"),
            Self::Page { page_id, source } => write!(f, "page {page_id}: {source}"),
            Self::PagesStillPinned(count) => write!(f, "{count} pages still pinned"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Page { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_file(page_size: usize) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("test.pf");
        PagedFile::create(&path, page_size).expect("create file");
        (dir, path)
    }

    #[test]
    fn test_create_rejects_existing_and_bad_size() {
        let (_dir, path) = create_test_file(64);
        assert!(matches!(
            PagedFile::create(&path, 64),
            Err(FileError::AlreadyExists(_))
        ));
        assert!(matches!(
            PagedFile::create(&path.with_extension("x"), 8),
            Err(FileError::InvalidPageSize(8))
        ));
    }

    #[test]
    fn test_open_rejects_empty_pool() {
        let (_dir, path) = create_test_file(64);
        assert!(matches!(
            PagedFile::open(&path, 0),
            Err(FileError::InvalidBufferCapacity)
        ));
        PagedFile::open(&path, 1)
            .expect("one frame is enough")
            .close()
            .expect("close");
    }

    #[test]
    fn test_allocate_write_reopen() {
        let (_dir, path) = create_test_file(64);

        let file = PagedFile::open(&path, 4).expect("open");
        assert_eq!(file.num_pages(), 0);
        {
            let mut page = file.allocate_page().expect("allocate");
            assert_eq!(page.page_id(), 0);
            assert_eq!(page.bytes().len(), 64);
            page.bytes_mut()[..5].copy_from_slice(b"hello");
        }
        file.close().expect("close");

        let file = PagedFile::open(&path, 4).expect("reopen");
        assert_eq!(file.num_pages(), 1);
        assert_eq!(file.page_size(), 64);
        let page = file.get_page(0).expect("get page");
        assert_eq!(&page.bytes()[..5], b"hello");
    }

    #[test]
    fn test_dispose_recycles_page() {
        let (_dir, path) = create_test_file(64);
        let file = PagedFile::open(&path, 4).expect("open");

        let first = file.allocate_page().expect("allocate").page_id();
        let second = file.allocate_page().expect("allocate").page_id();
        assert_eq!((first, second), (0, 1));

        file.dispose_page(first).expect("dispose");
        assert!(matches!(file.get_page(first), Err(FileError::PageFree(0))));
        assert!(matches!(
            file.dispose_page(first),
            Err(FileError::PageFree(0))
        ));

        let reused = file.allocate_page().expect("allocate");
        assert_eq!(reused.page_id(), first);
        assert!(reused.bytes().iter().all(|&b| b == 0));
        assert_eq!(file.num_pages(), 2);
    }

    #[test]
    fn test_dispose_pinned_page_fails() {
        let (_dir, path) = create_test_file(64);
        let file = PagedFile::open(&path, 4).expect("open");

        let page = file.allocate_page().expect("allocate");
        assert!(matches!(
            file.dispose_page(page.page_id()),
            Err(FileError::PagePinned(0))
        ));
    }

    #[test]
    fn test_invalid_page_ids() {
        let (_dir, path) = create_test_file(64);
        let file = PagedFile::open(&path, 4).expect("open");

        assert!(matches!(file.get_page(0), Err(FileError::InvalidPage(0))));
        assert!(matches!(file.get_page(-1), Err(FileError::InvalidPage(-1))));
        assert!(matches!(
            file.mark_dirty(0),
            Err(FileError::PageNotPinned(0))
        ));
    }

    #[test]
    fn test_eviction_writes_back() {
        let (_dir, path) = create_test_file(64);
        let file = PagedFile::open(&path, 2).expect("open");

        for i in 0..6u8 {
            let mut page = file.allocate_page().expect("allocate");
            page.bytes_mut()[0] = i;
        }
        for i in 0..6u8 {
            let page = file.get_page(PageId::from(i)).expect("get page");
            assert_eq!(page.bytes()[0], i);
        }
    }

    #[test]
    fn test_pool_exhausted_when_all_pinned() {
        let (_dir, path) = create_test_file(64);
        let file = PagedFile::open(&path, 2).expect("open");

        let _a = file.allocate_page().expect("allocate");
        let _b = file.allocate_page().expect("allocate");
        assert!(matches!(
            file.allocate_page(),
            Err(FileError::BufferPoolExhausted)
        ));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let (_dir, path) = create_test_file(64);
        {
            let file = PagedFile::open(&path, 4).expect("open");
            let mut page = file.allocate_page().expect("allocate");
            page.bytes_mut()[0] = 42;
            drop(page);
            file.close().expect("close");
        }

        // Flip a byte inside user page 0 (disk page 1).
        let disk_page = (64 + PageHeader::SIZE) as u64;
        let mut raw = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("open raw");
        raw.seek(SeekFrom::Start(disk_page + PageHeader::SIZE as u64))
            .expect("seek");
        raw.write_all(&[7]).expect("corrupt");
        drop(raw);

        let file = PagedFile::open(&path, 4).expect("open");
        assert!(matches!(
            file.get_page(0),
            Err(FileError::Page {
                page_id: 0,
                source: PageError::ChecksumMismatch { .. }
            })
        ));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("garbage.pf");
        std::fs::write(&path, [0u8; 64]).expect("write");
        assert!(matches!(
            PagedFile::open(&path, 4),
            Err(FileError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_destroy_removes_file() {
        let (_dir, path) = create_test_file(64);
        PagedFile::destroy(&path).expect("destroy");
        assert!(!path.exists());
    }
}
