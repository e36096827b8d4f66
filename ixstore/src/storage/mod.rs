//! Paged file storage.
//!
//! A single file of fixed-size pages with a free list, a small buffer pool
//! and checksummed write-back.
//!
//! # Usage
//!
//! ```ignore
//! PagedFile::create(path, 4092)?;
//! let file = PagedFile::open(path, 40)?;
//!
//! let mut page = file.allocate_page()?;
//! page.bytes_mut()[..5].copy_from_slice(b"hello");
//! drop(page); // unpins
//!
//! file.close()?;
//! ```

mod buffer_pool;
mod file;
mod page;

pub use buffer_pool::DEFAULT_POOL_CAPACITY;
pub use file::{FileError, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PagedFile, PinnedPage};
pub use page::{PageError, PageId};
