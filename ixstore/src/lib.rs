//! Embedded secondary index storage.
//!
//! Two layers:
//!
//! - [`storage`]: a paged file with a free list, a small LRU buffer pool
//!   and checksummed pages
//! - [`index`]: a B-link tree over the paged file with insertion,
//!   deletion and operator-driven scans

pub mod config;
pub mod index;
pub mod storage;

#[cfg(test)]
mod testing;
