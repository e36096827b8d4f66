//! Frame bookkeeping for a paged file.
//!
//! The pool owns a fixed number of page frames and tracks which page each
//! frame holds, how many pins it carries and whether it needs write-back.
//! It never touches the disk itself: [`crate::storage::PagedFile`] asks it
//! for a frame, writes back the victim if needed, and then installs the new
//! page.
//!
//! # Invariants
//!
//! - `frames.len() <= capacity`
//! - A page id appears in `page_table` iff exactly one frame holds it
//! - Pinned frames are never chosen as victims

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::storage::page::{Page, PageId};

/// Frames per open file when nothing else is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 40;

/// A shared page buffer. Pins hand out clones of the `Rc`.
pub type FrameRef = Rc<RefCell<Page>>;

struct Frame {
    page_id: Option<PageId>,
    page: FrameRef,
    pin_count: u32,
    dirty: bool,
    last_used: u64,
}

/// A frame chosen to receive a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub frame: usize,
    /// The page currently held by the frame, if any.
    pub page_id: Option<PageId>,
    /// Whether the current page must be written back before reuse.
    pub dirty: bool,
}

/// Fixed-capacity frame table with LRU replacement of unpinned frames.
pub struct BufferPool {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    capacity: usize,
    page_len: usize,
    tick: u64,
}

impl BufferPool {
    /// Create a pool of `capacity` frames of `page_len` bytes each.
    ///
    /// Frames are allocated lazily.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(capacity: usize, page_len: usize) -> Self {
        assert!(capacity > 0, "Buffer pool capacity must be positive");
        Self {
            frames: Vec::with_capacity(capacity),
            page_table: HashMap::with_capacity(capacity),
            capacity,
            page_len,
            tick: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    const fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Pin a page that is already resident.
    pub fn pin_resident(&mut self, page_id: PageId) -> Option<FrameRef> {
        let index = *self.page_table.get(&page_id)?;
        let tick = self.touch();
        let frame = &mut self.frames[index];
        frame.pin_count += 1;
        frame.last_used = tick;
        Some(Rc::clone(&frame.page))
    }

    /// Pick a frame for a new page: an empty frame, a fresh one while under
    /// capacity, or the least recently used unpinned frame.
    ///
    /// Returns `None` when every frame is pinned. The pool is not modified;
    /// call [`Self::install`] once the victim has been written back.
    pub fn victim(&mut self) -> Option<Victim> {
        if let Some(frame) = self.frames.iter().position(|f| f.page_id.is_none()) {
            return Some(Victim {
                frame,
                page_id: None,
                dirty: false,
            });
        }

        if self.frames.len() < self.capacity {
            self.frames.push(Frame {
                page_id: None,
                page: Rc::new(RefCell::new(Page::new(self.page_len))),
                pin_count: 0,
                dirty: false,
                last_used: 0,
            });
            return Some(Victim {
                frame: self.frames.len() - 1,
                page_id: None,
                dirty: false,
            });
        }

        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(_, f)| f.last_used)
            .map(|(frame, f)| Victim {
                frame,
                page_id: f.page_id,
                dirty: f.dirty,
            })
    }

    /// The buffer behind a frame, for write-back and loading.
    #[must_use]
    pub fn frame_page(&self, frame: usize) -> FrameRef {
        Rc::clone(&self.frames[frame].page)
    }

    /// Bind `page_id` to `frame`, dropping whatever the frame held, and pin it.
    pub fn install(&mut self, frame: usize, page_id: PageId, dirty: bool) -> FrameRef {
        assert!(
            !self.page_table.contains_key(&page_id),
            "page {page_id} is already resident"
        );
        let tick = self.touch();
        let slot = &mut self.frames[frame];
        assert_eq!(slot.pin_count, 0, "cannot replace a pinned frame");
        if let Some(old) = slot.page_id.replace(page_id) {
            self.page_table.remove(&old);
        }
        slot.pin_count = 1;
        slot.dirty = dirty;
        slot.last_used = tick;
        let page = Rc::clone(&slot.page);
        self.page_table.insert(page_id, frame);
        page
    }

    /// Drop a page from its frame without write-back.
    pub fn abandon(&mut self, page_id: PageId) {
        if let Some(index) = self.page_table.remove(&page_id) {
            let frame = &mut self.frames[index];
            frame.page_id = None;
            frame.pin_count = 0;
            frame.dirty = false;
        }
    }

    /// Release one pin. Returns false if the page was not pinned.
    pub fn unpin(&mut self, page_id: PageId) -> bool {
        match self.page_table.get(&page_id) {
            Some(&index) if self.frames[index].pin_count > 0 => {
                self.frames[index].pin_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Flag a resident page for write-back. Returns false if not resident.
    pub fn mark_dirty(&mut self, page_id: PageId) -> bool {
        self.page_table.get(&page_id).is_some_and(|&index| {
            self.frames[index].dirty = true;
            true
        })
    }

    #[must_use]
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.page_table.contains_key(&page_id)
    }

    #[must_use]
    pub fn is_pinned(&self, page_id: PageId) -> bool {
        self.page_table
            .get(&page_id)
            .is_some_and(|&index| self.frames[index].pin_count > 0)
    }

    /// Number of frames with at least one pin.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    /// Resident pages awaiting write-back, as `(frame, page_id)` pairs.
    #[must_use]
    pub fn dirty_frames(&self) -> Vec<(usize, PageId)> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.dirty)
            .filter_map(|(index, f)| f.page_id.map(|id| (index, id)))
            .collect()
    }

    pub fn clear_dirty(&mut self, frame: usize) {
        self.frames[frame].dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(pool: &mut BufferPool, page_id: PageId) -> FrameRef {
        let victim = pool.victim().expect("frame available");
        pool.install(victim.frame, page_id, false)
    }

    #[test]
    fn test_frames_allocated_lazily() {
        let mut pool = BufferPool::new(3, 64);
        assert_eq!(pool.capacity(), 3);
        assert!(pool.dirty_frames().is_empty());

        let _a = fill(&mut pool, 10);
        assert!(pool.is_resident(10));
        assert!(pool.is_pinned(10));
        assert_eq!(pool.pinned_count(), 1);
    }

    #[test]
    fn test_exhausted_when_all_pinned() {
        let mut pool = BufferPool::new(2, 64);
        let _a = fill(&mut pool, 1);
        let _b = fill(&mut pool, 2);
        assert!(pool.victim().is_none());

        assert!(pool.unpin(1));
        let victim = pool.victim().expect("unpinned frame");
        assert_eq!(victim.page_id, Some(1));
    }

    #[test]
    fn test_lru_victim_and_dirty_flag() {
        let mut pool = BufferPool::new(2, 64);
        fill(&mut pool, 1);
        fill(&mut pool, 2);
        pool.unpin(1);
        pool.unpin(2);
        assert!(pool.mark_dirty(2));

        // Touch page 1 so page 2 becomes the LRU frame.
        pool.pin_resident(1).expect("resident");
        pool.unpin(1);

        let victim = pool.victim().expect("victim");
        assert_eq!(victim.page_id, Some(2));
        assert!(victim.dirty);

        pool.install(victim.frame, 3, false);
        assert!(!pool.is_resident(2));
        assert!(pool.is_resident(3));
    }

    #[test]
    fn test_unpin_and_abandon() {
        let mut pool = BufferPool::new(1, 64);
        fill(&mut pool, 4);
        assert!(pool.unpin(4));
        assert!(!pool.unpin(4));
        assert!(!pool.unpin(99));

        pool.abandon(4);
        assert!(!pool.is_resident(4));
        let victim = pool.victim().expect("free frame");
        assert_eq!(victim.page_id, None);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _pool = BufferPool::new(0, 64);
    }
}
