//! Node codec: a typed view over one pinned page.
//!
//! Layout of the user region (offsets computed once per index):
//!
//! ```text
//! [key 0 .. key maxKeys-1][rid 0 .. rid maxKeys-1][numKeys i32][left i32][right i32]
//! ```
//!
//! Keys in `[0, numKeys)` are non-decreasing under the attribute's
//! comparison. Leaf nodes hold record locators; internal nodes hold routing
//! locators whose key is the maximum key of the child subtree. Sibling links
//! use `-1` on disk for "none".

use std::cmp::Ordering;

use crate::index::attr::Attribute;
use crate::index::rid::Rid;
use crate::storage::{FileError, PageId, PagedFile, PinnedPage};

/// Per-index node geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    attr: Attribute,
    max_keys: usize,
}

impl NodeLayout {
    /// Count plus two sibling links.
    pub const TRAILER_SIZE: usize = 12;

    /// Geometry for nodes of `page_size` bytes holding `attr` keys.
    #[must_use]
    pub const fn for_page(attr: Attribute, page_size: usize) -> Self {
        let max_keys = page_size.saturating_sub(Self::TRAILER_SIZE) / (attr.length() + Rid::SIZE);
        Self { attr, max_keys }
    }

    #[must_use]
    pub const fn attr(self) -> Attribute {
        self.attr
    }

    #[must_use]
    pub const fn max_keys(self) -> usize {
        self.max_keys
    }

    #[must_use]
    pub const fn key_len(self) -> usize {
        self.attr.length()
    }

    const fn key_offset(self, pos: usize) -> usize {
        pos * self.key_len()
    }

    const fn rid_offset(self, pos: usize) -> usize {
        self.max_keys * self.key_len() + pos * Rid::SIZE
    }

    const fn count_offset(self) -> usize {
        self.max_keys * (self.key_len() + Rid::SIZE)
    }

    const fn left_offset(self) -> usize {
        self.count_offset() + 4
    }

    const fn right_offset(self) -> usize {
        self.count_offset() + 8
    }
}

/// Outcome of a successful [`Node::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Remaining,
    Empty,
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn write_i32(bytes: &mut [u8], at: usize, value: i32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn link_to_raw(link: Option<PageId>) -> i32 {
    link.unwrap_or(-1)
}

fn raw_to_link(raw: i32) -> Option<PageId> {
    (raw >= 0).then_some(raw)
}

/// A node overlaid on a pinned page. Dropping the node unpins the page.
pub struct Node<'a> {
    page: PinnedPage<'a>,
    layout: NodeLayout,
}

impl<'a> Node<'a> {
    /// View an existing node.
    #[must_use]
    pub const fn load(page: PinnedPage<'a>, layout: NodeLayout) -> Self {
        Self { page, layout }
    }

    /// Format the page as an empty node without siblings.
    #[must_use]
    pub fn init(page: PinnedPage<'a>, layout: NodeLayout) -> Self {
        let mut node = Self { page, layout };
        node.set_num_keys(0);
        node.set_left(None);
        node.set_right(None);
        node
    }

    pub fn fetch(file: &'a PagedFile, layout: NodeLayout, page_id: PageId) -> Result<Self, FileError> {
        Ok(Self::load(file.get_page(page_id)?, layout))
    }

    /// Allocate a page and format it as an empty node.
    pub fn allocate(file: &'a PagedFile, layout: NodeLayout) -> Result<Self, FileError> {
        Ok(Self::init(file.allocate_page()?, layout))
    }
}

impl Node<'_> {
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    #[must_use]
    pub fn num_keys(&self) -> usize {
        let raw = read_i32(&self.page.bytes(), self.layout.count_offset());
        usize::try_from(raw).unwrap_or(0)
    }

    // Counts are bounded by max_keys, which fits a page.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn set_num_keys(&mut self, count: usize) {
        assert!(
            count <= self.layout.max_keys,
            "count {count} exceeds capacity {}",
            self.layout.max_keys
        );
        let at = self.layout.count_offset();
        write_i32(&mut self.page.bytes_mut(), at, count as i32);
    }

    #[must_use]
    pub fn left(&self) -> Option<PageId> {
        raw_to_link(read_i32(&self.page.bytes(), self.layout.left_offset()))
    }

    #[must_use]
    pub fn right(&self) -> Option<PageId> {
        raw_to_link(read_i32(&self.page.bytes(), self.layout.right_offset()))
    }

    pub fn set_left(&mut self, page: Option<PageId>) {
        let at = self.layout.left_offset();
        write_i32(&mut self.page.bytes_mut(), at, link_to_raw(page));
    }

    pub fn set_right(&mut self, page: Option<PageId>) {
        let at = self.layout.right_offset();
        write_i32(&mut self.page.bytes_mut(), at, link_to_raw(page));
    }

    fn check_pos(&self, pos: usize) {
        let count = self.num_keys();
        assert!(pos < count, "position {pos} out of bounds ({count} keys)");
    }

    #[must_use]
    pub fn key_at(&self, pos: usize) -> Vec<u8> {
        self.check_pos(pos);
        let l = self.layout;
        self.page.bytes()[l.key_offset(pos)..l.key_offset(pos + 1)].to_vec()
    }

    #[must_use]
    pub fn rid_at(&self, pos: usize) -> Rid {
        self.check_pos(pos);
        Rid::from_bytes(&self.page.bytes()[self.layout.rid_offset(pos)..])
    }

    pub fn set_key(&mut self, pos: usize, key: &[u8]) {
        self.check_pos(pos);
        let l = self.layout;
        assert_eq!(key.len(), l.key_len(), "key width");
        self.page.bytes_mut()[l.key_offset(pos)..l.key_offset(pos + 1)].copy_from_slice(key);
    }

    pub fn set_rid(&mut self, pos: usize, rid: Rid) {
        self.check_pos(pos);
        let l = self.layout;
        self.page.bytes_mut()[l.rid_offset(pos)..l.rid_offset(pos + 1)]
            .copy_from_slice(&rid.to_bytes());
    }

    /// The largest key, i.e. this node's routing bound.
    #[must_use]
    pub fn last_key(&self) -> Option<Vec<u8>> {
        self.num_keys().checked_sub(1).map(|pos| self.key_at(pos))
    }

    /// Compare the key at `pos` with `key`.
    #[must_use]
    pub fn compare_at(&self, pos: usize, key: &[u8]) -> Ordering {
        self.check_pos(pos);
        let l = self.layout;
        let bytes = self.page.bytes();
        l.attr.compare(&bytes[l.key_offset(pos)..l.key_offset(pos + 1)], key)
    }

    /// Leaf nodes hold record locators. An empty node counts as a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.num_keys() == 0 || !self.rid_at(0).is_routing()
    }

    /// Leftmost position whose key is `>= key`; `num_keys()` if none.
    #[must_use]
    pub fn locate(&self, key: &[u8]) -> usize {
        self.partition(|ordering| ordering == Ordering::Less, key)
    }

    /// Leftmost position whose key is `> key`; `num_keys()` if none.
    #[must_use]
    pub fn locate_upper(&self, key: &[u8]) -> usize {
        self.partition(|ordering| ordering != Ordering::Greater, key)
    }

    fn partition(&self, before: impl Fn(Ordering) -> bool, key: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.num_keys());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if before(self.compare_at(mid, key)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Insert a pair at `pos`, or at [`Self::locate`] when `pos` is `None`.
    ///
    /// Returns the position written.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn insert(&mut self, key: &[u8], rid: Rid, pos: Option<usize>) -> Result<usize, NodeError> {
        let count = self.num_keys();
        if count >= self.layout.max_keys {
            return Err(NodeError::Full);
        }
        let l = self.layout;
        assert_eq!(key.len(), l.key_len(), "key width");
        let pos = pos.unwrap_or_else(|| self.locate(key));
        assert!(pos <= count, "insert position {pos} past {count} keys");

        let mut bytes = self.page.bytes_mut();
        bytes.copy_within(l.key_offset(pos)..l.key_offset(count), l.key_offset(pos + 1));
        bytes.copy_within(l.rid_offset(pos)..l.rid_offset(count), l.rid_offset(pos + 1));
        bytes[l.key_offset(pos)..l.key_offset(pos + 1)].copy_from_slice(key);
        bytes[l.rid_offset(pos)..l.rid_offset(pos + 1)].copy_from_slice(&rid.to_bytes());
        write_i32(&mut bytes, l.count_offset(), (count + 1) as i32);
        Ok(pos)
    }

    /// Remove the pair at `pos`, shifting later pairs left.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn remove(&mut self, pos: usize) -> Result<Removal, NodeError> {
        let count = self.num_keys();
        if pos >= count {
            return Err(NodeError::NoSuchPosition {
                pos,
                num_keys: count,
            });
        }
        let l = self.layout;

        let mut bytes = self.page.bytes_mut();
        bytes.copy_within(l.key_offset(pos + 1)..l.key_offset(count), l.key_offset(pos));
        bytes.copy_within(l.rid_offset(pos + 1)..l.rid_offset(count), l.rid_offset(pos));
        bytes[l.key_offset(count - 1)..l.key_offset(count)].fill(0);
        bytes[l.rid_offset(count - 1)..l.rid_offset(count)].fill(0);
        write_i32(&mut bytes, l.count_offset(), (count - 1) as i32);

        Ok(if count == 1 {
            Removal::Empty
        } else {
            Removal::Remaining
        })
    }

    /// Move the upper half of this full node into `dest`.
    ///
    /// Positions `(n + 1) / 2 ..` are appended after `dest`'s entries and
    /// `dest` is linked in as this node's right sibling. The caller fixes
    /// the old right neighbour's `left` link.
    pub fn split(&mut self, dest: &mut Self) -> Result<(), NodeError> {
        assert_ne!(self.page_id(), dest.page_id(), "cannot split into self");
        assert_eq!(self.layout, dest.layout, "layouts differ");

        let count = self.num_keys();
        let max_keys = self.layout.max_keys;
        if count < max_keys {
            return Err(NodeError::NotFull {
                num_keys: count,
                max_keys,
            });
        }

        let at = count.div_ceil(2);
        let moving = count - at;
        let dest_count = dest.num_keys();
        if dest_count + moving > max_keys {
            return Err(NodeError::InsufficientCapacity {
                needed: moving,
                available: max_keys - dest_count,
            });
        }

        let l = self.layout;
        {
            let src = self.page.bytes();
            let mut dst = dest.page.bytes_mut();
            dst[l.key_offset(dest_count)..l.key_offset(dest_count + moving)]
                .copy_from_slice(&src[l.key_offset(at)..l.key_offset(count)]);
            dst[l.rid_offset(dest_count)..l.rid_offset(dest_count + moving)]
                .copy_from_slice(&src[l.rid_offset(at)..l.rid_offset(count)]);
        }
        dest.set_num_keys(dest_count + moving);
        self.set_num_keys(at);

        dest.set_right(self.right());
        dest.set_left(Some(self.page_id()));
        self.set_right(Some(dest.page_id()));
        Ok(())
    }

    /// Absorb an adjacent sibling's entries.
    ///
    /// A right sibling's entries are appended, a left sibling's prepended.
    /// This node inherits the sibling's outward link; `sibling` is left
    /// empty. The caller fixes the outward neighbour's back link.
    pub fn merge(&mut self, sibling: &mut Self) -> Result<(), NodeError> {
        assert_eq!(self.layout, sibling.layout, "layouts differ");

        let append = if self.right() == Some(sibling.page_id()) {
            true
        } else if self.left() == Some(sibling.page_id()) {
            false
        } else {
            return Err(NodeError::NotAdjacent {
                page: self.page_id(),
                sibling: sibling.page_id(),
            });
        };

        let count = self.num_keys();
        let incoming = sibling.num_keys();
        let max_keys = self.layout.max_keys;
        if count + incoming > max_keys {
            return Err(NodeError::InsufficientCapacity {
                needed: incoming,
                available: max_keys - count,
            });
        }

        let l = self.layout;
        {
            let src = sibling.page.bytes();
            let mut dst = self.page.bytes_mut();
            let start = if append {
                count
            } else {
                dst.copy_within(l.key_offset(0)..l.key_offset(count), l.key_offset(incoming));
                dst.copy_within(l.rid_offset(0)..l.rid_offset(count), l.rid_offset(incoming));
                0
            };
            dst[l.key_offset(start)..l.key_offset(start + incoming)]
                .copy_from_slice(&src[l.key_offset(0)..l.key_offset(incoming)]);
            dst[l.rid_offset(start)..l.rid_offset(start + incoming)]
                .copy_from_slice(&src[l.rid_offset(0)..l.rid_offset(incoming)]);
        }
        self.set_num_keys(count + incoming);
        sibling.set_num_keys(0);

        if append {
            self.set_right(sibling.right());
        } else {
            self.set_left(sibling.left());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("page_id", &self.page_id())
            .field("num_keys", &self.num_keys())
            .field("left", &self.left())
            .field("right", &self.right())
            .finish()
    }
}

/// Errors from node mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// No free slot.
    Full,
    /// Position past the last entry.
    NoSuchPosition { pos: usize, num_keys: usize },
    /// Split requested on a node that is not full.
    NotFull { num_keys: usize, max_keys: usize },
    /// The receiving node cannot take the entries.
    InsufficientCapacity { needed: usize, available: usize },
    /// Merge requested with a node that is not a direct sibling.
    NotAdjacent { page: PageId, sibling: PageId },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "node is full"),
            Self::NoSuchPosition { pos, num_keys } => {
                write!(f, "no entry at position {pos} (node has {num_keys})")
            }
            Self::NotFull { num_keys, max_keys } => {
                write!(f, "cannot split a node with {num_keys} of {max_keys} keys")
            }
            Self::InsufficientCapacity { needed, available } => {
                write!(f, "need room for {needed} entries, {available} available")
            }
            Self::NotAdjacent { page, sibling } => {
                write!(f, "page {sibling} is not a sibling of page {page}")
            }
        }
    }
}

impl std::error::Error for NodeError {}
