//! Operator-driven scans over the leaf level.
//!
//! A scan lands on the leaf entry nearest the comparison value and then
//! walks the leaf chain, forward for `=`, `>`, `>=` and `<>`, backward for
//! `<` and `<=`. It keeps exactly one leaf pinned between calls.

use std::cmp::Ordering;

use crate::index::node::{Node, NodeLayout};
use crate::index::rid::Rid;
use crate::index::IndexError;
use crate::storage::{PageId, PagedFile};

/// Comparison applied as `key <op> value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// What to do with the entry under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Match,
    Skip,
    Stop,
}

impl CompOp {
    /// Whether the scan walks right along the leaf chain.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        !matches!(self, Self::Lt | Self::Le)
    }

    /// Judge an entry by how its key compares with the target.
    const fn verdict(self, key_vs_target: Ordering) -> Verdict {
        use Ordering::{Equal, Greater, Less};
        match (self, key_vs_target) {
            (Self::Eq, Less)
            | (Self::Gt, Less | Equal)
            | (Self::Ge, Less)
            | (Self::Lt, Greater | Equal)
            | (Self::Le, Greater)
            | (Self::Ne, Equal) => Verdict::Skip,
            (Self::Eq, Greater) => Verdict::Stop,
            _ => Verdict::Match,
        }
    }
}

impl std::fmt::Display for CompOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

struct Cursor<'a> {
    node: Node<'a>,
    pos: usize,
    key: Vec<u8>,
}

/// An open scan. Ends when [`IndexScan::next_entry`] returns `Ok(None)`.
///
/// Borrowing the handle keeps the index from changing underneath the scan.
pub struct IndexScan<'a> {
    file: &'a PagedFile,
    layout: NodeLayout,
    op: CompOp,
    target: Vec<u8>,
    cursor: Option<Cursor<'a>>,
}

impl<'a> IndexScan<'a> {
    /// Position a scan on the leaf level of the tree rooted at `root`.
    pub fn open(
        file: &'a PagedFile,
        layout: NodeLayout,
        root: PageId,
        height: i32,
        op: CompOp,
        value: &[u8],
    ) -> Result<Self, IndexError> {
        let landing = |node: &Node<'_>| -> usize {
            let count = node.num_keys();
            let pos = match op {
                CompOp::Ne => 0,
                CompOp::Le => node.locate_upper(value),
                _ => node.locate(value),
            };
            pos.min(count.saturating_sub(1))
        };

        let mut node = Node::fetch(file, layout, root)?;
        for _ in 1..height {
            if node.num_keys() == 0 {
                return Err(IndexError::Corrupted(format!(
                    "empty internal node {}",
                    node.page_id()
                )));
            }
            let rid = node.rid_at(landing(&node));
            if !rid.is_routing() {
                break;
            }
            node = Node::fetch(file, layout, rid.page())?;
        }

        let cursor = if node.num_keys() == 0 {
            None
        } else {
            let pos = landing(&node);
            let key = node.key_at(pos);
            Some(Cursor { node, pos, key })
        };

        Ok(Self {
            file,
            layout,
            op,
            target: value.to_vec(),
            cursor,
        })
    }

    #[must_use]
    pub const fn op(&self) -> CompOp {
        self.op
    }

    /// Return the next matching locator, or `None` once the scan is done.
    pub fn next_entry(&mut self) -> Result<Option<Rid>, IndexError> {
        loop {
            let Some(cursor) = self.cursor.as_ref() else {
                return Ok(None);
            };
            let ordering = self.layout.attr().compare(&cursor.key, &self.target);
            match self.op.verdict(ordering) {
                Verdict::Stop => {
                    self.cursor = None;
                    return Ok(None);
                }
                Verdict::Skip => self.advance()?,
                Verdict::Match => {
                    let rid = cursor.node.rid_at(cursor.pos);
                    self.advance()?;
                    return Ok(Some(rid));
                }
            }
        }
    }

    /// Release the pinned leaf.
    pub fn close(self) {}

    /// Step one entry in the scan direction, crossing to the next leaf when
    /// the current one is exhausted.
    fn advance(&mut self) -> Result<(), IndexError> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        let forward = self.op.is_forward();

        let next_pos = if forward {
            Some(cursor.pos + 1).filter(|&pos| pos < cursor.node.num_keys())
        } else {
            cursor.pos.checked_sub(1)
        };
        if let Some(pos) = next_pos {
            cursor.pos = pos;
            cursor.key = cursor.node.key_at(pos);
            self.cursor = Some(cursor);
            return Ok(());
        }

        let outward = |node: &Node<'_>| if forward { node.right() } else { node.left() };
        let mut next = outward(&cursor.node);
        drop(cursor);

        while let Some(page) = next {
            let node = Node::fetch(self.file, self.layout, page)?;
            let count = node.num_keys();
            if count > 0 {
                let pos = if forward { 0 } else { count - 1 };
                let key = node.key_at(pos);
                self.cursor = Some(Cursor { node, pos, key });
                return Ok(());
            }
            next = outward(&node);
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexScan")
            .field("op", &self.op)
            .field("page", &self.cursor.as_ref().map(|c| c.node.page_id()))
            .field("pos", &self.cursor.as_ref().map(|c| c.pos))
            .finish_non_exhaustive()
    }
}
