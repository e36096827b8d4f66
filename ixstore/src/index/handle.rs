//! Open index files: lifecycle, insertion and deletion.
//!
//! Every operation walks down from the root, pinning one node per level
//! while it is needed, and releases all pins before returning.

use std::cmp::Ordering;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::index::attr::{AttrValue, Attribute};
use crate::index::header::IndexHeader;
use crate::index::node::{Node, NodeError, NodeLayout, Removal};
use crate::index::rid::Rid;
use crate::index::scan::{CompOp, IndexScan};
use crate::index::verify::{self, TreeStats};
use crate::index::IndexError;
use crate::storage::{PageId, PagedFile};

/// A visited internal node and the position followed out of it.
#[derive(Debug, Clone, Copy)]
struct PathStep {
    page: PageId,
    pos: usize,
}

/// What the level above must do after a child changed.
#[derive(Debug)]
enum Adjust {
    Done,
    ChildEmptied,
    BoundChanged(Vec<u8>),
}

struct OpenIndex {
    path: PathBuf,
    file: PagedFile,
    header: IndexHeader,
    header_dirty: bool,
    layout: NodeLayout,
}

/// Handle to at most one open index file.
pub struct IndexHandle {
    buffer_capacity: usize,
    state: Option<OpenIndex>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexHandle {
    /// A closed handle using the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    #[must_use]
    pub const fn with_config(config: &EngineConfig) -> Self {
        Self {
            buffer_capacity: config.buffer_capacity,
            state: None,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Open an index file created by [`crate::index::create_index_file`].
    ///
    /// The first open of a new index creates an empty root leaf.
    pub fn open(&mut self, path: &Path) -> Result<(), IndexError> {
        if self.state.is_some() {
            return Err(IndexError::AlreadyOpen);
        }
        let index = OpenIndex::open(path, self.buffer_capacity)?;
        tracing::debug!(
            path = %path.display(),
            height = index.header.height,
            num_pages = index.header.num_pages,
            "opened index"
        );
        self.state = Some(index);
        Ok(())
    }

    /// Write back the header if it changed and close the file.
    pub fn close(&mut self) -> Result<(), IndexError> {
        let index = self.state.take().ok_or(IndexError::NotOpen)?;
        index.close()
    }

    /// Flush the header and all dirty pages without closing.
    pub fn force_pages(&mut self) -> Result<(), IndexError> {
        self.index_mut()?.force()
    }

    pub fn header(&self) -> Result<&IndexHeader, IndexError> {
        Ok(&self.index()?.header)
    }

    pub fn attribute(&self) -> Result<Attribute, IndexError> {
        Ok(self.index()?.header.attr)
    }

    /// Add `(key, rid)`. Duplicate keys are allowed.
    pub fn insert_entry(&mut self, key: &[u8], rid: Rid) -> Result<(), IndexError> {
        let index = self.index_mut()?;
        index.header.attr.check_key(key)?;
        if !rid.is_record() {
            return Err(IndexError::BadRid(rid));
        }
        index.tracking_header(|index| index.insert(key, rid))
    }

    /// Remove the entry matching both `key` and `rid`.
    pub fn delete_entry(&mut self, key: &[u8], rid: Rid) -> Result<(), IndexError> {
        let index = self.index_mut()?;
        index.header.attr.check_key(key)?;
        if !rid.is_record() {
            return Err(IndexError::BadRid(rid));
        }
        index.tracking_header(|index| index.delete(key, rid))
    }

    /// Start a scan for entries whose key satisfies `key <op> value`.
    pub fn open_scan(&self, op: CompOp, value: &[u8]) -> Result<IndexScan<'_>, IndexError> {
        let index = self.index()?;
        index.header.attr.check_key(value)?;
        IndexScan::open(&index.file, index.layout, index.root()?, index.header.height, op, value)
    }

    /// Check structural invariants and return tree statistics.
    pub fn verify(&self) -> Result<TreeStats, IndexError> {
        let index = self.index()?;
        verify::verify(&index.file, index.layout, &index.header)
    }

    /// Write the header and every node to `out`.
    pub fn dump(&self, out: &mut impl Write) -> Result<(), IndexError> {
        let index = self.index()?;
        let header = &index.header;
        writeln!(
            out,
            "index {}: {} keys of {} bytes, page size {}, max keys {}",
            index.path.display(),
            header.attr.attr_type(),
            header.attr.length(),
            header.page_size,
            index.layout.max_keys()
        )?;
        writeln!(
            out,
            "root {}, height {}, {} pages",
            index.root()?,
            header.height,
            header.num_pages
        )?;
        index.dump_node(out, index.root()?, 0)
    }

    fn index(&self) -> Result<&OpenIndex, IndexError> {
        self.state.as_ref().ok_or(IndexError::NotOpen)
    }

    fn index_mut(&mut self) -> Result<&mut OpenIndex, IndexError> {
        self.state.as_mut().ok_or(IndexError::NotOpen)
    }
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        if let Some(index) = self.state.take()
            && let Err(e) = index.close()
        {
            tracing::warn!("failed to close index on drop: {e}");
        }
    }
}

fn corrupted(reason: impl Into<String>) -> IndexError {
    IndexError::Corrupted(reason.into())
}

fn child_of(node: &Node<'_>, pos: usize) -> Result<PageId, IndexError> {
    let rid = node.rid_at(pos);
    if rid.is_routing() {
        Ok(rid.page())
    } else {
        Err(corrupted(format!(
            "page {} position {pos} holds record {rid} above leaf level",
            node.page_id()
        )))
    }
}

/// Find the entry routing to `child`, starting at the recorded step and
/// moving right across siblings.
fn resolve_parent<'f>(
    file: &'f PagedFile,
    layout: NodeLayout,
    step: PathStep,
    child: PageId,
) -> Result<(Node<'f>, usize), IndexError> {
    let mut parent = Node::fetch(file, layout, step.page)?;
    let mut pos = step.pos;
    loop {
        while pos < parent.num_keys() {
            if parent.rid_at(pos) == Rid::routing(child) {
                return Ok((parent, pos));
            }
            pos += 1;
        }
        let right = parent
            .right()
            .ok_or_else(|| corrupted(format!("no parent entry for page {child}")))?;
        parent = Node::fetch(file, layout, right)?;
        pos = 0;
    }
}

/// Unlink an empty node from its siblings and free its page.
///
/// Returns true if the node had no siblings.
fn release_node(file: &PagedFile, layout: NodeLayout, node: Node<'_>) -> Result<bool, IndexError> {
    let page_id = node.page_id();
    let (left, right) = (node.left(), node.right());
    drop(node);

    if let Some(left) = left {
        Node::fetch(file, layout, left)?.set_right(right);
    }
    if let Some(right) = right {
        Node::fetch(file, layout, right)?.set_left(left);
    }
    file.dispose_page(page_id)?;
    tracing::trace!(page_id, "released empty node");
    Ok(left.is_none() && right.is_none())
}

impl OpenIndex {
    fn open(path: &Path, buffer_capacity: usize) -> Result<Self, IndexError> {
        let file = PagedFile::open(path, buffer_capacity)?;
        let mut header = IndexHeader::read(&file)?;
        let layout = header.layout();
        let mut header_dirty = false;

        if header.root.is_none() {
            let root = Node::allocate(&file, layout)?;
            header.root = Some(root.page_id());
            header.height = 1;
            header.num_pages += 1;
            header.max_keys = Some(layout.max_keys());
            header_dirty = true;
            tracing::trace!(root = root.page_id(), "created root leaf");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            header_dirty,
            layout,
        })
    }

    fn root(&self) -> Result<PageId, IndexError> {
        self.header
            .root
            .ok_or_else(|| corrupted("open index without a root"))
    }

    fn force(&mut self) -> Result<(), IndexError> {
        if self.header_dirty {
            self.header.write(&self.file)?;
            self.header_dirty = false;
        }
        self.file.force_pages()?;
        Ok(())
    }

    fn close(self) -> Result<(), IndexError> {
        if self.header_dirty {
            self.header.write(&self.file)?;
        }
        self.file.close()?;
        tracing::debug!(path = %self.path.display(), "closed index");
        Ok(())
    }

    /// Run a mutation and mark the header dirty if it changed.
    fn tracking_header(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let before = self.header;
        let result = op(self);
        if self.header != before {
            self.header_dirty = true;
        }
        result
    }

    fn insert(&mut self, key: &[u8], rid: Rid) -> Result<(), IndexError> {
        let file = &self.file;
        let layout = self.layout;
        let mut path = Vec::new();

        let mut node = Node::fetch(file, layout, self.root()?)?;
        for _ in 1..self.header.height {
            let count = node.num_keys();
            if count == 0 {
                return Err(corrupted(format!("empty internal node {}", node.page_id())));
            }
            let mut pos = node.locate(key);
            if pos == count {
                // New maximum: raise the bound on the way down.
                pos = count - 1;
                node.set_key(pos, key);
            }
            path.push(PathStep {
                page: node.page_id(),
                pos,
            });
            node = Node::fetch(file, layout, child_of(&node, pos)?)?;
        }

        let mut pending = (key.to_vec(), rid);
        let mut at: Option<usize> = None;
        loop {
            match node.insert(&pending.0, pending.1, at) {
                Ok(_) => return Ok(()),
                Err(NodeError::Full) => {}
                Err(e) => return Err(e.into()),
            }

            let pos = at.unwrap_or_else(|| node.locate(&pending.0));
            let mut sibling = Node::allocate(file, layout)?;
            self.header.num_pages += 1;
            node.split(&mut sibling)?;
            if let Some(right) = sibling.right() {
                Node::fetch(file, layout, right)?.set_left(Some(sibling.page_id()));
            }

            let left_count = node.num_keys();
            if pos < left_count {
                node.insert(&pending.0, pending.1, Some(pos))?;
                if node.num_keys() > sibling.num_keys() + 1 {
                    let last = node.num_keys() - 1;
                    let (moved_key, moved_rid) = (node.key_at(last), node.rid_at(last));
                    node.remove(last)?;
                    sibling.insert(&moved_key, moved_rid, Some(0))?;
                }
            } else {
                sibling.insert(&pending.0, pending.1, Some(pos - left_count))?;
            }

            let left_max = node
                .last_key()
                .ok_or_else(|| corrupted("split left an empty node"))?;
            let left_page = node.page_id();
            let sibling_page = sibling.page_id();
            tracing::trace!(left_page, sibling_page, "split node");

            let Some(step) = path.pop() else {
                let sibling_max = sibling
                    .last_key()
                    .ok_or_else(|| corrupted("split left an empty sibling"))?;
                drop(node);
                drop(sibling);

                let mut root = Node::allocate(file, layout)?;
                root.insert(&left_max, Rid::routing(left_page), Some(0))?;
                root.insert(&sibling_max, Rid::routing(sibling_page), Some(1))?;
                self.header.root = Some(root.page_id());
                self.header.height += 1;
                self.header.num_pages += 1;
                tracing::trace!(
                    root = root.page_id(),
                    height = self.header.height,
                    "grew new root"
                );
                return Ok(());
            };

            drop(sibling);
            let mut parent = Node::fetch(file, layout, step.page)?;
            // The old bound now belongs to the sibling; the left half goes
            // in front of it.
            parent.set_rid(step.pos, Rid::routing(sibling_page));
            pending = (left_max, Rid::routing(left_page));
            at = Some(step.pos);
            node = parent;
        }
    }

    fn delete(&mut self, key: &[u8], rid: Rid) -> Result<(), IndexError> {
        let file = &self.file;
        let layout = self.layout;
        let mut path = Vec::new();

        let mut node = Node::fetch(file, layout, self.root()?)?;
        for _ in 1..self.header.height {
            let pos = node.locate(key);
            if pos >= node.num_keys() {
                return Err(IndexError::EntryNotFound);
            }
            path.push(PathStep {
                page: node.page_id(),
                pos,
            });
            node = Node::fetch(file, layout, child_of(&node, pos)?)?;
        }

        // Duplicates may continue into right siblings.
        let mut pos = node.locate(key);
        loop {
            if pos >= node.num_keys() {
                let right = node.right().ok_or(IndexError::EntryNotFound)?;
                node = Node::fetch(file, layout, right)?;
                pos = 0;
                continue;
            }
            if node.compare_at(pos, key) != Ordering::Equal {
                return Err(IndexError::EntryNotFound);
            }
            if node.rid_at(pos) == rid {
                break;
            }
            pos += 1;
        }

        let removal = node.remove(pos)?;
        let mut adjust = Self::classify(&node, pos, removal)?;
        while let Some(step) = path.pop() {
            match adjust {
                Adjust::Done => break,
                Adjust::ChildEmptied => {
                    let child = node.page_id();
                    if release_node(file, layout, node)? {
                        self.header.height -= 1;
                    }
                    self.header.num_pages -= 1;

                    let (mut parent, pos) = resolve_parent(file, layout, step, child)?;
                    let removal = parent.remove(pos)?;
                    adjust = Self::classify(&parent, pos, removal)?;
                    node = parent;
                }
                Adjust::BoundChanged(bound) => {
                    let (mut parent, pos) = resolve_parent(file, layout, step, node.page_id())?;
                    parent.set_key(pos, &bound);
                    adjust = if pos + 1 == parent.num_keys() {
                        Adjust::BoundChanged(bound)
                    } else {
                        Adjust::Done
                    };
                    node = parent;
                }
            }
        }
        drop(node);

        self.collapse_root()
    }

    /// Decide what a removal at `pos` means for the parent.
    fn classify(node: &Node<'_>, pos: usize, removal: Removal) -> Result<Adjust, IndexError> {
        Ok(match removal {
            Removal::Empty => Adjust::ChildEmptied,
            Removal::Remaining if pos == node.num_keys() => Adjust::BoundChanged(
                node.last_key()
                    .ok_or_else(|| corrupted("non-empty node without keys"))?,
            ),
            Removal::Remaining => Adjust::Done,
        })
    }

    /// Replace a root that routes to a single child with that child.
    fn collapse_root(&mut self) -> Result<(), IndexError> {
        loop {
            let root_page = self.root()?;
            let root = Node::fetch(&self.file, self.layout, root_page)?;
            if root.is_leaf() || root.num_keys() != 1 {
                return Ok(());
            }
            let child = child_of(&root, 0)?;
            drop(root);

            self.file.dispose_page(root_page)?;
            self.header.root = Some(child);
            self.header.height -= 1;
            self.header.num_pages -= 1;
            tracing::trace!(old_root = root_page, root = child, "collapsed root");
        }
    }

    fn dump_node(&self, out: &mut impl Write, page: PageId, depth: usize) -> Result<(), IndexError> {
        let node = Node::fetch(&self.file, self.layout, page)?;
        let indent = "  ".repeat(depth);
        let link = |l: Option<PageId>| l.map_or_else(|| "-".to_string(), |p| p.to_string());
        writeln!(
            out,
            "{indent}page {page} [{} <- -> {}] {} keys",
            link(node.left()),
            link(node.right()),
            node.num_keys()
        )?;

        let attr_type = self.header.attr.attr_type();
        let entries: Vec<(Vec<u8>, Rid)> = (0..node.num_keys())
            .map(|pos| (node.key_at(pos), node.rid_at(pos)))
            .collect();
        drop(node);

        for (pos, (key, rid)) in entries.iter().enumerate() {
            writeln!(out, "{indent}  {pos}: {} -> {rid}", AttrValue::decode(attr_type, key))?;
            if rid.is_routing() {
                self.dump_node(out, rid.page(), depth + 1)?;
            }
        }
        Ok(())
    }
}
