//! Structural checks over a whole tree.
//!
//! Used by tests after every batch of mutations and by the inspection
//! binary.

use std::cmp::Ordering;

use crate::index::header::IndexHeader;
use crate::index::node::{Node, NodeLayout};
use crate::index::rid::Rid;
use crate::index::IndexError;
use crate::storage::{PageId, PagedFile};

/// Shape of a verified tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    /// Node count per level, root first.
    pub nodes_per_level: Vec<usize>,
    /// Leaf entries.
    pub entries: usize,
}

#[derive(Debug, Clone, Copy)]
struct Links {
    page: PageId,
    left: Option<PageId>,
    right: Option<PageId>,
}

struct Walker<'f> {
    file: &'f PagedFile,
    layout: NodeLayout,
    height: usize,
    levels: Vec<Vec<Links>>,
    entries: usize,
}

fn corrupted(page: PageId, reason: impl std::fmt::Display) -> IndexError {
    IndexError::Corrupted(format!("page {page}: {reason}"))
}

impl Walker<'_> {
    /// Check the subtree at `page` and return its largest key.
    fn visit(&mut self, page: PageId, depth: usize) -> Result<Vec<u8>, IndexError> {
        let node = Node::fetch(self.file, self.layout, page)?;
        let count = node.num_keys();
        if count > self.layout.max_keys() {
            return Err(corrupted(page, format!("{count} keys exceed capacity")));
        }
        let mut entries: Vec<(Vec<u8>, Rid)> = (0..count)
            .map(|pos| (node.key_at(pos), node.rid_at(pos)))
            .collect();
        self.levels[depth - 1].push(Links {
            page,
            left: node.left(),
            right: node.right(),
        });
        drop(node);

        let attr = self.layout.attr();
        if entries
            .windows(2)
            .any(|pair| attr.compare(&pair[0].0, &pair[1].0) == Ordering::Greater)
        {
            return Err(corrupted(page, "keys out of order"));
        }

        let leaf = depth == self.height;
        if count == 0 && !(leaf && depth == 1) {
            return Err(corrupted(page, "empty node below the root"));
        }
        if let Some((_, rid)) = entries.iter().find(|(_, rid)| rid.is_routing() == leaf) {
            return Err(corrupted(page, format!("unexpected locator {rid} at depth {depth}")));
        }

        if leaf {
            self.entries += count;
        } else {
            for (key, rid) in &entries {
                let child_max = self.visit(rid.page(), depth + 1)?;
                if attr.compare(key, &child_max) != Ordering::Equal {
                    return Err(corrupted(page, format!("routing key for page {} is stale", rid.page())));
                }
            }
        }

        // Empty only for an empty root leaf.
        Ok(entries.pop().map(|(key, _)| key).unwrap_or_default())
    }

    /// Each level must be a chain linked in key order.
    fn check_chains(&self) -> Result<(), IndexError> {
        for level in &self.levels {
            for (i, node) in level.iter().enumerate() {
                let expected_left = i.checked_sub(1).map(|j| level[j].page);
                let expected_right = level.get(i + 1).map(|n| n.page);
                if node.left != expected_left || node.right != expected_right {
                    return Err(corrupted(
                        node.page,
                        format!(
                            "sibling links {:?}/{:?}, expected {expected_left:?}/{expected_right:?}",
                            node.left, node.right
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Walk the whole tree, checking:
///
/// - counts within capacity and keys in order
/// - leaves exactly at depth `height`, routing locators everywhere above
/// - every routing key equals the maximum of its subtree
/// - no empty node except a root leaf
/// - sibling chains that match the order of the levels
/// - the header's page count
pub fn verify(file: &PagedFile, layout: NodeLayout, header: &IndexHeader) -> Result<TreeStats, IndexError> {
    let root = header
        .root
        .ok_or_else(|| IndexError::Corrupted("no root".to_string()))?;
    let height = usize::try_from(header.height)
        .ok()
        .filter(|&h| h > 0)
        .ok_or_else(|| IndexError::Corrupted(format!("height {}", header.height)))?;

    let mut walker = Walker {
        file,
        layout,
        height,
        levels: vec![Vec::new(); height],
        entries: 0,
    };
    walker.visit(root, 1)?;
    walker.check_chains()?;

    let nodes_per_level: Vec<usize> = walker.levels.iter().map(Vec::len).collect();
    let nodes: usize = nodes_per_level.iter().sum();
    if usize::try_from(header.num_pages).ok() != Some(nodes + 1) {
        return Err(IndexError::Corrupted(format!(
            "header counts {} pages, tree has {nodes} nodes",
            header.num_pages
        )));
    }

    Ok(TreeStats {
        height,
        nodes_per_level,
        entries: walker.entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestIndex, int_key};

    #[test]
    fn test_detects_stale_routing_key() {
        let index = TestIndex::int(60);
        let mut handle = index.open();
        for k in 1..=5 {
            handle
                .insert_entry(&int_key(k), Rid::new(k, 0))
                .expect("insert");
        }
        handle.close().expect("close");

        // Rewrite the root's first bound behind the index's back.
        {
            let file = PagedFile::open(index.path(), 4).expect("open file");
            let header = IndexHeader::read(&file).expect("header");
            let mut root = Node::fetch(&file, header.layout(), header.root.expect("root"))
                .expect("fetch root");
            root.set_key(0, &int_key(1));
            drop(root);
            file.close().expect("close file");
        }

        let handle = index.open();
        assert!(matches!(handle.verify(), Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_detects_broken_sibling_link() {
        let index = TestIndex::int(60);
        let mut handle = index.open();
        for k in 1..=9 {
            handle
                .insert_entry(&int_key(k), Rid::new(k, 0))
                .expect("insert");
        }
        handle.close().expect("close");

        {
            let file = PagedFile::open(index.path(), 4).expect("open file");
            let header = IndexHeader::read(&file).expect("header");
            let root = Node::fetch(&file, header.layout(), header.root.expect("root"))
                .expect("fetch root");
            let first_leaf = root.rid_at(0).page();
            drop(root);
            let mut leaf = Node::fetch(&file, header.layout(), first_leaf).expect("fetch leaf");
            leaf.set_right(None);
            drop(leaf);
            file.close().expect("close file");
        }

        let handle = index.open();
        assert!(matches!(handle.verify(), Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_stats_for_empty_index() {
        let index = TestIndex::int(60);
        let handle = index.open();
        let stats = handle.verify().expect("verify");
        assert_eq!(
            stats,
            TreeStats {
                height: 1,
                nodes_per_level: vec![1],
                entries: 0,
            }
        );
    }
}
