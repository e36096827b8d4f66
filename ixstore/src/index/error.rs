use crate::index::attr::{AttrType, AttrValue};
use crate::index::node::NodeError;
use crate::index::rid::Rid;
use crate::storage::FileError;

/// Errors returned by index operations.
#[derive(Debug)]
pub enum IndexError {
    /// Paged file failure.
    Storage(FileError),
    /// Failure writing a dump.
    Io(std::io::Error),
    /// Attribute type and width do not fit together.
    InvalidAttribute { attr_type: AttrType, length: usize },
    /// Key width leaves room for fewer than two entries per node.
    KeyTooLarge { length: usize, page_size: usize },
    /// Page size too small for the index header.
    InvalidPageSize(usize),
    /// The handle already has an index open.
    AlreadyOpen,
    /// The handle has no index open.
    NotOpen,
    /// No entry with this key and locator.
    EntryNotFound,
    /// Key width differs from the attribute width.
    BadKey { expected: usize, actual: usize },
    /// Value type differs from the attribute type.
    TypeMismatch { expected: AttrType, value: AttrValue },
    /// Locator is not a record locator.
    BadRid(Rid),
    /// Page 0 does not hold a valid index header.
    InvalidIndexFile(String),
    /// Tree structure is inconsistent.
    Corrupted(String),
    /// Node operation failed.
    Node(NodeError),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidAttribute { attr_type, length } => {
                write!(f, "invalid attribute: {attr_type} of length {length}")
            }
            Self::KeyTooLarge { length, page_size } => write!(
                f,
                "key of {length} bytes leaves fewer than two entries in a {page_size}-byte page"
            ),
            Self::InvalidPageSize(size) => write!(f, "page size {size} too small for an index"),
            Self::AlreadyOpen => write!(f, "index already open"),
            Self::NotOpen => write!(f, "index not open"),
            Self::EntryNotFound => write!(f, "entry not found"),
            Self::BadKey { expected, actual } => {
                write!(f, "bad key: expected {expected} bytes, got {actual}")
            }
            Self::TypeMismatch { expected, value } => {
                write!(f, "value {value} does not match attribute type {expected}")
            }
            Self::BadRid(rid) => write!(f, "bad record locator {rid}"),
            Self::InvalidIndexFile(reason) => write!(f, "invalid index file: {reason}"),
            Self::Corrupted(reason) => write!(f, "index corrupted: {reason}"),
            Self::Node(e) => write!(f, "node error: {e}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Node(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for IndexError {
    fn from(e: FileError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for IndexError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
