//! Secondary index engine.
//!
//! A disk-resident B-link tree mapping fixed-width attribute values to
//! record locators.
//!
//! # File Format
//!
//! - Page 0: [`IndexHeader`] (root, height, geometry)
//! - Other pages: one node each, keys in non-decreasing order, siblings
//!   doubly linked per level
//!
//! Internal keys are upper bounds: each equals the largest key in the
//! subtree it routes to.
//!
//! # Usage
//!
//! ```ignore
//! create_index_file(path, AttrType::Int, 4, 4092)?;
//!
//! let mut handle = IndexHandle::new();
//! handle.open(path)?;
//! handle.insert_entry(&7i32.to_le_bytes(), Rid::new(3, 1))?;
//!
//! let mut scan = handle.open_scan(CompOp::Ge, &0i32.to_le_bytes())?;
//! while let Some(rid) = scan.next_entry()? {
//!     // ...
//! }
//! scan.close();
//! handle.close()?;
//! ```

mod attr;
mod error;
mod handle;
mod header;
mod node;
mod rid;
mod scan;
mod verify;

pub use attr::{AttrType, AttrValue, Attribute, MAX_STRING_LEN};
pub use error::IndexError;
pub use handle::IndexHandle;
pub use header::{IndexHeader, create_index_file, destroy_index_file};
pub use node::{NodeError, NodeLayout};
pub use rid::{Rid, SlotId};
pub use scan::{CompOp, IndexScan};
pub use verify::TreeStats;
