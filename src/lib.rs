//! Strata: a copy-on-write B+tree persisted as immutable records in an
//! append-only log.
//!
//! Trees map byte-string keys to byte-string values, optionally with several
//! values per key. Every page and every pair is its own record; editing a
//! tree copies the touched path into memory and [`MutableTree::save`] appends
//! the new records, returning the address of the new root.
//!
//! ```
//! use std::sync::Arc;
//! use strata::{MemoryLog, MutableTree, Tree, TreeOptions};
//!
//! # fn main() -> strata::Result<()> {
//! let log = Arc::new(MemoryLog::default());
//! let mut tree = MutableTree::new(log.clone(), TreeOptions::default());
//! tree.put(b"alpha", b"1")?;
//! tree.put(b"beta", b"2")?;
//! let root = tree.save()?;
//!
//! let snapshot = Tree::open(log, TreeOptions::default(), root)?;
//! assert_eq!(snapshot.get(b"beta")?.as_deref(), Some(&b"2"[..]));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::log::{LoggableStore, MemoryLog, MemoryLogOptions, Record, RecordIter};
pub use storage::btree::{
    AddressIter, BalanceConfig, BalancePolicy, Cursor, DefaultBalancePolicy, MutableTree,
    PageShape, ReadTree, RecordType, Tree, TreeIds, TreeOptions, TreeRef, TreeStats,
    TreeStatsSnapshot,
};
pub use types::{Address, Result, StrataError, StructureId};
