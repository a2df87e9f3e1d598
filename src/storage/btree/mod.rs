#![forbid(unsafe_code)]

//! Copy-on-write B+tree whose pages and pairs are log records.

mod address;
mod cache;
mod cursor;
mod page;
mod policy;
mod reclaim;
mod stack;
mod stats;
mod tree;
mod verify;

pub use address::AddressIter;
pub use cursor::Cursor;
pub use page::RecordType;
pub use policy::{BalanceConfig, BalancePolicy, DefaultBalancePolicy, PageShape};
pub use stats::{TreeStats, TreeStatsSnapshot};
pub use tree::{MutableTree, ReadTree, Tree, TreeIds, TreeOptions, TreeRef};
