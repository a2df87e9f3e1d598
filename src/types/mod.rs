#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::{record_crc32, RecordChecksum};

/// Log-relative position of one immutable record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Address(pub u64);

impl Address {
    /// Marker for pages and leaves that have not been written yet.
    pub const NULL: Address = Address(u64::MAX);

    /// Returns true for [`Address::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Tag stamped on every record a tree writes, used to attribute log space.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct StructureId(pub u32);

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the tree and the log collaborator.
///
/// Missing keys and failed cursor moves are not errors; they surface as
/// `Option` or `bool` results.
#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    /// A record or page failed structural validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller broke an operation precondition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// No record starts at the requested address.
    #[error("no record at address {0}")]
    UnknownAddress(Address),
    /// A record of the wrong kind was found where a tree node was expected.
    #[error("unexpected record kind {kind} at address {address}")]
    UnexpectedRecord {
        /// Address of the offending record.
        address: Address,
        /// Raw kind byte that was found.
        kind: u8,
    },
    /// Stored checksum does not match the record contents.
    #[error("checksum mismatch for record at address {0}")]
    ChecksumMismatch(Address),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StrataError>;
