//! Low-level primitives the tree is built on.

/// Varint encoding and bounds-checked payload reading.
pub mod bytes;

/// The append-only record log and its in-memory implementation.
pub mod log;
