//! Persistent search structures.

/// Copy-on-write B+tree over the record log.
///
/// Core tree used for ordered key/value storage with optional duplicates.
pub mod btree;
