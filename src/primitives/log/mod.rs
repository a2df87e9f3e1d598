#![forbid(unsafe_code)]
//! The append-only record log the tree persists into.
//!
//! The tree only depends on [`LoggableStore`]. [`MemoryLog`] is a complete
//! in-process implementation used by tests, benchmarks and embedders that keep
//! the log in memory; durable logs live outside this crate.
//!
//! # Record framing
//!
//! ```text
//! kind:u8 | structure_id:varint | payload_len:varint | payload | crc32:u32 (BE)
//! ```
//!
//! The checksum covers the address, the header bytes and the payload.

use std::ops::Range;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::primitives::bytes::{buf::Reader, var};
use crate::types::{record_crc32, Address, Result, StrataError, StructureId};

const CRC_LEN: usize = 4;
const MAX_HEADER_LEN: usize = 1 + 2 * var::MAX_U64_LEN;

/// One immutable record read back from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Raw record kind byte, interpreted by the structure that wrote it.
    pub kind: u8,
    /// Structure that owns the record.
    pub structure_id: StructureId,
    /// Address the record starts at.
    pub address: Address,
    /// Total framed length in bytes, header and checksum included.
    pub length: u64,
    /// Record body.
    pub payload: Bytes,
}

impl Record {
    /// First address past this record.
    pub fn end(&self) -> u64 {
        self.address.0 + self.length
    }
}

/// Address-keyed, append-only store of typed records.
pub trait LoggableStore: Send + Sync {
    /// Reads the record starting at `address`.
    fn read(&self, address: Address) -> Result<Record>;

    /// Appends a record and returns its address.
    fn write(&self, kind: u8, structure_id: StructureId, payload: &[u8]) -> Result<Address>;

    /// Address the next write will receive.
    fn high_address(&self) -> Address;

    /// Length of one log file; addresses are grouped into files of this size.
    fn file_len(&self) -> u64;

    /// Iterates records in ascending address order starting at `address`.
    fn iter_from(&self, address: Address) -> RecordIter<'_>
    where
        Self: Sized,
    {
        RecordIter::new(self, address)
    }

    /// Address range of the log file containing `address`.
    fn file_range(&self, address: Address) -> Range<u64> {
        let len = self.file_len().max(1);
        let start = address.0 - address.0 % len;
        start..start + len
    }
}

/// Lazy sequential iterator over records.
pub struct RecordIter<'a> {
    store: &'a dyn LoggableStore,
    next: u64,
    limit: u64,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    /// Iterates from `address` up to the store's current high address.
    pub fn new(store: &'a dyn LoggableStore, address: Address) -> Self {
        let limit = store.high_address().0;
        Self::bounded(store, address, limit)
    }

    /// Iterates records starting in `[address, limit)`.
    pub fn bounded(store: &'a dyn LoggableStore, address: Address, limit: u64) -> Self {
        Self {
            store,
            next: address.0,
            limit: limit.min(store.high_address().0),
            failed: false,
        }
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.limit {
            return None;
        }
        match self.store.read(Address(self.next)) {
            Ok(record) => {
                self.next = record.end();
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Configuration for [`MemoryLog`].
#[derive(Clone, Debug)]
pub struct MemoryLogOptions {
    /// Simulated file length used for [`LoggableStore::file_range`].
    pub file_len: u64,
}

impl Default for MemoryLogOptions {
    fn default() -> Self {
        Self { file_len: 1 << 20 }
    }
}

impl MemoryLogOptions {
    /// Sets the simulated file length.
    pub fn file_len(mut self, bytes: u64) -> Self {
        self.file_len = bytes;
        self
    }
}

/// Counters describing log activity.
#[derive(Clone, Debug, Default)]
pub struct LogStats {
    /// Number of records appended.
    pub records_written: u64,
    /// Total framed bytes appended.
    pub bytes_written: u64,
}

#[derive(Default)]
struct LogState {
    data: Vec<u8>,
    stats: LogStats,
}

/// In-memory [`LoggableStore`].
pub struct MemoryLog {
    state: RwLock<LogState>,
    options: MemoryLogOptions,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(MemoryLogOptions::default())
    }
}

impl MemoryLog {
    /// Creates an empty log.
    pub fn new(options: MemoryLogOptions) -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            options,
        }
    }

    /// Snapshot of the write counters.
    pub fn stats(&self) -> LogStats {
        self.state.read().stats.clone()
    }

    /// Records whose start address lies in the file containing `address`.
    pub fn records_in_file(&self, address: Address) -> Result<Vec<Record>> {
        let range = self.file_range(address);
        RecordIter::bounded(self, Address(range.start), range.end).collect()
    }

    fn decode_at(data: &[u8], address: Address) -> Result<Record> {
        let start = usize::try_from(address.0).map_err(|_| StrataError::UnknownAddress(address))?;
        if start >= data.len() {
            return Err(StrataError::UnknownAddress(address));
        }
        let window = &data[start..];
        let mut reader = Reader::new(window);
        let kind = reader.read_u8("record kind truncated")?;
        let structure = reader.read_var_u64("record structure id truncated")?;
        let structure_id = u32::try_from(structure)
            .map(StructureId)
            .map_err(|_| StrataError::Corruption("record structure id out of range"))?;
        let payload_len = reader.read_len("record length truncated")?;
        let header_len = reader.position();
        let payload = reader.take(payload_len, "record payload truncated")?;
        let crc_bytes = reader.take(CRC_LEN, "record checksum truncated")?;
        let stored = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if record_crc32(address.0, &window[..header_len], payload) != stored {
            return Err(StrataError::ChecksumMismatch(address));
        }
        Ok(Record {
            kind,
            structure_id,
            address,
            length: reader.position() as u64,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

impl LoggableStore for MemoryLog {
    fn read(&self, address: Address) -> Result<Record> {
        let state = self.state.read();
        Self::decode_at(&state.data, address)
    }

    fn write(&self, kind: u8, structure_id: StructureId, payload: &[u8]) -> Result<Address> {
        let mut header = Vec::with_capacity(MAX_HEADER_LEN);
        header.push(kind);
        var::encode_u64(u64::from(structure_id.0), &mut header);
        var::encode_u64(payload.len() as u64, &mut header);

        let mut state = self.state.write();
        let address = Address(state.data.len() as u64);
        if address.is_null() {
            return Err(StrataError::Invalid("log address space exhausted"));
        }
        let crc = record_crc32(address.0, &header, payload);
        state.data.extend_from_slice(&header);
        state.data.extend_from_slice(payload);
        state.data.extend_from_slice(&crc.to_be_bytes());
        let framed = (header.len() + payload.len() + CRC_LEN) as u64;
        state.stats.records_written += 1;
        state.stats.bytes_written += framed;
        trace!(
            target: "strata_log::write",
            address = address.0,
            kind,
            structure = structure_id.0,
            len = framed,
            "appended record"
        );
        Ok(address)
    }

    fn high_address(&self) -> Address {
        Address(self.state.read().data.len() as u64)
    }

    fn file_len(&self) -> u64 {
        self.options.file_len
    }
}
