#![forbid(unsafe_code)]
//! Record checksums.

/// Incremental CRC32 over one framed record, salted with the record's
/// address so a record copied to another offset fails validation.
#[derive(Clone)]
pub struct RecordChecksum {
    inner: crc32fast::Hasher,
}

impl RecordChecksum {
    /// Starts a checksum for the record at `address`.
    pub fn new(address: u64) -> Self {
        let mut inner = crc32fast::Hasher::new();
        inner.update(&address.to_be_bytes());
        Self { inner }
    }

    /// Feeds the next framed section.
    pub fn section(mut self, bytes: &[u8]) -> Self {
        self.inner.update(bytes);
        self
    }

    /// Final checksum value.
    pub fn finish(self) -> u32 {
        self.inner.finalize()
    }
}

/// Checksum of a record's header and payload at `address`.
pub fn record_crc32(address: u64, header: &[u8], payload: &[u8]) -> u32 {
    RecordChecksum::new(address)
        .section(header)
        .section(payload)
        .finish()
}
