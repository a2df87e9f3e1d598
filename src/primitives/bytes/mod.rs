#![forbid(unsafe_code)]
//! Varint and slice-reading utilities shared by the log and page codecs.

pub mod var {
    //! Unsigned LEB128-style varints.

    /// Largest encoded length of a u64 varint.
    pub const MAX_U64_LEN: usize = 10;

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Number of bytes [`encode_u64`] emits for `v`.
    pub fn encoded_len(mut v: u64) -> usize {
        let mut len = 1;
        while v >= 0x80 {
            v >>= 7;
            len += 1;
        }
        len
    }
}

pub mod buf {
    //! Bounds-checked slice reader that reports truncation as corruption.

    use crate::types::{Result, StrataError};

    /// Reader over an encoded record body.
    #[derive(Clone, Copy, Debug)]
    pub struct Reader<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        /// Creates a reader positioned at the start of `buf`.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, pos: 0 }
        }

        /// Reads an unsigned varint, failing with `truncated_msg` if input ends early.
        pub fn read_var_u64(&mut self, truncated_msg: &'static str) -> Result<u64> {
            let mut result = 0u64;
            let mut shift = 0u32;
            for i in 0..super::var::MAX_U64_LEN {
                if self.pos >= self.buf.len() {
                    return Err(StrataError::Corruption(truncated_msg));
                }
                let byte = self.buf[self.pos];
                self.pos += 1;
                let payload = (byte & 0x7f) as u64;
                if i == super::var::MAX_U64_LEN - 1 && payload > 1 {
                    return Err(StrataError::Corruption("varint overflows 64 bits"));
                }
                result |= payload << shift;
                if (byte & 0x80) == 0 {
                    return Ok(result);
                }
                shift += 7;
            }
            Err(StrataError::Corruption("varint too long"))
        }

        /// Reads a varint length and checks it fits in `usize`.
        pub fn read_len(&mut self, truncated_msg: &'static str) -> Result<usize> {
            let len = self.read_var_u64(truncated_msg)?;
            usize::try_from(len).map_err(|_| StrataError::Corruption("length exceeds usize"))
        }

        /// Reads one byte.
        pub fn read_u8(&mut self, truncated_msg: &'static str) -> Result<u8> {
            Ok(self.take(1, truncated_msg)?[0])
        }

        /// Takes `len` bytes without copying.
        pub fn take(&mut self, len: usize, truncated_msg: &'static str) -> Result<&'a [u8]> {
            let end = self
                .pos
                .checked_add(len)
                .ok_or(StrataError::Corruption("record length overflow"))?;
            if end > self.buf.len() {
                return Err(StrataError::Corruption(truncated_msg));
            }
            let slice = &self.buf[self.pos..end];
            self.pos = end;
            Ok(slice)
        }

        /// Bytes consumed so far.
        pub fn position(&self) -> usize {
            self.pos
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.pos)
        }
    }
}
