//! Index record codec
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────┬────────┬─────────┬─────────┬──────────┬────────┬─────┬──────────┐
//! │ Next (8) │ DataOff  │ KeyLen │ KeyFree │ DataLen │ DataFree │ Flags  │ Key │ KeyFree  │
//! │          │   (8)    │  (4)   │   (4)   │   (4)   │   (4)    │  (4)   │     │  bytes   │
//! └──────────┴──────────┴────────┴─────────┴─────────┴──────────┴────────┴─────┴──────────┘
//! ```
//! All integers little-endian. The header is followed by `key_len` key bytes and
//! `key_free` bytes of slack left over from a longer key that used the slot
//! before. `next` comes first, so the link pointing at a record is always either
//! a chain-head slot or the offset of the predecessor record.

use bytes::{Buf, BufMut};

use crate::error::{HashKvError, Result};

use super::FileOffset;

/// Size of the fixed record header in bytes
pub const RECORD_HEADER_SIZE: usize = 36;

/// Longest key a record may hold
pub const KEY_MAX: usize = 1024;

/// Largest payload a record may point at
pub const DATA_MAX: usize = 2048;

/// Flag bit: record is on the free list
pub const FLAG_FREE: u32 = 1 << 0;

/// Fixed-size header of an index record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    /// Next record in the same chain (hash chain or free list)
    pub next: FileOffset,

    /// Start of the payload slot in the data file; meaningless when the
    /// record has no data capacity
    pub data_offset: FileOffset,

    pub key_len: u32,
    pub key_free: u32,
    pub data_len: u32,
    pub data_free: u32,
    pub flags: u32,
}

impl RecordHeader {
    /// Encode into a fixed-size buffer
    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        let mut dst = &mut buf[..];
        self.encode_into(&mut dst);
        buf
    }

    /// Append the encoded header to `dst`
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        dst.put_u64_le(self.next.get());
        dst.put_u64_le(self.data_offset.get());
        dst.put_u32_le(self.key_len);
        dst.put_u32_le(self.key_free);
        dst.put_u32_le(self.data_len);
        dst.put_u32_le(self.data_free);
        dst.put_u32_le(self.flags);
    }

    /// Decode a header from the front of `bytes`
    ///
    /// Only the length is checked; field plausibility is the caller's concern.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(HashKvError::CorruptRecord(format!(
                "truncated record header: expected {} bytes, got {}",
                RECORD_HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut src = &bytes[..RECORD_HEADER_SIZE];
        Ok(Self {
            next: FileOffset::new(src.get_u64_le()),
            data_offset: FileOffset::new(src.get_u64_le()),
            key_len: src.get_u32_le(),
            key_free: src.get_u32_le(),
            data_len: src.get_u32_le(),
            data_free: src.get_u32_le(),
            flags: src.get_u32_le(),
        })
    }

    /// Allocated key bytes (stored plus slack)
    pub fn key_capacity(&self) -> u64 {
        u64::from(self.key_len) + u64::from(self.key_free)
    }

    /// Allocated data bytes (stored plus slack)
    pub fn data_capacity(&self) -> u64 {
        u64::from(self.data_len) + u64::from(self.data_free)
    }

    /// Bytes the whole record occupies in the index file
    pub fn slot_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.key_capacity()
    }

    pub fn is_free(&self) -> bool {
        self.flags & FLAG_FREE != 0
    }
}
