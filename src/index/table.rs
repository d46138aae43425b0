//! Hash table and free-list head
//!
//! The header region at the front of the index file:
//! ```text
//! ┌───────────────────┬───────────────┬───────────────────────────────┬─────────────
//! │ BucketCount (4)   │ FreeList (8)  │ ChainHead[0] … ChainHead[N-1] │ records …
//! │ + reserved (4)    │               │ (8 each)                      │
//! └───────────────────┴───────────────┴───────────────────────────────┴─────────────
//! 0                   8               16                         16 + 8·N
//! ```
//! Every pointer slot is one byte-range lock unit: locking the first byte of a
//! chain-head slot locks that chain, locking the first byte of the free-list
//! slot locks the free list.

use bytes::{Buf, BufMut, BytesMut};

use crate::config::validate_bucket_count;
use crate::error::{HashKvError, Result};

use super::hash::bucket_of;
use super::FileOffset;

/// Size of one on-disk pointer slot
pub const PTR_SIZE: u64 = 8;

/// Bucket count field plus padding to a full pointer slot
pub const HEADER_SIZE: usize = PTR_SIZE as usize;

/// Slot holding the head of the free list
pub const FREE_LIST_SLOT: FileOffset = FileOffset::new(PTR_SIZE);

/// First chain-head slot
pub const HASH_TABLE_OFFSET: u64 = 2 * PTR_SIZE;

/// Geometry of one index file's hash table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTable {
    bucket_count: u32,
}

impl HashTable {
    /// Table with `bucket_count` buckets; the count must be a power of two in
    /// `[1, 2048]`
    pub fn new(bucket_count: u32) -> Result<Self> {
        validate_bucket_count(bucket_count)?;
        Ok(Self { bucket_count })
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn bucket_of(&self, key: &[u8]) -> u32 {
        bucket_of(key, self.bucket_count)
    }

    /// Offset of the chain-head slot for `bucket`
    pub fn chain_head_slot(&self, bucket: u32) -> FileOffset {
        debug_assert!(bucket < self.bucket_count);
        FileOffset::new(HASH_TABLE_OFFSET + u64::from(bucket) * PTR_SIZE)
    }

    /// Offset of the chain-head slot `key` hashes to
    pub fn slot_for_key(&self, key: &[u8]) -> FileOffset {
        self.chain_head_slot(self.bucket_of(key))
    }

    /// First byte after the hash table, where index records begin
    pub fn records_start(&self) -> FileOffset {
        FileOffset::new(HASH_TABLE_OFFSET + u64::from(self.bucket_count) * PTR_SIZE)
    }

    /// Bytes of a freshly created index: header, empty free list, empty chains
    pub fn encode_empty(&self) -> BytesMut {
        let len = self.records_start().get() as usize;
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32_le(self.bucket_count);
        buf.put_u32_le(0);
        buf.put_bytes(0, len - HEADER_SIZE);
        buf
    }

    /// Read the bucket count back from the header bytes
    pub fn decode_header(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(HashKvError::CorruptRecord(format!(
                "truncated index header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut src = bytes;
        let bucket_count = src.get_u32_le();
        Self::new(bucket_count).map_err(|_| {
            HashKvError::CorruptRecord(format!(
                "index header holds invalid bucket count {}",
                bucket_count
            ))
        })
    }
}
