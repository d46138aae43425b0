//! Index File Module
//!
//! The index file holds everything except payloads: the hash table header, the
//! free list head, and a heap of index records linked into chains.
//!
//! ## Responsibilities
//! - Initialise a new index atomically under a whole-file lock
//! - Read and write pointer slots and index records at explicit offsets
//! - Append records under a lock on the record region
//! - Resolve keys along hash chains (`chain`)
//! - Reuse and reclaim deleted records (`freelist`)
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header: BucketCount (4) + reserved (4)      │
//! ├─────────────────────────────────────────────┤
//! │ Free list head (8)                          │
//! ├─────────────────────────────────────────────┤
//! │ Hash table: N chain heads (8 each)          │
//! ├─────────────────────────────────────────────┤
//! │ Index record                                │
//! │ ┌──────────────┬─────┬──────────────────┐   │
//! │ │ Header (36)  │ Key │ Free key bytes   │   │
//! │ └──────────────┴─────┴──────────────────┘   │
//! │ ... (appended or reused)                    │
//! └─────────────────────────────────────────────┘
//! ```
//! There is no in-memory copy of any of this: every traversal step reads the
//! record at the offset it was given.

pub mod chain;
pub mod freelist;
pub mod hash;
pub mod record;
pub mod table;

use std::fmt;
use std::fs::File;
use std::os::unix::fs::FileExt;

use bytes::{BufMut, BytesMut};

use crate::error::{HashKvError, Result};
use crate::fileio::read_full_at;
use crate::lock::{self, LockMode, RangeLock};

pub use chain::{LockedChain, Located, Resolution};
pub use record::{RecordHeader, DATA_MAX, KEY_MAX, RECORD_HEADER_SIZE};
pub use table::{HashTable, FREE_LIST_SLOT};

/// A byte offset into the index or data file
///
/// Offset 0 is never a valid record or chain position in the index file, so
/// it doubles as the null pointer that terminates chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileOffset(u64);

impl FileOffset {
    pub const NULL: FileOffset = FileOffset(0);

    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset `len` bytes further on
    pub fn advance(self, len: u64) -> Self {
        Self(self.0 + len)
    }
}

impl fmt::Display for FileOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The index file of one open database
#[derive(Debug)]
pub struct IndexFile {
    file: File,
    table: HashTable,
}

impl IndexFile {
    /// Take over an open index file
    ///
    /// With `init = Some(bucket_count)` an empty file is first initialised with
    /// an empty hash table of that size. The stat-then-write runs under an
    /// exclusive lock on the whole file so two creators cannot both initialise
    /// it. A file that already has content keeps its own bucket count.
    pub fn open(file: File, init: Option<u32>) -> Result<Self> {
        if let Some(bucket_count) = init {
            let table = HashTable::new(bucket_count)?;
            let whole = lock::acquire(&file, 0, 0, LockMode::Exclusive)?;
            if file.metadata()?.len() == 0 {
                file.write_all_at(&table.encode_empty(), 0)?;
                tracing::debug!(bucket_count, "initialised empty index");
            }
            whole.release()?;
        }

        let header_lock = lock::acquire(&file, 0, 1, LockMode::Shared)?;
        let mut header = [0u8; table::HEADER_SIZE];
        let read = read_full_at(&file, &mut header, 0)?;
        let file_len = file.metadata()?.len();
        header_lock.release()?;

        let table = HashTable::decode_header(&header[..read])?;
        if file_len < table.records_start().get() {
            return Err(HashKvError::CorruptRecord(format!(
                "index file is {} bytes, hash table of {} buckets needs {}",
                file_len,
                table.bucket_count(),
                table.records_start()
            )));
        }

        Ok(Self { file, table })
    }

    pub fn table(&self) -> &HashTable {
        &self.table
    }

    /// Lock `len` bytes at `offset` (0 = to end of file)
    pub fn lock(&self, offset: FileOffset, len: u64, mode: LockMode) -> Result<RangeLock<'_>> {
        lock::acquire(&self.file, offset.get(), len, mode)
    }

    /// Current file size
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    // =========================================================================
    // Pointer Slots
    // =========================================================================

    /// Read a chain pointer: the free list head, a chain head, or a record's
    /// `next` field
    pub fn read_ptr(&self, slot: FileOffset) -> Result<FileOffset> {
        let mut buf = [0u8; table::PTR_SIZE as usize];
        let read = read_full_at(&self.file, &mut buf, slot.get())?;
        if read < buf.len() {
            return Err(HashKvError::CorruptRecord(format!(
                "pointer slot {} lies past end of index",
                slot
            )));
        }
        Ok(FileOffset::new(u64::from_le_bytes(buf)))
    }

    /// Write a chain pointer anywhere a `read_ptr` could read one
    pub fn write_ptr(&self, slot: FileOffset, value: FileOffset) -> Result<()> {
        self.file.write_all_at(&value.get().to_le_bytes(), slot.get())?;
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Read the record at `at`, leaving its key in `key_buf`
    ///
    /// Returns `None` when `at` is exactly the end of the file. A partial
    /// record or one whose capacities exceed the limits is `CorruptRecord`.
    pub fn read_record(&self, at: FileOffset, key_buf: &mut BytesMut) -> Result<Option<RecordHeader>> {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        let read = read_full_at(&self.file, &mut raw, at.get())?;
        if read == 0 {
            return Ok(None);
        }
        let header = RecordHeader::decode(&raw[..read]).map_err(|e| match e {
            HashKvError::CorruptRecord(msg) => {
                HashKvError::CorruptRecord(format!("record at {}: {}", at, msg))
            }
            other => other,
        })?;

        if header.key_capacity() > KEY_MAX as u64 || header.data_capacity() > DATA_MAX as u64 {
            return Err(HashKvError::CorruptRecord(format!(
                "record at {} claims key capacity {} and data capacity {}",
                at,
                header.key_capacity(),
                header.data_capacity()
            )));
        }

        let key_len = header.key_len as usize;
        key_buf.clear();
        key_buf.resize(key_len, 0);
        let read = read_full_at(&self.file, &mut key_buf[..], at.get() + RECORD_HEADER_SIZE as u64)?;
        if read < key_len {
            return Err(HashKvError::CorruptRecord(format!(
                "record at {}: key truncated to {} of {} bytes",
                at, read, key_len
            )));
        }

        Ok(Some(header))
    }

    /// Read a record some pointer refers to; it must exist
    pub fn read_linked_record(&self, at: FileOffset, key_buf: &mut BytesMut) -> Result<RecordHeader> {
        if at < self.table.records_start() {
            return Err(HashKvError::CorruptRecord(format!(
                "pointer {} points into the index header",
                at
            )));
        }
        self.read_record(at, key_buf)?.ok_or_else(|| {
            HashKvError::CorruptRecord(format!("pointer {} points past end of index", at))
        })
    }

    /// Rewrite only the fixed header of the record at `at`
    pub fn write_header(&self, at: FileOffset, header: &RecordHeader) -> Result<()> {
        self.file.write_all_at(&header.encode(), at.get())?;
        Ok(())
    }

    /// Write header and key at `at`; slack key bytes after the key are left as is
    pub fn write_record(&self, at: FileOffset, header: &RecordHeader, key: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + key.len());
        header.encode_into(&mut buf);
        buf.put_slice(key);
        self.file.write_all_at(&buf, at.get())?;
        Ok(())
    }

    /// Append a record at the end of the file and return where it landed
    ///
    /// The record region is locked to the end of the file while the end is
    /// measured and written, so concurrent appenders never overlap.
    pub fn append_record(&self, header: &RecordHeader, key: &[u8]) -> Result<FileOffset> {
        let tail = self.lock(self.table.records_start(), 0, LockMode::Exclusive)?;
        let at = FileOffset::new(self.file_len()?);
        self.write_record(at, header, key)?;
        tail.release()?;
        Ok(at)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn into_file(self) -> File {
        self.file
    }
}
