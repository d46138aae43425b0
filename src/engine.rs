//! Engine Module
//!
//! The database handle that ties the index file, the data file and the lock
//! protocol together.
//!
//! ## Responsibilities
//! - Open or create the `.idx` / `.dat` file pair
//! - Fetch, store and delete single keys
//! - Sequential iteration in physical file order
//! - Per-handle scratch buffers and diagnostic counters

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::config::Config;
use crate::data::DataFile;
use crate::error::{HashKvError, Result};
use crate::fileio::close_file;
use crate::index::chain::{self, LockedChain, Located, Resolution};
use crate::index::freelist;
use crate::index::{FileOffset, IndexFile, RecordHeader, DATA_MAX, FREE_LIST_SLOT, KEY_MAX};
use crate::lock::LockMode;

/// Suffix of the index file derived from the database path
pub const INDEX_SUFFIX: &str = ".idx";

/// Suffix of the data file derived from the database path
pub const DATA_SUFFIX: &str = ".dat";

/// How `store` treats present and absent keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Add a new key; fail with `AlreadyExists` if present
    Insert,

    /// Overwrite an existing key; fail with `NotFound` if absent
    Replace,

    /// Insert or replace
    Upsert,
}

impl StoreMode {
    fn allows_insert(self) -> bool {
        matches!(self, StoreMode::Insert | StoreMode::Upsert)
    }

    fn allows_replace(self) -> bool {
        matches!(self, StoreMode::Replace | StoreMode::Upsert)
    }
}

/// Per-handle operation counters, for diagnostics only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub fetch_hits: u64,
    pub fetch_misses: u64,
    pub delete_hits: u64,
    pub delete_misses: u64,
    /// Live records returned by `next_record`
    pub records_iterated: u64,
    /// New key, no fitting free record: appended to both files
    pub store_appended: u64,
    /// New key placed in a record taken off the free list
    pub store_reused: u64,
    /// Existing key whose payload outgrew its slot: freed and stored anew
    pub store_relocated: u64,
    /// Existing key whose payload fit its slot: overwritten in place
    pub store_overwritten: u64,
    pub store_errors: u64,
}

/// Where a successful store put the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Appended,
    Reused,
    Relocated,
    Overwritten,
}

/// An open database
///
/// ## Concurrency Model: advisory byte-range locks
///
/// A handle is used by one caller at a time (`&mut self`), but any number of
/// handles, in this process or others, may work on the same files:
///
/// - **Lookups** hold a shared lock on the key's chain-head slot
/// - **Stores / deletes** hold an exclusive lock on the chain-head slot, and
///   take the free-list lock inside it when they allocate or reclaim
/// - **Appends** lock the index record region or the whole data file only
///   while measuring the end and writing
/// - **Iteration** holds a shared free-list lock while reading one record
///
/// Lock order is always chain → free list → append; no call holds a lock
/// after it returns.
pub struct Database {
    /// Configuration the handle was opened with
    config: Config,

    /// Hash table, free list and index records
    index: IndexFile,

    /// Payload heap
    data: DataFile,

    /// Key of the record most recently read
    key_buf: BytesMut,

    /// Payload of the record most recently read
    data_buf: BytesMut,

    /// Next record `next_record` will look at
    cursor: FileOffset,

    stats: Stats,
}

impl Database {
    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Validate creation parameters
    /// 2. Open (or create) `{path}.idx` and `{path}.dat`
    /// 3. Initialise an empty index if we just created it
    /// 4. Read the bucket count and rewind the cursor
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Reject a bad bucket count before touching the filesystem
        config.validate()?;

        // Step 2: Open both files
        let index_file = open_file(&index_path(&config.path), &config)?;
        let data_file = open_file(&data_path(&config.path), &config)?;

        // Step 3 + 4: Initialise if empty, then read the header
        let init = config.create.then_some(config.bucket_count);
        let index = IndexFile::open(index_file, init)?;
        let data = DataFile::new(data_file);

        tracing::debug!(
            path = %config.path.display(),
            bucket_count = index.table().bucket_count(),
            "database opened"
        );

        let mut db = Self {
            config,
            index,
            data,
            key_buf: BytesMut::with_capacity(KEY_MAX),
            data_buf: BytesMut::with_capacity(DATA_MAX),
            cursor: FileOffset::NULL,
            stats: Stats::default(),
        };
        db.rewind();
        Ok(db)
    }

    /// Open an existing database at `path` (convenience method)
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder().path(path.as_ref()).build();
        Self::open(config)
    }

    /// Fetch the payload stored under `key`
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        check_key(key)?;

        let (chain, resolution) =
            chain::resolve(&self.index, key, LockMode::Shared, &mut self.key_buf)?;

        let outcome = match resolution {
            Resolution::Found(located) => self
                .data
                .read_slot(&located.header, &mut self.data_buf)
                .map(Some),
            Resolution::NotFound { .. } => Ok(None),
        };
        let outcome = finish(chain, outcome);

        match &outcome {
            Ok(Some(_)) => self.stats.fetch_hits += 1,
            Ok(None) => self.stats.fetch_misses += 1,
            Err(_) => {}
        }
        outcome
    }

    /// Store `data` under `key`
    ///
    /// Steps:
    /// 1. Check sizes (no I/O on failure)
    /// 2. Resolve the key under an exclusive chain lock
    /// 3. Absent: reuse a free record or append, link at chain head
    /// 4. Present: overwrite in place if the payload fits its slot, otherwise
    ///    free the old record and go through step 3
    pub fn store(&mut self, key: &[u8], data: &[u8], mode: StoreMode) -> Result<()> {
        // Step 1: Limits
        if let Err(e) = check_key(key).and_then(|()| check_data(data)) {
            self.stats.store_errors += 1;
            return Err(e);
        }

        // Step 2: Resolve
        let (chain, resolution) =
            chain::resolve(&self.index, key, LockMode::Exclusive, &mut self.key_buf)?;

        // Step 3 / 4: Mutate under the chain lock
        let outcome = match resolution {
            Resolution::NotFound { .. } if !mode.allows_insert() => Err(HashKvError::NotFound),
            Resolution::NotFound { chain_head } => insert(
                &self.index,
                &self.data,
                chain_head,
                key,
                data,
                &mut self.key_buf,
            ),
            Resolution::Found(_) if !mode.allows_replace() => Err(HashKvError::AlreadyExists),
            Resolution::Found(located) => replace(
                &self.index,
                &self.data,
                chain.head_slot(),
                &located,
                key,
                data,
                &mut self.key_buf,
            ),
        };
        let outcome = finish(chain, outcome);

        match outcome {
            Ok(placement) => {
                match placement {
                    Placement::Appended => self.stats.store_appended += 1,
                    Placement::Reused => self.stats.store_reused += 1,
                    Placement::Relocated => self.stats.store_relocated += 1,
                    Placement::Overwritten => self.stats.store_overwritten += 1,
                }
                tracing::trace!(key_len = key.len(), data_len = data.len(), ?placement, "stored");
                Ok(())
            }
            Err(e) => {
                self.stats.store_errors += 1;
                Err(e)
            }
        }
    }

    /// Delete `key`, returning its record to the free list
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        check_key(key)?;

        let (chain, resolution) =
            chain::resolve(&self.index, key, LockMode::Exclusive, &mut self.key_buf)?;

        let outcome = match resolution {
            Resolution::Found(located) => remove(&self.index, &located),
            Resolution::NotFound { .. } => Err(HashKvError::NotFound),
        };
        let outcome = finish(chain, outcome);

        match &outcome {
            Ok(()) => self.stats.delete_hits += 1,
            Err(HashKvError::NotFound) => self.stats.delete_misses += 1,
            Err(_) => {}
        }
        outcome
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Point the cursor at the first record slot
    ///
    /// `open` already does this; call it again to restart a scan.
    pub fn rewind(&mut self) {
        self.cursor = self.index.table().records_start();
    }

    /// Next live record in physical file order
    ///
    /// Free records are skipped. Order is the order records sit in the index
    /// file, not key order, and slots reused since the last scan show up
    /// wherever they were.
    pub fn next_record(&mut self) -> Result<Option<(Bytes, Bytes)>> {
        // Keep deletes and reuses from rewriting a record while we read it
        let free_list = self.index.lock(FREE_LIST_SLOT, 1, LockMode::Shared)?;

        let outcome = loop {
            let header = match self.index.read_record(self.cursor, &mut self.key_buf) {
                Ok(Some(header)) => header,
                other => break other.map(|_| None),
            };
            self.cursor = self.cursor.advance(header.slot_len());

            if header.is_free() {
                continue;
            }

            let key = self.key_buf.split().freeze();
            break self
                .data
                .read_slot(&header, &mut self.data_buf)
                .map(|data| Some((key, data)));
        };

        let released = free_list.release();
        let record = outcome?;
        released?;

        if record.is_some() {
            self.stats.records_iterated += 1;
        }
        Ok(record)
    }

    /// Rewind and iterate over every live record
    pub fn iter(&mut self) -> Records<'_> {
        self.rewind();
        Records {
            db: self,
            done: false,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush both files to stable storage, data first
    pub fn sync(&self) -> Result<()> {
        self.data.sync()?;
        self.index.sync()
    }

    /// Close both files
    ///
    /// Every file is closed even if an earlier one fails; the first failure
    /// is returned.
    pub fn close(self) -> Result<()> {
        let Database { index, data, .. } = self;

        let mut first_error = None;
        for (name, file) in [("index", index.into_file()), ("data", data.into_file())] {
            if let Err(e) = close_file(file) {
                tracing::warn!(file = name, error = %e, "failed to close database file");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the database base path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the number of hash buckets the index was created with
    pub fn bucket_count(&self) -> u32 {
        self.index.table().bucket_count()
    }

    /// Get the operation counters
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Iterator over live records, see [`Database::next_record`]
pub struct Records<'a> {
    db: &'a mut Database,
    done: bool,
}

impl Iterator for Records<'_> {
    /// (key, payload)
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.db.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// =============================================================================
// File Pair Helpers
// =============================================================================

/// `{path}.idx`
pub fn index_path(path: &Path) -> PathBuf {
    with_suffix(path, INDEX_SUFFIX)
}

/// `{path}.dat`
pub fn data_path(path: &Path) -> PathBuf {
    with_suffix(path, DATA_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn open_file(path: &Path, config: &Config) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(config.create)
        .mode(config.mode)
        .open(path)?;
    Ok(file)
}

/// Remove both files of the database at `path`
///
/// Files that are already gone are not an error. No lock is taken: handles
/// still open on the files keep working on the unlinked inodes.
pub fn drop_database(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    let mut first_error = None;
    for file in [index_path(path), data_path(path)] {
        match fs::remove_file(&file) {
            Ok(()) => tracing::debug!(file = %file.display(), "removed database file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "failed to remove database file");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

// =============================================================================
// Store / Delete Internals (called with the chain lock held)
// =============================================================================

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(HashKvError::EmptyKey);
    }
    if key.len() > KEY_MAX {
        return Err(HashKvError::TooLarge {
            what: "key",
            len: key.len(),
            max: KEY_MAX,
        });
    }
    Ok(())
}

fn check_data(data: &[u8]) -> Result<()> {
    if data.len() > DATA_MAX {
        return Err(HashKvError::TooLarge {
            what: "data",
            len: data.len(),
            max: DATA_MAX,
        });
    }
    Ok(())
}

/// Release the chain lock, preferring the operation's own error
fn finish<T>(chain: LockedChain<'_>, outcome: Result<T>) -> Result<T> {
    let released = chain.release();
    let value = outcome?;
    released?;
    Ok(value)
}

/// Add a new record for `key` at the head of the chain at `head_slot`
fn insert(
    index: &IndexFile,
    data_file: &DataFile,
    head_slot: FileOffset,
    key: &[u8],
    data: &[u8],
    key_buf: &mut BytesMut,
) -> Result<Placement> {
    let head = index.read_ptr(head_slot)?;

    let (offset, placement) = match freelist::find_reusable(index, key.len(), data.len(), key_buf)? {
        Some(slot) => {
            let header = fill_slot(data_file, &slot.header, head, key, data)?;
            index.write_record(slot.offset, &header, key)?;
            (slot.offset, Placement::Reused)
        }
        None => {
            // Lengths were bounded by KEY_MAX / DATA_MAX
            let header = RecordHeader {
                next: head,
                data_offset: append_payload(data_file, data)?,
                key_len: key.len() as u32,
                key_free: 0,
                data_len: data.len() as u32,
                data_free: 0,
                flags: 0,
            };
            (index.append_record(&header, key)?, Placement::Appended)
        }
    };

    index.write_ptr(head_slot, offset)?;
    Ok(placement)
}

/// Header for a free record being reused, writing the payload on the way
fn fill_slot(
    data_file: &DataFile,
    slot: &RecordHeader,
    next: FileOffset,
    key: &[u8],
    data: &[u8],
) -> Result<RecordHeader> {
    let data_capacity = slot.data_capacity();
    let (data_offset, data_free) = if data_capacity == 0 {
        (append_payload(data_file, data)?, 0)
    } else {
        if !data.is_empty() {
            data_file.write_at(slot.data_offset, data)?;
        }
        (slot.data_offset, data_capacity - data.len() as u64)
    };

    Ok(RecordHeader {
        next,
        data_offset,
        key_len: key.len() as u32,
        key_free: (slot.key_capacity() - key.len() as u64) as u32,
        data_len: data.len() as u32,
        data_free: data_free as u32,
        flags: 0,
    })
}

/// New data slot, or none for an empty payload
fn append_payload(data_file: &DataFile, data: &[u8]) -> Result<FileOffset> {
    if data.is_empty() {
        Ok(FileOffset::NULL)
    } else {
        data_file.append(data)
    }
}

/// Overwrite an existing key's payload
fn replace(
    index: &IndexFile,
    data_file: &DataFile,
    head_slot: FileOffset,
    located: &Located,
    key: &[u8],
    data: &[u8],
    key_buf: &mut BytesMut,
) -> Result<Placement> {
    let old = located.header;
    let capacity = old.data_capacity();

    if capacity >= data.len() as u64 {
        if !data.is_empty() {
            data_file.write_at(old.data_offset, data)?;
        }
        let header = RecordHeader {
            data_len: data.len() as u32,
            data_free: (capacity - data.len() as u64) as u32,
            ..old
        };
        index.write_header(located.offset, &header)?;
        return Ok(Placement::Overwritten);
    }

    remove(index, located)?;
    insert(index, data_file, head_slot, key, data, key_buf)?;
    Ok(Placement::Relocated)
}

/// Unlink a record from its hash chain and put it on the free list
fn remove(index: &IndexFile, located: &Located) -> Result<()> {
    freelist::return_to_free_list(index, located)
}
