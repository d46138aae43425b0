//! Configuration for hashkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{HashKvError, Result};

/// Smallest hash table a database may be created with
pub const MIN_BUCKET_COUNT: u32 = 1;

/// Largest hash table a database may be created with
pub const MAX_BUCKET_COUNT: u32 = 2048;

/// Hash table size used when none is configured
pub const DEFAULT_BUCKET_COUNT: u32 = 256;

/// Permission bits used when creating new files
pub const DEFAULT_MODE: u32 = 0o644;

/// Configuration for opening a database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Base path of the database. Two files are derived from it:
    ///   {path}.idx   (index file: header, free list, hash table, records)
    ///   {path}.dat   (data heap)
    pub path: PathBuf,

    /// Create the files if they do not exist and initialise an empty index
    pub create: bool,

    /// Permission bits for newly created files (ignored when they exist)
    pub mode: u32,

    // -------------------------------------------------------------------------
    // Hash Table Configuration
    // -------------------------------------------------------------------------
    /// Number of hash buckets. Only consulted when a new index is initialised;
    /// an existing index keeps the count it was created with.
    pub bucket_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./hashkv"),
            create: false,
            mode: DEFAULT_MODE,
            bucket_count: DEFAULT_BUCKET_COUNT,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the fields that only matter when creating a database
    pub fn validate(&self) -> Result<()> {
        if self.create {
            validate_bucket_count(self.bucket_count)?;
        }
        Ok(())
    }
}

/// A bucket count must be a power of two so the hash can be masked
pub fn validate_bucket_count(count: u32) -> Result<()> {
    if (MIN_BUCKET_COUNT..=MAX_BUCKET_COUNT).contains(&count) && count.is_power_of_two() {
        Ok(())
    } else {
        Err(HashKvError::InvalidBucketCount(count))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database base path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Create missing files and initialise a fresh index
    pub fn create(mut self, create: bool) -> Self {
        self.config.create = create;
        self
    }

    /// Set permission bits for newly created files
    pub fn mode(mut self, mode: u32) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the hash table size used at creation
    pub fn bucket_count(mut self, count: u32) -> Self {
        self.config.bucket_count = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
