//! Data File
//!
//! An unstructured heap of payload bytes. Index records say where their slot
//! starts and how long it is; the data file itself carries no headers.

use std::fs::File;
use std::os::unix::fs::FileExt;

use bytes::{Bytes, BytesMut};

use crate::error::{HashKvError, Result};
use crate::fileio::read_full_at;
use crate::index::{FileOffset, RecordHeader};
use crate::lock::{self, LockMode};

/// The data file of one open database
#[derive(Debug)]
pub struct DataFile {
    file: File,
}

impl DataFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Read the payload a record points at, using `buf` as scratch space
    pub fn read_slot(&self, header: &RecordHeader, buf: &mut BytesMut) -> Result<Bytes> {
        let len = header.data_len as usize;
        buf.clear();
        buf.resize(len, 0);

        if len > 0 {
            let read = read_full_at(&self.file, &mut buf[..], header.data_offset.get())?;
            if read < len {
                return Err(HashKvError::CorruptRecord(format!(
                    "data slot at {} truncated to {} of {} bytes",
                    header.data_offset, read, len
                )));
            }
        }

        Ok(buf.split().freeze())
    }

    /// Overwrite bytes inside an existing slot
    pub fn write_at(&self, at: FileOffset, bytes: &[u8]) -> Result<()> {
        self.file.write_all_at(bytes, at.get())?;
        Ok(())
    }

    /// Append a new slot at the end of the file and return where it starts
    ///
    /// The whole file is locked while the end is measured and written.
    pub fn append(&self, bytes: &[u8]) -> Result<FileOffset> {
        let whole = lock::acquire(&self.file, 0, 0, LockMode::Exclusive)?;
        let at = self.file.metadata()?.len();
        self.file.write_all_at(bytes, at)?;
        whole.release()?;
        Ok(FileOffset::new(at))
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn into_file(self) -> File {
        self.file
    }
}
