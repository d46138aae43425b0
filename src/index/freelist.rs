//! Free-Space Allocator
//!
//! Deleted records are pushed onto the free list head and handed back out,
//! first fit, to later stores whose key and payload fit the record's
//! allocated capacity. Slack is never merged or compacted; a slot only ever
//! serves requests no larger than itself.
//!
//! Both operations take the free-list lock exclusively. Callers already hold a
//! chain lock when they get here, never the other way around.

use bytes::BytesMut;

use crate::error::Result;
use crate::lock::LockMode;

use super::chain::{unlink, walk, Located};
use super::record::{RecordHeader, FLAG_FREE};
use super::table::FREE_LIST_SLOT;
use super::IndexFile;

/// Whether a free record can hold a key of `key_len` and a payload of `data_len`
///
/// A record without any data capacity fits every payload: its index slot is
/// reused and the payload is appended to the data file.
pub fn fits(header: &RecordHeader, key_len: usize, data_len: usize) -> bool {
    let data_capacity = header.data_capacity();
    header.key_capacity() >= key_len as u64
        && (data_capacity == 0 || data_capacity >= data_len as u64)
}

/// Take the first free record that fits off the free list
///
/// The returned record is no longer on any list; the caller owns it and is
/// expected to overwrite it.
pub fn find_reusable(
    index: &IndexFile,
    key_len: usize,
    data_len: usize,
    key_buf: &mut BytesMut,
) -> Result<Option<Located>> {
    let free_list = index.lock(FREE_LIST_SLOT, 1, LockMode::Exclusive)?;

    let found = walk(index, FREE_LIST_SLOT, key_buf, |header, _| {
        fits(header, key_len, data_len)
    })?;

    if let Some(slot) = &found {
        index.write_ptr(slot.prior_link, slot.header.next)?;
        tracing::trace!(offset = %slot.offset, key_len, data_len, "reusing free record");
    }

    free_list.release()?;
    Ok(found)
}

/// Unlink a record from its hash chain and push it onto the free list
///
/// The caller holds the record's chain lock. The whole move happens under the
/// free-list lock: iteration never sees the record off its chain but not yet
/// free.
pub fn return_to_free_list(index: &IndexFile, located: &Located) -> Result<()> {
    let free_list = index.lock(FREE_LIST_SLOT, 1, LockMode::Exclusive)?;

    unlink(index, located)?;

    let head = index.read_ptr(FREE_LIST_SLOT)?;
    let header = RecordHeader {
        next: head,
        flags: located.header.flags | FLAG_FREE,
        ..located.header
    };
    index.write_header(located.offset, &header)?;
    index.write_ptr(FREE_LIST_SLOT, located.offset)?;

    free_list.release()
}
