//! Chain Resolver
//!
//! Walks the singly linked chains of index records: a hash chain when looking
//! a key up, the free list when the allocator searches for a reusable slot.
//!
//! `resolve` returns with the chain-head slot still locked. The caller performs
//! its mutation and then releases the `LockedChain`; dropping it on an error
//! path releases it too.

use bytes::BytesMut;

use crate::error::{HashKvError, Result};
use crate::lock::{LockMode, RangeLock};

use super::record::{RecordHeader, RECORD_HEADER_SIZE};
use super::{FileOffset, IndexFile};

/// A record found on a chain, plus the link that points at it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Where the record starts
    pub offset: FileOffset,

    /// The record's header as read during the walk
    pub header: RecordHeader,

    /// The pointer slot that holds `offset`: a chain-head slot, the free-list
    /// slot, or the predecessor record (whose `next` is its first field)
    pub prior_link: FileOffset,
}

/// Outcome of looking a key up on its hash chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(Located),
    NotFound { chain_head: FileOffset },
}

/// A hash chain held locked on behalf of the caller
#[derive(Debug)]
pub struct LockedChain<'a> {
    head_slot: FileOffset,
    lock: RangeLock<'a>,
}

impl LockedChain<'_> {
    /// Chain-head slot of the locked bucket
    pub fn head_slot(&self) -> FileOffset {
        self.head_slot
    }

    pub fn release(self) -> Result<()> {
        self.lock.release()
    }
}

/// Hash `key`, lock its chain, and look for it
///
/// `Shared` is enough for a lookup; anything that may relink the chain needs
/// `Exclusive`. The key of the last record visited is left in `key_buf`.
pub fn resolve<'a>(
    index: &'a IndexFile,
    key: &[u8],
    mode: LockMode,
    key_buf: &mut BytesMut,
) -> Result<(LockedChain<'a>, Resolution)> {
    let head_slot = index.table().slot_for_key(key);
    let lock = index.lock(head_slot, 1, mode)?;

    let found = walk(index, head_slot, key_buf, |header, stored| {
        header.key_len as usize == key.len() && stored == key
    })?;

    let resolution = match found {
        Some(located) => Resolution::Found(located),
        None => Resolution::NotFound {
            chain_head: head_slot,
        },
    };

    Ok((LockedChain { head_slot, lock }, resolution))
}

/// Follow the chain starting at `head_slot` until `accept` picks a record
///
/// First match wins. The caller must hold whatever lock protects the chain.
/// A chain longer than the file could possibly hold is reported as corrupt
/// rather than walked forever.
pub fn walk<F>(
    index: &IndexFile,
    head_slot: FileOffset,
    key_buf: &mut BytesMut,
    mut accept: F,
) -> Result<Option<Located>>
where
    F: FnMut(&RecordHeader, &[u8]) -> bool,
{
    let max_steps = index.file_len()? / RECORD_HEADER_SIZE as u64 + 1;

    let mut prior_link = head_slot;
    let mut offset = index.read_ptr(head_slot)?;
    let mut steps = 0u64;

    while !offset.is_null() {
        steps += 1;
        if steps > max_steps {
            return Err(HashKvError::CorruptRecord(format!(
                "chain from slot {} does not terminate",
                head_slot
            )));
        }

        let header = index.read_linked_record(offset, key_buf)?;
        if accept(&header, &key_buf[..]) {
            return Ok(Some(Located {
                offset,
                header,
                prior_link,
            }));
        }

        prior_link = offset;
        offset = header.next;
    }

    Ok(None)
}

/// Splice a located record out of its chain
///
/// Needs the lock on the chain the record was found on. A hash-chain record
/// also needs the free-list lock, see `freelist::return_to_free_list`.
pub fn unlink(index: &IndexFile, located: &Located) -> Result<()> {
    index.write_ptr(located.prior_link, located.header.next)
}
