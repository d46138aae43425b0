//! Lock Manager
//!
//! Advisory byte-range record locks over a file, handed out as guards.
//!
//! ## Responsibilities
//! - Block until a shared or exclusive lock on `[offset, offset + len)` is granted
//! - Release on guard drop, including `?` early returns
//! - Explicit `release()` for callers that want the unlock error
//!
//! A `len` of 0 locks from `offset` to the end of the file and beyond, which is
//! how appends serialise against each other.
//!
//! On Linux and Android the locks are open-file-description locks
//! (`F_OFD_SETLKW`): they belong to the open file, so two handles in one process
//! exclude each other the same way two processes do. Other Unix targets fall
//! back to classic process-scoped POSIX record locks (`F_SETLKW`).

use std::fs::File;
use std::io::{Error, ErrorKind};
use std::os::unix::io::AsRawFd;

use crate::error::Result;
use crate::fileio::check_err;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SET_LOCK_WAIT: libc::c_int = libc::F_OFD_SETLKW;
#[cfg(any(target_os = "linux", target_os = "android"))]
const SET_LOCK: libc::c_int = libc::F_OFD_SETLK;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SET_LOCK_WAIT: libc::c_int = libc::F_SETLKW;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SET_LOCK: libc::c_int = libc::F_SETLK;

/// Lock mode for a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once (readers)
    Shared,

    /// One holder, no shared holders (mutators)
    Exclusive,
}

impl LockMode {
    fn lock_type(self) -> libc::c_short {
        match self {
            LockMode::Shared => libc::F_RDLCK as libc::c_short,
            LockMode::Exclusive => libc::F_WRLCK as libc::c_short,
        }
    }
}

/// A held byte-range lock. Unlocks when dropped.
#[must_use = "the range is unlocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RangeLock<'a> {
    file: &'a File,
    offset: u64,
    len: u64,
    mode: LockMode,
    held: bool,
}

/// Block until `[offset, offset + len)` of `file` is locked in `mode`
pub fn acquire(file: &File, offset: u64, len: u64, mode: LockMode) -> Result<RangeLock<'_>> {
    loop {
        match set_lock(file, SET_LOCK_WAIT, mode.lock_type(), offset, len) {
            Ok(()) => break,
            // A signal interrupted the wait; nobody granted or refused anything
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    tracing::trace!(offset, len, ?mode, "range locked");

    Ok(RangeLock {
        file,
        offset,
        len,
        mode,
        held: true,
    })
}

impl RangeLock<'_> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Unlock now and report failure instead of swallowing it in `Drop`
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        self.unlock().map_err(Into::into)
    }

    fn unlock(&self) -> std::io::Result<()> {
        set_lock(
            self.file,
            SET_LOCK,
            libc::F_UNLCK as libc::c_short,
            self.offset,
            self.len,
        )
    }
}

impl Drop for RangeLock<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.unlock() {
                tracing::warn!(offset = self.offset, len = self.len, error = %e, "failed to release range lock");
            }
        }
    }
}

fn set_lock(
    file: &File,
    cmd: libc::c_int,
    lock_type: libc::c_short,
    offset: u64,
    len: u64,
) -> std::io::Result<()> {
    // SAFETY: flock is plain old data; all-zero is a valid value and l_pid
    // must be zero for open-file-description locks.
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = lock_type as _;
    lock.l_whence = libc::SEEK_SET as _;
    lock.l_start = to_off_t(offset)?;
    lock.l_len = to_off_t(len)?;

    // SAFETY: the descriptor is owned by `file` for the duration of the call
    // and `lock` outlives it.
    check_err(unsafe { libc::fcntl(file.as_raw_fd(), cmd, &lock as *const libc::flock) })?;
    Ok(())
}

fn to_off_t(value: u64) -> std::io::Result<libc::off_t> {
    libc::off_t::try_from(value)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, format!("lock range {} overflows off_t", value)))
}
