//! Positional file I/O helpers shared by the index and data files.

use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::fs::FileExt;
use std::os::unix::io::IntoRawFd;

/// Read into `buf` starting at `pos` until it is full or EOF is reached.
///
/// Returns the number of bytes read; less than `buf.len()` means EOF.
pub(crate) fn read_full_at(file: &File, buf: &mut [u8], mut pos: u64) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], pos) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                pos += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Close a file and report the error `Drop` would have discarded
pub(crate) fn close_file(file: File) -> Result<()> {
    let fd = file.into_raw_fd();
    // SAFETY: `into_raw_fd` transferred ownership of `fd` to us and nothing
    // else closes it.
    check_err(unsafe { libc::close(fd) })?;
    Ok(())
}

pub(crate) fn check_err(r: libc::c_int) -> Result<libc::c_int> {
    if r == -1 {
        Err(Error::last_os_error())
    } else {
        Ok(r)
    }
}
