//! Named pipe creation and non-blocking access.
//!
//! Every control fifo is opened read-write so that the descriptor never sees
//! EOF when the last external writer goes away, and non-blocking so a slow
//! peer cannot stall the event loop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;

use nix::sys::stat::Mode;

/// Creates `path` as a fifo unless a fifo already exists there.
///
/// A non-fifo file at `path` is replaced.
pub fn make_fifo(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_fifo() => return Ok(()),
        Ok(_) => fs::remove_file(path)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600)).map_err(io::Error::from)
}

/// Opens a fifo for reading and writing without blocking.
pub fn open_fifo(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Creates the fifo when needed and opens it.
pub fn ensure_fifo(path: &Path) -> io::Result<File> {
    make_fifo(path)?;
    open_fifo(path)
}

/// Returns `true` when `path` names an existing fifo.
#[must_use]
pub fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|metadata| metadata.file_type().is_fifo())
}
