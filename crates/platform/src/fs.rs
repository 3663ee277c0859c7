//! Filesystem limits.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;

/// Maximum number of hard links (and thus subdirectories) the filesystem
/// holding `path` allows for one directory.
///
/// Returns `u64::MAX` when the filesystem reports no limit.
pub fn link_max(path: &Path) -> io::Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    Errno::clear();
    // SAFETY: `c_path` is a valid NUL-terminated string for the call.
    let value = unsafe { libc::pathconf(c_path.as_ptr(), libc::_PC_LINK_MAX) };
    if value == -1 {
        return match Errno::last() {
            Errno::UnknownErrno => Ok(u64::MAX),
            errno => Err(errno.into()),
        };
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_max_is_positive_for_tempdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(link_max(dir.path()).expect("pathconf") > 1);
    }

    #[test]
    fn link_max_fails_for_missing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(link_max(&dir.path().join("absent")).is_err());
    }
}
