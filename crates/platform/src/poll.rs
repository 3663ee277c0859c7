//! Readiness polling over raw descriptors.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Waits until at least one of `fds` is readable or `timeout` elapses.
///
/// Returns one flag per descriptor in input order. An interrupted wait
/// (`EINTR`) reports nothing ready so the caller can re-check its signal
/// state.
pub fn poll_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `pollfds` is a live, correctly sized array of pollfd structs
    // for the duration of the call.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis) };
    if rc == -1 {
        let error = io::Error::last_os_error();
        if error.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![false; fds.len()]);
        }
        return Err(error);
    }

    Ok(pollfds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_only_ready_descriptors() {
        let (idle_reader, _idle_writer) = UnixStream::pair().expect("pair");
        let (busy_reader, mut busy_writer) = UnixStream::pair().expect("pair");
        busy_writer.write_all(b"x").expect("write");

        let ready = poll_readable(
            &[idle_reader.as_raw_fd(), busy_reader.as_raw_fd()],
            Duration::from_millis(50),
        )
        .expect("poll");
        assert_eq!(ready, vec![false, true]);
    }

    #[test]
    fn times_out_with_nothing_ready() {
        let (reader, _writer) = UnixStream::pair().expect("pair");
        let ready = poll_readable(&[reader.as_raw_fd()], Duration::from_millis(10)).expect("poll");
        assert_eq!(ready, vec![false]);
    }
}
