use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::line::LogLine;

/// Attempts before a record that keeps hitting a full fifo is dropped.
pub const FIFO_WRITE_RETRIES: u32 = 20;

/// Pause between two attempts.
pub const FIFO_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Writes log lines and records into a non-blocking fifo.
///
/// A full fifo is retried [`FIFO_WRITE_RETRIES`] times with
/// [`FIFO_RETRY_DELAY`] between attempts; after that the record is dropped
/// and counted, so a stalled log reader never blocks the distributor.
pub struct FifoSink<W = File> {
    writer: W,
    name: String,
    dropped: u64,
    delay: Duration,
}

impl FifoSink<File> {
    /// Opens (creating if needed) the fifo at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = platform::fifo::ensure_fifo(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(file, name))
    }
}

impl<W: Write> FifoSink<W> {
    /// Wraps a writer; `name` is used in diagnostics.
    pub fn new(writer: W, name: impl Into<String>) -> Self {
        Self {
            writer,
            name: name.into(),
            dropped: 0,
            delay: FIFO_RETRY_DELAY,
        }
    }

    /// Overrides the pause between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Writes one record. Returns `Ok(false)` if it was dropped.
    pub fn write_record(&mut self, bytes: &[u8]) -> io::Result<bool> {
        let mut written = 0;
        let mut attempts = 0;
        while written < bytes.len() {
            match self.writer.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    attempts += 1;
                    if attempts > FIFO_WRITE_RETRIES {
                        self.dropped += 1;
                        tracing::warn!(
                            target: "fd::log",
                            fifo = %self.name,
                            written,
                            len = bytes.len(),
                            "fifo stays full, dropping record"
                        );
                        return Ok(false);
                    }
                    thread::sleep(self.delay);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(true)
    }

    /// Renders and writes a log line.
    pub fn write_line(&mut self, line: &LogLine) -> io::Result<bool> {
        self.write_record(line.render().as_bytes())
    }

    /// Records dropped so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// The underlying writer.
    pub const fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consumes the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> fmt::Debug for FifoSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoSink")
            .field("name", &self.name)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}
