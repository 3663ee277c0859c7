//! The distributor's fifos.
//!
//! Input fifos are opened read-write and non-blocking so that the daemon
//! never sees EOF when the last writer goes away and a read never stalls
//! the event loop. Each read drains the fifo completely; partial records
//! stay buffered until the rest arrives.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};

use logging::{DeleteRecord, FifoSink, LogLine, OutputRecord};
use protocol::{
    Completion, DeleteRequest, FIN_RECORD_SIZE, FdCommand, FrameBuffer, MSG_RECORD_SIZE, MsgRecord,
    RETRY_RECORD_SIZE, decode_retry,
};

use crate::error::FdError;
use crate::paths::{
    DELETE_LOG_FIFO, FD_CMD_FIFO, FD_DELETE_FIFO, FD_WAKE_UP_FIFO, MSG_FIFO, OUTPUT_LOG_FIFO,
    RECEIVE_LOG_FIFO, RETRY_FD_FIFO, SF_BURST_ACK_FIFO, SF_FIN_FIFO, TRANS_DEBUG_LOG_FIFO,
    TRANSFER_LOG_FIFO, TRL_CALC_FIFO, WorkDir,
};

const READ_CHUNK: usize = 4096;

/// Something that arrived on an input fifo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FifoEvent {
    /// An operator command.
    Command(FdCommand),
    /// A command byte nobody knows.
    UnknownCommand(u8),
    /// A worker finished or asks for another job.
    Completion(Completion),
    /// AMG announced a job.
    Message(MsgRecord),
    /// Somebody wants a scheduling pass.
    WakeUp,
    /// Retry the host at this FSA position now.
    Retry(i32),
    /// Operator delete request.
    Delete(DeleteRequest),
    /// A worker took over the job with this message name.
    BurstAck(String),
    /// Recompute the rate share of the host at this FSA position.
    TrlCalc(i32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
    Command,
    Finish,
    Message,
    WakeUp,
    Retry,
    Delete,
    BurstAck,
    TrlCalc,
}

impl Kind {
    const fn frame_size(self) -> Option<usize> {
        match self {
            Self::Finish => Some(FIN_RECORD_SIZE),
            Self::Message => Some(MSG_RECORD_SIZE),
            Self::Retry | Self::TrlCalc => Some(RETRY_RECORD_SIZE),
            Self::Command | Self::WakeUp | Self::Delete | Self::BurstAck => None,
        }
    }
}

const INPUTS: [(&str, Kind); 8] = [
    (FD_CMD_FIFO, Kind::Command),
    (SF_FIN_FIFO, Kind::Finish),
    (MSG_FIFO, Kind::Message),
    (FD_WAKE_UP_FIFO, Kind::WakeUp),
    (RETRY_FD_FIFO, Kind::Retry),
    (FD_DELETE_FIFO, Kind::Delete),
    (SF_BURST_ACK_FIFO, Kind::BurstAck),
    (TRL_CALC_FIFO, Kind::TrlCalc),
];

#[derive(Debug)]
struct Input {
    name: &'static str,
    kind: Kind,
    file: File,
    frames: Option<FrameBuffer>,
    pending: Vec<u8>,
}

impl Input {
    fn drain(&mut self) -> io::Result<usize> {
        let mut buf = [0_u8; READ_CHUNK];
        let mut total = 0;
        loop {
            match self.file.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    total += n;
                    match &mut self.frames {
                        Some(frames) => frames.extend(&buf[..n]),
                        None => self.pending.extend_from_slice(&buf[..n]),
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }

    fn decode(&mut self, read: usize, events: &mut Vec<FifoEvent>) {
        match self.kind {
            Kind::Command => {
                for byte in self.pending.drain(..) {
                    events.push(FdCommand::from_u8(byte).map_or(FifoEvent::UnknownCommand(byte), FifoEvent::Command));
                }
            }
            Kind::WakeUp => {
                self.pending.clear();
                if read > 0 {
                    events.push(FifoEvent::WakeUp);
                }
            }
            Kind::Delete => loop {
                match DeleteRequest::decode(&self.pending) {
                    Ok(Some((request, used))) => {
                        self.pending.drain(..used);
                        events.push(FifoEvent::Delete(request));
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(target: "fd::fifo", fifo = self.name, %error, "discarding delete requests");
                        self.pending.clear();
                        break;
                    }
                }
            },
            Kind::BurstAck => {
                while let Some(end) = self.pending.iter().position(|&b| b == 0) {
                    let name: Vec<u8> = self.pending.drain(..=end).collect();
                    let name = String::from_utf8_lossy(&name[..end]).into_owned();
                    if !name.is_empty() {
                        events.push(FifoEvent::BurstAck(name));
                    }
                }
            }
            Kind::Finish | Kind::Message | Kind::Retry | Kind::TrlCalc => {
                let Some(frames) = &mut self.frames else {
                    return;
                };
                while let Some(frame) = frames.next_frame() {
                    if let Some(event) = decode_frame(self.kind, &frame) {
                        events.push(event);
                    }
                }
            }
        }
    }
}

fn decode_frame(kind: Kind, frame: &[u8]) -> Option<FifoEvent> {
    let word = || {
        let mut bytes = [0_u8; 4];
        bytes.copy_from_slice(&frame[..4]);
        bytes
    };
    match kind {
        Kind::Finish => Some(FifoEvent::Completion(Completion::decode(word()))),
        Kind::Retry => Some(FifoEvent::Retry(decode_retry(word()))),
        Kind::TrlCalc => Some(FifoEvent::TrlCalc(i32::from_ne_bytes(word()))),
        Kind::Message => match MsgRecord::decode(frame) {
            Ok(record) => Some(FifoEvent::Message(record)),
            Err(error) => {
                tracing::warn!(target: "fd::fifo", %error, "discarding msg_fifo record");
                tracing::debug!(target: "fd::fifo", "record bytes:\n{}", logging::hex_dump(frame));
                None
            }
        },
        Kind::Command | Kind::WakeUp | Kind::Delete | Kind::BurstAck => None,
    }
}

/// The input fifos of the distributor.
#[derive(Debug)]
pub struct FifoSet {
    inputs: Vec<Input>,
}

impl FifoSet {
    /// Creates missing fifos in `work`'s fifo directory and opens them.
    pub fn open(work: &WorkDir) -> Result<Self, FdError> {
        let mut inputs = Vec::with_capacity(INPUTS.len());
        for (name, kind) in INPUTS {
            let path = work.fifo(name);
            let file = platform::fifo::ensure_fifo(&path).map_err(|e| FdError::fifo(&path, e))?;
            inputs.push(Input {
                name,
                kind,
                file,
                frames: kind.frame_size().map(FrameBuffer::new),
                pending: Vec::new(),
            });
        }
        Ok(Self { inputs })
    }

    /// Descriptors to poll, in the order [`FifoSet::read_ready`] expects.
    #[must_use]
    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.inputs.iter().map(|input| input.file.as_raw_fd()).collect()
    }

    /// Reads the fifos flagged in `ready` and decodes what arrived.
    pub fn read_ready(&mut self, ready: &[bool]) -> Result<Vec<FifoEvent>, FdError> {
        let mut events = Vec::new();
        for (input, _) in self.inputs.iter_mut().zip(ready).filter(|(_, r)| **r) {
            let read = input
                .drain()
                .map_err(|e| FdError::fifo(input.name, e))?;
            input.decode(read, &mut events);
        }
        Ok(events)
    }

    /// Reads every fifo regardless of readiness.
    pub fn read_all(&mut self) -> Result<Vec<FifoEvent>, FdError> {
        let ready = vec![true; self.inputs.len()];
        self.read_ready(&ready)
    }
}

/// The log fifos the distributor writes to.
#[derive(Debug)]
pub struct LogSinks {
    transfer: FifoSink,
    debug: FifoSink,
    output: FifoSink,
    receive: FifoSink,
    delete: FifoSink,
}

fn report(sink: &str, result: io::Result<bool>) {
    if let Err(error) = result {
        tracing::warn!(target: "fd::log", sink, %error, "log write failed");
    }
}

impl LogSinks {
    /// Opens (creating if needed) the log fifos of `work`.
    pub fn open(work: &WorkDir) -> Result<Self, FdError> {
        let open = |name: &str| {
            let path = work.fifo(name);
            FifoSink::open(&path).map_err(|e| FdError::fifo(&path, e))
        };
        Ok(Self {
            transfer: open(TRANSFER_LOG_FIFO)?,
            debug: open(TRANS_DEBUG_LOG_FIFO)?,
            output: open(OUTPUT_LOG_FIFO)?,
            receive: open(RECEIVE_LOG_FIFO)?,
            delete: open(DELETE_LOG_FIFO)?,
        })
    }

    /// Writes to the transfer log.
    pub fn transfer(&mut self, line: &LogLine) {
        report("transfer", self.transfer.write_line(line));
    }

    /// Writes to the transfer debug log.
    pub fn debug(&mut self, line: &LogLine) {
        report("trans_debug", self.debug.write_line(line));
    }

    /// Writes to the receive log.
    pub fn receive(&mut self, line: &LogLine) {
        report("receive", self.receive.write_line(line));
    }

    /// Records a sent file.
    pub fn output(&mut self, record: &OutputRecord) {
        report("output", self.output.write_record(&record.encode()));
    }

    /// Records a deleted file.
    pub fn delete(&mut self, record: &DeleteRecord) {
        report("delete", self.delete.write_record(&record.encode()));
    }
}
