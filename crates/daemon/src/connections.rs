//! In-memory bookkeeping of running workers.

use rustc_hash::FxHashMap;

use protocol::Protocol;

/// One running worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Worker pid; `0` until the spawn returned.
    pub pid: i32,
    /// Job slot in the host row.
    pub job_no: usize,
    /// Host row, or the parking index past the end of the FSA.
    pub fsa_pos: usize,
    /// Directory row of a fetch job.
    pub fra_pos: Option<usize>,
    /// Stable host id.
    pub host_id: u32,
    /// Stable directory id of a fetch job.
    pub dir_id: u32,
    /// Real host name the worker connects to.
    pub hostname: String,
    /// Host alias.
    pub host_alias: String,
    /// Directory alias of a fetch job.
    pub dir_alias: String,
    /// Message name of the current job.
    pub msg_name: String,
    /// Protocol of the job.
    pub protocol: Protocol,
    /// The worker was started against the toggled host.
    pub temp_toggle: bool,
    /// Job id of the current job, 0 for fetches.
    pub job_id: u32,
    /// The host vanished while the worker ran; it completes against a stub.
    pub parked: bool,
    /// Worker was started by a previous distributor instance.
    pub adopted: bool,
}

impl Connection {
    /// A connection for `msg_name` on host row `fsa_pos`, slot `job_no`.
    #[must_use]
    pub fn new(fsa_pos: usize, job_no: usize, msg_name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            pid: 0,
            job_no,
            fsa_pos,
            fra_pos: None,
            host_id: 0,
            dir_id: 0,
            hostname: String::new(),
            host_alias: String::new(),
            dir_alias: String::new(),
            msg_name: msg_name.into(),
            protocol,
            temp_toggle: false,
            job_id: 0,
            parked: false,
            adopted: false,
        }
    }

    /// Returns `true` for a fetch job.
    #[must_use]
    pub const fn is_fetch(&self) -> bool {
        self.fra_pos.is_some()
    }
}

/// Why a connection could not be allocated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    /// Every slot is taken.
    #[error("all {0} connection slots are in use")]
    Full(usize),
    /// Another live connection uses the same host slot.
    #[error("job slot {job_no} of host {fsa_pos} is already in use")]
    SlotBusy {
        /// Host row.
        fsa_pos: usize,
        /// Job slot.
        job_no: usize,
    },
}

/// Fixed-capacity table of running workers.
///
/// A `(fsa_pos, job_no)` pair appears at most once among live entries.
#[derive(Debug)]
pub struct Connections {
    slots: Vec<Option<Connection>>,
    by_pid: FxHashMap<i32, usize>,
}

impl Connections {
    /// Table for `capacity` parallel workers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            by_pid: FxHashMap::default(),
        }
    }

    /// Maximum number of workers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns `true` when nothing runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Returns `true` when every slot is taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Stores `connection` in a free slot and returns its index.
    pub fn allocate(&mut self, connection: Connection) -> Result<usize, AllocError> {
        if self.slot_in_use(connection.fsa_pos, connection.job_no) {
            return Err(AllocError::SlotBusy {
                fsa_pos: connection.fsa_pos,
                job_no: connection.job_no,
            });
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AllocError::Full(self.slots.len()))?;
        if connection.pid > 0 {
            self.by_pid.insert(connection.pid, index);
        }
        self.slots[index] = Some(connection);
        Ok(index)
    }

    /// Records the pid of the worker in slot `index`.
    pub fn set_pid(&mut self, index: usize, pid: i32) {
        if let Some(Some(connection)) = self.slots.get_mut(index) {
            if connection.pid > 0 {
                self.by_pid.remove(&connection.pid);
            }
            connection.pid = pid;
            self.by_pid.insert(pid, index);
        }
    }

    /// Frees slot `index` and returns what it held.
    pub fn release(&mut self, index: usize) -> Option<Connection> {
        let connection = self.slots.get_mut(index)?.take()?;
        self.by_pid.remove(&connection.pid);
        Some(connection)
    }

    /// Entry at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.slots.get(index)?.as_ref()
    }

    /// Mutable entry at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Slot of the worker `pid`.
    #[must_use]
    pub fn by_pid(&self, pid: i32) -> Option<usize> {
        self.by_pid.get(&pid).copied()
    }

    /// Live entries with their slot index.
    pub fn live(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|c| (i, c)))
    }

    /// Live entries, mutably.
    pub fn live_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|c| (i, c)))
    }

    /// Returns `true` if slot `job_no` of host `fsa_pos` is taken.
    #[must_use]
    pub fn slot_in_use(&self, fsa_pos: usize, job_no: usize) -> bool {
        self.live()
            .any(|(_, c)| !c.parked && c.fsa_pos == fsa_pos && c.job_no == job_no)
    }

    /// Number of live workers on host `fsa_pos`.
    #[must_use]
    pub fn active_on(&self, fsa_pos: usize) -> usize {
        self.live()
            .filter(|(_, c)| !c.parked && c.fsa_pos == fsa_pos)
            .count()
    }
}
