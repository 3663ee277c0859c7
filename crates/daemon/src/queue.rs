//! The transfer queue.
//!
//! Items live in the mapped `fd_msg_queue` file so a restarted distributor
//! picks up where the previous one stopped. The array is kept sorted by
//! `msg_number`; items with equal keys stay in insertion order.

use std::path::Path;

use ssa::mdb::{MAX_AGEING_VALUE, MIN_AGEING_VALUE};
use ssa::names::MSG_QUE_BUF_SIZE;
use ssa::qb::{FORK_IN_PROGRESS, PENDING};
use ssa::{QueueItem, SpecialFlags, SsaError, Table};

/// Seconds a job's priority key is moved forward, indexed by ageing weight.
pub const AGEING_ADVANCE: [f64; 10] = [
    0.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1_200.0, 2_400.0, 3_600.0,
];

/// Priority key of a job created at `creation_time` with weight `ageing`.
///
/// A job of weight `w` is treated as if it had been created
/// `AGEING_ADVANCE[w]` seconds earlier, so heavier jobs overtake lighter
/// ones that arrived a little before them.
#[must_use]
pub fn msg_number(creation_time: i64, ageing: i32) -> f64 {
    let weight = ageing.clamp(MIN_AGEING_VALUE, MAX_AGEING_VALUE) as usize;
    creation_time as f64 - AGEING_ADVANCE[weight]
}

/// Result of [`Queue::insert`].
#[derive(Clone, Debug, PartialEq)]
pub enum Inserted {
    /// Added at this index.
    New(usize),
    /// A pending item of the same name absorbed the request.
    Merged {
        /// Index of the existing item.
        index: usize,
        /// The item before the merge.
        previous: QueueItem,
    },
    /// An item of the same name is running; the request was dropped.
    Running(usize),
}

/// The mapped transfer queue.
#[derive(Debug)]
pub struct Queue {
    table: Table<QueueItem>,
}

impl Queue {
    /// Attaches `path`, creating an empty queue if it does not exist.
    pub fn attach(path: &Path) -> Result<Self, SsaError> {
        Ok(Self {
            table: Table::open_or_create(path, MSG_QUE_BUF_SIZE)?,
        })
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Item at `index`.
    pub fn get(&self, index: usize) -> Result<QueueItem, SsaError> {
        self.table.get(index)
    }

    /// Modifies the item at `index` in place.
    pub fn update<R>(&mut self, index: usize, f: impl FnOnce(&mut QueueItem) -> R) -> Result<R, SsaError> {
        self.table.update(index, f)
    }

    /// Items in priority order.
    pub fn iter(&self) -> impl Iterator<Item = QueueItem> + '_ {
        self.table.iter()
    }

    /// Index of the item named `msg_name`.
    #[must_use]
    pub fn position(&self, msg_name: &str) -> Option<usize> {
        self.table.position(|item| item.msg_name == msg_name)
    }

    /// Index of the item run by worker `pid`.
    #[must_use]
    pub fn position_by_pid(&self, pid: i32) -> Option<usize> {
        self.table.position(|item| item.pid == pid)
    }

    /// Queues `item`, keeping priority order and unique names.
    ///
    /// A pending item of the same name absorbs the request: its retry count
    /// goes up and its sizes are replaced. A running item of the same name
    /// wins and the request is dropped with a warning.
    pub fn insert(&mut self, item: QueueItem) -> Result<Inserted, SsaError> {
        if let Some(index) = self.position(&item.msg_name) {
            let existing = self.table.get(index)?;
            if existing.is_running() {
                tracing::warn!(
                    target: "fd::queue",
                    msg_name = %item.msg_name,
                    pid = existing.pid,
                    "job is already being transferred, ignoring new request"
                );
                return Ok(Inserted::Running(index));
            }
            self.table.update(index, |q| {
                q.retries += 1;
                q.files_to_send = item.files_to_send;
                q.file_size_to_send = item.file_size_to_send;
            })?;
            return Ok(Inserted::Merged {
                index,
                previous: existing,
            });
        }
        let index = self
            .table
            .position(|q| q.msg_number > item.msg_number)
            .unwrap_or_else(|| self.table.len());
        self.table.insert(index, &item)?;
        Ok(Inserted::New(index))
    }

    /// Removes the item at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<QueueItem, SsaError> {
        self.table.remove(index)
    }

    /// Removes the item named `msg_name`.
    pub fn remove(&mut self, msg_name: &str) -> Result<Option<QueueItem>, SsaError> {
        match self.position(msg_name) {
            Some(index) => self.table.remove(index).map(Some),
            None => Ok(None),
        }
    }

    /// Removes every item for which `keep` returns `false`.
    pub fn retain(&mut self, keep: impl FnMut(&QueueItem) -> bool) -> Result<Vec<QueueItem>, SsaError> {
        self.table.retain(keep)
    }

    /// Returns items whose worker is gone to `PENDING`.
    ///
    /// Used after a restart: items still marked as forking and items whose
    /// pid fails `alive` are reset. Returns how many were reset.
    pub fn reset_orphans(&mut self, alive: impl Fn(i32) -> bool) -> Result<usize, SsaError> {
        let mut reset = 0;
        for index in 0..self.table.len() {
            let item = self.table.get(index)?;
            let orphaned = item.pid == FORK_IN_PROGRESS || (item.pid > 0 && !alive(item.pid));
            if orphaned || (item.pid != PENDING && item.pid <= 0) {
                self.table.update(index, |q| {
                    q.pid = PENDING;
                    q.connect_pos = -1;
                    q.special_flag.remove(SpecialFlags::BURST_READY);
                })?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Flushes the mapping.
    pub fn flush(&self) -> Result<(), SsaError> {
        self.table.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue() -> (tempfile::TempDir, Queue) {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::attach(&dir.path().join("fd_msg_queue")).expect("attach");
        (dir, queue)
    }

    fn item(name: &str, number: f64) -> QueueItem {
        QueueItem {
            msg_name: name.to_string(),
            msg_number: number,
            files_to_send: 1,
            file_size_to_send: 10,
            ..QueueItem::default()
        }
    }

    #[test]
    fn heavier_ageing_moves_the_key_forward() {
        assert_eq!(msg_number(1_000, 0), 1_000.0);
        assert!(msg_number(1_000, 9) < msg_number(900, 0));
        assert_eq!(msg_number(1_000, 42), msg_number(1_000, MAX_AGEING_VALUE));
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let (_dir, mut q) = queue();
        q.insert(item("a", 5.0)).expect("a");
        q.insert(item("b", 5.0)).expect("b");
        q.insert(item("c", 1.0)).expect("c");
        let names: Vec<_> = q.iter().map(|i| i.msg_name).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn pending_duplicate_is_merged() {
        let (_dir, mut q) = queue();
        q.insert(item("a", 5.0)).expect("first");
        let mut again = item("a", 1.0);
        again.files_to_send = 4;
        again.file_size_to_send = 400;
        match q.insert(again).expect("second") {
            Inserted::Merged { index, previous } => {
                assert_eq!(index, 0);
                assert_eq!(previous.files_to_send, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.len(), 1);
        let merged = q.get(0).expect("get");
        assert_eq!(merged.retries, 1);
        assert_eq!(merged.files_to_send, 4);
        assert_eq!(merged.file_size_to_send, 400);
        assert_eq!(merged.msg_number, 5.0);
    }

    #[test]
    fn running_duplicate_is_ignored() {
        let (_dir, mut q) = queue();
        q.insert(item("a", 5.0)).expect("first");
        q.update(0, |i| i.pid = 4242).expect("update");
        assert_eq!(q.insert(item("a", 5.0)).expect("second"), Inserted::Running(0));
        assert_eq!(q.get(0).expect("get").retries, 0);
    }

    #[test]
    fn insert_then_remove_leaves_the_queue_byte_equal() {
        let (dir, mut q) = queue();
        let empty = q.table.area().data().to_vec();
        q.insert(item("0/f/3/5f3a_1_0", 1.0)).expect("insert");
        q.remove("0/f/3/5f3a_1_0").expect("remove").expect("present");
        assert!(q.is_empty());
        assert_eq!(q.table.area().data(), empty.as_slice());
        drop(dir);
    }

    #[test]
    fn orphans_return_to_pending() {
        let (_dir, mut q) = queue();
        q.insert(item("alive", 1.0)).expect("a");
        q.insert(item("dead", 2.0)).expect("b");
        q.insert(item("forking", 3.0)).expect("c");
        q.update(0, |i| {
            i.pid = 100;
            i.connect_pos = 0;
        })
        .expect("u0");
        q.update(1, |i| {
            i.pid = 200;
            i.connect_pos = 1;
            i.special_flag = SpecialFlags::BURST_READY;
        })
        .expect("u1");
        q.update(2, |i| i.pid = FORK_IN_PROGRESS).expect("u2");

        assert_eq!(q.reset_orphans(|pid| pid == 100).expect("reset"), 2);
        assert_eq!(q.get(0).expect("0").pid, 100);
        let dead = q.get(1).expect("1");
        assert!(dead.is_pending());
        assert_eq!(dead.connect_pos, -1);
        assert!(dead.special_flag.is_empty());
        assert!(q.get(2).expect("2").is_pending());
    }

    proptest! {
        #[test]
        fn queue_stays_sorted_and_unique(keys in proptest::collection::vec((0_u8..20, 0_u32..1_000), 1..60)) {
            let (_dir, mut q) = queue();
            for (name, number) in &keys {
                q.insert(item(&format!("job{name}"), f64::from(*number))).expect("insert");
            }
            let items: Vec<_> = q.iter().collect();
            for pair in items.windows(2) {
                prop_assert!(pair[0].msg_number <= pair[1].msg_number);
            }
            let mut names: Vec<_> = items.iter().map(|i| i.msg_name.clone()).collect();
            names.sort();
            names.dedup();
            prop_assert_eq!(names.len(), items.len());
        }
    }
}
