//! A temporary work directory with an FSA, an FRA and a running [`Daemon`]
//! whose workers are shell one-liners.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use filetime::FileTime;
use protocol::{MsgRecord, WorkerArgs};
use ssa::fsa::HOST_ONE;
use ssa::{DirStatus, Fra, Fsa, HostStatus, QueueItem};
use tempfile::TempDir;

use crate::config::{FdConfig, FdConfigBuilder};
use crate::daemon::{Daemon, now};
use crate::paths::WorkDir;
use crate::worker::Spawner;

/// Id of the one retrieve directory in the FRA.
pub(crate) const DIR_ID: u32 = 0xd1;

/// Aliases of the FSA rows, in position order.
pub(crate) const HOSTS: [&str; 2] = ["h1", "h2"];

/// Starts `/bin/sh -c 'exit N'` for every worker.
///
/// Exit codes are taken from a queue (0 once empty). In hang mode workers
/// wait for the release file and exit with the code written into it.
#[derive(Debug)]
pub(crate) struct StubSpawner {
    exits: VecDeque<i32>,
    hang: bool,
    fail_next: bool,
    release: PathBuf,
    launched: Vec<WorkerArgs>,
}

impl StubSpawner {
    fn new(release: PathBuf) -> Self {
        Self {
            exits: VecDeque::new(),
            hang: false,
            fail_next: false,
            release,
            launched: Vec::new(),
        }
    }

    /// The next worker exits with `code`.
    pub(crate) fn push_exit(&mut self, code: i32) {
        self.exits.push_back(code);
    }

    /// Workers run until [`Fixture::finish_all`] releases them.
    pub(crate) fn hang_all(&mut self) {
        self.hang = true;
    }

    /// The next spawn fails as if the program were missing.
    pub(crate) fn fail_next(&mut self) {
        self.fail_next = true;
    }

    /// Every invocation so far.
    pub(crate) fn launched(&self) -> &[WorkerArgs] {
        &self.launched
    }
}

impl Spawner for StubSpawner {
    fn spawn(&mut self, args: &WorkerArgs) -> io::Result<i32> {
        if std::mem::take(&mut self.fail_next) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such worker"));
        }
        self.launched.push(args.clone());
        let script = if self.hang {
            let release = self.release.display();
            format!("while [ ! -f '{release}' ]; do sleep 0.02; done; exit $(cat '{release}')")
        } else {
            format!("exit {}", self.exits.pop_front().unwrap_or(0))
        };
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .spawn()?;
        i32::try_from(child.id()).map_err(|_| io::Error::other("pid out of range"))
    }
}

fn host(alias: &str, pos: usize) -> HostStatus {
    HostStatus {
        host_alias: alias.to_string(),
        real_hostname: [alias.to_string(), format!("{alias}b")],
        host_id: 0x100 + u32::try_from(pos).unwrap_or(0),
        host_toggle: HOST_ONE,
        allowed_transfers: 2,
        max_errors: 2,
        retry_interval: 60,
        ..HostStatus::default()
    }
}

fn retrieve_dir() -> DirStatus {
    DirStatus {
        dir_alias: "in".to_string(),
        host_alias: HOSTS[0].to_string(),
        url: format!("ftp://u@{}/in", HOSTS[0]),
        dir_id: DIR_ID,
        fsa_pos: 0,
        next_check_time: 0,
        ..DirStatus::default()
    }
}

/// A daemon over a fresh work directory.
pub(crate) struct Fixture {
    tmp: TempDir,
    jobs: u32,
    pub(crate) daemon: Daemon<StubSpawner>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    pub(crate) fn with_config(configure: impl FnOnce(FdConfigBuilder) -> FdConfigBuilder) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_layout().expect("layout");
        let hosts: Vec<HostStatus> = HOSTS.iter().enumerate().map(|(pos, alias)| host(alias, pos)).collect();
        Fsa::create(&work.fifodir(), 1, &hosts).expect("fsa");
        Fra::create(&work.fifodir(), 1, &[retrieve_dir()]).expect("fra");

        let config = configure(FdConfig::builder(tmp.path())).build();
        let spawner = StubSpawner::new(tmp.path().join("release"));
        let daemon = Daemon::open(config, spawner).expect("open daemon");
        Self { tmp, jobs: 0, daemon }
    }

    /// Replaces the daemon with a new instance on the same work directory,
    /// as after a restart of the process.
    pub(crate) fn reopen(&mut self) {
        self.daemon.flush().expect("flush");
        let config = self.daemon.config().clone();
        let spawner = StubSpawner::new(self.tmp.path().join("release"));
        self.daemon = Daemon::open(config, spawner).expect("reopen daemon");
    }

    /// Writes a message file for `job_id` and a job directory holding
    /// `files`. Returns the message name.
    pub(crate) fn job(&mut self, job_id: u32, url: &str, files: &[(&str, &[u8])], age_limit: u32) -> String {
        self.write_job(job_id, &format!("DESTINATION {url}\nAGE_LIMIT {age_limit}\n"), files)
    }

    /// Like [`Fixture::job`] with `options` as the `[options]` block.
    pub(crate) fn job_with_options(&mut self, job_id: u32, url: &str, options: &str, files: &[(&str, &[u8])]) -> String {
        self.write_job(job_id, &format!("DESTINATION {url}\n[options]\n{options}\n"), files)
    }

    fn write_job(&mut self, job_id: u32, message: &str, files: &[(&str, &[u8])]) -> String {
        fs::write(self.daemon.work().message_file(job_id), message).expect("message file");
        self.jobs += 1;
        let name = format!("0/{job_id:x}/0/64_{:x}_0", self.jobs);
        self.files(&name, files);
        name
    }

    /// Creates the job directory of `msg_name` with `files`.
    pub(crate) fn files(&self, msg_name: &str, files: &[(&str, &[u8])]) {
        let dir = self.daemon.work().job_dir(msg_name);
        fs::create_dir_all(&dir).expect("job dir");
        for (name, data) in files {
            fs::write(dir.join(name), data).expect("job file");
        }
    }

    /// Rewrites host row `pos`, job slots included.
    pub(crate) fn set_host(&mut self, pos: usize, f: impl FnOnce(&mut HostStatus)) {
        let fsa = self.daemon.fsa_mut();
        let mut record = fsa.get(pos).expect("host");
        f(&mut record);
        fsa.set(pos, &record).expect("write host");
    }

    pub(crate) fn set_item(&mut self, index: usize, f: impl FnOnce(&mut QueueItem)) {
        self.daemon.queue_mut().update(index, f).expect("update item");
    }

    pub(crate) fn set_dir(&mut self, pos: usize, f: impl FnOnce(&mut DirStatus)) {
        let fra = self.daemon.fra_mut().expect("fra");
        fra.table_mut().update(pos, f).expect("update dir");
    }

    /// Publishes a new FSA generation without `alias`, the way AMG does
    /// after a host was removed from the configuration.
    pub(crate) fn remove_host(&mut self, alias: &str) {
        let hosts: Vec<HostStatus> = self.daemon.fsa().iter().filter(|h| h.host_alias != alias).collect();
        let _next = self.daemon.fsa_mut().replace(&hosts).expect("replace fsa");
    }

    /// Sets the modification time of the message file of `job_id`.
    pub(crate) fn backdate_message(&self, job_id: u32, mtime: i64) {
        let path = self.daemon.work().message_file(job_id);
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).expect("backdate");
    }

    /// Steps the daemon at `now` until no worker is left.
    pub(crate) fn wait_idle(&mut self, now: i64) {
        for _ in 0..1_000 {
            self.daemon.step(Vec::new(), now).expect("step");
            if self.daemon.connections().is_empty() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("workers still running: {}", self.daemon.connections().len());
    }

    /// Lets every hanging worker exit with `code`.
    pub(crate) fn finish_all(&self, code: i32) {
        fs::write(self.tmp.path().join("release"), code.to_string()).expect("release");
    }

    /// Kills every worker and lets the daemon notice.
    pub(crate) fn kill_all(&mut self) {
        let pids: Vec<i32> = self.daemon.connections().live().map(|(_, c)| c.pid).collect();
        for pid in pids {
            platform::terminate(pid).expect("kill worker");
        }
        self.daemon.reap_workers(now()).expect("reap");
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        for (_, connection) in self.daemon.connections().live() {
            let _ = platform::terminate(connection.pid);
        }
    }
}

/// Announces job `msg_name` on the message fifo path, counting its files.
pub(crate) fn announce(fx: &mut Fixture, msg_name: &str, now: i64) {
    let dir = fx.daemon.work().job_dir(msg_name);
    let files = crate::daemon::list_files(&dir).unwrap_or_default();
    let record = MsgRecord {
        creation_time: now,
        file_size_to_send: files.iter().map(|(_, size)| size).sum(),
        files_to_send: u32::try_from(files.len()).unwrap_or(u32::MAX),
        special_flag: 0,
        msg_name: msg_name.to_string(),
    };
    fx.daemon.handle_message(&record, now).expect("announce");
}
