//! Starting worker processes.

use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use protocol::{JobDescriptor, Protocol, WorkerArgs, WorkerOptions};
use ssa::{HostStatus, HostStatusFlags, QueueItem, SpecialFlags};

use crate::config::FdConfig;

/// Starts workers. Returns the pid of the new process.
///
/// The distributor reaps its workers itself, so implementations must not
/// wait for the child.
pub trait Spawner {
    /// Starts `args` and returns its pid.
    fn spawn(&mut self, args: &WorkerArgs) -> io::Result<i32>;
}

/// Runs worker programs with [`Command`].
#[derive(Clone, Debug, Default)]
pub struct ProcessSpawner {
    worker_dir: Option<PathBuf>,
}

impl ProcessSpawner {
    /// Looks programs up in `worker_dir`, or on `PATH` when `None`.
    #[must_use]
    pub const fn new(worker_dir: Option<PathBuf>) -> Self {
        Self { worker_dir }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&mut self, args: &WorkerArgs) -> io::Result<i32> {
        let program = match &self.worker_dir {
            Some(dir) => dir.join(&args.program),
            None => args.program.clone(),
        };
        let child = Command::new(&program)
            .args(args.to_args())
            .stdin(Stdio::null())
            .spawn()?;
        i32::try_from(child.id()).map_err(|_| io::Error::other("pid out of range"))
    }
}

/// Everything needed to build one worker command line.
#[derive(Clone, Copy, Debug)]
pub struct Launch<'a> {
    /// Distributor settings.
    pub config: &'a FdConfig,
    /// FSA generation the worker attaches to.
    pub fsa_id: i32,
    /// Host row.
    pub fsa_pos: usize,
    /// Job slot in the host row.
    pub job_no: usize,
    /// Host the job goes to.
    pub host: &'a HostStatus,
    /// The queued job.
    pub item: &'a QueueItem,
    /// Send to the other real host name this time.
    pub temp_toggle: bool,
}

impl Launch<'_> {
    fn base_options(&self) -> WorkerOptions {
        WorkerOptions {
            hw_crc32: self.config.hw_crc32(),
            simulate: self.config.simulate_send_mode()
                || self.host.host_status.contains(HostStatusFlags::SIMULATE_SEND_MODE),
            toggle_host: self.temp_toggle,
            disconnect: (self.host.keep_connected > 0).then_some(u64::from(self.host.keep_connected)),
            ..WorkerOptions::default()
        }
    }

    fn args(&self, program: &str, options: WorkerOptions) -> WorkerArgs {
        WorkerArgs::new(
            program,
            self.config.work_dir(),
            self.job_no,
            self.fsa_id,
            self.fsa_pos as i32,
            self.item.msg_name.clone(),
        )
        .with_options(options)
    }

    /// Command line of a send worker for `descriptor`.
    #[must_use]
    pub fn send(&self, descriptor: &JobDescriptor) -> WorkerArgs {
        let o = &descriptor.options;
        let retried = self.item.retries > 0 || self.item.special_flag.contains(SpecialFlags::OLD_ERROR_JOB);
        let base = self.base_options();
        let options = WorkerOptions {
            age_limit: (descriptor.age_limit > 0).then_some(descriptor.age_limit),
            disable_archive: self.config.disable_archive(),
            charset: o.charset.clone(),
            de_mail_sender: o.de_mail_sender.clone(),
            disconnect: o.disconnect.or(base.disconnect),
            from: o.from.clone(),
            group_mail_domain: o.group_mail_domain.clone(),
            http_proxy: o.http_proxy.clone(),
            mode: o.mode,
            retries: retried.then_some(self.item.retries),
            resend: self.item.special_flag.contains(SpecialFlags::RESEND_JOB),
            reply_to: o.reply_to.clone(),
            smtp_server: o.smtp_server.clone(),
            ..base
        };
        self.args(descriptor.destination.protocol().program(), options)
    }

    /// Command line of a fetch worker, if `protocol` can retrieve.
    #[must_use]
    pub fn fetch(&self, protocol: Protocol) -> Option<WorkerArgs> {
        let program = protocol.fetch_program()?;
        Some(self.args(program, self.base_options()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn config() -> FdConfig {
        FdConfig::builder("/afd").hw_crc32(false).simulate_send_mode(true).build()
    }

    #[test]
    fn send_line_carries_job_options() {
        let config = config();
        let host = HostStatus {
            keep_connected: 30,
            ..HostStatus::default()
        };
        let item = QueueItem {
            msg_name: "0/3/0/5f3a_1_0".to_string(),
            retries: 2,
            ..QueueItem::default()
        };
        let descriptor = JobDescriptor::parse(
            "DESTINATION smtp://mail/x\nAGE_LIMIT 60\n[options]\ncharset utf-8\nmode 644\n",
        )
        .expect("descriptor");
        let launch = Launch {
            config: &config,
            fsa_id: 4,
            fsa_pos: 1,
            job_no: 2,
            host: &host,
            item: &item,
            temp_toggle: true,
        };
        let args = launch.send(&descriptor);
        assert_eq!(args.program, PathBuf::from("sf_smtp"));
        assert_eq!(args.options.age_limit, Some(60));
        assert_eq!(args.options.charset.as_deref(), Some("utf-8"));
        assert_eq!(args.options.mode, Some(0o644));
        assert_eq!(args.options.retries, Some(2));
        assert_eq!(args.options.disconnect, Some(30));
        assert!(args.options.simulate);
        assert!(args.options.toggle_host);

        let line = args.to_args();
        assert_eq!(line[0], OsString::from("/afd"));
        assert_eq!(line[1], OsString::from("2"));
        assert_eq!(line[2], OsString::from("4"));
        assert_eq!(line[3], OsString::from("1"));
        assert_eq!(line[4], OsString::from("0/3/0/5f3a_1_0"));
    }

    #[test]
    fn fetch_line_needs_a_retrieving_protocol() {
        let config = config();
        let host = HostStatus::default();
        let item = QueueItem {
            msg_name: "2a".to_string(),
            special_flag: SpecialFlags::FETCH_JOB,
            ..QueueItem::default()
        };
        let launch = Launch {
            config: &config,
            fsa_id: 1,
            fsa_pos: 0,
            job_no: 0,
            host: &host,
            item: &item,
            temp_toggle: false,
        };
        let args = launch.fetch(Protocol::Ftp).expect("ftp retrieves");
        assert_eq!(args.program, PathBuf::from("gf_ftp"));
        assert_eq!(args.msg_name, "2a");
        assert!(launch.fetch(Protocol::Dfax).is_none());
    }

    #[test]
    fn process_spawner_starts_a_real_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spawner = ProcessSpawner::new(None);
        let args = WorkerArgs::new("/bin/true", dir.path(), 0, 1, 0, "0/1/0/1_0_0");
        let pid = spawner.spawn(&args).expect("spawn");
        assert!(pid > 0);
        let status = loop {
            if let Some(status) = platform::reap(pid).expect("reap") {
                break status;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        };
        assert_eq!(status.code(), Some(0));
    }
}
