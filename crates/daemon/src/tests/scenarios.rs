use std::io::Read;

use protocol::MsgRecord;
use ssa::{DirFlags, HostStatusFlags};

use super::support::{Fixture, announce};
use crate::fifos::FifoEvent;
use crate::paths::RECEIVE_LOG_FIFO;

fn record_for(fx: &Fixture, msg_name: &str, creation_time: i64) -> MsgRecord {
    let files = crate::daemon::list_files(&fx.daemon.work().job_dir(msg_name)).expect("job dir");
    MsgRecord {
        creation_time,
        file_size_to_send: files.iter().map(|(_, size)| size).sum(),
        files_to_send: u32::try_from(files.len()).expect("count"),
        special_flag: 0,
        msg_name: msg_name.to_string(),
    }
}

#[test]
fn announced_job_is_sent_and_cleaned_up() {
    let mut fx = Fixture::new();
    let name = fx.job(0x100, "ftp://u@h1/out", &[("a", b"hello"), ("b", b"world!")], 0);
    let record = record_for(&fx, &name, 100);
    fx.daemon.step(vec![FifoEvent::Message(record)], 100).expect("step");
    assert_eq!(fx.daemon.connections().len(), 1);
    assert_eq!(fx.daemon.status().expect("status").fd_fork_counter, 1);

    fx.wait_idle(100);
    assert!(fx.daemon.queue().is_empty());
    assert!(!fx.daemon.work().job_dir(&name).exists());
    let host = fx.daemon.fsa().get(0).expect("host");
    assert_eq!(host.file_counter_done, 2);
    assert_eq!(host.bytes_send, 11);
    assert_eq!(host.jobs_queued, 0);
    assert_eq!(host.total_file_counter, 0);

    let args = &fx.daemon.spawner().launched()[0];
    assert_eq!(args.msg_name, name);
    assert_eq!(args.fsa_pos, 0);
    assert!(!args.options.simulate);
}

#[test]
fn expired_job_is_deleted_on_arrival() {
    let mut fx = Fixture::new();
    let name = fx.job(0x101, "ftp://u@h1/out", &[("a", b"1")], 60);
    let record = record_for(&fx, &name, 100);
    fx.daemon.step(vec![FifoEvent::Message(record)], 1_000).expect("step");
    assert!(fx.daemon.queue().is_empty());
    assert!(fx.daemon.connections().is_empty());
    assert!(!fx.daemon.work().job_dir(&name).exists());
    assert!(fx.daemon.spawner().launched().is_empty());
}

#[test]
fn repeated_errors_send_through_the_other_host() {
    let mut fx = Fixture::new();
    fx.daemon.spawner_mut().push_exit(20);
    fx.daemon.spawner_mut().push_exit(20);
    let name = fx.job(0x102, "ftp://u@h1/out", &[("a", b"1")], 0);
    announce(&mut fx, &name, 100);

    fx.wait_idle(100);
    assert_eq!(fx.daemon.fsa().get(0).expect("host").error_counter, 1);
    fx.wait_idle(1_000_000);
    assert_eq!(fx.daemon.fsa().get(0).expect("host").error_counter, 2);
    fx.wait_idle(2_000_000);

    let launched = fx.daemon.spawner().launched();
    assert_eq!(launched.len(), 3);
    assert!(!launched[0].options.toggle_host);
    assert!(!launched[1].options.toggle_host);
    assert!(launched[2].options.toggle_host);
    assert!(fx.daemon.queue().is_empty());
    let host = fx.daemon.fsa().get(0).expect("host");
    assert_eq!(host.file_counter_done, 1);
    assert_eq!(host.error_counter, 2, "a toggled success does not clear the errors");
}

#[test]
fn simulation_mode_is_passed_to_workers() {
    let mut fx = Fixture::with_config(|b| b.simulate_send_mode(true));
    let name = fx.job(0x103, "ftp://u@h2/out", &[("a", b"1")], 0);
    announce(&mut fx, &name, 100);
    fx.wait_idle(100);
    let args = &fx.daemon.spawner().launched()[0];
    assert!(args.options.simulate);
    assert_eq!(args.fsa_pos, 1);
}

#[test]
fn duplicate_files_are_moved_to_the_store() {
    let mut fx = Fixture::new();
    fx.set_host(0, |h| h.allowed_transfers = 0);
    let first = fx.job_with_options(0x104, "ftp://u@h1/out", "dupcheck 1h store", &[("a", b"same")]);
    let second = fx.job_with_options(0x104, "ftp://u@h1/out", "dupcheck 1h store", &[("a", b"same")]);
    announce(&mut fx, &first, 100);
    announce(&mut fx, &second, 100);

    assert_eq!(fx.daemon.queue().len(), 1);
    assert_eq!(fx.daemon.queue().get(0).expect("item").msg_name, first);
    assert!(!fx.daemon.work().job_dir(&second).exists());
    let stored = fx.daemon.work().store().join("104").join("a");
    assert_eq!(std::fs::read(stored).expect("stored copy"), b"same");
}

#[test]
fn new_fsa_generation_is_picked_up_between_passes() {
    let mut fx = Fixture::new();
    fx.set_host(1, |h| h.allowed_transfers = 0);
    let name = fx.job(0x105, "ftp://u@h2/out", &[("a", b"1")], 0);
    announce(&mut fx, &name, 100);
    fx.wait_idle(100);
    assert_eq!(fx.daemon.queue().len(), 1);

    let old_id = fx.daemon.fsa().id();
    fx.set_host(1, |h| h.allowed_transfers = 1);
    fx.remove_host("h1");
    fx.wait_idle(100);

    assert_eq!(fx.daemon.fsa().id(), old_id + 1);
    assert_eq!(fx.daemon.fsa().len(), 1);
    assert!(fx.daemon.queue().is_empty());
    let host = fx.daemon.fsa().get(0).expect("h2");
    assert_eq!(host.host_alias, "h2");
    assert_eq!(host.file_counter_done, 1);
    assert_eq!(fx.daemon.spawner().launched()[0].fsa_pos, 0);
}

#[test]
fn due_directory_is_fetched_once() {
    let mut fx = Fixture::new();
    fx.daemon.tick(1_000).expect("tick");
    assert_eq!(fx.daemon.queue().len(), 1);
    fx.wait_idle(1_000);

    assert!(fx.daemon.queue().is_empty());
    let dir = fx.daemon.fra().expect("fra").get(0).expect("dir");
    assert_eq!(dir.queued, 0);
    assert_eq!(dir.last_retrieval, 1_000);
    assert!(!dir.dir_flag.contains(DirFlags::DIR_ERROR_SET));
    assert_eq!(fx.daemon.spawner().launched().len(), 1);
}

#[test]
fn stopped_host_keeps_its_jobs_queued() {
    let mut fx = Fixture::new();
    fx.set_host(0, |h| h.host_status.insert(HostStatusFlags::STOP_TRANSFER));
    let name = fx.job(0x106, "ftp://u@h1/out", &[("a", b"1")], 0);
    announce(&mut fx, &name, 100);
    fx.wait_idle(100);
    assert_eq!(fx.daemon.queue().len(), 1);
    assert!(fx.daemon.spawner().launched().is_empty());

    fx.set_host(0, |h| h.host_status.remove(HostStatusFlags::STOP_TRANSFER));
    fx.wait_idle(100);
    assert!(fx.daemon.queue().is_empty());
}

#[test]
fn partly_sent_job_is_finished_by_the_next_worker() {
    let mut fx = Fixture::new();
    fx.daemon.spawner_mut().hang_all();
    let name = fx.job(0x107, "ftp://u@h1/out", &[("a", b"12"), ("b", b"3456")], 0);
    announce(&mut fx, &name, 100);
    assert_eq!(fx.daemon.schedule(100).expect("schedule"), 1);

    std::fs::remove_file(fx.daemon.work().job_dir(&name).join("a")).expect("worker sent a");
    fx.set_host(0, |h| h.allowed_transfers = 0);
    fx.finish_all(62);
    fx.wait_idle(100);

    assert_eq!(fx.daemon.queue().len(), 1);
    let item = fx.daemon.queue().get(0).expect("item");
    assert!(item.is_pending());
    assert_eq!(item.retries, 0);
    assert_eq!(item.files_to_send, 1);
    assert_eq!(item.file_size_to_send, 4);
    let left = crate::daemon::list_files(&fx.daemon.work().job_dir(&name)).expect("job dir");
    assert_eq!(left, vec![("b".to_string(), 4)]);
    let host = fx.daemon.fsa().get(0).expect("host");
    assert_eq!(host.total_file_counter, 1);
    assert_eq!(host.total_file_size, 4);
    assert_eq!(host.jobs_queued, 1);
    assert_eq!(host.file_counter_done, 1);
    assert_eq!(host.bytes_send, 2);
    assert_eq!(host.active_transfers, 0);

    fx.finish_all(0);
    fx.set_host(0, |h| h.allowed_transfers = 2);
    fx.wait_idle(100);

    assert!(fx.daemon.queue().is_empty());
    assert!(!fx.daemon.work().job_dir(&name).exists());
    let host = fx.daemon.fsa().get(0).expect("host");
    assert_eq!(host.total_file_counter, 0);
    assert_eq!(host.total_file_size, 0);
    assert_eq!(host.jobs_queued, 0);
    assert_eq!(host.file_counter_done, 2);
    assert_eq!(host.bytes_send, 6);
    assert_eq!(fx.daemon.spawner().launched().len(), 2);
}

#[test]
fn warned_duplicates_are_written_to_the_receive_log() {
    let mut fx = Fixture::new();
    fx.set_host(0, |h| h.allowed_transfers = 0);
    let mut log = platform::fifo::open_fifo(&fx.daemon.work().fifo(RECEIVE_LOG_FIFO)).expect("receive log");
    let first = fx.job_with_options(0x108, "ftp://u@h1/out", "dupcheck 1h warn", &[("a.dat", b"same")]);
    let second = fx.job_with_options(0x108, "ftp://u@h1/out", "dupcheck 1h warn", &[("a.dat", b"same")]);
    announce(&mut fx, &first, 100);
    announce(&mut fx, &second, 100);
    assert_eq!(fx.daemon.queue().len(), 2, "warned duplicates are still sent");

    let mut buf = vec![0_u8; 4096];
    let n = log.read(&mut buf).expect("read receive log");
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.contains("duplicate file a.dat of job #108 sent anyway"), "{text}");
    assert!(text.contains("h1"), "{text}");
}
