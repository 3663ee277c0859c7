use std::fs;

use protocol::{
    DcFlags, DeleteRequest, ExitClass, JobDescriptor, MsgName, MsgRecord, Protocol, WorkerArgs,
    WorkerExit,
};

#[test]
fn job_directory_resolves_to_its_message_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let msg_dir = dir.path().join("msg");
    fs::create_dir(&msg_dir).expect("mkdir");

    let record = MsgRecord {
        creation_time: 0x5f3a,
        file_size_to_send: 1024,
        files_to_send: 1,
        special_flag: 0,
        msg_name: "0/f/3/5f3a_1_0".to_string(),
    };
    let decoded = MsgRecord::decode(&record.encode()).expect("record");
    let name = MsgName::parse(&decoded.msg_name).expect("msg name");

    fs::write(
        msg_dir.join(name.message_file_name()),
        "DESTINATION ftp://u@h/x\nAGE_LIMIT 60\n[options]\ndupcheck 10m store warn\n",
    )
    .expect("write");

    let job = JobDescriptor::read(&msg_dir.join("f")).expect("job");
    assert_eq!(job.destination.protocol(), Protocol::Ftp);
    assert_eq!(job.destination.host, "h");
    assert_eq!(job.age_limit, 60);
    let dc = job.options.dup_check.expect("dupcheck");
    assert!(dc.flags.contains(DcFlags::STORE | DcFlags::WARN));
    assert_eq!(dc.timeout, 600);
}

#[test]
fn worker_line_for_a_parsed_job() {
    let job = JobDescriptor::parse("DESTINATION sftp://u@h:2222/in\n").expect("job");
    let program = job.destination.protocol().program();
    let args = WorkerArgs::new(program, "/afd", 1, 3, 0, "0/f/3/5f3a_1_0");
    let argv: Vec<String> = std::iter::once(program.to_string())
        .chain(args.to_args().into_iter().map(|a| a.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(WorkerArgs::parse(argv).expect("parse"), args);
}

#[test]
fn operator_deletes_of_running_jobs() {
    let wire = DeleteRequest::Message {
        msg_name: "0/f/3/5f3a_1_0".to_string(),
    }
    .encode();
    let (request, used) = DeleteRequest::decode(&wire).expect("decode").expect("complete");
    assert_eq!(used, wire.len());
    let DeleteRequest::Message { msg_name } = request else {
        panic!("unexpected request {request:?}");
    };
    assert!(MsgName::parse(&msg_name).is_ok());
}

#[test]
fn unknown_worker_exit_is_retried() {
    let exit = WorkerExit::from_code(123);
    assert_eq!(exit.class(), ExitClass::Transient);
    assert!(exit.class().is_retryable());
}
