use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Arg, ArgAction, Command, builder::PathBufValueParser};
use logging::{FifoSink, SharedSink};

use crate::config::{ConfigFile, FdConfig, WORK_DIR_ENV};
use crate::daemon::run_daemon;
use crate::error::{FdError, FdExitCode};
use crate::paths::{SYSTEM_LOG_FIFO, WorkDir};

/// Name the binary reports in help and version output.
pub const PROGRAM_NAME: &str = "fd";

/// Largest status the process can report.
pub const MAX_EXIT_CODE: i32 = 255;

/// Environment variable holding the tracing filter when `--log-filter` is
/// not given.
pub const LOG_FILTER_ENV: &str = "AFD_LOG";

const DEFAULT_LOG_FILTER: &str = "info";

/// Runs the distributor CLI using the provided argument iterator and output
/// handles.
///
/// The function returns the process exit code that should be used by the
/// caller.
#[allow(clippy::module_name_repetitions)]
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    match parse_args(arguments) {
        Ok(parsed) => execute(parsed, stdout, stderr, |key| std::env::var(key).ok()),
        Err(error) => {
            let _ = write!(stderr, "{error}");
            FdExitCode::Syntax.as_i32()
        }
    }
}

fn execute<Out, Err>(
    parsed: ParsedArgs,
    stdout: &mut Out,
    stderr: &mut Err,
    lookup: impl Fn(&str) -> Option<String>,
) -> i32
where
    Out: Write,
    Err: Write,
{
    if parsed.show_help {
        let help = render_help();
        return if stdout.write_all(help.as_bytes()).is_ok() { 0 } else { 1 };
    }
    if parsed.show_version {
        let banner = format!("{PROGRAM_NAME} {}\n", env!("CARGO_PKG_VERSION"));
        return if stdout.write_all(banner.as_bytes()).is_ok() { 0 } else { 1 };
    }

    let result = resolve_config(&parsed, &lookup).and_then(|config| {
        let filter = parsed
            .log_filter
            .clone()
            .or_else(|| lookup(LOG_FILTER_ENV))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        start_logging(&config, &filter)?;
        run_daemon(config)
    });
    match result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(target: "fd::daemon", %error, "distributor failed");
            let _ = writeln!(stderr, "{PROGRAM_NAME}: {error}");
            error.exit_code().as_i32()
        }
    }
}

/// Converts a numeric exit code into an [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    std::process::ExitCode::from(clamped as u8)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ParsedArgs {
    pub(crate) show_help: bool,
    pub(crate) show_version: bool,
    pub(crate) simulate: bool,
    pub(crate) work_dir: Option<PathBuf>,
    pub(crate) log_filter: Option<String>,
}

fn clap_command() -> Command {
    Command::new(PROGRAM_NAME)
        .about("Distributes the jobs queued by AMG to transfer workers.")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .help("Show this help message and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .short('V')
                .help("Output version information and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("work-dir")
                .long("work-dir")
                .short('w')
                .value_name("DIR")
                .help("AFD work directory; defaults to $AFD_WORK_DIR.")
                .value_parser(PathBufValueParser::new()),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .short('S')
                .help("Start workers in simulation mode: no data leaves the host.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-filter")
                .long("log-filter")
                .value_name("FILTER")
                .help("Tracing filter for stderr and the system log, e.g. info,fd::mdb=debug; defaults to $AFD_LOG."),
        )
}

pub(crate) fn parse_args<I, S>(arguments: I) -> Result<ParsedArgs, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from(PROGRAM_NAME));
    }

    let mut matches = clap_command().try_get_matches_from(args)?;
    Ok(ParsedArgs {
        show_help: matches.get_flag("help"),
        show_version: matches.get_flag("version"),
        simulate: matches.get_flag("simulate"),
        work_dir: matches.remove_one::<PathBuf>("work-dir"),
        log_filter: matches.remove_one::<String>("log-filter"),
    })
}

pub(crate) fn render_help() -> String {
    clap_command().render_help().to_string()
}

/// Layers defaults, `AFD_CONFIG`, the environment and the command line.
pub(crate) fn resolve_config(
    parsed: &ParsedArgs,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<FdConfig, FdError> {
    let work_dir = parsed
        .work_dir
        .clone()
        .or_else(|| lookup(WORK_DIR_ENV).filter(|dir| !dir.is_empty()).map(PathBuf::from))
        .ok_or(FdError::MissingWorkDir)?;
    let file = ConfigFile::read(&WorkDir::new(&work_dir).config_file())?;
    let mut builder = FdConfig::builder(work_dir).apply_file(&file).apply_env(lookup);
    if parsed.simulate {
        builder = builder.simulate_send_mode(true);
    }
    Ok(builder.build())
}

/// Sends tracing output to stderr and warnings to the system log fifo.
fn start_logging(config: &FdConfig, filter: &str) -> Result<(), FdError> {
    let work = WorkDir::new(config.work_dir());
    work.create_layout()?;
    let path = work.fifo(SYSTEM_LOG_FIFO);
    let sink: Option<SharedSink<std::fs::File>> = match FifoSink::open(&path) {
        Ok(sink) => Some(Arc::new(Mutex::new(sink))),
        Err(error) => {
            eprintln!("{PROGRAM_NAME}: system log {} unavailable: {error}", path.display());
            None
        }
    };
    if !logging::init_tracing(filter, sink) {
        tracing::debug!(target: "fd::daemon", "tracing subscriber already installed");
    }
    Ok(())
}
