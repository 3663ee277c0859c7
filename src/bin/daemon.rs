use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

/// Runs the distributor entry point and maps its status.
#[must_use]
pub fn run_with<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> ExitCode
where
    I: IntoIterator,
    I::Item: Into<OsString>,
    Out: Write,
    Err: Write,
{
    let status = ::daemon::run(args, stdout, stderr);
    let _ = stdout.flush();
    let _ = stderr.flush();
    ::daemon::exit_code_from(status)
}

#[cfg(test)]
mod tests {
    use super::run_with;
    use std::process::ExitCode;

    #[test]
    fn version_flag_reports_success() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with([::daemon::PROGRAM_NAME, "--version"], &mut stdout, &mut stderr);

        assert_eq!(exit, ExitCode::SUCCESS);
        assert!(!stdout.is_empty(), "--version should print to stdout");
        assert!(stderr.is_empty(), "--version must not write to stderr");
    }

    #[test]
    fn unknown_flag_reports_failure() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with([::daemon::PROGRAM_NAME, "--definitely-invalid-option"], &mut stdout, &mut stderr);

        assert_eq!(exit, ExitCode::from(1));
        assert!(stdout.is_empty(), "invalid flag should not write to stdout");
        assert!(!stderr.is_empty(), "invalid flag should emit diagnostics");
    }

    #[test]
    fn work_directory_without_an_fsa_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = dir.path().join("work");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with(
            [std::ffi::OsString::from(::daemon::PROGRAM_NAME), "-w".into(), work.into_os_string()],
            &mut stdout,
            &mut stderr,
        );
        assert_ne!(exit, ExitCode::SUCCESS);
    }
}
