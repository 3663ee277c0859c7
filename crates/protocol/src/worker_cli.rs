//! Command line handed to transfer workers.
//!
//! ```text
//! <program> <work_dir> <job_no> <fsa_id> <fsa_pos> <msg_name> [options]
//! ```
//!
//! The distributor builds the line with [`WorkerArgs::to_args`]; workers (and
//! the test stubs) read it back with [`WorkerArgs::parse`].

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::WorkerCliError;

/// Optional worker settings.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkerOptions {
    /// `-a`: age limit in seconds.
    pub age_limit: Option<u64>,
    /// `-A`: do not archive.
    pub disable_archive: bool,
    /// `-c`: use hardware CRC-32.
    pub hw_crc32: bool,
    /// `-C`: mail charset.
    pub charset: Option<String>,
    /// `-D`: De-Mail sender.
    pub de_mail_sender: Option<String>,
    /// `-e`: disconnect after this many idle seconds.
    pub disconnect: Option<u64>,
    /// `-f`: mail sender.
    pub from: Option<String>,
    /// `-g`: group mail domain.
    pub group_mail_domain: Option<String>,
    /// `-h`: HTTP proxy.
    pub http_proxy: Option<String>,
    /// `-m`: file mode.
    pub mode: Option<u32>,
    /// `-o`: job is an old error job with this many retries.
    pub retries: Option<u32>,
    /// `-r`: resend from archive.
    pub resend: bool,
    /// `-R`: reply-to address.
    pub reply_to: Option<String>,
    /// `-s`: mail relay.
    pub smtp_server: Option<String>,
    /// `-S`: simulate sending.
    pub simulate: bool,
    /// `-t`: send to the toggled host.
    pub toggle_host: bool,
}

/// A complete worker invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerArgs {
    /// Program to run.
    pub program: PathBuf,
    /// AFD work directory.
    pub work_dir: PathBuf,
    /// Connection slot of the job.
    pub job_no: usize,
    /// FSA generation id.
    pub fsa_id: i32,
    /// Host position in the FSA.
    pub fsa_pos: i32,
    /// Message name, or directory id for a fetch job.
    pub msg_name: String,
    /// Options.
    pub options: WorkerOptions,
}

impl WorkerArgs {
    /// Starts an invocation without options.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        job_no: usize,
        fsa_id: i32,
        fsa_pos: i32,
        msg_name: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            job_no,
            fsa_id,
            fsa_pos,
            msg_name: msg_name.into(),
            options: WorkerOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.work_dir.clone().into_os_string(),
            self.job_no.to_string().into(),
            self.fsa_id.to_string().into(),
            self.fsa_pos.to_string().into(),
            self.msg_name.clone().into(),
        ];
        let o = &self.options;
        let mut value = |flag: &str, v: Option<String>| {
            if let Some(v) = v {
                args.push(flag.into());
                args.push(v.into());
            }
        };
        value("-a", o.age_limit.map(|v| v.to_string()));
        value("-C", o.charset.clone());
        value("-D", o.de_mail_sender.clone());
        value("-e", o.disconnect.map(|v| v.to_string()));
        value("-f", o.from.clone());
        value("-g", o.group_mail_domain.clone());
        value("-h", o.http_proxy.clone());
        value("-m", o.mode.map(|v| format!("{v:o}")));
        value("-o", o.retries.map(|v| v.to_string()));
        value("-R", o.reply_to.clone());
        value("-s", o.smtp_server.clone());
        for (flag, set) in [
            ("-A", o.disable_archive),
            ("-c", o.hw_crc32),
            ("-r", o.resend),
            ("-S", o.simulate),
            ("-t", o.toggle_host),
        ] {
            if set {
                args.push(flag.into());
            }
        }
        args
    }

    /// Parses a full argument vector, program name first.
    pub fn parse<I, S>(argv: I) -> Result<Self, WorkerCliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(WorkerCliError::MissingArgument("program"))?;
        let mut positional = Vec::with_capacity(5);
        let mut options = WorkerOptions::default();

        while let Some(arg) = argv.next() {
            let Some(flag) = arg.strip_prefix('-').filter(|f| f.len() == 1) else {
                positional.push(arg);
                continue;
            };
            let letter = flag.chars().next().unwrap_or_default();
            let mut value = || argv.next().ok_or(WorkerCliError::MissingOptionValue(letter));
            match letter {
                'a' => options.age_limit = Some(num("-a", &value()?)?),
                'A' => options.disable_archive = true,
                'c' => options.hw_crc32 = true,
                'C' => options.charset = Some(value()?),
                'D' => options.de_mail_sender = Some(value()?),
                'e' => options.disconnect = Some(num("-e", &value()?)?),
                'f' => options.from = Some(value()?),
                'g' => options.group_mail_domain = Some(value()?),
                'h' => options.http_proxy = Some(value()?),
                'm' => {
                    let v = value()?;
                    options.mode = Some(u32::from_str_radix(&v, 8).map_err(|_| {
                        WorkerCliError::InvalidValue {
                            name: "-m",
                            value: v.clone(),
                        }
                    })?);
                }
                'o' => options.retries = Some(num("-o", &value()?)?),
                'r' => options.resend = true,
                'R' => options.reply_to = Some(value()?),
                's' => options.smtp_server = Some(value()?),
                'S' => options.simulate = true,
                't' => options.toggle_host = true,
                other => return Err(WorkerCliError::UnknownOption(other)),
            }
        }

        let mut positional = positional.into_iter();
        let mut next = |name: &'static str| {
            positional
                .next()
                .ok_or(WorkerCliError::MissingArgument(name))
        };
        let work_dir = next("work_dir")?;
        let job_no = num("job_no", &next("job_no")?)?;
        let fsa_id = num("fsa_id", &next("fsa_id")?)?;
        let fsa_pos = num("fsa_pos", &next("fsa_pos")?)?;
        let msg_name = next("msg_name")?;

        Ok(Self {
            program: program.into(),
            work_dir: work_dir.into(),
            job_no,
            fsa_id,
            fsa_pos,
            msg_name,
            options,
        })
    }
}

fn num<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, WorkerCliError> {
    value.parse().map_err(|_| WorkerCliError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &WorkerArgs) -> Vec<String> {
        std::iter::once(args.program.display().to_string())
            .chain(args.to_args().into_iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn positional_arguments_come_first() {
        let args = WorkerArgs::new("sf_ftp", "/afd", 2, 7, 4, "0/f/3/5f3a_1_0");
        assert_eq!(
            strings(&args),
            ["sf_ftp", "/afd", "2", "7", "4", "0/f/3/5f3a_1_0"]
        );
    }

    #[test]
    fn options_survive_a_parse() {
        let args = WorkerArgs::new("sf_smtp", "/afd", 0, 1, 0, "0/f/3/5f3a_1_0").with_options(
            WorkerOptions {
                age_limit: Some(60),
                disable_archive: true,
                disconnect: Some(30),
                mode: Some(0o640),
                retries: Some(3),
                smtp_server: Some("relay:25".to_string()),
                simulate: true,
                toggle_host: true,
                ..WorkerOptions::default()
            },
        );
        let parsed = WorkerArgs::parse(strings(&args)).expect("parse");
        assert_eq!(parsed, args);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            WorkerArgs::parse(["sf_loc", "/afd", "0"]),
            Err(WorkerCliError::MissingArgument("fsa_id"))
        );
        assert_eq!(
            WorkerArgs::parse(["sf_loc", "/afd", "0", "1", "2", "m", "-x"]),
            Err(WorkerCliError::UnknownOption('x'))
        );
        assert_eq!(
            WorkerArgs::parse(["sf_loc", "/afd", "0", "1", "2", "m", "-a"]),
            Err(WorkerCliError::MissingOptionValue('a'))
        );
        assert!(matches!(
            WorkerArgs::parse(["sf_loc", "/afd", "zero", "1", "2", "m"]),
            Err(WorkerCliError::InvalidValue { name: "job_no", .. })
        ));
    }
}
