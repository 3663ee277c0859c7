//! Distributor settings.
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! `$AFD_WORK_DIR/etc/AFD_CONFIG`, then the environment and the command
//! line. The file is a list of `KEYWORD value` lines:
//!
//! ```text
//! # distributor settings
//! MAX_CONNECTIONS      40
//! DEFAULT_AGEING       6
//! REMOVED_HOST_POLICY  kill
//! TRL_GROUP            wan 2M alpha,beta
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bandwidth::{TrlGroup, TrlGroups, parse_rate_limit};
use ssa::FeatureFlags;
use ssa::mdb::{DEFAULT_AGEING, MAX_AGEING_VALUE, MIN_AGEING_VALUE};

use crate::error::FdError;

/// Default cap on parallel workers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
/// Default number of rotated output logs kept.
pub const DEFAULT_MAX_OUTPUT_LOG_FILES: u32 = 7;
/// Default output log rotation period in seconds.
pub const DEFAULT_SWITCH_FILE_TIME: i64 = 86_400;
/// Default transfer timeout handed to workers, in seconds.
pub const DEFAULT_TRANSFER_TIMEOUT: i64 = 120;
/// Default archive bucket width in seconds.
pub const DEFAULT_ARCHIVE_STEP_TIME: i64 = 120;
/// Default cap of the retry backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF_LIMIT: u32 = 8;
/// Default interval of the housekeeping tick.
pub const DEFAULT_LOG_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Environment variable naming the work directory.
pub const WORK_DIR_ENV: &str = "AFD_WORK_DIR";
/// Environment variable switching hardware CRC-32 off (`0`) or on.
pub const HW_CRC32_ENV: &str = "AFD_HW_CRC32";
/// Environment variable switching target directory creation on (`1`).
pub const CREATE_TARGET_DIR_ENV: &str = "AFD_CREATE_TARGET_DIR";

/// What happens to a running worker whose host disappeared from the FSA.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum RemovedHostPolicy {
    /// Let the worker finish against a detached host row.
    #[default]
    Park,
    /// Kill the worker and purge its job.
    Kill,
}

impl FromStr for RemovedHostPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "park" => Ok(Self::Park),
            "kill" => Ok(Self::Kill),
            other => Err(format!("expected park or kill, found {other:?}")),
        }
    }
}

/// Resolved settings of one distributor instance.
#[derive(Clone, Debug)]
pub struct FdConfig {
    work_dir: PathBuf,
    max_connections: usize,
    default_ageing: i32,
    max_output_log_files: u32,
    switch_file_time: i64,
    removed_host_policy: RemovedHostPolicy,
    worker_dir: Option<PathBuf>,
    default_transfer_timeout: i64,
    archive_step_time: i64,
    create_target_dir: bool,
    simulate_send_mode: bool,
    disable_archive: bool,
    hw_crc32: bool,
    max_retries: u32,
    retry_backoff_limit: u32,
    trl_groups: TrlGroups,
    log_check_interval: Duration,
    respect_do_not_delete: bool,
}

impl FdConfig {
    /// Starts a builder with defaults for `work_dir`.
    #[must_use]
    pub fn builder(work_dir: impl Into<PathBuf>) -> FdConfigBuilder {
        FdConfigBuilder::new(work_dir.into())
    }

    /// Work directory.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Cap on parallel workers over all hosts.
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Ageing weight of jobs whose message file sets none.
    #[must_use]
    pub const fn default_ageing(&self) -> i32 {
        self.default_ageing
    }

    /// Seconds after which an unused message file may be reaped.
    #[must_use]
    pub const fn message_max_age(&self) -> i64 {
        self.switch_file_time * self.max_output_log_files as i64
    }

    /// Policy for workers of removed hosts.
    #[must_use]
    pub const fn removed_host_policy(&self) -> RemovedHostPolicy {
        self.removed_host_policy
    }

    /// Directory holding the worker programs, `None` to search `PATH`.
    #[must_use]
    pub fn worker_dir(&self) -> Option<&Path> {
        self.worker_dir.as_deref()
    }

    /// Disconnect timeout handed to workers when the job sets none.
    #[must_use]
    pub const fn default_transfer_timeout(&self) -> i64 {
        self.default_transfer_timeout
    }

    /// Archive bucket width in seconds.
    #[must_use]
    pub const fn archive_step_time(&self) -> i64 {
        self.archive_step_time
    }

    /// Workers only simulate sending.
    #[must_use]
    pub const fn simulate_send_mode(&self) -> bool {
        self.simulate_send_mode
    }

    /// Sent files are never archived.
    #[must_use]
    pub const fn disable_archive(&self) -> bool {
        self.disable_archive
    }

    /// Hardware CRC-32 may be used.
    #[must_use]
    pub const fn hw_crc32(&self) -> bool {
        self.hw_crc32
    }

    /// Failed attempts after which a job is dropped, 0 for never.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Cap of the retry backoff multiplier.
    #[must_use]
    pub const fn retry_backoff_limit(&self) -> u32 {
        self.retry_backoff_limit
    }

    /// Rate-limit groups.
    #[must_use]
    pub const fn trl_groups(&self) -> &TrlGroups {
        &self.trl_groups
    }

    /// Interval of the housekeeping tick and maximum poll wait.
    #[must_use]
    pub const fn log_check_interval(&self) -> Duration {
        self.log_check_interval
    }

    /// Keep files whose archive name is too long when the host sets
    /// `DO_NOT_DELETE_DATA`.
    #[must_use]
    pub const fn respect_do_not_delete(&self) -> bool {
        self.respect_do_not_delete
    }

    /// Feature bits published in the FSA header.
    #[must_use]
    pub fn features(&self) -> FeatureFlags {
        let mut flags = FeatureFlags::empty();
        flags.set(FeatureFlags::DISABLE_ARCHIVE, self.disable_archive);
        flags.set(FeatureFlags::ENABLE_CREATE_TARGET_DIR, self.create_target_dir);
        flags.set(FeatureFlags::ENABLE_SIMULATE_SEND_MODE, self.simulate_send_mode);
        flags.set(FeatureFlags::ENABLE_HW_CRC32, self.hw_crc32);
        flags
    }
}

/// Builder used to assemble an [`FdConfig`].
#[derive(Clone, Debug)]
pub struct FdConfigBuilder {
    config: FdConfig,
}

impl FdConfigBuilder {
    fn new(work_dir: PathBuf) -> Self {
        Self {
            config: FdConfig {
                work_dir,
                max_connections: DEFAULT_MAX_CONNECTIONS,
                default_ageing: DEFAULT_AGEING,
                max_output_log_files: DEFAULT_MAX_OUTPUT_LOG_FILES,
                switch_file_time: DEFAULT_SWITCH_FILE_TIME,
                removed_host_policy: RemovedHostPolicy::default(),
                worker_dir: None,
                default_transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
                archive_step_time: DEFAULT_ARCHIVE_STEP_TIME,
                create_target_dir: false,
                simulate_send_mode: false,
                disable_archive: false,
                hw_crc32: checksums::hw_crc32_available(),
                max_retries: 0,
                retry_backoff_limit: DEFAULT_RETRY_BACKOFF_LIMIT,
                trl_groups: TrlGroups::default(),
                log_check_interval: DEFAULT_LOG_CHECK_INTERVAL,
                respect_do_not_delete: false,
            },
        }
    }

    /// Caps parallel workers.
    #[must_use]
    pub fn max_connections(mut self, value: usize) -> Self {
        self.config.max_connections = value.max(1);
        self
    }

    /// Sets the default ageing weight.
    #[must_use]
    pub fn default_ageing(mut self, value: i32) -> Self {
        self.config.default_ageing = value.clamp(MIN_AGEING_VALUE, MAX_AGEING_VALUE);
        self
    }

    /// Sets the number of rotated output logs.
    #[must_use]
    pub fn max_output_log_files(mut self, value: u32) -> Self {
        self.config.max_output_log_files = value;
        self
    }

    /// Sets the output log rotation period.
    #[must_use]
    pub fn switch_file_time(mut self, seconds: i64) -> Self {
        self.config.switch_file_time = seconds;
        self
    }

    /// Selects the removed-host policy.
    #[must_use]
    pub fn removed_host_policy(mut self, policy: RemovedHostPolicy) -> Self {
        self.config.removed_host_policy = policy;
        self
    }

    /// Sets the directory of worker programs.
    #[must_use]
    pub fn worker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.worker_dir = Some(dir.into());
        self
    }

    /// Sets the default transfer timeout.
    #[must_use]
    pub fn default_transfer_timeout(mut self, seconds: i64) -> Self {
        self.config.default_transfer_timeout = seconds;
        self
    }

    /// Sets the archive bucket width.
    #[must_use]
    pub fn archive_step_time(mut self, seconds: i64) -> Self {
        self.config.archive_step_time = seconds.max(1);
        self
    }

    /// Lets workers create missing target directories.
    #[must_use]
    pub fn create_target_dir(mut self, on: bool) -> Self {
        self.config.create_target_dir = on;
        self
    }

    /// Makes workers only simulate sending.
    #[must_use]
    pub fn simulate_send_mode(mut self, on: bool) -> Self {
        self.config.simulate_send_mode = on;
        self
    }

    /// Disables archiving.
    #[must_use]
    pub fn disable_archive(mut self, on: bool) -> Self {
        self.config.disable_archive = on;
        self
    }

    /// Allows hardware CRC-32.
    #[must_use]
    pub fn hw_crc32(mut self, on: bool) -> Self {
        self.config.hw_crc32 = on;
        self
    }

    /// Sets the retry ceiling, 0 for unlimited.
    #[must_use]
    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    /// Caps the retry backoff multiplier.
    #[must_use]
    pub fn retry_backoff_limit(mut self, value: u32) -> Self {
        self.config.retry_backoff_limit = value.max(1);
        self
    }

    /// Adds a rate-limit group.
    #[must_use]
    pub fn trl_group(mut self, group: TrlGroup) -> Self {
        self.config.trl_groups.push(group);
        self
    }

    /// Sets the housekeeping interval.
    #[must_use]
    pub fn log_check_interval(mut self, interval: Duration) -> Self {
        self.config.log_check_interval = interval;
        self
    }

    /// Keeps over-long archive names of `DO_NOT_DELETE_DATA` hosts.
    #[must_use]
    pub fn respect_do_not_delete(mut self, on: bool) -> Self {
        self.config.respect_do_not_delete = on;
        self
    }

    /// Applies every value set in a configuration file.
    #[must_use]
    pub fn apply_file(mut self, file: &ConfigFile) -> Self {
        if let Some(v) = file.max_connections {
            self = self.max_connections(v);
        }
        if let Some(v) = file.default_ageing {
            self = self.default_ageing(v);
        }
        if let Some(v) = file.max_output_log_files {
            self = self.max_output_log_files(v);
        }
        if let Some(v) = file.switch_file_time {
            self = self.switch_file_time(v);
        }
        if let Some(v) = file.removed_host_policy {
            self = self.removed_host_policy(v);
        }
        if let Some(v) = &file.worker_dir {
            self = self.worker_dir(v.clone());
        }
        if let Some(v) = file.default_transfer_timeout {
            self = self.default_transfer_timeout(v);
        }
        if let Some(v) = file.archive_step_time {
            self = self.archive_step_time(v);
        }
        if let Some(v) = file.create_target_dir {
            self = self.create_target_dir(v);
        }
        if let Some(v) = file.simulate_send_mode {
            self = self.simulate_send_mode(v);
        }
        if let Some(v) = file.disable_archive {
            self = self.disable_archive(v);
        }
        if let Some(v) = file.hw_crc32 {
            self = self.hw_crc32(v);
        }
        if let Some(v) = file.max_retries {
            self = self.max_retries(v);
        }
        if let Some(v) = file.retry_backoff_limit {
            self = self.retry_backoff_limit(v);
        }
        if let Some(v) = file.log_check_interval {
            self = self.log_check_interval(v);
        }
        if let Some(v) = file.respect_do_not_delete {
            self = self.respect_do_not_delete(v);
        }
        for group in &file.trl_groups {
            self = self.trl_group(group.clone());
        }
        self
    }

    /// Applies `AFD_HW_CRC32` and `AFD_CREATE_TARGET_DIR`.
    #[must_use]
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(HW_CRC32_ENV) {
            self = self.hw_crc32(value.trim() != "0" && checksums::hw_crc32_available());
        }
        if let Some(value) = lookup(CREATE_TARGET_DIR_ENV) {
            self = self.create_target_dir(value.trim() == "1");
        }
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> FdConfig {
        self.config
    }
}

/// Values read from `AFD_CONFIG`; `None` where the file is silent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// `MAX_CONNECTIONS`
    pub max_connections: Option<usize>,
    /// `DEFAULT_AGEING`
    pub default_ageing: Option<i32>,
    /// `MAX_OUTPUT_LOG_FILES`
    pub max_output_log_files: Option<u32>,
    /// `SWITCH_FILE_TIME`
    pub switch_file_time: Option<i64>,
    /// `REMOVED_HOST_POLICY`
    pub removed_host_policy: Option<RemovedHostPolicy>,
    /// `WORKER_DIR`
    pub worker_dir: Option<PathBuf>,
    /// `DEFAULT_TRANSFER_TIMEOUT`
    pub default_transfer_timeout: Option<i64>,
    /// `ARCHIVE_STEP_TIME`
    pub archive_step_time: Option<i64>,
    /// `CREATE_TARGET_DIR`
    pub create_target_dir: Option<bool>,
    /// `SIMULATE_SEND_MODE`
    pub simulate_send_mode: Option<bool>,
    /// `DISABLE_ARCHIVE`
    pub disable_archive: Option<bool>,
    /// `HW_CRC32`
    pub hw_crc32: Option<bool>,
    /// `MAX_RETRIES`
    pub max_retries: Option<u32>,
    /// `RETRY_BACKOFF_LIMIT`
    pub retry_backoff_limit: Option<u32>,
    /// `LOG_CHECK_INTERVAL`
    pub log_check_interval: Option<Duration>,
    /// `RESPECT_DO_NOT_DELETE`
    pub respect_do_not_delete: Option<bool>,
    /// `TRL_GROUP` lines.
    pub trl_groups: Vec<TrlGroup>,
}

impl ConfigFile {
    /// Reads `path`; a missing file yields an empty configuration.
    pub fn read(path: &Path) -> Result<Self, FdError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, Some(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(target: "fd::config", path = %path.display(), "no AFD_CONFIG, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(FdError::io("read", path, e)),
        }
    }

    /// Parses configuration text; `path` is used in error messages.
    pub fn parse(text: &str, path: Option<&Path>) -> Result<Self, FdError> {
        Parser {
            path,
            line_number: 0,
        }
        .parse(text)
    }
}

struct Parser<'a> {
    path: Option<&'a Path>,
    line_number: usize,
}

impl Parser<'_> {
    fn parse(mut self, text: &str) -> Result<ConfigFile, FdError> {
        let mut file = ConfigFile::default();
        for line in text.lines() {
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (keyword, value) = match trimmed.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (trimmed, ""),
            };
            self.directive(&mut file, keyword, value)?;
        }
        Ok(file)
    }

    fn directive(&self, file: &mut ConfigFile, keyword: &str, value: &str) -> Result<(), FdError> {
        match keyword {
            "MAX_CONNECTIONS" => {
                let n: usize = self.number(keyword, value)?;
                if n == 0 {
                    return Err(self.error("MAX_CONNECTIONS must be at least 1"));
                }
                file.max_connections = Some(n);
            }
            "DEFAULT_AGEING" => {
                let n: i32 = self.number(keyword, value)?;
                if !(MIN_AGEING_VALUE..=MAX_AGEING_VALUE).contains(&n) {
                    return Err(self.error(format!(
                        "DEFAULT_AGEING must be between {MIN_AGEING_VALUE} and {MAX_AGEING_VALUE}"
                    )));
                }
                file.default_ageing = Some(n);
            }
            "MAX_OUTPUT_LOG_FILES" => file.max_output_log_files = Some(self.number(keyword, value)?),
            "SWITCH_FILE_TIME" => file.switch_file_time = Some(self.number(keyword, value)?),
            "REMOVED_HOST_POLICY" => {
                file.removed_host_policy = Some(value.parse().map_err(|e: String| self.error(e))?);
            }
            "WORKER_DIR" => {
                if value.is_empty() {
                    return Err(self.error("WORKER_DIR must not be empty"));
                }
                file.worker_dir = Some(PathBuf::from(value));
            }
            "DEFAULT_TRANSFER_TIMEOUT" => {
                file.default_transfer_timeout = Some(self.number(keyword, value)?);
            }
            "ARCHIVE_STEP_TIME" => {
                let n: i64 = self.number(keyword, value)?;
                if n <= 0 {
                    return Err(self.error("ARCHIVE_STEP_TIME must be positive"));
                }
                file.archive_step_time = Some(n);
            }
            "CREATE_TARGET_DIR" => file.create_target_dir = Some(self.boolean(value)?),
            "SIMULATE_SEND_MODE" => file.simulate_send_mode = Some(self.boolean(value)?),
            "DISABLE_ARCHIVE" => file.disable_archive = Some(self.boolean(value)?),
            "HW_CRC32" => file.hw_crc32 = Some(self.boolean(value)?),
            "MAX_RETRIES" => file.max_retries = Some(self.number(keyword, value)?),
            "RETRY_BACKOFF_LIMIT" => file.retry_backoff_limit = Some(self.number(keyword, value)?),
            "LOG_CHECK_INTERVAL" => {
                let seconds: u64 = self.number(keyword, value)?;
                if seconds == 0 {
                    return Err(self.error("LOG_CHECK_INTERVAL must be positive"));
                }
                file.log_check_interval = Some(Duration::from_secs(seconds));
            }
            "RESPECT_DO_NOT_DELETE" => file.respect_do_not_delete = Some(self.boolean(value)?),
            "TRL_GROUP" => file.trl_groups.push(self.trl_group(value)?),
            other => {
                tracing::warn!(
                    target: "fd::config",
                    line = self.line_number,
                    keyword = other,
                    "unknown AFD_CONFIG keyword ignored"
                );
            }
        }
        Ok(())
    }

    fn trl_group(&self, value: &str) -> Result<TrlGroup, FdError> {
        let mut fields = value.split_whitespace();
        let (Some(name), Some(limit), Some(hosts)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(self.error("TRL_GROUP needs <name> <limit> <host>[,<host>...]"));
        };
        let limit = parse_rate_limit(limit).map_err(|e| self.error(e.to_string()))?;
        let members: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if members.is_empty() {
            return Err(self.error("TRL_GROUP has no member hosts"));
        }
        Ok(TrlGroup {
            name: name.to_string(),
            limit,
            members,
        })
    }

    fn number<T: FromStr>(&self, keyword: &str, value: &str) -> Result<T, FdError> {
        value
            .parse()
            .map_err(|_| self.error(format!("invalid value {value:?} for {keyword}")))
    }

    fn boolean(&self, value: &str) -> Result<bool, FdError> {
        match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" => Ok(false),
            _ => Err(self.error(format!("invalid boolean value {value:?}"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> FdError {
        FdError::config(self.path, Some(self.line_number), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandwidth::RateLimit;

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = ConfigFile::read(&dir.path().join("AFD_CONFIG")).expect("missing is fine");
        assert_eq!(file, ConfigFile::default());
        let config = FdConfig::builder(dir.path()).apply_file(&file).build();
        assert_eq!(config.max_connections(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.default_ageing(), DEFAULT_AGEING);
        assert_eq!(config.removed_host_policy(), RemovedHostPolicy::Park);
        assert_eq!(config.message_max_age(), 7 * 86_400);
    }

    #[test]
    fn parses_every_keyword() {
        let text = "\
# comment
MAX_CONNECTIONS 12
DEFAULT_AGEING 7
MAX_OUTPUT_LOG_FILES 3
SWITCH_FILE_TIME 3600
REMOVED_HOST_POLICY kill
WORKER_DIR /opt/afd/bin
DEFAULT_TRANSFER_TIMEOUT 60
ARCHIVE_STEP_TIME 300
CREATE_TARGET_DIR yes
SIMULATE_SEND_MODE off
DISABLE_ARCHIVE 1
HW_CRC32 no
MAX_RETRIES 20
RETRY_BACKOFF_LIMIT 4
LOG_CHECK_INTERVAL 5
RESPECT_DO_NOT_DELETE true
TRL_GROUP wan 2M alpha,beta
";
        let file = ConfigFile::parse(text, None).expect("parse");
        let config = FdConfig::builder("/afd").apply_file(&file).build();
        assert_eq!(config.max_connections(), 12);
        assert_eq!(config.default_ageing(), 7);
        assert_eq!(config.message_max_age(), 3 * 3600);
        assert_eq!(config.removed_host_policy(), RemovedHostPolicy::Kill);
        assert_eq!(config.worker_dir(), Some(Path::new("/opt/afd/bin")));
        assert_eq!(config.default_transfer_timeout(), 60);
        assert_eq!(config.archive_step_time(), 300);
        assert!(config.disable_archive());
        assert!(!config.hw_crc32());
        assert_eq!(config.max_retries(), 20);
        assert_eq!(config.retry_backoff_limit(), 4);
        assert_eq!(config.log_check_interval(), Duration::from_secs(5));
        assert!(config.respect_do_not_delete());
        let features = config.features();
        assert!(features.contains(FeatureFlags::ENABLE_CREATE_TARGET_DIR));
        assert!(features.contains(FeatureFlags::DISABLE_ARCHIVE));
        assert!(!features.contains(FeatureFlags::ENABLE_SIMULATE_SEND_MODE));

        let group = config.trl_groups().group_of("beta").expect("group");
        assert_eq!(group.name, "wan");
        assert_eq!(group.limit, RateLimit::from_bytes(2 * 1024 * 1024));
    }

    #[test]
    fn unknown_keywords_are_not_fatal() {
        let file = ConfigFile::parse("FANCY_FEATURE on\nMAX_CONNECTIONS 3\n", None).expect("parse");
        assert_eq!(file.max_connections, Some(3));
    }

    #[test]
    fn malformed_values_report_the_line() {
        let path = Path::new("/afd/etc/AFD_CONFIG");
        let error = ConfigFile::parse("MAX_CONNECTIONS 4\nDEFAULT_AGEING 12\n", Some(path))
            .expect_err("ageing out of range");
        match error {
            FdError::Config { line, .. } => assert_eq!(line, Some(2)),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(ConfigFile::parse("CREATE_TARGET_DIR maybe\n", None).is_err());
        assert!(ConfigFile::parse("REMOVED_HOST_POLICY drop\n", None).is_err());
        assert!(ConfigFile::parse("TRL_GROUP wan 2M\n", None).is_err());
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let file = ConfigFile::parse("SIMULATE_SEND_MODE yes\nCREATE_TARGET_DIR no\n", None).expect("parse");
        let config = FdConfig::builder("/afd")
            .apply_file(&file)
            .apply_env(|key| (key == CREATE_TARGET_DIR_ENV).then(|| "1".to_string()))
            .simulate_send_mode(false)
            .build();
        assert!(!config.simulate_send_mode());
        assert!(config.features().contains(FeatureFlags::ENABLE_CREATE_TARGET_DIR));
    }

    #[test]
    fn hw_crc32_can_be_disabled_from_the_environment() {
        let config = FdConfig::builder("/afd")
            .hw_crc32(true)
            .apply_env(|key| (key == HW_CRC32_ENV).then(|| "0".to_string()))
            .build();
        assert!(!config.hw_crc32());
    }
}
