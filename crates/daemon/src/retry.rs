//! Per-host error accounting, automatic host toggling and retry timing.

use rustc_hash::FxHashMap;

use ssa::fsa::{HOST_ONE, HOST_TWO};
use ssa::HostStatus;

/// What [`record_failure`] changed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FailureOutcome {
    /// The host switched to its other real host name.
    pub toggled: bool,
    /// The error counter reached `max_errors`.
    pub limit_reached: bool,
}

/// Counts a failed transfer against `host`.
///
/// Every `max_errors` consecutive failures flip `host_toggle` when automatic
/// toggling is enabled and a second host name exists; the position before
/// the first flip is kept in `original_toggle_pos`.
pub fn record_failure(host: &mut HostStatus, code: u8, now: i64) -> FailureOutcome {
    if host.error_counter == 0 {
        host.first_error_time = now;
    }
    host.error_counter += 1;
    host.total_errors = host.total_errors.wrapping_add(1);
    host.record_error(code);
    host.last_retry_time = now;

    let limit_reached = host.max_errors > 0 && host.error_counter >= host.max_errors;
    let toggled = host.auto_toggle
        && host.has_toggle()
        && host.max_errors > 0
        && host.error_counter % host.max_errors == 0;
    if toggled {
        if host.original_toggle_pos == 0 {
            host.original_toggle_pos = host.host_toggle;
        }
        host.host_toggle = other_host(host.host_toggle);
        tracing::warn!(
            target: "fd::retry",
            host = %host.host_alias,
            errors = host.error_counter,
            now_using = %host.active_hostname(),
            "switching host after repeated errors"
        );
    }
    FailureOutcome {
        toggled,
        limit_reached,
    }
}

/// Accounts a successful transfer on `host`.
///
/// The error state is cleared unless the job ran against a temporarily
/// toggled host. Returns `true` if errors were cleared.
pub fn record_success(host: &mut HostStatus, temp_toggle: bool, now: i64) -> bool {
    host.last_connection = now;
    if temp_toggle || host.error_counter == 0 {
        return false;
    }
    host.reset_errors();
    host.first_error_time = 0;
    if host.original_toggle_pos != 0 && !host.auto_toggle {
        host.host_toggle = host.original_toggle_pos;
        host.original_toggle_pos = 0;
    }
    tracing::info!(target: "fd::retry", host = %host.host_alias, "host is working again");
    true
}

/// Host name to use for a job started with a temporary toggle.
#[must_use]
pub const fn other_host(toggle: u8) -> u8 {
    if toggle == HOST_TWO { HOST_ONE } else { HOST_TWO }
}

/// Backoff multiplier for the `retries`th attempt: `2^retries`, capped.
#[must_use]
pub fn backoff(retries: u32, limit: u32) -> u32 {
    let limit = limit.max(1);
    1_u32.checked_shl(retries).unwrap_or(u32::MAX).min(limit)
}

/// When the next attempt of a job may start.
#[must_use]
pub fn next_retry_time(now: i64, retry_interval: i32, retries: u32, limit: u32) -> i64 {
    now + i64::from(retry_interval.max(0)) * i64::from(backoff(retries, limit))
}

/// One job waiting in the error queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorJob {
    /// Message name.
    pub msg_name: String,
    /// Earliest retry.
    pub next_retry_time: i64,
}

/// Jobs that failed with persistent errors, keyed by host id.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    hosts: FxHashMap<u32, Vec<ErrorJob>>,
}

impl ErrorQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or refreshes a job of `host_id`.
    pub fn add(&mut self, host_id: u32, msg_name: &str, next_retry_time: i64) {
        let jobs = self.hosts.entry(host_id).or_default();
        match jobs.iter_mut().find(|j| j.msg_name == msg_name) {
            Some(job) => job.next_retry_time = next_retry_time,
            None => jobs.push(ErrorJob {
                msg_name: msg_name.to_string(),
                next_retry_time,
            }),
        }
    }

    /// Removes one job. Returns `true` if it was queued.
    pub fn remove(&mut self, host_id: u32, msg_name: &str) -> bool {
        let Some(jobs) = self.hosts.get_mut(&host_id) else {
            return false;
        };
        let before = jobs.len();
        jobs.retain(|j| j.msg_name != msg_name);
        let removed = jobs.len() != before;
        if jobs.is_empty() {
            self.hosts.remove(&host_id);
        }
        removed
    }

    /// Returns `true` if `msg_name` waits and its retry time is in the future.
    #[must_use]
    pub fn is_blocked(&self, host_id: u32, msg_name: &str, now: i64) -> bool {
        self.hosts
            .get(&host_id)
            .and_then(|jobs| jobs.iter().find(|j| j.msg_name == msg_name))
            .is_some_and(|j| j.next_retry_time > now)
    }

    /// Number of jobs of `host_id` that are still blocked at `now`.
    ///
    /// Jobs whose retry time has come get `retry_interval` more seconds.
    pub fn host_check_error_queue(&mut self, host_id: u32, now: i64, retry_interval: i32) -> usize {
        let Some(jobs) = self.hosts.get_mut(&host_id) else {
            return 0;
        };
        let mut blocked = 0;
        for job in jobs.iter_mut() {
            if job.next_retry_time > now {
                blocked += 1;
            } else {
                job.next_retry_time = now + i64::from(retry_interval.max(0));
            }
        }
        blocked
    }

    /// Forgets every job of `host_id`.
    pub fn clear_host(&mut self, host_id: u32) -> usize {
        self.hosts.remove(&host_id).map_or(0, |jobs| jobs.len())
    }

    /// Number of queued jobs of `host_id`.
    #[must_use]
    pub fn len_for(&self, host_id: u32) -> usize {
        self.hosts.get(&host_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggling_host() -> HostStatus {
        HostStatus {
            host_alias: "h".to_string(),
            real_hostname: ["one".to_string(), "two".to_string()],
            auto_toggle: true,
            max_errors: 2,
            ..HostStatus::default()
        }
    }

    #[test]
    fn two_failures_toggle_once_and_success_resets() {
        let mut host = toggling_host();
        assert!(!record_failure(&mut host, 20, 100).toggled);
        let second = record_failure(&mut host, 20, 110);
        assert!(second.toggled);
        assert!(second.limit_reached);
        assert_eq!(host.host_toggle, HOST_TWO);
        assert_eq!(host.original_toggle_pos, HOST_ONE);
        assert_eq!(host.error_history, [20, 20]);
        assert_eq!(host.first_error_time, 100);

        assert!(record_success(&mut host, false, 120));
        assert_eq!(host.error_counter, 0);
        assert_eq!(host.error_history, [0, 0]);
        assert_eq!(host.host_toggle, HOST_TWO);
    }

    #[test]
    fn toggling_continues_every_max_errors() {
        let mut host = toggling_host();
        let flips = (0..6)
            .filter(|i| record_failure(&mut host, 1, *i).toggled)
            .count();
        assert_eq!(flips, 3);
        assert_eq!(host.host_toggle, HOST_TWO);
        assert_eq!(host.original_toggle_pos, HOST_ONE);
    }

    #[test]
    fn no_toggle_without_second_host() {
        let mut host = toggling_host();
        host.real_hostname[1].clear();
        record_failure(&mut host, 1, 0);
        assert!(!record_failure(&mut host, 1, 0).toggled);
        assert_eq!(host.host_toggle, HOST_ONE);
    }

    #[test]
    fn success_on_temporary_toggle_keeps_errors() {
        let mut host = toggling_host();
        record_failure(&mut host, 1, 0);
        assert!(!record_success(&mut host, true, 5));
        assert_eq!(host.error_counter, 1);
        assert_eq!(host.error_history[0], 1);
    }

    #[test]
    fn manual_toggle_returns_to_original_host_on_success() {
        let mut host = toggling_host();
        host.auto_toggle = false;
        host.original_toggle_pos = HOST_ONE;
        host.host_toggle = HOST_TWO;
        host.error_counter = 1;
        record_success(&mut host, false, 5);
        assert_eq!(host.host_toggle, HOST_ONE);
        assert_eq!(host.original_toggle_pos, 0);
    }

    #[test]
    fn backoff_doubles_up_to_the_limit() {
        assert_eq!(backoff(0, 8), 1);
        assert_eq!(backoff(3, 8), 8);
        assert_eq!(backoff(10, 8), 8);
        assert_eq!(backoff(40, 1_000), 1_000);
        assert_eq!(next_retry_time(100, 60, 2, 8), 340);
        assert_eq!(next_retry_time(100, -5, 2, 8), 100);
    }

    #[test]
    fn error_queue_blocks_until_retry_time() {
        let mut queue = ErrorQueue::new();
        queue.add(7, "a", 200);
        queue.add(7, "b", 50);
        assert!(queue.is_blocked(7, "a", 100));
        assert!(!queue.is_blocked(7, "b", 100));
        assert_eq!(queue.host_check_error_queue(7, 100, 30), 1);
        assert!(queue.is_blocked(7, "b", 100));
        assert!(queue.remove(7, "a"));
        assert!(queue.remove(7, "b"));
        assert_eq!(queue.host_check_error_queue(7, 100, 30), 0);
        assert_eq!(queue.len_for(7), 0);
    }
}
