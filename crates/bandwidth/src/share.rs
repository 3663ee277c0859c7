//! Splitting transfer-rate limits across running workers.
//!
//! Every host may carry a limit that is shared by all of its active
//! connections. Hosts can additionally be members of a rate-limit group whose
//! limit is shared by every active connection of every member. A worker gets
//! the smaller of its host share and its group share.

use crate::parse::RateLimit;

/// Per-host input to the share computation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostLoad<'a> {
    /// Host alias.
    pub alias: &'a str,
    /// Host-wide limit.
    pub limit: RateLimit,
    /// Running connections of the host.
    pub active: u32,
}

/// Divides `limit` among `active` connections.
///
/// Zero connections is treated as one, so the result is the rate a new
/// connection would get. A limit smaller than the number of connections
/// yields `Some(0)`, meaning the budget is exhausted.
#[must_use]
pub fn calc_trl_per_process(limit: RateLimit, active: u32) -> Option<u64> {
    limit
        .rate()
        .map(|rate| rate.get() / u64::from(active.max(1)))
}

/// A named limit shared by several hosts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrlGroup {
    /// Group name.
    pub name: String,
    /// Limit shared by all members.
    pub limit: RateLimit,
    /// Member host aliases.
    pub members: Vec<String>,
}

/// All configured rate-limit groups.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrlGroups {
    groups: Vec<TrlGroup>,
}

impl TrlGroups {
    /// Wraps a list of groups.
    #[must_use]
    pub fn new(groups: Vec<TrlGroup>) -> Self {
        Self { groups }
    }

    /// Adds a group.
    pub fn push(&mut self, group: TrlGroup) {
        self.groups.push(group);
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` when no group is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group containing `alias`.
    #[must_use]
    pub fn group_of(&self, alias: &str) -> Option<&TrlGroup> {
        self.groups
            .iter()
            .find(|g| g.members.iter().any(|m| m == alias))
    }

    /// Per-process share for `host`, given the load of all hosts.
    ///
    /// Returns [`RateShare::Unlimited`] when neither the host nor its group
    /// is limited.
    #[must_use]
    pub fn share_for(&self, host: &HostLoad<'_>, all: &[HostLoad<'_>]) -> RateShare {
        let host_share = calc_trl_per_process(host.limit, host.active);
        let group_share = self.group_of(host.alias).and_then(|group| {
            let active: u32 = all
                .iter()
                .filter(|h| group.members.iter().any(|m| m == h.alias))
                .map(|h| h.active)
                .sum();
            calc_trl_per_process(group.limit, active)
        });
        match (host_share, group_share) {
            (None, None) => RateShare::Unlimited,
            (Some(a), Some(b)) => RateShare::from_bytes(a.min(b)),
            (Some(a), None) | (None, Some(a)) => RateShare::from_bytes(a),
        }
    }
}

/// Outcome of a share computation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateShare {
    /// No limit applies.
    Unlimited,
    /// Each process may use this many bytes per second.
    Limited(u64),
    /// The limit is smaller than the number of connections.
    Exhausted,
}

impl RateShare {
    fn from_bytes(bytes: u64) -> Self {
        if bytes == 0 {
            Self::Exhausted
        } else {
            Self::Limited(bytes)
        }
    }

    /// Returns `true` if a new worker may start.
    #[must_use]
    pub const fn allows_dispatch(self) -> bool {
        !matches!(self, Self::Exhausted)
    }

    /// Value for the FSA `trl_per_process` field (`0` for unlimited).
    #[must_use]
    pub const fn as_fsa_value(self) -> u64 {
        match self {
            Self::Unlimited | Self::Exhausted => 0,
            Self::Limited(bytes) => bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(alias: &str, limit: u64, active: u32) -> HostLoad<'_> {
        HostLoad {
            alias,
            limit: RateLimit::from_bytes(limit),
            active,
        }
    }

    #[test]
    fn host_limit_is_split_evenly() {
        assert_eq!(calc_trl_per_process(RateLimit::from_bytes(1000), 4), Some(250));
        assert_eq!(calc_trl_per_process(RateLimit::from_bytes(1000), 0), Some(1000));
        assert_eq!(calc_trl_per_process(RateLimit::UNLIMITED, 3), None);
        assert_eq!(calc_trl_per_process(RateLimit::from_bytes(2), 3), Some(0));
    }

    #[test]
    fn group_share_caps_host_share() {
        let groups = TrlGroups::new(vec![TrlGroup {
            name: "wan".to_string(),
            limit: RateLimit::from_bytes(900),
            members: vec!["a".to_string(), "b".to_string()],
        }]);
        let all = [load("a", 1000, 1), load("b", 0, 2), load("c", 0, 5)];

        assert_eq!(groups.share_for(&all[0], &all), RateShare::Limited(300));
        assert_eq!(groups.share_for(&all[1], &all), RateShare::Limited(300));
        assert_eq!(groups.share_for(&all[2], &all), RateShare::Unlimited);
        assert_eq!(groups.group_of("b").map(|g| g.name.as_str()), Some("wan"));
    }

    #[test]
    fn exhausted_budget_blocks_dispatch() {
        let groups = TrlGroups::default();
        let host = load("a", 1, 2);
        let share = groups.share_for(&host, std::slice::from_ref(&host));
        assert_eq!(share, RateShare::Exhausted);
        assert!(!share.allows_dispatch());
        assert_eq!(share.as_fsa_value(), 0);
        assert!(RateShare::Unlimited.allows_dispatch());
    }

    proptest::proptest! {
        #[test]
        fn shares_never_exceed_the_limit(limit in 1u64..u64::MAX / 64, active in 1u32..64) {
            let share = calc_trl_per_process(RateLimit::from_bytes(limit), active).expect("limited");
            proptest::prop_assert!(share * u64::from(active) <= limit);
        }
    }
}
