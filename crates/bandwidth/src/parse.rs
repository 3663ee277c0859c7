use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// A transfer-rate limit in bytes per second.
///
/// `0` in configuration and in the FSA means unlimited.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct RateLimit(Option<NonZeroU64>);

impl RateLimit {
    /// No throttling.
    pub const UNLIMITED: Self = Self(None);

    /// Limit of `bytes` per second; `0` is unlimited.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(NonZeroU64::new(bytes))
    }

    /// Raw value as stored in the FSA (`0` for unlimited).
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        match self.0 {
            Some(rate) => rate.get(),
            None => 0,
        }
    }

    /// Bytes per second, if limited.
    #[must_use]
    pub const fn rate(self) -> Option<NonZeroU64> {
        self.0
    }

    /// Returns `true` when there is no limit.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        self.0.is_none()
    }

    /// The smaller of two limits; an unlimited side never wins.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Self(Some(a.min(b))),
            (Some(a), None) => Self(Some(a)),
            (None, b) => Self(b),
        }
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("unlimited"),
            Some(rate) => write!(f, "{rate} B/s"),
        }
    }
}

impl FromStr for RateLimit {
    type Err = RateLimitParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_rate_limit(text)
    }
}

/// Errors returned when parsing a rate limit fails.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RateLimitParseError {
    /// Nothing to parse.
    #[error("empty transfer rate limit")]
    Empty,
    /// The text is not a number with an optional unit.
    #[error("invalid transfer rate limit {0:?}")]
    Invalid(String),
    /// The value does not fit 64 bits.
    #[error("transfer rate limit {0:?} is too large")]
    TooLarge(String),
}

/// Parses a transfer-rate limit such as `512K`, `1.5M`, `10MB` or `0`.
///
/// Units `K`, `M` and `G` scale by powers of 1024; a trailing `B` after the
/// unit switches to powers of 1000. A bare number is bytes per second. The
/// result is truncated to whole bytes; `0` is unlimited.
pub fn parse_rate_limit(text: &str) -> Result<RateLimit, RateLimitParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RateLimitParseError::Empty);
    }
    let invalid = || RateLimitParseError::Invalid(trimmed.to_string());
    let too_large = || RateLimitParseError::TooLarge(trimmed.to_string());

    let numeric_end = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == ','))
        .unwrap_or(trimmed.len());
    let (numeric, suffix) = trimmed.split_at(numeric_end);
    if !numeric.bytes().any(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let (integer, fraction, denominator) = parse_decimal_components(numeric).ok_or_else(invalid)?;

    let mut suffix = suffix.trim_start().chars();
    let repetitions = match suffix.next().map(|c| c.to_ascii_lowercase()) {
        None | Some('b') => 0,
        Some('k') => 1,
        Some('m') => 2,
        Some('g') => 3,
        Some(_) => return Err(invalid()),
    };
    let base: u128 = match suffix.as_str() {
        "" => 1024,
        "b" | "B" if repetitions > 0 => 1000,
        "ib" | "iB" if repetitions > 0 => 1024,
        _ => return Err(invalid()),
    };

    let scale = base.checked_pow(repetitions).ok_or_else(too_large)?;
    let bytes = integer
        .checked_mul(denominator)
        .and_then(|n| n.checked_add(fraction))
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(too_large)?
        / denominator;
    let bytes = u64::try_from(bytes).map_err(|_| too_large())?;
    Ok(RateLimit::from_bytes(bytes))
}

fn parse_decimal_components(text: &str) -> Option<(u128, u128, u128)> {
    let mut integer = 0u128;
    let mut fraction = 0u128;
    let mut denominator = 1u128;
    let mut saw_decimal = false;

    for ch in text.chars() {
        match ch {
            '0'..='9' => {
                let digit = u128::from(ch as u8 - b'0');
                if saw_decimal {
                    denominator = denominator.checked_mul(10)?;
                    fraction = fraction.checked_mul(10)?.checked_add(digit)?;
                } else {
                    integer = integer.checked_mul(10)?.checked_add(digit)?;
                }
            }
            '.' | ',' if !saw_decimal => saw_decimal = true,
            _ => return None,
        }
    }

    Some((integer, fraction, denominator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_scale_by_1024() {
        assert_eq!(parse_rate_limit("512K").expect("valid").as_bytes(), 512 * 1024);
        assert_eq!(parse_rate_limit("10M").expect("valid").as_bytes(), 10 << 20);
        assert_eq!(parse_rate_limit("1g").expect("valid").as_bytes(), 1 << 30);
        assert_eq!(parse_rate_limit("2048").expect("valid").as_bytes(), 2048);
        assert_eq!(parse_rate_limit(" 1.5K ").expect("valid").as_bytes(), 1536);
    }

    #[test]
    fn decimal_units() {
        assert_eq!(parse_rate_limit("10MB").expect("valid").as_bytes(), 10_000_000);
        assert_eq!(parse_rate_limit("1KiB").expect("valid").as_bytes(), 1024);
        assert_eq!(parse_rate_limit("100b").expect("valid").as_bytes(), 100);
    }

    #[test]
    fn zero_is_unlimited() {
        assert!(parse_rate_limit("0").expect("valid").is_unlimited());
        assert!(parse_rate_limit("0M").expect("valid").is_unlimited());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_rate_limit(""), Err(RateLimitParseError::Empty));
        for bad in ["K", "1X", "1.2.3", "-5", "1 KBB", "12bB"] {
            assert!(
                matches!(parse_rate_limit(bad), Err(RateLimitParseError::Invalid(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(matches!(
            parse_rate_limit("99999999999999999999G"),
            Err(RateLimitParseError::TooLarge(_))
        ));
    }

    #[test]
    fn min_ignores_unlimited() {
        let a = RateLimit::from_bytes(100);
        assert_eq!(a.min(RateLimit::UNLIMITED), a);
        assert_eq!(RateLimit::UNLIMITED.min(a), a);
        assert_eq!(a.min(RateLimit::from_bytes(50)).as_bytes(), 50);
        assert!(RateLimit::UNLIMITED.min(RateLimit::UNLIMITED).is_unlimited());
    }
}
