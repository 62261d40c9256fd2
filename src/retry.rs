//! Fixed retry table for model calls.
//!
//! Each failure class maps to one [`RetryRule`]. Rules are evaluated in
//! order and the first rule whose kind matches decides what happens next.

use crate::model::ErrorKind;
use std::time::Duration;

const NETWORK_BACKOFF: Duration = Duration::from_secs(1200);
const QUOTA_BACKOFF: Duration = Duration::from_secs(10_800);
const INVALID_INPUT_BACKOFF: Duration = Duration::from_secs(5);
const UNAVAILABLE_OFFSET: Duration = Duration::from_secs(10);

// 2^20 seconds is already twelve days
const MAX_EXPONENT: u32 = 20;

/// How many attempts a failure class tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptCap {
    /// Bounded only by the caller's `max_attempts`
    PerCall,
    /// Retry while the 0-based attempt index is at most this value
    UpTo(u32),
    /// Never retry
    Abort,
}

/// Delay inserted before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `2^attempt` seconds plus a fixed offset
    Exponential {
        /// Added to the exponential term
        offset: Duration,
    },
    /// Same delay every time
    Fixed(Duration),
    /// No delay
    None,
}

impl Backoff {
    /// Returns the delay to wait after the given 0-based attempt failed.
    #[must_use]
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { offset } => {
                Duration::from_secs(1u64 << attempt.min(MAX_EXPONENT)) + offset
            }
            Self::Fixed(delay) => delay,
            Self::None => Duration::ZERO,
        }
    }
}

/// One row of the retry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    /// Failure class this rule handles
    pub kind: ErrorKind,
    /// Attempt limit for the class
    pub cap: AttemptCap,
    /// Delay before the next attempt
    pub backoff: Backoff,
}

/// Outcome of consulting the table after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again
    Retry(Duration),
    /// Stop trying
    GiveUp,
}

/// Ordered list of retry rules.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// The table used for every model call.
    #[must_use]
    pub fn standard() -> Self {
        use AttemptCap::{Abort, PerCall, UpTo};

        let rule = |kind, cap, backoff| RetryRule { kind, cap, backoff };
        Self {
            rules: vec![
                rule(
                    ErrorKind::EmptyResponse,
                    PerCall,
                    Backoff::Exponential {
                        offset: Duration::ZERO,
                    },
                ),
                rule(ErrorKind::Network, UpTo(5), Backoff::Fixed(NETWORK_BACKOFF)),
                rule(
                    ErrorKind::Unavailable,
                    UpTo(3),
                    Backoff::Exponential {
                        offset: UNAVAILABLE_OFFSET,
                    },
                ),
                rule(ErrorKind::QuotaExhausted, PerCall, Backoff::Fixed(QUOTA_BACKOFF)),
                rule(ErrorKind::Authentication, Abort, Backoff::None),
                rule(
                    ErrorKind::InvalidInput,
                    UpTo(3),
                    Backoff::Fixed(INVALID_INPUT_BACKOFF),
                ),
                rule(ErrorKind::InvalidArgument, Abort, Backoff::None),
                rule(ErrorKind::Other, Abort, Backoff::None),
            ],
        }
    }

    /// Decides what follows a failed attempt.
    ///
    /// `attempt` is the 0-based index of the attempt that just failed.
    /// No retry is granted once `attempt + 1` reaches `max_attempts`, so the
    /// final attempt is never followed by a sleep.
    #[must_use]
    pub fn decide(&self, kind: ErrorKind, attempt: u32, max_attempts: u32) -> RetryDecision {
        let Some(rule) = self.rules.iter().find(|r| r.kind == kind) else {
            return RetryDecision::GiveUp;
        };

        if attempt.saturating_add(1) >= max_attempts {
            return RetryDecision::GiveUp;
        }

        match rule.cap {
            AttemptCap::Abort => RetryDecision::GiveUp,
            AttemptCap::UpTo(cap) if attempt > cap => RetryDecision::GiveUp,
            AttemptCap::UpTo(_) | AttemptCap::PerCall => {
                RetryDecision::Retry(rule.backoff.delay(attempt))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> RetryDecision {
        RetryDecision::Retry(Duration::from_secs(n))
    }

    #[test]
    fn test_empty_response_backs_off_exponentially() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.decide(ErrorKind::EmptyResponse, 0, 15), secs(1));
        assert_eq!(policy.decide(ErrorKind::EmptyResponse, 1, 15), secs(2));
        assert_eq!(policy.decide(ErrorKind::EmptyResponse, 4, 15), secs(16));
    }

    #[test]
    fn test_last_attempt_never_sleeps() {
        let policy = RetryPolicy::standard();
        assert_eq!(
            policy.decide(ErrorKind::EmptyResponse, 2, 3),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(ErrorKind::QuotaExhausted, 0, 1),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_network_cap() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.decide(ErrorKind::Network, 0, 15), secs(1200));
        assert_eq!(policy.decide(ErrorKind::Network, 5, 15), secs(1200));
        assert_eq!(policy.decide(ErrorKind::Network, 6, 15), RetryDecision::GiveUp);
    }

    #[test]
    fn test_unavailable_adds_offset() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.decide(ErrorKind::Unavailable, 0, 15), secs(11));
        assert_eq!(policy.decide(ErrorKind::Unavailable, 3, 15), secs(18));
        assert_eq!(
            policy.decide(ErrorKind::Unavailable, 4, 15),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_quota_waits_three_hours() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.decide(ErrorKind::QuotaExhausted, 9, 15), secs(10_800));
    }

    #[test]
    fn test_invalid_input_short_retry() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.decide(ErrorKind::InvalidInput, 3, 15), secs(5));
        assert_eq!(
            policy.decide(ErrorKind::InvalidInput, 4, 15),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_fatal_kinds_abort() {
        let policy = RetryPolicy::standard();
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::InvalidArgument,
            ErrorKind::Other,
        ] {
            assert_eq!(policy.decide(kind, 0, 15), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn test_every_kind_has_a_rule() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.rules.len(), 8);
        assert_eq!(policy.rules[0].kind, ErrorKind::EmptyResponse);
        assert_eq!(policy.rules[7].kind, ErrorKind::Other);
    }

    #[test]
    fn test_exponent_is_capped() {
        let backoff = Backoff::Exponential {
            offset: Duration::ZERO,
        };
        assert_eq!(backoff.delay(64), Duration::from_secs(1 << 20));
    }
}
