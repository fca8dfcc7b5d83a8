//! Retry policy for the queue processor.
//!
//! Failed sends back off exponentially: the n-th retry is scheduled
//! `base * 2^n` after the failure, and the budget is bounded by the
//! record's `max_retries`.

use chrono::{DateTime, Duration, Utc};

use crate::models::NotificationRecord;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY_MINUTES: i64 = 5;

/// What the processor should do with a record after a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with the new retry count at the given time.
    Retry {
        scheduled_for: DateTime<Utc>,
        retry_count: u32,
    },
    /// Retry budget spent; the record fails terminally.
    Exhausted,
}

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::minutes(DEFAULT_BASE_DELAY_MINUTES),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before retry number `retry_count` (zero-based count of
    /// failures already consumed).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        // Cap the exponent; max_retries is small so this never saturates in
        // practice, but a corrupt count must not overflow the shift.
        let exponent = retry_count.min(16);
        self.base_delay * 2_i32.pow(exponent)
    }

    /// Decide whether a record that just failed retryably gets another
    /// attempt, and when.
    pub fn next_attempt(&self, record: &NotificationRecord, now: DateTime<Utc>) -> RetryDecision {
        let next_count = record.retry_count + 1;
        if next_count > record.max_retries {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                scheduled_for: now + self.delay_for(record.retry_count),
                retry_count: next_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationChannel, NotificationKind};

    fn record_with_retries(retry_count: u32) -> NotificationRecord {
        let mut r = NotificationRecord::new(
            NotificationKind::Email,
            NotificationChannel::Reminder,
            "a@example.com".into(),
            None,
            "hi".into(),
            Utc::now(),
        );
        r.retry_count = retry_count;
        r
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::minutes(5));
        assert_eq!(policy.delay_for(1), Duration::minutes(10));
        assert_eq!(policy.delay_for(2), Duration::minutes(20));
    }

    #[test]
    fn test_budget_allows_exactly_max_retries_attempts() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let first_failure = record_with_retries(0);
        match policy.next_attempt(&first_failure, now) {
            RetryDecision::Retry {
                scheduled_for,
                retry_count,
            } => {
                assert_eq!(retry_count, 1);
                assert_eq!(scheduled_for, now + Duration::minutes(5));
            }
            RetryDecision::Exhausted => panic!("first failure must be retried"),
        }

        let last_allowed = record_with_retries(2);
        assert!(matches!(
            policy.next_attempt(&last_allowed, now),
            RetryDecision::Retry { retry_count: 3, .. }
        ));

        let spent = record_with_retries(3);
        assert_eq!(policy.next_attempt(&spent, now), RetryDecision::Exhausted);
    }
}
